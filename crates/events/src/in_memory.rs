//! In-memory transport and repositories for tests/dev.
//!
//! - No IO
//! - Deterministic partitioning (by event id hash)
//! - Failure injection for sends, commits and inserts

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use eventbus_core::{DeliveryState, Event, EventId, RepositoryError, TransportError};

use crate::transport::{ReadStream, Record, SendCallback, TopicPartition, WriteStream};

/// Maximum records returned by one `poll`.
const MAX_POLL_RECORDS: usize = 500;

#[derive(Debug, Default)]
struct TransportState {
    logs: BTreeMap<TopicPartition, Vec<Event>>,
    positions: HashMap<TopicPartition, u64>,
    committed: HashMap<TopicPartition, u64>,
    commits: Vec<(TopicPartition, u64)>,
    sent: Vec<Event>,
    fail_sends: usize,
    fail_commits: usize,
    closed: bool,
}

/// Partitioned in-memory log implementing both transport streams.
///
/// `send` appends to the destination topic and completes the callback inline on the
/// caller's thread. `poll` reads every partition from its read position; `commit`
/// records the acknowledged offset. [`InMemoryTransport::rewind_to_committed`] simulates a
/// consumer restart (uncommitted records are redelivered).
#[derive(Debug)]
pub struct InMemoryTransport {
    partitions: u32,
    state: Mutex<TransportState>,
    appended: Condvar,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryTransport {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(TransportState::default()),
            appended: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn partition_for(&self, event: &Event) -> TopicPartition {
        let mut hasher = DefaultHasher::new();
        event.id().hash(&mut hasher);
        let partition = (hasher.finish() % u64::from(self.partitions)) as u32;
        TopicPartition::new(event.destination(), partition)
    }

    /// Append directly to the log (as another producer would); returns the record position.
    pub fn publish(&self, event: Event) -> (TopicPartition, u64) {
        let tp = self.partition_for(&event);
        let mut state = self.lock();
        let log = state.logs.entry(tp.clone()).or_default();
        log.push(event);
        let offset = (log.len() - 1) as u64;
        drop(state);
        self.appended.notify_all();
        (tp, offset)
    }

    /// Fail the next `n` sends with a transport error.
    pub fn fail_next_sends(&self, n: usize) {
        self.lock().fail_sends = n;
    }

    /// Fail the next `n` commits with a transport error.
    pub fn fail_next_commits(&self, n: usize) {
        self.lock().fail_commits = n;
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.appended.notify_all();
    }

    /// Events successfully sent through [`WriteStream::send`], in transmission order.
    pub fn sent(&self) -> Vec<Event> {
        self.lock().sent.clone()
    }

    /// Last committed offset of a partition (the next offset to read after a restart).
    pub fn committed(&self, partition: &TopicPartition) -> Option<u64> {
        self.lock().committed.get(partition).copied()
    }

    /// Every commit request accepted so far, in order.
    pub fn commits(&self) -> Vec<(TopicPartition, u64)> {
        self.lock().commits.clone()
    }

    /// Reset read positions to the committed offsets.
    pub fn rewind_to_committed(&self) {
        let mut state = self.lock();
        let committed = state.committed.clone();
        state.positions.clear();
        state.positions.extend(committed);
    }

    fn take_batch(state: &mut TransportState) -> Vec<Record> {
        let mut batch = Vec::new();
        let TransportState { logs, positions, .. } = state;
        for (tp, log) in logs.iter() {
            let position = positions.entry(tp.clone()).or_insert(0);
            while (*position as usize) < log.len() && batch.len() < MAX_POLL_RECORDS {
                let offset = *position;
                batch.push(Record::new(tp.clone(), offset, log[offset as usize].clone()));
                *position += 1;
            }
        }
        batch
    }
}

impl WriteStream for InMemoryTransport {
    fn send(&self, event: Event, on_complete: SendCallback) {
        let mut state = self.lock();
        let result = if state.closed {
            Err(TransportError::Closed)
        } else if state.fail_sends > 0 {
            state.fail_sends -= 1;
            Err(TransportError::send("injected send failure"))
        } else {
            let tp = self.partition_for(&event);
            state.logs.entry(tp).or_default().push(event.clone());
            state.sent.push(event.clone());
            Ok(())
        };
        drop(state);

        if result.is_ok() {
            self.appended.notify_all();
        }
        on_complete(event, result);
    }
}

impl ReadStream for InMemoryTransport {
    fn poll(&self, timeout: Duration) -> Result<Vec<Record>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(TransportError::Closed);
            }
            let batch = Self::take_batch(&mut state);
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            let (guard, _) = self
                .appended
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn commit(&self, partition: &TopicPartition, offset: u64) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.fail_commits > 0 {
            state.fail_commits -= 1;
            return Err(TransportError::commit("injected commit failure"));
        }
        let entry = state.committed.entry(partition.clone()).or_insert(0);
        *entry = (*entry).max(offset);
        state.commits.push((partition.clone(), offset));
        Ok(())
    }
}

/// Predicate deciding which events a repository persists.
pub type PersistPolicy = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
struct StoredEvent {
    event: Event,
    state: DeliveryState,
    failures: u32,
}

/// Producer repository keeping events in insertion order.
///
/// Failed events stay eligible for resend until they failed `max_attempts` times.
pub struct InMemoryProducerRepository {
    entries: Mutex<Vec<StoredEvent>>,
    policy: Option<PersistPolicy>,
    max_attempts: u32,
    fail_inserts: Mutex<bool>,
}

impl core::fmt::Debug for InMemoryProducerRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryProducerRepository")
            .field("entries", &self.len())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Default for InMemoryProducerRepository {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            policy: None,
            max_attempts: 3,
            fail_inserts: Mutex::new(false),
        }
    }
}

impl InMemoryProducerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy<P>(mut self, policy: P) -> Self
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Make every subsequent `insert` fail with a storage error.
    pub fn set_fail_inserts(&self, fail: bool) {
        *self.fail_inserts.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    pub fn state(&self, id: EventId) -> Option<DeliveryState> {
        self.entries
            .lock()
            .ok()?
            .iter()
            .find(|e| e.event.id() == id)
            .map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl crate::repository::ProducerRepository for InMemoryProducerRepository {
    fn insert(&self, event: &Event) -> Result<(), RepositoryError> {
        if *self.fail_inserts.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(RepositoryError::storage("injected insert failure"));
        }
        let mut entries = self.entries.lock().map_err(|_| RepositoryError::Poisoned)?;
        entries.push(StoredEvent {
            event: event.clone(),
            state: DeliveryState::Pending,
            failures: 0,
        });
        Ok(())
    }

    fn waiting_for_send(&self, limit: usize) -> Result<Vec<Event>, RepositoryError> {
        let entries = self.entries.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(entries
            .iter()
            .filter(|e| match e.state {
                DeliveryState::Pending => true,
                DeliveryState::Failed => e.failures < self.max_attempts,
                _ => false,
            })
            .take(limit)
            .map(|e| e.event.clone())
            .collect())
    }

    fn mark(&self, event_id: EventId, state: DeliveryState) -> Result<(), RepositoryError> {
        let mut entries = self.entries.lock().map_err(|_| RepositoryError::Poisoned)?;
        let stored = entries
            .iter_mut()
            .find(|e| e.event.id() == event_id)
            .ok_or(RepositoryError::NotFound(event_id))?;
        stored.state = state;
        if state == DeliveryState::Failed {
            stored.failures += 1;
        }
        Ok(())
    }

    fn should_persist(&self, event: &Event) -> bool {
        self.policy.as_ref().is_none_or(|p| p(event))
    }
}

#[derive(Debug, Default)]
struct ConsumerState {
    order: Vec<EventId>,
    entries: HashMap<EventId, (Event, DeliveryState)>,
}

/// Consumer repository: atomic duplicate detection plus consume-state tracking.
#[derive(Default)]
pub struct InMemoryConsumerRepository {
    state: Mutex<ConsumerState>,
    policy: Option<PersistPolicy>,
}

impl core::fmt::Debug for InMemoryConsumerRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryConsumerRepository")
            .field("entries", &self.len())
            .finish()
    }
}

impl InMemoryConsumerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy<P>(mut self, policy: P) -> Self
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    pub fn state(&self, id: EventId) -> Option<DeliveryState> {
        self.state.lock().ok()?.entries.get(&id).map(|(_, s)| *s)
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl crate::repository::ConsumerRepository for InMemoryConsumerRepository {
    fn insert(&self, event: &Event) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().map_err(|_| RepositoryError::Poisoned)?;
        if state.entries.contains_key(&event.id()) {
            return Ok(true);
        }
        state
            .entries
            .insert(event.id(), (event.clone(), DeliveryState::Pending));
        state.order.push(event.id());
        Ok(false)
    }

    fn waiting_for_consume(&self, limit: usize) -> Result<Vec<Event>, RepositoryError> {
        let state = self.state.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .filter(|(_, s)| !s.is_terminal())
            .take(limit)
            .map(|(e, _)| e.clone())
            .collect())
    }

    fn mark(&self, event_id: EventId, new_state: DeliveryState) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().map_err(|_| RepositoryError::Poisoned)?;
        let (_, s) = state
            .entries
            .get_mut(&event_id)
            .ok_or(RepositoryError::NotFound(event_id))?;
        *s = new_state;
        Ok(())
    }

    fn is_consumed(&self, event_id: EventId) -> Result<bool, RepositoryError> {
        let state = self.state.lock().map_err(|_| RepositoryError::Poisoned)?;
        Ok(state
            .entries
            .get(&event_id)
            .is_some_and(|(_, s)| s.is_terminal()))
    }

    fn should_persist(&self, event: &Event) -> bool {
        self.policy.as_ref().is_none_or(|p| p(event))
    }
}
