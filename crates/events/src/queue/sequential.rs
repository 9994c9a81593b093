use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use eventbus_core::Event;

use super::{EventQueue, QueueCapacity, QueueError, QueueSlot, Watermarks};

/// Extracts the correlation key of an event. `None` means the event is unconstrained.
pub type KeyExtractor = Arc<dyn Fn(&Event) -> Option<String> + Send + Sync>;

enum ReadyEntry {
    /// Head of the pending list for this key.
    Keyed(String),
    Unkeyed(QueueSlot),
}

/// Invariant: a key has an entry in `ready` iff it is not checked out and has pending
/// slots; the entry is indexed by the arrival sequence of the key's oldest slot.
#[derive(Default)]
struct State {
    next_seq: u64,
    len: usize,
    pending: HashMap<String, VecDeque<(u64, QueueSlot)>>,
    ready: BTreeMap<u64, ReadyEntry>,
    checked_out: HashSet<String>,
    full: bool,
    interrupted: bool,
}

impl State {
    fn schedule_head(&mut self, key: String) {
        if let Some((seq, _)) = self.pending.get(&key).and_then(VecDeque::front) {
            let seq = *seq;
            self.ready.insert(seq, ReadyEntry::Keyed(key));
        }
    }

    fn take_ready(&mut self) -> Option<QueueSlot> {
        let (_, entry) = self.ready.pop_first()?;
        let slot = match entry {
            ReadyEntry::Unkeyed(slot) => slot,
            ReadyEntry::Keyed(key) => {
                let queue = self.pending.get_mut(&key)?;
                let (_, slot) = queue.pop_front()?;
                if queue.is_empty() {
                    self.pending.remove(&key);
                }
                self.checked_out.insert(key);
                slot
            }
        };
        self.len -= 1;
        Some(slot)
    }
}

/// Key-sequential intake queue.
///
/// Events sharing a correlation key are handed out one at a time and in arrival order:
/// after a key's event is dequeued, no other event with that key becomes eligible until
/// [`EventQueue::complete`] is called for it. `dequeue` hands out the oldest eligible
/// event across all keys.
pub struct SequentialEventQueue {
    watermarks: Watermarks,
    key_of: KeyExtractor,
    state: Mutex<State>,
    available: Condvar,
}

impl core::fmt::Debug for SequentialEventQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("SequentialEventQueue")
            .field("len", &state.len)
            .field("checked_out", &state.checked_out.len())
            .finish()
    }
}

impl SequentialEventQueue {
    pub fn new<F>(capacity: QueueCapacity, key_of: F) -> Self
    where
        F: Fn(&Event) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            watermarks: capacity.watermarks(),
            key_of: Arc::new(key_of),
            state: Mutex::new(State::default()),
            available: Condvar::new(),
        }
    }

    /// Key events by a string or number field of their content.
    pub fn by_content_field(capacity: QueueCapacity, field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(capacity, move |event| {
            event.body().content().get(&field).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
    }

    /// Keys currently checked out to workers.
    pub fn checked_out(&self) -> usize {
        self.lock().checked_out.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventQueue for SequentialEventQueue {
    fn push(&self, slot: QueueSlot) {
        let key = (self.key_of)(&slot.event);
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.len += 1;

        let became_ready = match key {
            None => {
                state.ready.insert(seq, ReadyEntry::Unkeyed(slot));
                true
            }
            Some(key) => {
                let queue = state.pending.entry(key.clone()).or_default();
                let was_idle = queue.is_empty();
                queue.push_back((seq, slot));
                if was_idle && !state.checked_out.contains(&key) {
                    state.ready.insert(seq, ReadyEntry::Keyed(key));
                    true
                } else {
                    false
                }
            }
        };

        let len = state.len;
        self.watermarks.update(len, &mut state.full);
        drop(state);
        if became_ready {
            self.available.notify_one();
        }
    }

    fn dequeue(&self) -> Result<QueueSlot, QueueError> {
        let mut state = self.lock();
        loop {
            if state.interrupted {
                return Err(QueueError::Interrupted);
            }
            if let Some(slot) = state.take_ready() {
                let len = state.len;
                self.watermarks.update(len, &mut state.full);
                return Ok(slot);
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn size(&self) -> usize {
        self.lock().len
    }

    fn is_full(&self) -> bool {
        self.lock().full
    }

    fn is_low_water_mark(&self) -> bool {
        self.watermarks.is_low(self.size())
    }

    fn complete(&self, event: &Event) {
        let Some(key) = (self.key_of)(event) else {
            return;
        };
        let mut state = self.lock();
        if !state.checked_out.remove(&key) {
            return;
        }
        let had_next = state.pending.contains_key(&key);
        state.schedule_head(key);
        drop(state);
        if had_next {
            self.available.notify_one();
        }
    }

    fn interrupt(&self) {
        self.lock().interrupted = true;
        self.available.notify_all();
    }
}
