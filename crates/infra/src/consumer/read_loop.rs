//! Transport read loop: poll, hand records to the consumer, apply backpressure, commit.

use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use eventbus_core::TransportError;
use eventbus_events::ReadStream;

use super::{Consumer, Intake};

#[derive(Debug, Default)]
struct PauseState {
    paused_at: Option<Instant>,
    pause_count: u64,
    resume_count: u64,
    last_pause: Option<Duration>,
}

/// Backpressure counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadLoopStats {
    pub paused: bool,
    pub pause_count: u64,
    pub resume_count: u64,
    pub last_pause_ms: Option<u64>,
}

/// Pulls records from a [`ReadStream`] into a [`Consumer`].
///
/// Reading pauses while the intake queue is full and resumes once it drained to the low
/// watermark. Completed offsets are committed after every poll, paused or not.
pub struct ReadLoop {
    consumer: Consumer,
    stream: Arc<dyn ReadStream>,
    pause: Mutex<PauseState>,
}

impl core::fmt::Debug for ReadLoop {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadLoop")
            .field("consumer", &self.consumer)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ReadLoop {
    pub fn new(consumer: Consumer, stream: Arc<dyn ReadStream>) -> Self {
        Self {
            consumer,
            stream,
            pause: Mutex::new(PauseState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PauseState> {
        self.pause.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn paused(&self) -> bool {
        self.lock().paused_at.is_some()
    }

    pub fn pause_count(&self) -> u64 {
        self.lock().pause_count
    }

    /// Length of the most recent completed pause.
    pub fn last_pause(&self) -> Option<Duration> {
        self.lock().last_pause
    }

    pub fn stats(&self) -> ReadLoopStats {
        let state = self.lock();
        ReadLoopStats {
            paused: state.paused_at.is_some(),
            pause_count: state.pause_count,
            resume_count: state.resume_count,
            last_pause_ms: state.last_pause.map(|d| d.as_millis() as u64),
        }
    }

    /// One iteration: returns the number of records enqueued for dispatch.
    pub fn poll_once(&self) -> Result<usize, TransportError> {
        self.apply_backpressure();
        if self.paused() {
            self.commit();
            return Ok(0);
        }

        let records = self.stream.poll(self.consumer.config().poll_timeout)?;
        let polled = records.len();
        let mut enqueued = 0;
        for record in records {
            match self.consumer.accept_record(record) {
                Ok(Intake::Enqueued) => enqueued += 1,
                Ok(Intake::Duplicate) => {}
                Err(err) => {
                    warn!(error = %err, "consumer rejected polled records");
                    break;
                }
            }
        }
        if polled > 0 {
            debug!(polled, enqueued, "records polled");
        }

        self.apply_backpressure();
        self.commit();
        Ok(enqueued)
    }

    fn apply_backpressure(&self) {
        let queue = self.consumer.queue();
        let mut state = self.lock();
        let paused_at = state.paused_at;
        match paused_at {
            None if queue.is_full() => {
                state.paused_at = Some(Instant::now());
                state.pause_count += 1;
                info!(queued = queue.size(), pauses = state.pause_count, "intake queue full, reading paused");
                self.consumer.metrics().read_paused();
            }
            Some(since) if queue.is_low_water_mark() => {
                let paused_for = since.elapsed();
                state.paused_at = None;
                state.resume_count += 1;
                state.last_pause = Some(paused_for);
                info!(
                    queued = queue.size(),
                    paused_ms = paused_for.as_millis() as u64,
                    "intake queue drained, reading resumed"
                );
                self.consumer.metrics().read_resumed();
            }
            _ => {}
        }
    }

    fn commit(&self) {
        if let Some(offsets) = self.consumer.offsets() {
            let report = offsets.commit_tick(self.stream.as_ref());
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "offsets kept for the next commit");
            }
        }
    }

    /// Run the loop on a named background thread until shut down, the consumer closes
    /// or the transport reports it is closed.
    pub fn spawn(self) -> ReadLoopHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let read_loop = Arc::new(self);
        let name = format!("{}-reader", read_loop.consumer.config().name);
        let backoff = read_loop.consumer.config().poll_timeout;

        let worker = Arc::clone(&read_loop);
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!(reader = %name, "read loop started");
                loop {
                    if should_stop(&shutdown_rx, Duration::ZERO) || worker.consumer.is_closed() {
                        break;
                    }
                    match worker.poll_once() {
                        Ok(_) if worker.paused() => {
                            if should_stop(&shutdown_rx, backoff) {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(TransportError::Closed) => {
                            info!(reader = %name, "transport closed");
                            break;
                        }
                        Err(err) => {
                            error!(reader = %name, error = %err, "poll failed");
                            if should_stop(&shutdown_rx, backoff) {
                                break;
                            }
                        }
                    }
                }
                worker.commit();
                info!(reader = %name, "read loop stopped");
            })
            .expect("failed to spawn read loop thread");

        ReadLoopHandle {
            read_loop,
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

/// Waits up to `timeout` for a shutdown signal.
fn should_stop(rx: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    match rx.recv_timeout(timeout) {
        Err(mpsc::RecvTimeoutError::Timeout) => false,
        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
    }
}

/// Handle to a running [`ReadLoop`].
#[derive(Debug)]
pub struct ReadLoopHandle {
    read_loop: Arc<ReadLoop>,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ReadLoopHandle {
    pub fn read_loop(&self) -> &ReadLoop {
        &self.read_loop
    }

    /// Stop polling and wait for the in-progress poll (and final commit) to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use eventbus_core::Event;
    use eventbus_events::{HandlerRegistry, InMemoryTransport, TopicPartition, handler_fn};
    use eventbus_observability::InMemoryMetrics;

    use crate::config::ConsumerConfig;
    use crate::offsets::OffsetCommitTracker;
    use crate::test_support::wait_until;

    fn event() -> Event {
        Event::new("orders", "order", "created", Default::default())
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig::default()
            .with_worker_pool_size(1)
            .with_poll_timeout(Duration::from_millis(10))
            .with_blocked_threshold_ms(0)
    }

    #[test]
    fn pauses_when_full_and_resumes_at_low_water() {
        let (release, gate) = mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            None,
            None,
            handler_fn(move |_, _| {
                let _ = gate.lock().unwrap().recv();
                Ok(())
            }),
        );

        let metrics = Arc::new(InMemoryMetrics::new());
        let consumer = Consumer::builder(config().with_max_quota(4), registry)
            .with_metrics(metrics.clone())
            .start()
            .unwrap();
        let transport = Arc::new(InMemoryTransport::new(1));
        for _ in 0..6 {
            transport.publish(event());
        }

        let read_loop = ReadLoop::new(consumer.clone(), transport.clone());
        assert_eq!(read_loop.poll_once().unwrap(), 6);
        assert!(read_loop.paused());

        transport.publish(event());
        assert_eq!(read_loop.poll_once().unwrap(), 0, "paused loop does not poll");
        assert_eq!(read_loop.pause_count(), 1);

        // Dropping the sender unblocks every handler call.
        drop(release);
        assert!(wait_until(|| consumer.queue().is_low_water_mark()));
        assert_eq!(read_loop.poll_once().unwrap(), 1);
        assert!(!read_loop.paused());
        assert!(read_loop.last_pause().is_some());

        let stats = read_loop.stats();
        assert_eq!((stats.pause_count, stats.resume_count), (1, 1));
        assert_eq!(metrics.snapshot().read_paused, 1);
        assert_eq!(metrics.snapshot().read_resumed, 1);
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn completed_offsets_are_committed() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(None, None, handler_fn(|_, _| Ok(())));
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(config(), registry)
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();

        let transport = Arc::new(InMemoryTransport::new(1));
        for _ in 0..3 {
            transport.publish(event());
        }
        let tp = TopicPartition::new("orders", 0);

        let read_loop = ReadLoop::new(consumer.clone(), transport.clone());
        assert_eq!(read_loop.poll_once().unwrap(), 3);
        assert!(wait_until(|| consumer.wait_for_handle() == 0));
        read_loop.poll_once().unwrap();

        assert_eq!(transport.committed(&tp), Some(3));
        assert_eq!(offsets.in_flight(&tp), 0);
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn failing_and_panicking_handlers_still_advance_the_commit() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(None, Some("bad"), handler_fn(|_, _| anyhow::bail!("rejected")));
        registry.register(
            None,
            Some("worse"),
            handler_fn(|_, _| -> anyhow::Result<()> { panic!("handler bug") }),
        );
        registry.register(None, Some("order"), handler_fn(|_, _| Ok(())));
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(config(), registry)
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();

        let transport = Arc::new(InMemoryTransport::new(1));
        for resource in ["order", "bad", "worse", "order"] {
            transport.publish(Event::new("orders", resource, "created", Default::default()));
        }
        let tp = TopicPartition::new("orders", 0);

        let read_loop = ReadLoop::new(consumer.clone(), transport.clone());
        assert_eq!(read_loop.poll_once().unwrap(), 4);
        assert!(wait_until(|| consumer.wait_for_handle() == 0));
        read_loop.poll_once().unwrap();

        assert_eq!(transport.committed(&tp), Some(4));
        assert_eq!(offsets.in_flight(&tp), 0);
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn spawned_loop_dispatches_until_shutdown() {
        let hits = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(HandlerRegistry::new());
        {
            let hits = hits.clone();
            registry.register(
                Some("orders"),
                None,
                handler_fn(move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        let consumer = Consumer::builder(config().with_worker_pool_size(2), registry)
            .start()
            .unwrap();
        let transport = Arc::new(InMemoryTransport::new(2));

        let handle = ReadLoop::new(consumer.clone(), transport.clone()).spawn();
        for _ in 0..10 {
            transport.publish(event());
        }
        assert!(wait_until(|| hits.load(Ordering::SeqCst) == 10));
        assert!(!handle.read_loop().paused());

        handle.shutdown();
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn closed_transport_stops_the_loop() {
        let consumer = Consumer::builder(config(), Arc::new(HandlerRegistry::new()))
            .start()
            .unwrap();
        let transport = Arc::new(InMemoryTransport::new(1));
        transport.close();

        let read_loop = ReadLoop::new(consumer.clone(), transport);
        assert_eq!(read_loop.poll_once(), Err(TransportError::Closed));
        // The spawned thread exits on its own; shutdown only joins it.
        read_loop.spawn().shutdown();
        assert_eq!(consumer.close(), 0);
    }
}
