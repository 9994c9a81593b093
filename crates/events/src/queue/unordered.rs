use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use eventbus_core::Event;

use super::{EventQueue, QueueCapacity, QueueError, QueueSlot, Watermarks};

#[derive(Debug, Default)]
struct State {
    items: VecDeque<QueueSlot>,
    full: bool,
    interrupted: bool,
}

/// Plain FIFO intake queue; `complete` is bookkeeping only.
#[derive(Debug)]
pub struct UnorderedEventQueue {
    watermarks: Watermarks,
    state: Mutex<State>,
    available: Condvar,
}

impl UnorderedEventQueue {
    pub fn new(capacity: QueueCapacity) -> Self {
        Self {
            watermarks: capacity.watermarks(),
            state: Mutex::new(State::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventQueue for UnorderedEventQueue {
    fn push(&self, slot: QueueSlot) {
        let mut state = self.lock();
        state.items.push_back(slot);
        let len = state.items.len();
        self.watermarks.update(len, &mut state.full);
        drop(state);
        self.available.notify_one();
    }

    fn dequeue(&self) -> Result<QueueSlot, QueueError> {
        let mut state = self.lock();
        loop {
            if state.interrupted {
                return Err(QueueError::Interrupted);
            }
            if let Some(slot) = state.items.pop_front() {
                let len = state.items.len();
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
        self.lock().items.len()
    }

    fn is_full(&self) -> bool {
        self.lock().full
    }

    fn is_low_water_mark(&self) -> bool {
        self.watermarks.is_low(self.size())
    }

    fn complete(&self, _event: &Event) {}

    fn interrupt(&self) {
        self.lock().interrupted = true;
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn event(n: u32) -> Event {
        let mut content = serde_json::Map::new();
        content.insert("n".into(), n.into());
        Event::new("orders", "order", "created", content)
    }

    #[test]
    fn dequeues_in_arrival_order() {
        let queue = UnorderedEventQueue::new(QueueCapacity::new(10));
        let events: Vec<_> = (0..3).map(event).collect();
        queue.enqueue_all(events.clone());

        for expected in &events {
            assert_eq!(queue.dequeue().unwrap().event.id(), expected.id());
        }
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn is_full_latches_until_low_watermark() {
        let queue = UnorderedEventQueue::new(QueueCapacity::new(4));
        for n in 0..4 {
            queue.enqueue(event(n));
        }
        assert!(queue.is_full());

        queue.dequeue().unwrap();
        assert!(queue.is_full(), "3 of 4 is above the low watermark");
        assert!(!queue.is_low_water_mark());

        queue.dequeue().unwrap();
        assert!(!queue.is_full());
        assert!(queue.is_low_water_mark());
    }

    #[test]
    fn enqueue_beyond_capacity_is_accepted() {
        let queue = UnorderedEventQueue::new(QueueCapacity::new(2));
        for n in 0..5 {
            queue.enqueue(event(n));
        }
        assert_eq!(queue.size(), 5);
    }

    #[test]
    fn interrupt_wakes_blocked_dequeue() {
        let queue = Arc::new(UnorderedEventQueue::new(QueueCapacity::new(4)));
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.interrupt();
        assert_eq!(waiter.join().unwrap().unwrap_err(), QueueError::Interrupted);
    }

    #[test]
    fn blocked_dequeue_receives_later_enqueue() {
        let queue = Arc::new(UnorderedEventQueue::new(QueueCapacity::new(4)));
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue().map(|slot| slot.event.id()))
        };

        let ev = event(1);
        let id = ev.id();
        thread::sleep(Duration::from_millis(10));
        queue.enqueue(ev);
        assert_eq!(waiter.join().unwrap().unwrap(), id);
    }
}
