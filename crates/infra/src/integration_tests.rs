//! Integration tests for the full pipeline.
//!
//! Producer -> InMemoryTransport -> ReadLoop -> Consumer -> handlers, with offset commits.
//!
//! Verifies:
//! - Every sent event reaches its handler and the committed offsets cover the log
//! - Duplicates never reach a handler, including after a redelivery
//! - Events sharing a key are handled in arrival order
//! - The retry scheduler drains a backlog without waiting for its period

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use eventbus_core::{DeliveryState, Event};
    use eventbus_events::{
        HandlerRegistry, InMemoryConsumerRepository, InMemoryProducerRepository,
        InMemoryTransport, TopicPartition, handler_fn,
    };

    use crate::config::{ConsumerConfig, ProducerConfig};
    use crate::consumer::{Consumer, ReadLoop};
    use crate::offsets::OffsetCommitTracker;
    use crate::producer::Producer;
    use crate::test_support::wait_until;

    fn order_event(order_id: &str, seq: u64) -> Event {
        let content = json!({ "order_id": order_id, "seq": seq });
        let serde_json::Value::Object(content) = content else {
            unreachable!("object literal");
        };
        Event::new("orders", "order", "updated", content)
    }

    fn consumer_config() -> ConsumerConfig {
        ConsumerConfig::default()
            .with_worker_pool_size(4)
            .with_poll_timeout(Duration::from_millis(10))
    }

    fn counting_registry(hits: &Arc<AtomicUsize>) -> Arc<HandlerRegistry> {
        let registry = Arc::new(HandlerRegistry::new());
        let hits = hits.clone();
        registry.register(
            Some("orders"),
            Some("order"),
            handler_fn(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        registry
    }

    fn log_lengths(transport: &InMemoryTransport, events: &[Event]) -> HashMap<TopicPartition, u64> {
        let mut lengths = HashMap::new();
        for event in events {
            *lengths.entry(transport.partition_for(event)).or_insert(0) += 1;
        }
        lengths
    }

    #[test]
    fn produced_events_are_handled_and_committed() {
        eventbus_observability::init_for_tests();
        let transport = Arc::new(InMemoryTransport::new(3));

        let producer_repo = Arc::new(InMemoryProducerRepository::new());
        let producer = Producer::builder(
            ProducerConfig::default().with_fetch_period_ms(10),
            transport.clone(),
        )
        .with_repository(producer_repo.clone())
        .start();

        let hits = Arc::new(AtomicUsize::new(0));
        let consumer_repo = Arc::new(InMemoryConsumerRepository::new());
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(consumer_config(), counting_registry(&hits))
            .with_repository(consumer_repo.clone())
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();
        let reader = ReadLoop::new(consumer.clone(), transport.clone()).spawn();

        let events: Vec<_> = (0..20).map(|n| order_event("o-1", n)).collect();
        for event in &events {
            producer.send(event.clone()).unwrap();
        }

        assert!(wait_until(|| hits.load(Ordering::SeqCst) == events.len()));
        for event in &events {
            assert!(wait_until(|| producer_repo.state(event.id()) == Some(DeliveryState::Succeeded)));
        }

        let expected = log_lengths(&transport, &events);
        assert!(wait_until(|| expected
            .iter()
            .all(|(tp, len)| transport.committed(tp) == Some(*len))));

        reader.shutdown();
        assert_eq!(producer.close(), 0);
        assert_eq!(consumer.close(), 0);
        assert_eq!(consumer_repo.len(), events.len());
    }

    #[test]
    fn duplicate_event_reaches_no_handler() {
        let transport = Arc::new(InMemoryTransport::new(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(consumer_config(), counting_registry(&hits))
            .with_repository(Arc::new(InMemoryConsumerRepository::new()))
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();

        let event = order_event("o-1", 1);
        let (tp, _) = transport.publish(event.clone());
        transport.publish(event);

        let reader = ReadLoop::new(consumer.clone(), transport.clone());
        reader.poll_once().unwrap();
        assert!(wait_until(|| consumer.wait_for_handle() == 0));
        reader.poll_once().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // The duplicate's offset is completed too, so the commit covers both records.
        assert_eq!(transport.committed(&tp), Some(2));
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn failed_commit_keeps_offsets_and_redelivery_is_dropped() {
        let transport = Arc::new(InMemoryTransport::new(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = Mutex::new(gate);
        let registry = Arc::new(HandlerRegistry::new());
        {
            let hits = hits.clone();
            registry.register(
                None,
                None,
                handler_fn(move |_, _| {
                    let _ = gate.lock().unwrap().recv();
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        let offsets = Arc::new(OffsetCommitTracker::new());
        let consumer = Consumer::builder(consumer_config(), registry)
            .with_offset_tracker(offsets.clone())
            .start()
            .unwrap();
        let tp = TopicPartition::new("orders", 0);
        for n in 0..3 {
            transport.publish(order_event("o-1", n));
        }

        // Handlers are held until the first commit attempt can only fail.
        let reader = ReadLoop::new(consumer.clone(), transport.clone());
        assert_eq!(reader.poll_once().unwrap(), 3);
        assert!(transport.commits().is_empty());

        transport.fail_next_commits(1);
        drop(release);
        assert!(wait_until(|| consumer.wait_for_handle() == 0));
        reader.poll_once().unwrap();
        assert_eq!(transport.committed(&tp), None);
        assert_eq!(offsets.in_flight(&tp), 3);

        // Redelivered records are still tracked: nothing is dispatched twice.
        transport.rewind_to_committed();
        assert_eq!(reader.poll_once().unwrap(), 0);
        assert_eq!(transport.committed(&tp), Some(3));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(consumer.close(), 0);
    }

    #[test]
    fn sequential_consumer_keeps_per_key_order() {
        let transport = Arc::new(InMemoryTransport::new(1));
        let seen: Arc<Mutex<HashMap<String, Vec<u64>>>> = Arc::default();
        let registry = Arc::new(HandlerRegistry::new());
        {
            let seen = seen.clone();
            registry.register(
                Some("orders"),
                None,
                handler_fn(move |event, _| {
                    let content = event.body().content();
                    let key = content["order_id"].as_str().unwrap_or_default().to_string();
                    let seq = content["seq"].as_u64().unwrap_or_default();
                    std::thread::sleep(Duration::from_millis(1));
                    seen.lock().unwrap().entry(key).or_default().push(seq);
                    Ok(())
                }),
            );
        }

        let consumer = Consumer::builder(consumer_config(), registry)
            .sequential_by(|event| {
                event.body().content()["order_id"]
                    .as_str()
                    .map(str::to_string)
            })
            .start()
            .unwrap();

        for seq in 0..15 {
            for key in ["a", "b", "c"] {
                transport.publish(order_event(key, seq));
            }
        }

        let reader = ReadLoop::new(consumer.clone(), transport.clone());
        assert_eq!(reader.poll_once().unwrap(), 45);
        assert_eq!(consumer.close(), 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for seqs in seen.values() {
            assert_eq!(*seqs, (0..15).collect::<Vec<_>>());
        }
    }

    #[test]
    fn retry_scheduler_drains_backlog_without_waiting_for_its_period() {
        let transport = Arc::new(InMemoryTransport::new(1));
        let repo = Arc::new(InMemoryProducerRepository::new());
        let producer = Producer::builder(
            ProducerConfig::default()
                .with_fetch_period_ms(60_000)
                .with_fetch_count(1),
            transport.clone(),
        )
        .with_repository(repo.clone())
        .start();

        let events: Vec<_> = (0..3).map(|n| order_event("o-1", n)).collect();
        for event in &events {
            producer.send(event.clone()).unwrap();
        }
        assert!(transport.sent().is_empty(), "persisted events wait for the scheduler");

        let scheduler = producer.retry_scheduler().unwrap();
        scheduler.tick(&producer);

        assert!(wait_until(|| transport.sent().len() == 3));
        for event in &events {
            assert!(wait_until(|| repo.state(event.id()) == Some(DeliveryState::Succeeded)));
        }
        assert!(transport.sent().iter().all(Event::is_resent));
        assert!(scheduler.stats().immediate_reschedules >= 2);
        assert_eq!(producer.close(), 0);
    }
}
