use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bus::{BusError, PubSub};
use queue_core::{JobId, ProgressEvent, Topic};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn publish_without_subscribers_reaches_nobody() {
    let bus = PubSub::new();
    assert_eq!(bus.publish("nobody:home", &Ping { n: 1 }).unwrap(), 0);
}

#[tokio::test]
async fn subscriber_sees_events_in_publish_order() {
    let bus = PubSub::new();
    let job_id = JobId::new();
    let topic = Topic::progress(job_id);
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.subscribe(topic.as_str(), move |event: ProgressEvent| {
        let _ = tx.send(event);
    })
    .unwrap();

    for (stage, progress) in [("extracting", 25), ("enriching", 50), ("storing", 90)] {
        let event = ProgressEvent::new(job_id, 1, stage, progress);
        assert_eq!(bus.publish(topic.as_str(), &event).unwrap(), 1);
    }

    let stages: Vec<String> = vec![
        next(&mut rx).await.stage,
        next(&mut rx).await.stage,
        next(&mut rx).await.stage,
    ];
    assert_eq!(stages, ["extracting", "enriching", "storing"]);
}

#[tokio::test]
async fn late_subscriber_gets_no_replay() {
    let bus = PubSub::new();
    bus.publish("t", &Ping { n: 1 }).unwrap();

    let (_sub, mut rx) = bus.subscribe_channel("t");
    bus.publish("t", &Ping { n: 2 }).unwrap();

    let first: Ping = next(&mut rx).await.decode().unwrap();
    assert_eq!(first, Ping { n: 2 });
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn pattern_subscription_receives_concrete_topic() {
    let bus = PubSub::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    bus.subscribe_pattern(Topic::all_lifecycle_pattern(), move |topic, ping: Ping| {
        let _ = tx.send((topic, ping));
    })
    .unwrap();

    let a = Topic::lifecycle(JobId::new());
    let b = Topic::progress(JobId::new());
    assert_eq!(bus.publish(a.as_str(), &Ping { n: 1 }).unwrap(), 1);
    assert_eq!(bus.publish(b.as_str(), &Ping { n: 2 }).unwrap(), 0);

    let (topic, ping) = next(&mut rx).await;
    assert_eq!(topic, a.as_str());
    assert_eq!(ping.n, 1);
}

#[tokio::test]
async fn malformed_event_is_dropped_without_affecting_others() {
    let bus = PubSub::new();
    let (typed_tx, mut typed_rx) = mpsc::unbounded_channel();
    let (raw_sub, mut raw_rx) = bus.subscribe_channel("mixed");

    bus.subscribe("mixed", move |ping: Ping| {
        let _ = typed_tx.send(ping);
    })
    .unwrap();

    assert_eq!(bus.publish("mixed", &"not a ping").unwrap(), 2);
    assert_eq!(bus.publish("mixed", &Ping { n: 7 }).unwrap(), 2);

    // The typed subscriber skips the bad event and keeps going.
    assert_eq!(next(&mut typed_rx).await, Ping { n: 7 });
    assert_eq!(next(&mut raw_rx).await.payload.as_ref(), "\"not a ping\"");

    bus.unsubscribe(&raw_sub);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let bus = PubSub::new();
    let sub = bus.subscribe("t", |_: Ping| {}).unwrap();
    let pattern_sub = bus.subscribe_pattern("t*", |_, _: Ping| {}).unwrap();
    assert_eq!(bus.subscriber_count("t"), 2);

    bus.unsubscribe(&sub);
    bus.unsubscribe(&sub);
    bus.unsubscribe(&pattern_sub);
    bus.unsubscribe(&pattern_sub);

    assert_eq!(bus.subscriber_count("t"), 0);
    assert_eq!(bus.publish("t", &Ping { n: 1 }).unwrap(), 0);
}

#[tokio::test]
async fn dropped_receivers_are_pruned() {
    let bus = PubSub::new();
    let (_sub, rx) = bus.subscribe_channel("t");
    drop(rx);

    assert_eq!(bus.publish("t", &Ping { n: 1 }).unwrap(), 0);
    assert_eq!(bus.subscriber_count("t"), 0);
}

#[tokio::test]
async fn invalid_pattern_is_rejected() {
    let bus = PubSub::new();
    let result = bus.subscribe_pattern("job:[", |_, _: Ping| {});
    assert!(matches!(result, Err(BusError::InvalidPattern { .. })));
}

#[tokio::test]
async fn unsubscribe_drops_queued_callback_events() {
    let bus = PubSub::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let sub = bus
        .subscribe("t", move |_: Ping| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // The dispatch task has not run yet on this single-threaded runtime
    for n in 0..3 {
        assert_eq!(bus.publish("t", &Ping { n }).unwrap(), 1);
    }
    bus.unsubscribe(&sub);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 0);
}

#[test]
fn callback_subscriptions_need_a_runtime() {
    let bus = PubSub::new();

    let result = bus.subscribe("t", |_: Ping| {});
    assert!(matches!(result, Err(BusError::NoRuntime)));
    let result = bus.subscribe_pattern("t*", |_, _: Ping| {});
    assert!(matches!(result, Err(BusError::NoRuntime)));

    assert_eq!(bus.subscriber_count("t"), 0);
}
