mod common;

use std::time::Duration;

use api::{
    Delivery, JobId, JobStats, JobStatus, LifecycleEvent, Operation, ProgressEvent, QueueError,
    Topic, ValidationError, format_sse,
};
use tokio::sync::mpsc::UnboundedReceiver;
use common::{start_runtime, start_slow_runtime, wait_for_terminal};
use futures_util::StreamExt;
use serde_json::json;

fn parse_op(user: &str) -> Operation {
    Operation::new(
        "ingredient.parse",
        json!({ "imageUrl": "https://img.example/fridge.jpg", "userId": user }),
    )
}

#[tokio::test]
async fn submitted_job_is_pending_until_a_worker_leases_it() {
    let runtime = start_runtime(0).await;
    let service = runtime.service().clone();

    let job_id = service.submit(parse_op("u1")).await.unwrap();
    let snapshot = service.get_job(job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Pending);
    assert_eq!(snapshot.progress, 0);
    assert_eq!(snapshot.attempts, 0);
    assert_eq!(snapshot.kind, "ingredient.parse");

    let pending = service.list_jobs(JobStatus::Pending, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, job_id);

    runtime.shutdown().await;
}

#[tokio::test]
async fn ingredient_parse_runs_end_to_end() {
    let runtime = start_runtime(2).await;
    let service = runtime.service().clone();

    // Subscribe before submitting so no event is missed
    let (subscription, mut rx) = service.bus().subscribe_pattern_channel("job:*").unwrap();

    let job_id = service.submit(parse_op("u1")).await.unwrap();
    let snapshot = wait_for_terminal(&service, job_id).await;
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.attempts, 1);
    assert_eq!(snapshot.result.unwrap()["count"], 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut stages = Vec::new();
    let mut lifecycle = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        if delivery.topic.ends_with(":progress") {
            let event: ProgressEvent = delivery.decode().unwrap();
            assert_eq!(event.job_id, job_id);
            stages.push((event.stage, event.progress));
        } else {
            lifecycle.push(delivery.decode::<LifecycleEvent>().unwrap());
        }
    }
    service.unsubscribe(&subscription);

    let progress: Vec<u8> = stages.iter().map(|(_, p)| *p).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        stages.last().map(|(s, p)| (s.as_str(), *p)),
        Some(("completed", 100))
    );

    assert!(matches!(lifecycle.first(), Some(LifecycleEvent::Started { .. })));
    assert_eq!(lifecycle.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(
        lifecycle.last(),
        Some(LifecycleEvent::Completed { attempts: 1, .. })
    ));

    runtime.shutdown().await;
}

fn drain<T: serde::de::DeserializeOwned>(rx: &mut UnboundedReceiver<Delivery>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(delivery) = rx.try_recv() {
        out.push(delivery.decode().unwrap());
    }
    out
}

#[tokio::test]
async fn job_topics_follow_one_job() {
    let runtime = start_slow_runtime(1, Duration::from_millis(100)).await;
    let service = runtime.service().clone();

    let (all_sub, mut all_rx) = service.subscribe_all_lifecycle().unwrap();
    let job_id = service.submit(parse_op("u3")).await.unwrap();
    let (progress_sub, mut progress_rx) = service.subscribe_progress(job_id);
    let (lifecycle_sub, mut lifecycle_rx) = service.subscribe_lifecycle(job_id);

    wait_for_terminal(&service, job_id).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let progress: Vec<ProgressEvent> = drain(&mut progress_rx);
    let stages: Vec<(&str, u8)> = progress
        .iter()
        .map(|e| (e.stage.as_str(), e.progress))
        .collect();
    assert_eq!(
        stages,
        [
            ("extracting", 30),
            ("enriching", 60),
            ("recording", 90),
            ("completed", 100)
        ]
    );
    assert!(progress.iter().all(|e| e.job_id == job_id && e.attempt == 1));

    let lifecycle: Vec<LifecycleEvent> = drain(&mut lifecycle_rx);
    assert!(lifecycle.iter().all(|e| e.job_id() == job_id));
    assert_eq!(lifecycle.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(
        lifecycle.last(),
        Some(LifecycleEvent::Completed { attempts: 1, .. })
    ));

    let everything: Vec<LifecycleEvent> = drain(&mut all_rx);
    assert!(matches!(
        everything.first(),
        Some(LifecycleEvent::Started { job_id: id, .. }) if *id == job_id
    ));
    assert_eq!(everything.last(), lifecycle.last());

    service.unsubscribe(&progress_sub);
    service.unsubscribe(&lifecycle_sub);
    service.unsubscribe(&all_sub);
    assert_eq!(service.bus().subscriber_count(Topic::progress(job_id).as_str()), 0);
    assert_eq!(service.bus().subscriber_count(Topic::lifecycle(job_id).as_str()), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn invalid_operations_are_never_enqueued() {
    let runtime = start_runtime(1).await;
    let service = runtime.service();

    let err = service.submit(parse_op("")).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::InvalidField { .. })
    ));

    let err = service
        .submit(Operation::new("video.transcode", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::Validation(ValidationError::UnknownOperation(_))
    ));

    assert_eq!(service.stats().await.unwrap(), JobStats::default());

    runtime.shutdown().await;
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let runtime = start_runtime(0).await;

    let missing = JobId::new();
    let err = runtime.service().get_job(missing).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(id) if id == missing));

    runtime.shutdown().await;
}

#[tokio::test]
async fn stats_count_jobs_by_status() {
    let runtime = start_runtime(1).await;
    let service = runtime.service().clone();

    let done = service.submit(parse_op("u1")).await.unwrap();
    wait_for_terminal(&service, done).await;

    let usage = Operation::new(
        "usage.record",
        json!({ "userId": "u1", "kind": "import", "quantity": 1 }),
    );
    let second = service.submit(usage).await.unwrap();
    wait_for_terminal(&service, second).await;

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.pending + stats.active + stats.failed, 0);
    assert_eq!(stats.total(), 2);

    runtime.shutdown().await;
}

#[tokio::test]
async fn job_event_stream_ends_with_the_terminal_event() {
    let runtime = start_slow_runtime(1, Duration::from_millis(100)).await;
    let service = runtime.service().clone();

    let job_id = service.submit(parse_op("u2")).await.unwrap();
    let stream = service.job_events(job_id).unwrap();

    let frames: Vec<String> = tokio::time::timeout(
        Duration::from_secs(10),
        stream.map(|delivery| format_sse(&delivery)).collect(),
    )
    .await
    .expect("stream did not end");

    assert!(frames.iter().any(|f| f.starts_with("event: progress\n")));
    assert!(frames.iter().all(|f| f.ends_with("\n\n")));
    let last = frames.last().unwrap();
    assert!(last.starts_with("event: lifecycle\n"));
    assert!(last.contains("\"event\":\"completed\""));

    runtime.shutdown().await;
}
