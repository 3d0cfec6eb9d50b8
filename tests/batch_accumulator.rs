//! Batch accumulator behaviour under a virtual clock.

mod common;

use common::{accumulator, batch_of, user, EchoBackend};
use futures::future::join_all;
use llm_serving::backend::BackendError;
use llm_serving::batch::{BatchConfig, FlushPhase};
use llm_serving::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn config(max_batch_size: usize, flush_ms: u64) -> BatchConfig {
    BatchConfig::new()
        .with_max_batch_size(max_batch_size)
        .with_flush_timeout(Duration::from_millis(flush_ms))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_submissions_share_one_batch() {
    let (acc, sink) = accumulator(Arc::new(EchoBackend::new()), config(64, 50));

    let handles: Vec<_> = (0..20)
        .map(|i| acc.submit(user(&format!("r{}", i))).unwrap())
        .collect();
    let responses: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(sink.batch_sizes(), vec![20]);
    let first = batch_of(&responses[0]).to_string();
    assert!(responses.iter().all(|r| batch_of(r) == first));
    assert_eq!(acc.stats().total_batches, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_across_threads() {
    let (acc, sink) = accumulator(Arc::new(EchoBackend::new()), config(64, 200));
    let barrier = Arc::new(tokio::sync::Barrier::new(16));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let acc = acc.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                acc.submit_and_wait(user(&format!("t{}", i))).await
            })
        })
        .collect();

    for task in join_all(tasks).await {
        assert!(task.unwrap().is_ok());
    }
    assert_eq!(sink.batch_sizes(), vec![16]);
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_follow_submission_order() {
    let (acc, _) = accumulator(Arc::new(EchoBackend::new()), config(10, 100));

    let handles: Vec<_> = (0..10)
        .map(|i| acc.submit(user(&format!("r{}", i))).unwrap())
        .collect();
    let responses = join_all(handles).await;

    for (i, response) in responses.into_iter().enumerate() {
        let response = response.unwrap();
        assert_eq!(response.response, format!("r{}", i));
        assert!(response.id.ends_with(&format!("-{}", i)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_batches_never_exceed_max_size() {
    let (acc, sink) = accumulator(Arc::new(EchoBackend::new()), config(8, 100));

    let handles: Vec<_> = (0..20).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    for response in join_all(handles).await {
        assert!(response.is_ok());
    }

    assert_eq!(sink.batch_sizes(), vec![8, 8, 4]);
    assert_eq!(acc.stats().total_requests, 20);
}

#[tokio::test(start_paused = true)]
async fn test_lone_request_waits_out_flush_timeout() {
    let (acc, _) = accumulator(Arc::new(EchoBackend::new()), config(32, 100));
    let start = Instant::now();
    let mut handle = acc.submit(user("alone")).unwrap();

    tokio::time::sleep(Duration::from_millis(99)).await;
    assert!(handle.try_take().is_none());
    assert_eq!(acc.phase(), FlushPhase::Waiting);

    let response = handle.await.unwrap();
    assert_eq!(response.response, "alone");
    assert_eq!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_flushes_before_timeout() {
    let (acc, sink) = accumulator(Arc::new(EchoBackend::new()), config(4, 10_000));
    let start = Instant::now();

    let handles: Vec<_> = (0..4).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    join_all(handles).await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(sink.batch_sizes(), vec![4]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_does_not_affect_batch_mates() {
    let backend = Arc::new(EchoBackend::new());
    let (acc, _) = accumulator(backend.clone(), config(5, 100));

    let texts = ["ok0", "ok1", "fail", "ok3", "ok4"];
    let handles: Vec<_> = texts.iter().map(|t| acc.submit(user(t)).unwrap()).collect();
    let outcomes = join_all(handles).await;

    for (i, outcome) in outcomes.iter().enumerate() {
        if i == 2 {
            assert!(matches!(outcome, Err(Error::Backend(_))));
        } else {
            assert_eq!(outcome.as_ref().unwrap().response, texts[i]);
        }
    }

    let next = acc.submit_and_wait(user("ok5")).await.unwrap();
    assert_eq!(next.response, "ok5");
    assert_eq!(backend.calls(), 6);

    let stats = acc.stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.total_batches, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_preflight_only_fails_its_batch() {
    let backend = Arc::new(EchoBackend::new().failing_preflights(1));
    let (acc, _) = accumulator(backend.clone(), config(3, 100));

    let first: Vec<_> = (0..3).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    let first = join_all(first).await;
    let mut failed_ids = Vec::new();
    for outcome in &first {
        match outcome {
            Err(Error::BatchDispatch { batch_id, .. }) => failed_ids.push(batch_id.clone()),
            other => panic!("expected dispatch failure, got {:?}", other),
        }
    }
    failed_ids.dedup();
    assert_eq!(failed_ids.len(), 1);
    assert_eq!(backend.calls(), 0);

    let second: Vec<_> = (0..3).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    for outcome in join_all(second).await {
        assert!(outcome.is_ok());
    }
    assert_eq!(acc.stats().failed_requests, 3);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_call_fails_only_its_request() {
    let backend = Arc::new(EchoBackend::new());
    let (acc, sink) = accumulator(backend.clone(), config(3, 100));

    let handles: Vec<_> = ["a", "panic", "c"]
        .iter()
        .map(|t| acc.submit(user(t)).unwrap())
        .collect();
    let outcomes = join_all(handles).await;

    assert_eq!(outcomes[0].as_ref().unwrap().response, "a");
    assert!(matches!(
        outcomes[1],
        Err(Error::Backend(BackendError::Panicked(_)))
    ));
    assert_eq!(outcomes[2].as_ref().unwrap().response, "c");
    assert_eq!(backend.calls(), 3);

    // Prometheus sink and the stats endpoint agree on the batch.
    assert_eq!(sink.batch_sizes(), vec![3]);
    let stats = acc.stats();
    assert_eq!(stats.total_batches, 1);
    assert_eq!(stats.failed_requests, 1);

    let after = acc.submit_and_wait(user("recovered")).await.unwrap();
    assert_eq!(after.response, "recovered");
    assert_eq!(acc.phase(), FlushPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stats_running_average() {
    let (acc, _) = accumulator(Arc::new(EchoBackend::new()), config(8, 50));

    for size in [4usize, 8, 2] {
        let handles: Vec<_> = (0..size).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
        join_all(handles).await;
    }

    let stats = acc.stats();
    assert_eq!(stats.total_batches, 3);
    assert_eq!(stats.total_requests, 14);
    assert!((stats.avg_batch_size - 4.667).abs() < 1e-3);
    assert!(stats.last_batch_duration_ms.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_queue_saturation_rejects_synchronously() {
    let config = config(10, 1_000).with_max_queue_depth(3);
    let (acc, _) = accumulator(Arc::new(EchoBackend::new()), config);

    let handles: Vec<_> = (0..3).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    match acc.submit(user("overflow")) {
        Err(Error::QueueSaturated { depth, limit }) => {
            assert_eq!(depth, 3);
            assert_eq!(limit, 3);
        }
        other => panic!("expected saturation, got {:?}", other.map(|h| h.id())),
    }
    assert_eq!(acc.stats().rejected_requests, 1);

    join_all(handles).await;
    assert!(acc.submit_and_wait(user("room again")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_dispatch() {
    let (acc, sink) = accumulator(Arc::new(EchoBackend::new()), config(8, 100));

    let first = acc.submit(user("withdrawn")).unwrap();
    let mut second = acc.submit(user("kept")).unwrap();
    assert!(acc.cancel(&first));
    assert!(matches!(first.await, Err(Error::Cancelled)));

    let kept = (&mut second).await.unwrap();
    assert_eq!(kept.response, "kept");
    assert!(!acc.cancel(&second));

    assert_eq!(sink.batch_sizes(), vec![1]);
    assert_eq!(acc.stats().cancelled_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_leaves_queue() {
    let backend = Arc::new(EchoBackend::new());
    let (acc, _) = accumulator(backend.clone(), config(8, 100));

    let handle = acc.submit(user("abandoned")).unwrap();
    assert_eq!(acc.queue_depth(), 1);
    drop(handle);
    assert_eq!(acc.queue_depth(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.calls(), 0);
    assert_eq!(acc.phase(), FlushPhase::Idle);
    assert_eq!(acc.stats().cancelled_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_dispatch_has_no_effect() {
    let backend = Arc::new(EchoBackend::new().with_delay(Duration::from_millis(500)));
    let (acc, sink) = accumulator(backend.clone(), config(8, 100));

    let kept = acc.submit(user("in flight")).unwrap();
    let abandoned = acc.submit(user("abandoned in flight")).unwrap();

    // Past the window, both calls are running on the backend.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.calls(), 2);
    assert_eq!(acc.queue_depth(), 0);

    assert!(!acc.cancel(&kept));
    drop(abandoned);
    assert_eq!(acc.stats().cancelled_requests, 0);

    let response = kept.await.unwrap();
    assert_eq!(response.response, "in flight");
    assert_eq!(backend.calls(), 2);
    assert_eq!(sink.batch_sizes(), vec![2]);
    assert_eq!(acc.stats().total_batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_outcome_is_taken_once() {
    let (acc, _) = accumulator(Arc::new(EchoBackend::new()), config(1, 10));
    let mut handle = acc.submit(user("once")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(handle.try_take().unwrap().unwrap().response, "once");
    assert!(handle.try_take().is_none());
    match handle.await {
        Err(Error::Runtime { message, .. }) => assert!(message.contains("already taken")),
        other => panic!("expected spent handle, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_queue() {
    let (acc, sink) = accumulator(Arc::new(EchoBackend::new()), config(2, 10_000));
    let start = Instant::now();

    let mut handles: Vec<_> = (0..3).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    acc.shutdown().await;

    assert!(start.elapsed() < Duration::from_secs(10));
    for handle in handles.iter_mut() {
        assert!(matches!(handle.try_take(), Some(Ok(_))));
    }
    assert_eq!(sink.batch_sizes(), vec![2, 1]);
    assert!(matches!(acc.submit(user("late")), Err(Error::Shutdown)));
    assert!(acc.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_keeps_batches_sequential() {
    let backend = Arc::new(EchoBackend::new().with_delay(Duration::from_millis(500)));
    let (acc, sink) = accumulator(backend, config(2, 10));
    let start = Instant::now();

    let handles: Vec<_> = (0..4).map(|i| acc.submit(user(&i.to_string())).unwrap()).collect();
    for outcome in join_all(handles).await {
        assert!(outcome.is_ok());
    }

    assert_eq!(sink.batch_sizes(), vec![2, 2]);
    assert!(start.elapsed() >= Duration::from_millis(1000));
}
