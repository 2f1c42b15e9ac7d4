use super::*;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Handler that reports each call and then parks until a permit is released
fn gated_handler(
    gate: Arc<Semaphore>,
    calls: mpsc::UnboundedSender<Payload>,
) -> Handler {
    handler(move |payload| {
        let gate = Arc::clone(&gate);
        let calls = calls.clone();
        async move {
            let _ = calls.send(payload);
            gate.acquire().await?.forget();
            Ok::<(), anyhow::Error>(())
        }
    })
}

async fn wait_idle(dispatcher: &Dispatcher) {
    for _ in 0..100 {
        if !dispatcher.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("handler never released the running flag");
}

#[tokio::test]
async fn test_serialized_drops_while_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(
        "jobs".to_string(),
        gated_handler(Arc::clone(&gate), calls_tx),
        true,
    );

    assert!(dispatcher.dispatch(Payload::Raw("m1".to_string())));
    assert_eq!(calls_rx.recv().await, Some(Payload::Raw("m1".to_string())));

    // M1 still parked on the gate: M2 is dropped
    assert!(!dispatcher.dispatch(Payload::Raw("m2".to_string())));

    gate.add_permits(1);
    wait_idle(&dispatcher).await;

    // Guard released: the next message goes through
    assert!(dispatcher.dispatch(Payload::Raw("m3".to_string())));
    assert_eq!(calls_rx.recv().await, Some(Payload::Raw("m3".to_string())));
    gate.add_permits(1);
    wait_idle(&dispatcher).await;

    assert!(calls_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_allows_overlap() {
    let gate = Arc::new(Semaphore::new(0));
    let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(
        "jobs".to_string(),
        gated_handler(Arc::clone(&gate), calls_tx),
        false,
    );

    assert!(dispatcher.dispatch(Payload::Raw("m1".to_string())));
    assert!(dispatcher.dispatch(Payload::Raw("m2".to_string())));

    let mut seen = vec![calls_rx.recv().await.unwrap(), calls_rx.recv().await.unwrap()];
    seen.sort_by_key(|p| p.as_raw().map(str::to_string));
    assert_eq!(
        seen,
        vec![Payload::Raw("m1".to_string()), Payload::Raw("m2".to_string())]
    );

    gate.add_permits(2);
}

#[tokio::test]
async fn test_failing_handler_releases_guard() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let dispatcher = Dispatcher::new(
        "jobs".to_string(),
        handler(move |_payload| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("handler failure")
            }
        }),
        true,
    );

    assert!(dispatcher.dispatch(Payload::Raw("m1".to_string())));
    wait_idle(&dispatcher).await;
    assert!(dispatcher.dispatch(Payload::Raw("m2".to_string())));
    wait_idle(&dispatcher).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panicking_handler_releases_guard() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let dispatcher = Dispatcher::new(
        "jobs".to_string(),
        handler(move |payload| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if payload.as_raw() == Some("boom") {
                    panic!("handler panicked");
                }
                Ok(())
            }
        }),
        true,
    );

    assert!(dispatcher.dispatch(Payload::Raw("boom".to_string())));
    wait_idle(&dispatcher).await;
    assert!(dispatcher.dispatch(Payload::Raw("fine".to_string())));
    wait_idle(&dispatcher).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panic_before_first_await_releases_guard() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let panicking: Handler = Arc::new(move |payload: Payload| -> HandlerFuture {
        counter.fetch_add(1, Ordering::SeqCst);
        if payload.as_raw() == Some("boom") {
            panic!("handler panicked while building its future");
        }
        Box::pin(async { Ok::<(), anyhow::Error>(()) })
    });
    let dispatcher = Dispatcher::new("jobs".to_string(), panicking, true);

    assert!(dispatcher.dispatch(Payload::Raw("boom".to_string())));
    assert!(!dispatcher.is_running());
    assert!(dispatcher.dispatch(Payload::Raw("fine".to_string())));
    wait_idle(&dispatcher).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ── Ordering ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_invocations_start_in_arrival_order() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let recording: Handler = Arc::new(move |payload: Payload| -> HandlerFuture {
        if let Some(n) = payload.as_json().and_then(|v| v["m"].as_u64()) {
            record.lock().push(n);
        }
        Box::pin(async { Ok::<(), anyhow::Error>(()) })
    });
    let dispatcher = Dispatcher::new("jobs".to_string(), recording, false);

    for m in 0..2000u64 {
        assert!(dispatcher.dispatch(Payload::Json(serde_json::json!({ "m": m }))));
    }

    let seen = seen.lock().clone();
    assert_eq!(seen, (0..2000).collect::<Vec<u64>>());
}
