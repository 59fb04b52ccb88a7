//! Worker loop behavior: drain-until-shutdown, the per-event budget,
//! and the periodic stuck sweep.

mod common;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use sluice_core::event::{AttemptStatus, EventState};
use sluice_core::ports::EngineStore;
use sluice_engine::{
    run_stuck_sweeper, ActionDispatcher, EmailMode, EventBroadcaster, RuleEngine, Worker,
    WorkerConfig,
};

use common::MemoryStore;

async fn spawn_slow_server(delay: Duration) -> SocketAddr {
    let app = axum::Router::new().route(
        "/hook",
        axum::routing::any(move || async move {
            tokio::time::sleep(delay).await;
            axum::http::StatusCode::OK
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

fn build_worker(
    store: &Arc<MemoryStore>,
    broadcaster: EventBroadcaster,
    config: WorkerConfig,
    shutdown: CancellationToken,
    email_mode: EmailMode,
    webhook_timeout: Duration,
) -> Worker {
    let engine_store = Arc::clone(store) as Arc<dyn EngineStore>;
    let engine = Arc::new(RuleEngine::new(
        Arc::clone(&engine_store),
        ActionDispatcher::new(webhook_timeout, email_mode),
        broadcaster.clone(),
    ));
    Worker::new(0, engine_store, engine, broadcaster, config, shutdown)
}

/// Polls until the condition holds or five seconds elapse.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn worker_drains_pending_events_and_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule(
        "paid orders",
        "order.created",
        json!({"==": [{"var": "status"}, "paid"]}),
        json!({"type": "log", "params": {"level": "info", "message": "ok"}}),
    );
    let first = store.push_event("evt-1", "order.created", json!({"status": "paid"}));
    let second = store.push_event("evt-2", "order.created", json!({"status": "void"}));

    let broadcaster = EventBroadcaster::new();
    let mut updates = broadcaster.subscribe();
    let shutdown = CancellationToken::new();
    let worker = build_worker(
        &store,
        broadcaster,
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            processing_timeout: Duration::from_secs(5),
        },
        shutdown.clone(),
        EmailMode::Disabled,
        Duration::from_secs(1),
    );
    let handle = tokio::spawn(worker.run());

    {
        let store = Arc::clone(&store);
        wait_until(move || {
            store.event(first).state == EventState::Processed
                && store.event(second).state == EventState::Processed
        })
        .await;
    }

    shutdown.cancel();
    handle.await.unwrap();

    // State-change hints were published for both finalizations.
    let update = updates.recv().await.unwrap();
    assert_eq!(update.state, EventState::Processed);
    let update = updates.recv().await.unwrap();
    assert_eq!(update.state, EventState::Processed);
}

#[tokio::test]
async fn worker_enforces_the_per_event_budget() {
    // Webhook hangs well past the event budget; the webhook timeout is
    // larger so the event-wide budget is the one that fires.
    let addr = spawn_slow_server(Duration::from_secs(10)).await;
    let store = Arc::new(MemoryStore::new());
    store.add_rule(
        "slow hook",
        "order.created",
        json!({"==": [{"var": "status"}, "paid"]}),
        json!({"type": "call_webhook", "params": {
            "url": format!("http://{addr}/hook"), "method": "POST"
        }}),
    );
    let event_id = store.push_event("evt-slow", "order.created", json!({"status": "paid"}));

    let shutdown = CancellationToken::new();
    let worker = build_worker(
        &store,
        EventBroadcaster::new(),
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            processing_timeout: Duration::from_millis(200),
        },
        shutdown.clone(),
        EmailMode::Disabled,
        Duration::from_secs(30),
    );
    let handle = tokio::spawn(worker.run());

    {
        let store = Arc::clone(&store);
        wait_until(move || {
            store
                .try_attempt(1)
                .is_some_and(|a| a.status == Some(AttemptStatus::Failed))
        })
        .await;
    }

    shutdown.cancel();
    handle.await.unwrap();

    let attempt = store.attempt(1);
    assert!(attempt
        .error
        .as_deref()
        .unwrap()
        .contains("exceeded timeout"));
    // The event went back to pending for a fresh claim.
    let event = store.event(event_id);
    assert_eq!(event.state, EventState::Pending);
    assert!(event.processing_started_at.is_none());
}

#[tokio::test]
async fn sweeper_requeues_expired_leases() {
    let store = Arc::new(MemoryStore::new());
    let event_id = store.push_event("evt-stranded", "order.created", json!({}));
    let attempt_id = store.strand_in_processing(event_id, 600);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(run_stuck_sweeper(
        Arc::clone(&store) as Arc<dyn EngineStore>,
        EventBroadcaster::new(),
        Duration::from_millis(20),
        300,
        shutdown.clone(),
    ));

    {
        let store = Arc::clone(&store);
        wait_until(move || store.event(event_id).state == EventState::Pending).await;
    }

    shutdown.cancel();
    handle.await.unwrap();

    let attempt = store.attempt(attempt_id);
    assert_eq!(attempt.status, Some(AttemptStatus::Failed));
    assert_eq!(attempt.error.as_deref(), Some("exceeded timeout"));
}
