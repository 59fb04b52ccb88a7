//! Engine semantics end-to-end against the in-memory store: rule
//! isolation, replay deduplication, and the attempt/event state
//! machine.

mod common;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sluice_core::event::{AttemptStatus, EventState};
use sluice_core::ports::EngineStore;
use sluice_core::rule::ExecutionResult;
use sluice_engine::{ActionDispatcher, EmailMode, EventBroadcaster, RuleEngine};

use common::MemoryStore;

fn paid_condition() -> serde_json::Value {
    json!({"==": [{"var": "status"}, "paid"]})
}

fn log_action(message: &str) -> serde_json::Value {
    json!({"type": "log", "params": {"level": "info", "message": message}})
}

fn email_action() -> serde_json::Value {
    json!({"type": "send_email", "params": {
        "to": "ops@example.com", "subject": "order", "template": "receipt"
    }})
}

fn engine_over(store: &Arc<MemoryStore>) -> RuleEngine {
    RuleEngine::new(
        Arc::clone(store) as Arc<dyn EngineStore>,
        ActionDispatcher::new(Duration::from_secs(5), EmailMode::Log),
        EventBroadcaster::new(),
    )
}

async fn claim(store: &Arc<MemoryStore>) -> sluice_core::ports::ClaimedEvent {
    EngineStore::claim_next(store.as_ref())
        .await
        .unwrap()
        .expect("pending event to claim")
}

/// Serves the given status on every request, for webhook actions.
async fn spawn_webhook_server(status: u16) -> SocketAddr {
    let app = axum::Router::new().route(
        "/hook",
        axum::routing::any(move || async move {
            axum::http::StatusCode::from_u16(status).unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());
    addr
}

#[tokio::test]
async fn successful_pass_records_applied_execution() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule("paid orders", "order.created", paid_condition(), log_action("ok"));
    let event_id = store.push_event("evt-success", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    engine.process(&claimed).await.unwrap();

    let event = store.event(event_id);
    assert_eq!(event.state, EventState::Processed);
    assert!(event.processing_started_at.is_none());
    assert!(event.processed_at.is_some());

    let attempt = store.attempt(claimed.attempt_id);
    assert_eq!(attempt.status, Some(AttemptStatus::Success));
    assert!(attempt.error.is_none());
    assert!(attempt.finished_at.unwrap() >= attempt.started_at);

    let executions = store.executions_for_attempt(claimed.attempt_id);
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].result, ExecutionResult::Applied);
    assert!(executions[0].error.is_none());
}

#[tokio::test]
async fn non_matching_condition_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule("paid orders", "order.created", paid_condition(), log_action("ok"));
    let event_id = store.push_event("evt-void", "order.created", json!({"status": "void"}));

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    engine.process(&claimed).await.unwrap();

    assert_eq!(store.event(event_id).state, EventState::Processed);
    let executions = store.executions_for_attempt(claimed.attempt_id);
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].result, ExecutionResult::Skipped);
}

#[tokio::test]
async fn failing_webhook_does_not_abort_sibling_rules() {
    let addr = spawn_webhook_server(500).await;
    let store = Arc::new(MemoryStore::new());
    store.add_rule("first log", "order.created", paid_condition(), log_action("a"));
    store.add_rule(
        "broken hook",
        "order.created",
        paid_condition(),
        json!({"type": "call_webhook", "params": {
            "url": format!("http://{addr}/hook"), "method": "POST"
        }}),
    );
    store.add_rule("second log", "order.created", paid_condition(), log_action("b"));
    let event_id = store.push_event("evt-multi", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    engine.process(&claimed).await.unwrap();

    let executions = store.executions_for_attempt(claimed.attempt_id);
    let results: Vec<ExecutionResult> = executions.iter().map(|x| x.result).collect();
    assert_eq!(
        results,
        [
            ExecutionResult::Applied,
            ExecutionResult::Failed,
            ExecutionResult::Applied
        ]
    );
    assert!(executions[1]
        .error
        .as_deref()
        .unwrap()
        .contains("Webhook failed with status 500"));

    let attempt = store.attempt(claimed.attempt_id);
    assert_eq!(attempt.status, Some(AttemptStatus::Failed));
    assert!(attempt
        .error
        .as_deref()
        .unwrap()
        .contains("Webhook failed with status 500"));
    assert_eq!(store.event(event_id).state, EventState::Failed);
}

#[tokio::test]
async fn replay_with_same_version_dedupes_non_idempotent_actions() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule("receipt email", "order.created", paid_condition(), email_action());
    let event_id = store.push_event("evt-replay", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let first = claim(&store).await;
    engine.process(&first).await.unwrap();
    assert_eq!(
        store.executions_for_attempt(first.attempt_id)[0].result,
        ExecutionResult::Applied
    );

    store.replay_event(event_id);
    let second = claim(&store).await;
    engine.process(&second).await.unwrap();

    let executions = store.executions_for_attempt(second.attempt_id);
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].result, ExecutionResult::Deduped);
    assert_eq!(store.event(event_id).state, EventState::Processed);
    assert_eq!(
        store.attempt(second.attempt_id).status,
        Some(AttemptStatus::Success)
    );
}

#[tokio::test]
async fn replay_after_rule_edit_bypasses_dedup() {
    let store = Arc::new(MemoryStore::new());
    let rule_id =
        store.add_rule("receipt email", "order.created", paid_condition(), email_action());
    let event_id = store.push_event("evt-edit", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let first = claim(&store).await;
    engine.process(&first).await.unwrap();

    // The edit mints a new version id, which disables dedup.
    store.edit_rule(rule_id, paid_condition(), email_action());
    store.replay_event(event_id);
    let second = claim(&store).await;
    engine.process(&second).await.unwrap();

    let executions = store.executions_for_attempt(second.attempt_id);
    assert_eq!(executions[0].result, ExecutionResult::Applied);
}

#[tokio::test]
async fn idempotent_actions_always_run_on_replay() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule("audit log", "order.created", paid_condition(), log_action("pass"));
    let event_id = store.push_event("evt-log-replay", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let first = claim(&store).await;
    engine.process(&first).await.unwrap();

    store.replay_event(event_id);
    let second = claim(&store).await;
    engine.process(&second).await.unwrap();

    // No dedup for log actions: the audit trail reflects every pass.
    assert_eq!(
        store.executions_for_attempt(second.attempt_id)[0].result,
        ExecutionResult::Applied
    );
}

#[tokio::test]
async fn unparseable_stored_action_is_recorded_as_failed() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule(
        "corrupt",
        "order.created",
        paid_condition(),
        json!({"type": "teleport", "params": {}}),
    );
    store.add_rule("healthy", "order.created", paid_condition(), log_action("ok"));
    let event_id = store.push_event("evt-corrupt", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    engine.process(&claimed).await.unwrap();

    let executions = store.executions_for_attempt(claimed.attempt_id);
    assert_eq!(executions[0].result, ExecutionResult::Failed);
    assert!(executions[0].error.as_deref().unwrap().contains("action"));
    assert_eq!(executions[1].result, ExecutionResult::Applied);
    assert_eq!(store.event(event_id).state, EventState::Failed);
}

#[tokio::test]
async fn failing_condition_is_recorded_per_rule() {
    let store = Arc::new(MemoryStore::new());
    store.add_rule(
        "bad arithmetic",
        "order.created",
        json!({">": [{"var": "status"}, 3]}),
        log_action("never"),
    );
    let event_id = store.push_event("evt-eval", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    engine.process(&claimed).await.unwrap();

    let executions = store.executions_for_attempt(claimed.attempt_id);
    assert_eq!(executions[0].result, ExecutionResult::Failed);
    assert_eq!(store.event(event_id).state, EventState::Failed);
}

#[tokio::test]
async fn engine_fault_marks_attempt_failed_not_stuck() {
    let store = Arc::new(MemoryStore::new());
    let event_id = store.push_event("evt-fault", "order.created", json!({"status": "paid"}));
    store.fail_rule_load.store(true, Ordering::SeqCst);

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    let fault = engine.process(&claimed).await.unwrap_err();
    assert_eq!(fault.kind(), "internal");

    // The event is failed and visible, not stuck in processing.
    let event = store.event(event_id);
    assert_eq!(event.state, EventState::Failed);
    assert!(event.processing_started_at.is_none());

    let attempt = store.attempt(claimed.attempt_id);
    assert_eq!(attempt.status, Some(AttemptStatus::Failed));
    assert!(attempt.error.as_deref().unwrap().contains("engine fault"));
}

#[tokio::test]
async fn inactive_rules_are_not_evaluated() {
    let store = Arc::new(MemoryStore::new());
    let rule_id = store.add_rule("retired", "order.created", paid_condition(), log_action("x"));
    store.deactivate_rule(rule_id);
    let event_id = store.push_event("evt-inactive", "order.created", json!({"status": "paid"}));

    let engine = engine_over(&store);
    let claimed = claim(&store).await;
    engine.process(&claimed).await.unwrap();

    assert!(store.executions_for_attempt(claimed.attempt_id).is_empty());
    assert_eq!(store.event(event_id).state, EventState::Processed);
}

#[tokio::test]
async fn requeue_stuck_recovers_expired_leases() {
    let store = Arc::new(MemoryStore::new());
    let event_id = store.push_event("evt-stuck", "order.created", json!({}));
    let attempt_id = store.strand_in_processing(event_id, 600);

    let recovered = EngineStore::requeue_stuck(store.as_ref(), 300).await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, event_id);

    let event = store.event(event_id);
    assert_eq!(event.state, EventState::Pending);
    assert!(event.processing_started_at.is_none());

    let attempt = store.attempt(attempt_id);
    assert_eq!(attempt.status, Some(AttemptStatus::Failed));
    assert_eq!(attempt.error.as_deref(), Some("exceeded timeout"));
}

#[tokio::test]
async fn fresh_leases_are_not_recovered() {
    let store = Arc::new(MemoryStore::new());
    let event_id = store.push_event("evt-fresh", "order.created", json!({}));
    store.strand_in_processing(event_id, 10);

    let recovered = EngineStore::requeue_stuck(store.as_ref(), 300).await.unwrap();
    assert!(recovered.is_empty());
    assert_eq!(store.event(event_id).state, EventState::Processing);
}

#[tokio::test]
async fn claims_hand_out_oldest_pending_first() {
    let store = Arc::new(MemoryStore::new());
    let first = store.push_event("evt-a", "order.created", json!({}));
    let second = store.push_event("evt-b", "order.created", json!({}));

    let claimed = claim(&store).await;
    assert_eq!(claimed.event.id, first);
    let claimed = claim(&store).await;
    assert_eq!(claimed.event.id, second);
    assert!(EngineStore::claim_next(store.as_ref()).await.unwrap().is_none());
}
