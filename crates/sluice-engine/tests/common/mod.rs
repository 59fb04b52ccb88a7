//! In-memory [`EngineStore`] for hermetic engine tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use sluice_core::event::{AttemptOutcome, AttemptStatus, Event, EventState};
use sluice_core::ports::{ClaimedEvent, EngineStore};
use sluice_core::rule::{ActiveRule, ExecutionResult};
use sluice_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct StoredAttempt {
    pub id: i64,
    pub event_id: i64,
    pub status: Option<AttemptStatus>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StoredExecution {
    pub id: i64,
    pub attempt_id: i64,
    pub event_id: i64,
    pub rule_id: i64,
    pub rule_version_id: i64,
    pub result: ExecutionResult,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredRule {
    rule_id: i64,
    name: String,
    event_type: String,
    active: bool,
    version_id: i64,
    version: i32,
    condition: Value,
    action: Value,
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    attempts: Vec<StoredAttempt>,
    executions: Vec<StoredExecution>,
    rules: Vec<StoredRule>,
    next_event_id: i64,
    next_attempt_id: i64,
    next_execution_id: i64,
    next_rule_id: i64,
    next_version_id: i64,
}

/// In-memory store with the same observable semantics as the Postgres
/// adapter, plus knobs for fault injection.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pub fail_rule_load: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, external_id: &str, event_type: &str, payload: Value) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_event_id += 1;
        let id = inner.next_event_id;
        inner.events.push(Event {
            id,
            external_id: external_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            state: EventState::Pending,
            received_count: 1,
            created_at: Utc::now() + Duration::milliseconds(id),
            processing_started_at: None,
            processed_at: None,
            replayed_at: None,
        });
        id
    }

    pub fn add_rule(&self, name: &str, event_type: &str, condition: Value, action: Value) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_rule_id += 1;
        inner.next_version_id += 1;
        let rule_id = inner.next_rule_id;
        let version_id = inner.next_version_id;
        inner.rules.push(StoredRule {
            rule_id,
            name: name.to_string(),
            event_type: event_type.to_string(),
            active: true,
            version_id,
            version: 1,
            condition,
            action,
        });
        rule_id
    }

    /// Simulates a definition edit: a new version id, dedup disabled.
    pub fn edit_rule(&self, rule_id: i64, condition: Value, action: Value) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_version_id += 1;
        let version_id = inner.next_version_id;
        let rule = inner
            .rules
            .iter_mut()
            .find(|r| r.rule_id == rule_id)
            .expect("rule exists");
        rule.version_id = version_id;
        rule.version += 1;
        rule.condition = condition;
        rule.action = action;
        version_id
    }

    pub fn deactivate_rule(&self, rule_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(rule) = inner.rules.iter_mut().find(|r| r.rule_id == rule_id) {
            rule.active = false;
        }
    }

    /// Replay: terminal event back to pending.
    pub fn replay_event(&self, event_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .expect("event exists");
        assert!(event.state.is_replayable(), "event must be terminal");
        event.state = EventState::Pending;
        event.replayed_at = Some(Utc::now());
        event.processing_started_at = None;
    }

    /// Backdates a processing lease, as after a worker crash.
    pub fn strand_in_processing(&self, event_id: i64, age_seconds: i64) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_attempt_id += 1;
        let attempt_id = inner.next_attempt_id;
        let started = Utc::now() - Duration::seconds(age_seconds);
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .expect("event exists");
        event.state = EventState::Processing;
        event.processing_started_at = Some(started);
        inner.attempts.push(StoredAttempt {
            id: attempt_id,
            event_id,
            status: None,
            error: None,
            started_at: started,
            finished_at: None,
        });
        attempt_id
    }

    pub fn event(&self, event_id: i64) -> Event {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
            .expect("event exists")
    }

    pub fn attempt(&self, attempt_id: i64) -> StoredAttempt {
        self.try_attempt(attempt_id).expect("attempt exists")
    }

    pub fn try_attempt(&self, attempt_id: i64) -> Option<StoredAttempt> {
        self.inner
            .lock()
            .unwrap()
            .attempts
            .iter()
            .find(|a| a.id == attempt_id)
            .cloned()
    }

    pub fn executions_for_attempt(&self, attempt_id: i64) -> Vec<StoredExecution> {
        self.inner
            .lock()
            .unwrap()
            .executions
            .iter()
            .filter(|x| x.attempt_id == attempt_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn claim_next(&self) -> Result<Option<ClaimedEvent>> {
        let mut inner = self.inner.lock().unwrap();
        let claimed = inner
            .events
            .iter()
            .filter(|e| e.state == EventState::Pending)
            .min_by_key(|e| (e.created_at, e.id))
            .map(|e| e.id);
        let Some(event_id) = claimed else {
            return Ok(None);
        };

        let now = Utc::now();
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == event_id)
            .expect("event exists");
        event.state = EventState::Processing;
        event.processing_started_at = Some(now);
        let event = event.clone();

        inner.next_attempt_id += 1;
        let attempt_id = inner.next_attempt_id;
        inner.attempts.push(StoredAttempt {
            id: attempt_id,
            event_id,
            status: None,
            error: None,
            started_at: now,
            finished_at: None,
        });

        Ok(Some(ClaimedEvent { event, attempt_id }))
    }

    async fn active_rules_for(&self, event_type: &str) -> Result<Vec<ActiveRule>> {
        if self.fail_rule_load.load(Ordering::SeqCst) {
            return Err(Error::storage("rule load failed"));
        }
        let inner = self.inner.lock().unwrap();
        let mut rules: Vec<ActiveRule> = inner
            .rules
            .iter()
            .filter(|r| r.active && r.event_type == event_type)
            .map(|r| ActiveRule {
                rule_id: r.rule_id,
                name: r.name.clone(),
                version_id: r.version_id,
                version: r.version,
                condition: r.condition.clone(),
                action: r.action.clone(),
            })
            .collect();
        rules.sort_by_key(|r| r.rule_id);
        Ok(rules)
    }

    async fn has_completed_execution(&self, event_id: i64, rule_version_id: i64) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.executions.iter().any(|x| {
            x.event_id == event_id
                && x.rule_version_id == rule_version_id
                && x.result.completed_action()
        }))
    }

    async fn record_execution(
        &self,
        attempt_id: i64,
        rule_id: i64,
        rule_version_id: i64,
        result: ExecutionResult,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let event_id = inner
            .attempts
            .iter()
            .find(|a| a.id == attempt_id)
            .map(|a| a.event_id)
            .ok_or_else(|| Error::not_found("attempt", attempt_id))?;
        inner.next_execution_id += 1;
        let id = inner.next_execution_id;
        inner.executions.push(StoredExecution {
            id,
            attempt_id,
            event_id,
            rule_id,
            rule_version_id,
            result,
            error: error.map(str::to_string),
        });
        Ok(())
    }

    async fn finalize(
        &self,
        event_id: i64,
        attempt_id: i64,
        outcome: &AttemptOutcome,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        if let Some(attempt) = inner.attempts.iter_mut().find(|a| a.id == attempt_id) {
            attempt.status = Some(outcome.attempt_status());
            attempt.error = match outcome {
                AttemptOutcome::Success => None,
                AttemptOutcome::Failed { error } => Some(error.clone()),
            };
            attempt.finished_at = Some(now);
        }
        if let Some(event) = inner.events.iter_mut().find(|e| e.id == event_id) {
            event.state = outcome.event_state();
            event.processed_at = Some(now);
            event.processing_started_at = None;
        }
        Ok(())
    }

    async fn release_timed_out(&self, event_id: i64, attempt_id: i64, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        if let Some(attempt) = inner.attempts.iter_mut().find(|a| a.id == attempt_id) {
            attempt.status = Some(AttemptStatus::Failed);
            attempt.error = Some(error.to_string());
            attempt.finished_at = Some(now);
        }
        if let Some(event) = inner.events.iter_mut().find(|e| e.id == event_id) {
            event.state = EventState::Pending;
            event.processing_started_at = None;
        }
        Ok(())
    }

    async fn requeue_stuck(&self, older_than_seconds: i64) -> Result<Vec<Event>> {
        let mut inner = self.inner.lock().unwrap();
        let cutoff = Utc::now() - Duration::seconds(older_than_seconds);
        let mut recovered = Vec::new();
        let mut recovered_ids = Vec::new();
        for event in &mut inner.events {
            if event.state == EventState::Processing
                && event.processing_started_at.is_some_and(|t| t < cutoff)
            {
                event.state = EventState::Pending;
                event.processing_started_at = None;
                recovered.push(event.clone());
                recovered_ids.push(event.id);
            }
        }
        let now = Utc::now();
        for attempt in &mut inner.attempts {
            if recovered_ids.contains(&attempt.event_id) && attempt.status.is_none() {
                attempt.status = Some(AttemptStatus::Failed);
                attempt.error = Some("exceeded timeout".to_string());
                attempt.finished_at = Some(now);
            }
        }
        Ok(recovered)
    }
}
