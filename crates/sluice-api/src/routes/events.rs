//! Event API routes: ingest, reads, replay, and stuck recovery.
//!
//! ## Routes
//!
//! - `POST /events` - Idempotent ingest by external id
//! - `GET  /events` - List events (state/type/date filters, pagination)
//! - `GET  /events/stats` - Aggregate counts
//! - `GET  /events/{id}` - Get one event
//! - `GET  /events/{id}/attempts` - Attempt history with rule executions
//! - `POST /events/{id}/replay` - Replay one terminal event
//! - `POST /events/replay-batch` - Replay up to 100 terminal events
//! - `POST /events/requeue-stuck` - Return expired leases to pending

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use sluice_core::event::{Event, EventState};
use sluice_store::{AttemptWithExecutions, EventFilter, Page};

use crate::error::{ApiError, ApiErrorBody};
use crate::server::AppState;

/// Replay hazards, quoted on every replay response: rule edits apply
/// their new behavior, and completed non-idempotent actions are
/// skipped.
pub const REPLAY_WARNING: &str = "Replay evaluates current rule versions: rules edited since \
     the original run will apply their new behavior, and non-idempotent actions already \
     applied by the same rule version will be skipped (deduped).";

const MAX_PAGE_LIMIT: i64 = 200;
const MAX_REPLAY_BATCH: usize = 100;

/// Request to ingest an event.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestEventRequest {
    /// Caller-supplied external id, unique across all events.
    pub id: String,
    /// Event type used to select matching rules.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary JSON object payload.
    #[schema(value_type = Object)]
    pub data: Value,
}

/// Event row response.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    /// Store-assigned identifier.
    pub id: i64,
    /// Caller-supplied external id.
    pub external_id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload as ingested by the first call.
    #[schema(value_type = Object)]
    pub data: Value,
    /// Lifecycle state.
    pub state: String,
    /// Number of successful ingest calls for this external id.
    pub received_count: i32,
    /// First-insert timestamp.
    pub created_at: DateTime<Utc>,
    /// Set while the event is claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Last finalization timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Last replay timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed_at: Option<DateTime<Utc>>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            external_id: event.external_id,
            event_type: event.event_type,
            data: event.payload,
            state: event.state.as_str().to_string(),
            received_count: event.received_count,
            created_at: event.created_at,
            processing_started_at: event.processing_started_at,
            processed_at: event.processed_at,
            replayed_at: event.replayed_at,
        }
    }
}

/// Shared listing filters.
#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    /// Restrict by state.
    pub state: Option<String>,
    /// Restrict by event type.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Creation range start (RFC3339).
    pub start_date: Option<String>,
    /// Creation range end (RFC3339).
    pub end_date: Option<String>,
    /// Page size (1-200, default 50).
    pub limit: Option<i64>,
    /// Page offset.
    pub offset: Option<i64>,
}

/// Event list page.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventListResponse {
    /// Events, newest first.
    pub events: Vec<EventResponse>,
    /// Applied page size.
    pub limit: i64,
    /// Applied page offset.
    pub offset: i64,
}

/// Aggregate event counts.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventStatsResponse {
    /// All events matching the filter.
    pub total: i64,
    /// Events in `pending`.
    pub pending: i64,
    /// Events in `processing`.
    pub processing: i64,
    /// Events in `processed`.
    pub processed: i64,
    /// Events in `failed`.
    pub failed: i64,
    /// Failures in the last 24 hours.
    pub failed_last_24h: i64,
}

/// One recorded rule execution.
#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionResponse {
    /// Execution id.
    pub id: i64,
    /// The rule considered.
    pub rule_id: i64,
    /// The exact version evaluated.
    pub rule_version_id: i64,
    /// Rule name at read time; absent when the rule was deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    /// Version sequence number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_version: Option<i32>,
    /// Outcome (`applied` / `skipped` / `failed` / `deduped`).
    pub result: String,
    /// Rendered error for failed results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recording timestamp.
    pub executed_at: DateTime<Utc>,
}

/// One attempt with its rule executions.
#[derive(Debug, Serialize, ToSchema)]
pub struct AttemptResponse {
    /// Attempt id.
    pub id: i64,
    /// The claimed event.
    pub event_id: i64,
    /// Final status; absent while in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Newline-joined rule errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Claim timestamp.
    pub started_at: DateTime<Utc>,
    /// Finalization timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Executions recorded during this attempt.
    pub executions: Vec<ExecutionResponse>,
}

impl From<AttemptWithExecutions> for AttemptResponse {
    fn from(joined: AttemptWithExecutions) -> Self {
        Self {
            id: joined.attempt.id,
            event_id: joined.attempt.event_id,
            status: joined.attempt.status.map(|s| s.as_str().to_string()),
            error: joined.attempt.error,
            started_at: joined.attempt.started_at,
            finished_at: joined.attempt.finished_at,
            duration_ms: joined.attempt.duration_ms,
            executions: joined
                .executions
                .into_iter()
                .map(|record| ExecutionResponse {
                    id: record.execution.id,
                    rule_id: record.execution.rule_id,
                    rule_version_id: record.execution.rule_version_id,
                    rule_name: record.rule_name,
                    rule_version: record.rule_version,
                    result: record.execution.result.as_str().to_string(),
                    error: record.execution.error,
                    executed_at: record.execution.executed_at,
                })
                .collect(),
        }
    }
}

/// Attempt history response.
#[derive(Debug, Serialize, ToSchema)]
pub struct AttemptListResponse {
    /// Attempts in claim order.
    pub attempts: Vec<AttemptResponse>,
}

/// Replay response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReplayResponse {
    /// The event, back in `pending`.
    pub event: EventResponse,
    /// The documented replay hazards.
    pub warning: String,
}

/// Batch replay request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplayBatchRequest {
    /// Event ids to replay (1-100).
    pub event_ids: Vec<i64>,
}

/// Batch replay response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReplayBatchResponse {
    /// Ids requested.
    pub requested: usize,
    /// Events actually replayed (the terminal subset).
    pub replayed: usize,
    /// The replayed rows.
    pub events: Vec<EventResponse>,
    /// The documented replay hazards.
    pub warning: String,
}

/// Stuck recovery request.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RequeueStuckRequest {
    /// Lease expiry override in seconds; defaults to deployment config.
    pub older_than_seconds: Option<i64>,
}

/// Stuck recovery response.
#[derive(Debug, Serialize, ToSchema)]
pub struct RequeueStuckResponse {
    /// Number of events returned to `pending`.
    pub count: usize,
    /// The recovered rows.
    pub events: Vec<EventResponse>,
}

/// Creates event routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(ingest_event).get(list_events))
        .route("/events/stats", get(event_stats))
        .route("/events/replay-batch", post(replay_batch))
        .route("/events/requeue-stuck", post(requeue_stuck))
        .route("/events/:id", get(get_event))
        .route("/events/:id/attempts", get(get_attempts))
        .route("/events/:id/replay", post(replay_event))
}

/// Ingest an event.
///
/// POST /events
#[utoipa::path(
    post,
    path = "/events",
    tag = "events",
    request_body = IngestEventRequest,
    responses(
        (status = 201, description = "Event row; duplicates return the existing row with an incremented received_count", body = EventResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.id.trim().is_empty() {
        return Err(ApiError::bad_request("id must not be empty"));
    }
    if req.event_type.trim().is_empty() {
        return Err(ApiError::bad_request("type must not be empty"));
    }
    if !req.data.is_object() {
        return Err(ApiError::bad_request("data must be a JSON object"));
    }

    tracing::info!(external_id = %req.id, event_type = %req.event_type, "ingesting event");

    let event = state
        .events
        .ingest(&req.id, &req.event_type, &req.data)
        .await
        .map_err(|e| state.api_error(e))?;

    if event.received_count == 1 {
        state.broadcaster.publish(event.id, event.state);
    }

    Ok((StatusCode::CREATED, Json(EventResponse::from(event))))
}

/// List events.
///
/// GET /events
#[utoipa::path(
    get,
    path = "/events",
    tag = "events",
    params(
        ("state" = Option<String>, Query, description = "Filter by state"),
        ("type" = Option<String>, Query, description = "Filter by event type"),
        ("start_date" = Option<String>, Query, description = "Creation range start (RFC3339)"),
        ("end_date" = Option<String>, Query, description = "Creation range end (RFC3339)"),
        ("limit" = Option<i64>, Query, description = "Page size (1-200, default 50)"),
        ("offset" = Option<i64>, Query, description = "Page offset"),
    ),
    responses(
        (status = 200, description = "Event page", body = EventListResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = parse_filter(&query)?;
    let page = parse_page_params(query.limit, query.offset)?;

    let events = state
        .events
        .list(&filter, page)
        .await
        .map_err(|e| state.api_error(e))?;

    Ok(Json(EventListResponse {
        events: events.into_iter().map(EventResponse::from).collect(),
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Aggregate event counts.
///
/// GET /events/stats
#[utoipa::path(
    get,
    path = "/events/stats",
    tag = "events",
    params(
        ("state" = Option<String>, Query, description = "Filter by state"),
        ("type" = Option<String>, Query, description = "Filter by event type"),
        ("start_date" = Option<String>, Query, description = "Creation range start (RFC3339)"),
        ("end_date" = Option<String>, Query, description = "Creation range end (RFC3339)"),
    ),
    responses(
        (status = 200, description = "Aggregate counts", body = EventStatsResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn event_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = parse_filter(&query)?;
    let stats = state
        .events
        .stats(&filter)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(Json(EventStatsResponse {
        total: stats.total,
        pending: stats.pending,
        processing: stats.processing,
        processed: stats.processed,
        failed: stats.failed,
        failed_last_24h: stats.failed_last_24h,
    }))
}

/// Get one event.
///
/// GET /events/{id}
#[utoipa::path(
    get,
    path = "/events/{id}",
    tag = "events",
    params(("id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event row", body = EventResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let event = state.events.get(id).await.map_err(|e| state.api_error(e))?;
    Ok(Json(EventResponse::from(event)))
}

/// Attempt history with rule executions.
///
/// GET /events/{id}/attempts
#[utoipa::path(
    get,
    path = "/events/{id}/attempts",
    tag = "events",
    params(("id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Attempts with rule executions", body = AttemptListResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_attempts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let attempts = state
        .events
        .attempts(id)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(Json(AttemptListResponse {
        attempts: attempts.into_iter().map(AttemptResponse::from).collect(),
    }))
}

/// Replay one terminal event.
///
/// POST /events/{id}/replay
#[utoipa::path(
    post,
    path = "/events/{id}/replay",
    tag = "events",
    params(("id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event returned to pending", body = ReplayResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 409, description = "Event is not in a replayable state", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn replay_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(event_id = id, "replaying event");
    let event = state
        .events
        .replay(id)
        .await
        .map_err(|e| state.api_error(e))?;
    state.broadcaster.publish(event.id, event.state);
    Ok(Json(ReplayResponse {
        event: EventResponse::from(event),
        warning: REPLAY_WARNING.to_string(),
    }))
}

/// Replay a batch of terminal events.
///
/// POST /events/replay-batch
#[utoipa::path(
    post,
    path = "/events/replay-batch",
    tag = "events",
    request_body = ReplayBatchRequest,
    responses(
        (status = 200, description = "Counts and replayed rows", body = ReplayBatchResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn replay_batch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplayBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.event_ids.is_empty() || req.event_ids.len() > MAX_REPLAY_BATCH {
        return Err(ApiError::bad_request(format!(
            "event_ids must contain between 1 and {MAX_REPLAY_BATCH} ids"
        )));
    }

    tracing::info!(requested = req.event_ids.len(), "replaying event batch");
    let events = state
        .events
        .replay_batch(&req.event_ids)
        .await
        .map_err(|e| state.api_error(e))?;

    for event in &events {
        state.broadcaster.publish(event.id, event.state);
    }

    Ok(Json(ReplayBatchResponse {
        requested: req.event_ids.len(),
        replayed: events.len(),
        events: events.into_iter().map(EventResponse::from).collect(),
        warning: REPLAY_WARNING.to_string(),
    }))
}

/// Return expired leases to pending.
///
/// POST /events/requeue-stuck
#[utoipa::path(
    post,
    path = "/events/requeue-stuck",
    tag = "events",
    request_body = RequeueStuckRequest,
    responses(
        (status = 200, description = "Count and recovered rows", body = RequeueStuckResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn requeue_stuck(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequeueStuckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let threshold = req
        .older_than_seconds
        .unwrap_or(state.config.stuck_threshold_secs);
    if threshold <= 0 {
        return Err(ApiError::bad_request(
            "older_than_seconds must be greater than 0",
        ));
    }

    let events = state
        .events
        .requeue_stuck(threshold)
        .await
        .map_err(|e| state.api_error(e))?;
    if !events.is_empty() {
        tracing::warn!(count = events.len(), threshold, "requeued stuck events");
    }

    for event in &events {
        state.broadcaster.publish(event.id, event.state);
    }

    Ok(Json(RequeueStuckResponse {
        count: events.len(),
        events: events.into_iter().map(EventResponse::from).collect(),
    }))
}

/// Parses shared listing filters, rejecting unknown states and
/// malformed dates.
fn parse_filter(query: &EventQuery) -> Result<EventFilter, ApiError> {
    let state = query
        .state
        .as_deref()
        .map(EventState::parse)
        .transpose()
        .map_err(ApiError::from)?;
    let start_date = parse_date("start_date", query.start_date.as_deref())?;
    let end_date = parse_date("end_date", query.end_date.as_deref())?;
    Ok(EventFilter {
        state,
        event_type: query.event_type.clone(),
        start_date,
        end_date,
    })
}

fn parse_date(name: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ApiError::bad_request(format!("{name} must be RFC3339: {e}")))
        })
        .transpose()
}

pub(crate) fn parse_page_params(limit: Option<i64>, offset: Option<i64>) -> Result<Page, ApiError> {
    let page = Page {
        limit: limit.unwrap_or(Page::default().limit),
        offset: offset.unwrap_or(0),
    };
    if !(1..=MAX_PAGE_LIMIT).contains(&page.limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_PAGE_LIMIT}"
        )));
    }
    if page.offset < 0 {
        return Err(ApiError::bad_request("offset must not be negative"));
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_unknown_state_and_bad_dates() {
        let query = EventQuery {
            state: Some("limbo".to_string()),
            ..EventQuery::default()
        };
        assert!(parse_filter(&query).is_err());

        let query = EventQuery {
            start_date: Some("yesterday".to_string()),
            ..EventQuery::default()
        };
        assert!(parse_filter(&query).is_err());
    }

    #[test]
    fn filter_accepts_rfc3339_dates() {
        let query = EventQuery {
            state: Some("failed".to_string()),
            start_date: Some("2026-01-01T00:00:00Z".to_string()),
            end_date: Some("2026-02-01T00:00:00+01:00".to_string()),
            ..EventQuery::default()
        };
        let filter = parse_filter(&query).unwrap();
        assert_eq!(filter.state, Some(EventState::Failed));
        assert!(filter.start_date.unwrap() < filter.end_date.unwrap());
    }

    #[test]
    fn page_bounds_are_validated() {
        assert!(parse_page_params(Some(0), None).is_err());
        assert!(parse_page_params(Some(201), None).is_err());
        assert!(parse_page_params(None, Some(-1)).is_err());
        let page = parse_page_params(None, None).unwrap();
        assert_eq!(page.limit, 50);
        assert_eq!(page.offset, 0);
    }
}
