//! OpenAPI document aggregation, served at `/openapi.json`.

use utoipa::OpenApi;

use crate::error::ApiErrorBody;
use crate::routes::{events, rules};
use crate::server::{HealthResponse, ReadyResponse};

/// The aggregated API description.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Sluice API",
        description = "Asynchronous event processing with a pluggable rules engine and conscious replay."
    ),
    paths(
        events::ingest_event,
        events::list_events,
        events::event_stats,
        events::get_event,
        events::get_attempts,
        events::replay_event,
        events::replay_batch,
        events::requeue_stuck,
        rules::create_rule,
        rules::list_rules,
        rules::get_rule,
        rules::update_rule,
        rules::delete_rule,
        rules::list_versions,
    ),
    components(schemas(
        ApiErrorBody,
        HealthResponse,
        ReadyResponse,
        events::IngestEventRequest,
        events::EventResponse,
        events::EventListResponse,
        events::EventStatsResponse,
        events::ExecutionResponse,
        events::AttemptResponse,
        events::AttemptListResponse,
        events::ReplayResponse,
        events::ReplayBatchRequest,
        events::ReplayBatchResponse,
        events::RequeueStuckRequest,
        events::RequeueStuckResponse,
        rules::CreateRuleRequest,
        rules::UpdateRuleRequest,
        rules::RuleResponse,
        rules::RuleVersionResponse,
        rules::RuleListResponse,
        rules::RuleVersionListResponse,
    )),
    tags(
        (name = "events", description = "Event ingest, reads, replay, and recovery"),
        (name = "rules", description = "Rule CRUD with version-on-change semantics"),
    )
)]
pub struct ApiDoc;

/// Returns the OpenAPI document as JSON.
#[must_use]
pub fn document() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
