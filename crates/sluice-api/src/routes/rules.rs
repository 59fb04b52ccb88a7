//! Rule API routes: CRUD with version-on-change semantics.
//!
//! ## Routes
//!
//! - `POST   /rules` - Create a rule (header + version 1)
//! - `GET    /rules` - List rules (active/type filters, pagination)
//! - `GET    /rules/{id}` - Get a rule with its current version
//! - `PUT    /rules/{id}` - Partial update; versions on definition change
//! - `DELETE /rules/{id}` - Soft delete (deactivate)
//! - `GET    /rules/{id}/versions` - All versions, newest first

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use sluice_core::rule::{Rule, RuleVersion};
use sluice_store::{NewRule, RuleFilter, RulePatch};

use crate::error::{ApiError, ApiErrorBody};
use crate::routes::events::parse_page_params;
use crate::server::AppState;

/// Request to create a rule.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    /// Human-readable name.
    pub name: String,
    /// Event type the rule applies to.
    pub event_type: String,
    /// Whitelisted condition expression.
    #[schema(value_type = Object)]
    pub condition: Value,
    /// Typed action record.
    #[schema(value_type = Object)]
    pub action: Value,
    /// Whether the rule participates in evaluation (default true).
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

/// Partial update for a rule.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateRuleRequest {
    /// New name.
    pub name: Option<String>,
    /// New event type.
    pub event_type: Option<String>,
    /// New active flag.
    pub active: Option<bool>,
    /// New condition; versions when it differs from the current one.
    #[schema(value_type = Option<Object>)]
    pub condition: Option<Value>,
    /// New action; versions when it differs from the current one.
    #[schema(value_type = Option<Object>)]
    pub action: Option<Value>,
}

/// Rule version response.
#[derive(Debug, Serialize, ToSchema)]
pub struct RuleVersionResponse {
    /// Version id (the replay dedup key).
    pub id: i64,
    /// Owning rule.
    pub rule_id: i64,
    /// Condition expression.
    #[schema(value_type = Object)]
    pub condition: Value,
    /// Action record.
    #[schema(value_type = Object)]
    pub action: Value,
    /// Per-rule sequence number.
    pub version: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<RuleVersion> for RuleVersionResponse {
    fn from(version: RuleVersion) -> Self {
        Self {
            id: version.id,
            rule_id: version.rule_id,
            condition: version.condition,
            action: version.action,
            version: version.version,
            created_at: version.created_at,
        }
    }
}

/// Rule response, joined with its current version when loaded.
#[derive(Debug, Serialize, ToSchema)]
pub struct RuleResponse {
    /// Rule id.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Event type the rule applies to.
    pub event_type: String,
    /// Whether the rule participates in evaluation.
    pub active: bool,
    /// Pointer to the current version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last header or version change.
    pub updated_at: DateTime<Utc>,
    /// The current version, when loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<RuleVersionResponse>,
}

impl RuleResponse {
    fn from_rule(rule: Rule, current_version: Option<RuleVersion>) -> Self {
        Self {
            id: rule.id,
            name: rule.name,
            event_type: rule.event_type,
            active: rule.active,
            current_version_id: rule.current_version_id,
            created_at: rule.created_at,
            updated_at: rule.updated_at,
            current_version: current_version.map(Into::into),
        }
    }
}

/// Rule list page.
#[derive(Debug, Serialize, ToSchema)]
pub struct RuleListResponse {
    /// Rules ordered by id.
    pub rules: Vec<RuleResponse>,
    /// Applied page size.
    pub limit: i64,
    /// Applied page offset.
    pub offset: i64,
}

/// Rule version list.
#[derive(Debug, Serialize, ToSchema)]
pub struct RuleVersionListResponse {
    /// Versions, newest first.
    pub versions: Vec<RuleVersionResponse>,
}

/// Rule listing filters.
#[derive(Debug, Default, Deserialize)]
pub struct RuleQuery {
    /// Restrict by active flag.
    pub active: Option<bool>,
    /// Restrict by event type.
    pub event_type: Option<String>,
    /// Page size (1-200, default 50).
    pub limit: Option<i64>,
    /// Page offset.
    pub offset: Option<i64>,
}

/// Creates rule routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rules", axum::routing::post(create_rule).get(list_rules))
        .route(
            "/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/:id/versions", get(list_versions))
}

/// Create a rule.
///
/// POST /rules
#[utoipa::path(
    post,
    path = "/rules",
    tag = "rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule with version 1", body = RuleResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    if req.event_type.trim().is_empty() {
        return Err(ApiError::bad_request("event_type must not be empty"));
    }

    tracing::info!(name = %req.name, event_type = %req.event_type, "creating rule");

    let (rule, version) = state
        .rules
        .create(NewRule {
            name: req.name,
            event_type: req.event_type,
            condition: req.condition,
            action: req.action,
            active: req.active,
        })
        .await
        .map_err(|e| state.api_error(e))?;

    Ok((
        StatusCode::CREATED,
        Json(RuleResponse::from_rule(rule, Some(version))),
    ))
}

/// List rules.
///
/// GET /rules
#[utoipa::path(
    get,
    path = "/rules",
    tag = "rules",
    params(
        ("active" = Option<bool>, Query, description = "Filter by active flag"),
        ("event_type" = Option<String>, Query, description = "Filter by event type"),
        ("limit" = Option<i64>, Query, description = "Page size (1-200, default 50)"),
        ("offset" = Option<i64>, Query, description = "Page offset"),
    ),
    responses(
        (status = 200, description = "Rule page", body = RuleListResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RuleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = parse_page_params(query.limit, query.offset)?;
    let rules = state
        .rules
        .list(
            &RuleFilter {
                active: query.active,
                event_type: query.event_type,
            },
            page,
        )
        .await
        .map_err(|e| state.api_error(e))?;

    Ok(Json(RuleListResponse {
        rules: rules
            .into_iter()
            .map(|rule| RuleResponse::from_rule(rule, None))
            .collect(),
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Get a rule with its current version.
///
/// GET /rules/{id}
#[utoipa::path(
    get,
    path = "/rules/{id}",
    tag = "rules",
    params(("id" = i64, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Rule", body = RuleResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (rule, version) = state
        .rules
        .get_with_version(id)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(Json(RuleResponse::from_rule(rule, version)))
}

/// Partially update a rule.
///
/// PUT /rules/{id}
#[utoipa::path(
    put,
    path = "/rules/{id}",
    tag = "rules",
    params(("id" = i64, Path, description = "Rule id")),
    request_body = UpdateRuleRequest,
    responses(
        (status = 200, description = "Updated rule; a new version when the definition changed", body = RuleResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    if req
        .event_type
        .as_deref()
        .is_some_and(|t| t.trim().is_empty())
    {
        return Err(ApiError::bad_request("event_type must not be empty"));
    }

    tracing::info!(rule_id = id, "updating rule");

    let (rule, _new_version) = state
        .rules
        .update(
            id,
            RulePatch {
                name: req.name,
                event_type: req.event_type,
                active: req.active,
                condition: req.condition,
                action: req.action,
            },
        )
        .await
        .map_err(|e| state.api_error(e))?;

    let (rule, version) = state
        .rules
        .get_with_version(rule.id)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(Json(RuleResponse::from_rule(rule, version)))
}

/// Soft delete a rule.
///
/// DELETE /rules/{id}
#[utoipa::path(
    delete,
    path = "/rules/{id}",
    tag = "rules",
    params(("id" = i64, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Deactivated rule", body = RuleResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(rule_id = id, "deactivating rule");
    let rule = state
        .rules
        .deactivate(id)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(Json(RuleResponse::from_rule(rule, None)))
}

/// All versions of a rule.
///
/// GET /rules/{id}/versions
#[utoipa::path(
    get,
    path = "/rules/{id}/versions",
    tag = "rules",
    params(("id" = i64, Path, description = "Rule id")),
    responses(
        (status = 200, description = "Versions, newest first", body = RuleVersionListResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 500, description = "Internal error", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let versions = state
        .rules
        .versions(id)
        .await
        .map_err(|e| state.api_error(e))?;
    Ok(Json(RuleVersionListResponse {
        versions: versions.into_iter().map(Into::into).collect(),
    }))
}
