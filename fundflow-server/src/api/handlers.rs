//! HTTP handlers for the workflow API.
//!
//! Every handler authenticates the caller (when `API_AUTH_TOKEN` is set),
//! resolves the acting user from the identity headers, and forwards to the
//! engine. Engine errors are mapped to status codes in one place.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use fundflow_core::{Actor, FundId, RequestId, Role, RuleId, UserId, WorkflowError};

use super::types::{
    BudgetConfirmationBody, BudgetQuery, CloseBody, ErrorBody, HealthResponse, InfoResponseBody,
    PlanQuery,
};
use crate::error::EngineError;
use crate::state_machine::repository::RepositoryError;
use crate::state_machine::{
    DecisionInput, DecisionOutcome, DisbursementInput, DraftChanges, NewFund, NewRequest,
    RuleInput,
};
use crate::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_EMAIL_HEADER: &str = "x-actor-email";
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";

type ApiResult<T> = Result<T, Response>;

/// Validate the authorization header against the configured API token.
///
/// With no token configured every request is let through.
#[allow(clippy::result_large_err)] // Response is large but this is idiomatic in Axum handlers
fn validate_auth(headers: &HeaderMap, auth_token: &Option<String>) -> ApiResult<()> {
    let Some(expected_token) = auth_token else {
        return Ok(());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let unauthorized = |message: &str| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("unauthenticated", message)),
        )
            .into_response()
    };

    match auth_header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(provided) if provided == expected_token => Ok(()),
        Some(_) => Err(unauthorized("Invalid token")),
        None => Err(unauthorized(
            "Missing or malformed Authorization header. Expected: Bearer <token>",
        )),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the acting user from the identity headers set upstream.
#[allow(clippy::result_large_err)]
fn actor_from_headers(headers: &HeaderMap) -> ApiResult<Actor> {
    let Some(id) = header_str(headers, ACTOR_ID_HEADER) else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("unauthenticated", "Missing X-Actor-Id header")),
        )
            .into_response());
    };

    let mut roles = BTreeSet::new();
    for role in header_str(headers, ACTOR_ROLES_HEADER)
        .unwrap_or_default()
        .split(',')
        .filter(|r| !r.trim().is_empty())
    {
        let role: Role = role.parse().map_err(|e: String| {
            (StatusCode::BAD_REQUEST, Json(ErrorBody::new("validation", e))).into_response()
        })?;
        roles.insert(role);
    }

    Ok(Actor {
        id: UserId::from(id),
        name: header_str(headers, ACTOR_NAME_HEADER)
            .unwrap_or(id)
            .to_string(),
        email: header_str(headers, ACTOR_EMAIL_HEADER)
            .unwrap_or_default()
            .to_string(),
        roles,
    })
}

/// Authenticate and resolve the actor in one go.
#[allow(clippy::result_large_err)]
fn caller(state: &AppState, headers: &HeaderMap) -> ApiResult<Actor> {
    validate_auth(headers, &state.api_auth_token)?;
    actor_from_headers(headers)
}

/// Map an engine error onto a status code and JSON body.
pub fn error_response(e: EngineError) -> Response {
    let (status, body) = match &e {
        EngineError::Workflow(WorkflowError::Validation(message)) => (
            StatusCode::BAD_REQUEST,
            ErrorBody::new("validation", message.clone()),
        ),
        EngineError::Workflow(WorkflowError::Unauthorized { reason }) => (
            StatusCode::FORBIDDEN,
            ErrorBody::new("unauthorized", reason.clone()),
        ),
        EngineError::Workflow(WorkflowError::InvalidTransition { .. }) => (
            StatusCode::CONFLICT,
            ErrorBody::new("invalid_transition", e.to_string()),
        ),
        EngineError::Workflow(WorkflowError::BudgetExceeded {
            remaining,
            requested,
        }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorBody {
                remaining: Some(*remaining),
                requested: Some(*requested),
                ..ErrorBody::new("budget_exceeded", e.to_string())
            },
        ),
        EngineError::NotFound { .. } => {
            (StatusCode::NOT_FOUND, ErrorBody::new("not_found", e.to_string()))
        }
        EngineError::StoreUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorBody::new("store_unavailable", e.to_string()),
        ),
        EngineError::Repository(inner) => match inner {
            RepositoryError::Conflict { .. } | RepositoryError::Duplicate { .. } => {
                (StatusCode::CONFLICT, ErrorBody::new("conflict", e.to_string()))
            }
            _ => {
                error!("Store failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal", "Internal storage error"),
                )
            }
        },
    };
    (status, Json(body)).into_response()
}

/// Handler: GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "fundflow",
        version: crate::get_service_version(),
        stats: state.engine.stats(),
    })
}

/// Handler: POST /funds
pub async fn create_fund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewFund>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let fund = state
        .engine
        .create_fund(&actor, body)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(fund)).into_response())
}

/// Handler: GET /funds
pub async fn list_funds(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let funds = state.engine.list_funds().await.map_err(error_response)?;
    Ok(Json(funds).into_response())
}

/// Handler: GET /funds/:fund_id
pub async fn get_fund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(fund_id): Path<FundId>,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let fund = state.engine.get_fund(fund_id).await.map_err(error_response)?;
    Ok(Json(fund).into_response())
}

/// Handler: GET /funds/:fund_id/budget?amount=
pub async fn check_budget(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(fund_id): Path<FundId>,
    Query(query): Query<BudgetQuery>,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let check = state
        .engine
        .check_budget(fund_id, query.amount)
        .await
        .map_err(error_response)?;
    Ok(Json(check).into_response())
}

/// Handler: GET /funds/:fund_id/plan?amount=&category=
pub async fn preview_plan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(fund_id): Path<FundId>,
    Query(query): Query<PlanQuery>,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let plan = state
        .engine
        .preview_plan(fund_id, query.amount, &query.category)
        .await
        .map_err(error_response)?;
    Ok(Json(plan).into_response())
}

/// Handler: GET /funds/:fund_id/rules
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(fund_id): Path<FundId>,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let rules = state
        .engine
        .list_rules(fund_id)
        .await
        .map_err(error_response)?;
    Ok(Json(rules).into_response())
}

/// Handler: POST /funds/:fund_id/rules
pub async fn save_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(fund_id): Path<FundId>,
    Json(body): Json<RuleInput>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let rule = state
        .engine
        .save_rule(&actor, fund_id, body)
        .await
        .map_err(error_response)?;
    Ok(Json(rule).into_response())
}

/// Handler: DELETE /funds/:fund_id/rules/:rule_id
pub async fn delete_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((fund_id, rule_id)): Path<(FundId, RuleId)>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let rule = state
        .engine
        .delete_rule(&actor, fund_id, rule_id)
        .await
        .map_err(error_response)?;
    Ok(Json(rule).into_response())
}

/// Handler: POST /requests
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewRequest>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let snapshot = state
        .engine
        .create_request(&actor, body)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

/// Handler: GET /requests/:request_id
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let snapshot = state
        .engine
        .get_request(request_id)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot).into_response())
}

/// Handler: PATCH /requests/:request_id
pub async fn update_draft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
    Json(body): Json<DraftChanges>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let snapshot = state
        .engine
        .update_draft(&actor, request_id, body)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot).into_response())
}

/// Handler: POST /requests/:request_id/submit
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let snapshot = state
        .engine
        .submit_request(&actor, request_id)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot).into_response())
}

/// Handler: POST /requests/:request_id/decisions
///
/// A warn-mode shortfall is answered with 409 and a
/// `budget_confirmation_required` body; nothing is written in that case.
pub async fn decide(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
    Json(body): Json<DecisionInput>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let outcome = state
        .engine
        .decide(&actor, request_id, body)
        .await
        .map_err(error_response)?;
    Ok(match outcome {
        DecisionOutcome::Applied(snapshot) => Json(snapshot).into_response(),
        DecisionOutcome::BudgetConfirmationRequired(check) => (
            StatusCode::CONFLICT,
            Json(BudgetConfirmationBody::from(check)),
        )
            .into_response(),
    })
}

/// Handler: POST /requests/:request_id/responses
pub async fn respond_to_info_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
    Json(body): Json<InfoResponseBody>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let snapshot = state
        .engine
        .respond_to_info_request(&actor, request_id, body.message, body.attachments)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot).into_response())
}

/// Handler: POST /requests/:request_id/disbursements
pub async fn record_disbursement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
    Json(body): Json<DisbursementInput>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let disbursement = state
        .engine
        .record_disbursement(&actor, request_id, body)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(disbursement)).into_response())
}

/// Handler: POST /requests/:request_id/close
pub async fn close_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
    body: Option<Json<CloseBody>>,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let reason = body.and_then(|Json(b)| b.reason);
    let snapshot = state
        .engine
        .close_request(&actor, request_id, reason)
        .await
        .map_err(error_response)?;
    Ok(Json(snapshot).into_response())
}

/// Handler: GET /requests/:request_id/audit
pub async fn audit_trail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<RequestId>,
) -> ApiResult<Response> {
    caller(&state, &headers)?;
    let entries = state
        .engine
        .audit_trail(&request_id.to_string())
        .await
        .map_err(error_response)?;
    Ok(Json(entries).into_response())
}

/// Handler: GET /reviews/pending
pub async fn pending_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let actor = caller(&state, &headers)?;
    let pending = state
        .engine
        .pending_reviews_for(&actor)
        .await
        .map_err(error_response)?;
    Ok(Json(pending).into_response())
}
