//! JSON HTTP API over the workflow engine.
//!
//! Identity comes from an upstream layer in `X-Actor-*` headers. When
//! `API_AUTH_TOKEN` is configured, every route except `/health` also requires
//! `Authorization: Bearer <token>`.

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::AppState;

/// Routes of the API. State is attached by the caller.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/funds",
            get(handlers::list_funds).post(handlers::create_fund),
        )
        .route("/funds/:fund_id", get(handlers::get_fund))
        .route("/funds/:fund_id/budget", get(handlers::check_budget))
        .route("/funds/:fund_id/plan", get(handlers::preview_plan))
        .route(
            "/funds/:fund_id/rules",
            get(handlers::list_rules).post(handlers::save_rule),
        )
        .route(
            "/funds/:fund_id/rules/:rule_id",
            delete(handlers::delete_rule),
        )
        .route("/requests", post(handlers::create_request))
        .route(
            "/requests/:request_id",
            get(handlers::get_request).patch(handlers::update_draft),
        )
        .route("/requests/:request_id/submit", post(handlers::submit_request))
        .route("/requests/:request_id/decisions", post(handlers::decide))
        .route(
            "/requests/:request_id/responses",
            post(handlers::respond_to_info_request),
        )
        .route(
            "/requests/:request_id/disbursements",
            post(handlers::record_disbursement),
        )
        .route("/requests/:request_id/close", post(handlers::close_request))
        .route("/requests/:request_id/audit", get(handlers::audit_trail))
        .route("/reviews/pending", get(handlers::pending_reviews))
}
