//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Deploy submission
//! - Job state queries, synchronous and streamed
//! - Workflow status webhooks
//! - Health checks

mod deploy;
mod report;
mod state;

use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ControlError, ControlResult};
use crate::reconcile::PollerRegistry;
use crate::state::StateStore;
use crate::workflow::WorkflowContext;

pub use deploy::{DeployRequest, DeployResponse};
pub use report::ReportResponse;
pub use state::StateResponse;

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Job state store.
    pub store: Arc<dyn StateStore>,
    /// Collaborators handed to deploy workflows.
    pub workflows: WorkflowContext,
    /// Background pollers for scheduler-backed jobs.
    pub pollers: Arc<PollerRegistry>,
    /// Per-caller ceiling on concurrent builds.
    pub max_concurrent: u32,
}

/// Creates the API router.
///
/// Every route accepts cross-origin calls.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/deploy", post(deploy::deploy))
        .route("/state/{job_id}", get(state::get_state))
        .route("/state/{job_id}/stream", get(state::stream_state))
        .route("/status", post(report::report_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe.
async fn healthcheck() -> &'static str {
    "OK"
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

const fn error_to_status(error: &ControlError) -> StatusCode {
    match error {
        ControlError::InvalidArgument(_)
        | ControlError::Unauthorized(_)
        | ControlError::TooManyBuilds { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Pull the bearer credential out of the `Authorization` header.
///
/// A bare credential without the `Bearer ` prefix is accepted as well.
fn bearer_token(headers: &HeaderMap) -> ControlResult<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ControlError::unauthorized("missing Authorization header"))?;
    let value = value
        .to_str()
        .map_err(|_| ControlError::unauthorized("malformed Authorization header"))?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if token.is_empty() {
        return Err(ControlError::unauthorized("empty bearer token"));
    }
    Ok(token.to_owned())
}
