//! Workflow status webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ControlError;
use crate::reconcile;
use crate::scheduler::StatusReport;
use crate::types::WebhookSecret;

use super::{bearer_token, error_to_status, AppState, ErrorResponse};

/// Response for an applied status report.
#[derive(Debug, Serialize)]
pub struct ReportResponse {
    /// Whether the report was applied.
    pub accepted: bool,
}

/// Apply a status report pushed by a running build workflow.
///
/// The bearer credential is the webhook secret minted at submission, not
/// a caller token.
pub async fn report_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReportResponse>, (StatusCode, Json<ErrorResponse>)> {
    let secret = match bearer_token(&headers) {
        Ok(secret) => WebhookSecret::new(secret),
        Err(e) => {
            return Err((
                error_to_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    };

    let report: StatusReport = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(e) => {
            let e = ControlError::invalid_argument(format!("malformed status report: {e}"));
            return Err((
                error_to_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ));
        }
    };

    match reconcile::apply_report(&state.store, &secret, &report).await {
        Ok(job_id) => {
            info!(job = %job_id, status = %report.status, "status report applied");
            if report.status.is_terminal() {
                state.pollers.unwatch(&job_id);
            }
            Ok(Json(ReportResponse { accepted: true }))
        }
        Err(e) => {
            warn!(status = %report.status, error = %e, "status report rejected");
            Err((
                error_to_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
