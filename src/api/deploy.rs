//! Deploy submission endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::types::{BuildEngine, BuildStatus, UserToken};
use crate::workflow::{create_workflow, WorkflowKind};

use super::{error_to_status, AppState, ErrorResponse};

/// Stage deployed to when the request names none.
const DEFAULT_STAGE: &str = "prod";

/// A deploy request as it arrives on the wire.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    /// Caller's bearer token.
    #[serde(default)]
    pub token: String,
    /// Source variant tag.
    #[serde(rename = "type")]
    pub kind: WorkflowKind,
    /// Deployment stage; `prod` when absent.
    #[serde(default)]
    pub stage: Option<String>,
    /// Variant-specific arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Response for an accepted deploy.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// Id the job can be queried under.
    #[serde(rename = "jobID")]
    pub job_id: String,
    /// Job status at response time.
    pub status: BuildStatus,
}

/// Accept a deploy request and submit its workflow.
pub async fn deploy(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<DeployResponse>), (StatusCode, Json<ErrorResponse>)> {
    match submit(&state, &body).await {
        Ok(response) => {
            info!(job = %response.job_id, status = %response.status, "deploy accepted");
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(e) => {
            let status = error_to_status(&e);
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}

async fn submit(state: &AppState, body: &[u8]) -> ControlResult<DeployResponse> {
    let request: DeployRequest = serde_json::from_slice(body)
        .map_err(|e| ControlError::invalid_argument(format!("malformed deploy request: {e}")))?;

    if request.token.is_empty() {
        return Err(ControlError::invalid_argument("token is required"));
    }
    let token = UserToken::new(request.token);

    let running = state.store.concurrent_builds(&token).await?;
    if running >= state.max_concurrent {
        return Err(ControlError::TooManyBuilds {
            limit: state.max_concurrent,
        });
    }

    let requested_stage = request.stage.filter(|stage| !stage.is_empty());
    let stage = requested_stage
        .clone()
        .unwrap_or_else(|| DEFAULT_STAGE.to_owned());

    info!(kind = %request.kind, stage = %stage, "deploy request received");

    let mut workflow = create_workflow(request.kind, token, stage, &state.workflows);
    workflow.validate(&request.args)?;
    workflow.assign_state_manager(Arc::clone(&state.store));

    // Environment variables are resolved only for stages the caller named.
    if let Some(stage_id) = requested_stage {
        let vars = state
            .workflows
            .platform
            .resolve_environment(&stage_id)
            .await?;
        workflow.assign_environment(vars);
    }

    let engine = workflow.engine();
    let job_id = workflow.submit().await?;
    if engine == BuildEngine::ExternalScheduler {
        state.pollers.watch(job_id.clone());
    }

    let status = state.store.get_state(&job_id).await?.status;
    Ok(DeployResponse {
        job_id: job_id.to_string(),
        status,
    })
}
