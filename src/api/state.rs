//! Job state endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::types::{BuildEngine, BuildStatus, JobId, JobState, StateTransition};

use super::{bearer_token, error_to_status, AppState, ErrorResponse};

/// A job's state as returned to its owner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    /// Which component drives the job.
    pub build_engine: BuildEngine,
    /// Latest status.
    pub build_status: BuildStatus,
    /// When the status last changed.
    pub timestamp: DateTime<Utc>,
    /// Every recorded move, oldest first.
    pub transitions: Vec<StateTransition>,
}

impl From<JobState> for StateResponse {
    fn from(state: JobState) -> Self {
        Self {
            build_engine: state.engine,
            build_status: state.status,
            timestamp: state.updated_at,
            transitions: state.transitions,
        }
    }
}

/// Report a job's current state to its owner.
pub async fn get_state(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<StateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(e) => {
            return Err((
                error_to_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    };

    let job_id = JobId::new(job_id);
    match state.store.get_state(&job_id).await {
        Ok(job) => {
            // A job owned by someone else reads the same as a missing one.
            if job.owner_token.as_str() != token {
                return Err(not_found(&job_id));
            }
            Ok(Json(StateResponse::from(job)))
        }
        Err(e) => Err((
            error_to_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Stream a job's state over SSE until it finishes.
///
/// The first frame carries the current snapshot; every later transition
/// sends the full state again. The stream closes once the job finishes,
/// and a subscription to an already finished job gets the snapshot alone.
pub async fn stream_state(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, (StatusCode, Json<ErrorResponse>)>
{
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(e) => {
            return Err((
                error_to_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    };

    let job_id = JobId::new(job_id);
    let subscription = match state.store.subscribe(&job_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            return Err((
                error_to_status(&e),
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    };
    if subscription.snapshot.owner_token.as_str() != token {
        return Err(not_found(&job_id));
    }

    let snapshot = StateResponse::from(subscription.snapshot);
    let updates = match subscription.updates {
        Some(receiver) => BroadcastStream::new(receiver)
            .filter_map(|update| async move {
                match update {
                    Ok(job) => Some(Event::default().json_data(StateResponse::from(job))),
                    // A lagged subscriber resumes at the next delivered state.
                    Err(BroadcastStreamRecvError::Lagged(_)) => None,
                }
            })
            .boxed(),
        None => stream::empty().boxed(),
    };
    let frames = stream::once(async move { Event::default().json_data(snapshot) }).chain(updates);

    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}

fn not_found(job_id: &JobId) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("job not found: {job_id}"),
        }),
    )
}
