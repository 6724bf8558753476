//! Job state tracking backends.
//!
//! This module provides the trait and in-memory implementation for tracking
//! build job lifecycles: the append-only transition log per job, the
//! per-caller concurrency ledger, the webhook secret registry and the
//! per-job status broadcast used by streaming subscribers.

mod memory;

pub use memory::MemoryStateStore;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ControlResult;
use crate::types::{BuildEngine, BuildStatus, JobId, JobState, UserToken, WebhookSecret};

/// A subscriber's view of one job's status feed.
#[derive(Debug)]
pub struct StateSubscription {
    /// State of the job at subscription time.
    pub snapshot: JobState,
    /// Feed of snapshots for every later transition. `None` when the job
    /// had already finished, in which case `snapshot` is the final word.
    pub updates: Option<broadcast::Receiver<JobState>>,
}

/// Backend for tracking build job state.
///
/// Implementations must apply each status report atomically: the transition
/// log append, the current-status move, the concurrency ledger adjustment
/// and the subscriber broadcast happen as one step per report.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Register a newly accepted job.
    ///
    /// Opens the transition log with the request-intake move and counts the
    /// job against its owner's concurrency budget. Returns an error if the
    /// job id is already registered.
    async fn create_state(
        &self,
        job_id: &JobId,
        owner_token: &UserToken,
        engine: BuildEngine,
    ) -> ControlResult<()>;

    /// Get a snapshot of a job's current state.
    async fn get_state(&self, job_id: &JobId) -> ControlResult<JobState>;

    /// Apply a status report to a job.
    ///
    /// Appends a transition from the current status to `new_status` and
    /// fans the new snapshot out to subscribers. Reports that name a status
    /// the log already contains, and any report arriving after the job
    /// finished, are dropped without error, so re-delivered reports are
    /// harmless. A terminal report releases the owner's concurrency slot
    /// exactly once and closes the job's update feed.
    async fn update_state(
        &self,
        job_id: &JobId,
        reason: &str,
        new_status: BuildStatus,
    ) -> ControlResult<()>;

    /// Number of unfinished jobs currently owned by `owner_token`.
    ///
    /// Tokens with no live jobs report zero.
    async fn concurrent_builds(&self, owner_token: &UserToken) -> ControlResult<u32>;

    /// Subscribe to a job's status feed.
    async fn subscribe(&self, job_id: &JobId) -> ControlResult<StateSubscription>;

    /// Bind a webhook secret to a job so push reports can be attributed.
    ///
    /// Empty secrets are rejected.
    async fn attach_secret(&self, secret: &WebhookSecret, job_id: &JobId) -> ControlResult<()>;

    /// Resolve a webhook secret to the job it was minted for.
    async fn resolve_secret(&self, secret: &WebhookSecret) -> ControlResult<JobId>;

    /// Remove finished jobs whose last update is older than `ttl`, along
    /// with any secrets bound to them. Returns how many jobs were removed.
    async fn evict_finished(&self, ttl: Duration) -> ControlResult<usize>;
}
