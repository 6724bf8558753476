//! Workload scheduler integration.
//!
//! The control plane never runs build workflows itself. It hands a rendered
//! submission to an external scheduler and then learns about progress either
//! by polling the scheduler or by the workflow pushing status reports back.

mod client;

pub use client::SchedulerClient;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{SchedulerConfig, SchedulerMode};
use crate::error::{ControlError, ControlResult};
use crate::types::{BuildStatus, JobId};

/// A rendered workflow ready for submission.
///
/// All workflow inputs (caller token, webhook secret, request arguments,
/// resolved environment variables) travel in `payload` as a single opaque
/// base64-encoded JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSubmission {
    /// Workflow instance name; always the job id.
    pub name: String,
    /// Which workflow template to run.
    pub template: String,
    /// Base64-encoded JSON parameter bundle.
    pub payload: String,
}

/// A status report describing a job's progress.
///
/// The same shape arrives on both reconciliation paths: pulled from the
/// scheduler's status artifact or pushed by the workflow itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Reported lifecycle status.
    pub status: BuildStatus,
    /// Human-readable explanation of the move.
    #[serde(default)]
    pub message: String,
    /// When the reporter observed the status.
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// Client-side view of the workload scheduler.
#[async_trait]
pub trait WorkloadScheduler: Send + Sync {
    /// Submit a workflow for execution.
    async fn submit_workflow(&self, submission: &WorkflowSubmission) -> ControlResult<()>;

    /// Fetch the ordered status reports a running workflow has written so far.
    ///
    /// Returns `Ok(None)` while the scheduler has not materialised the
    /// workflow yet; callers treat that as "try again later", not as an
    /// error.
    async fn workflow_reports(&self, job_id: &JobId) -> ControlResult<Option<Vec<StatusReport>>>;
}

/// Create a scheduler client from configuration.
pub fn create_scheduler(config: &SchedulerConfig) -> ControlResult<Arc<dyn WorkloadScheduler>> {
    match config.mode {
        SchedulerMode::Http => Ok(Arc::new(SchedulerClient::new(config)?)),
        SchedulerMode::Mock => Ok(Arc::new(MockScheduler::new())),
    }
}

/// In-memory scheduler for testing.
///
/// Records submissions and replays scripted poll answers.
#[derive(Debug, Default)]
pub struct MockScheduler {
    submissions: RwLock<Vec<WorkflowSubmission>>,
    reports: RwLock<HashMap<String, VecDeque<Option<Vec<StatusReport>>>>>,
    fail_submissions: AtomicBool,
}

impl MockScheduler {
    /// Create a new mock scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent submission fail.
    pub fn fail_submissions(&self) {
        self.fail_submissions.store(true, Ordering::SeqCst);
    }

    /// Queue one poll answer for a job. `None` means "workflow not
    /// materialised yet".
    pub fn push_poll_answer(&self, job_id: &JobId, reports: Option<Vec<StatusReport>>) {
        let mut scripted = self.reports.write().unwrap_or_else(|e| e.into_inner());
        scripted
            .entry(job_id.as_str().to_owned())
            .or_default()
            .push_back(reports);
    }

    /// Submissions received so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<WorkflowSubmission> {
        self.submissions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl WorkloadScheduler for MockScheduler {
    async fn submit_workflow(&self, submission: &WorkflowSubmission) -> ControlResult<()> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(ControlError::scheduler("mock scheduler rejected submission"));
        }

        let mut submissions = self
            .submissions
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        submissions.push(submission.clone());
        Ok(())
    }

    async fn workflow_reports(&self, job_id: &JobId) -> ControlResult<Option<Vec<StatusReport>>> {
        let mut scripted = self
            .reports
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        let queue = scripted
            .get_mut(job_id.as_str())
            .ok_or_else(|| ControlError::scheduler("mock scheduler has no script for job"))?;

        // Replay the script; once drained, keep answering with the last entry.
        if queue.len() > 1 {
            Ok(queue.pop_front().flatten())
        } else {
            Ok(queue.front().cloned().flatten())
        }
    }
}
