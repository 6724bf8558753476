//! HTTP client for the workload scheduler API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::config::SchedulerConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::JobId;

use super::{StatusReport, WorkflowSubmission, WorkloadScheduler};

/// HTTP client for interacting with the workload scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    client: Client,
    base_url: String,
}

impl SchedulerClient {
    /// Create a new scheduler client from configuration.
    pub fn new(config: &SchedulerConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a new scheduler client with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl WorkloadScheduler for SchedulerClient {
    async fn submit_workflow(&self, submission: &WorkflowSubmission) -> ControlResult<()> {
        let url = format!("{}/workflows", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(submission)
            .send()
            .await
            .map_err(ControlError::Http)?;

        if !response.status().is_success() {
            return Err(ControlError::scheduler(format!(
                "workflow submission rejected: {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn workflow_reports(&self, job_id: &JobId) -> ControlResult<Option<Vec<StatusReport>>> {
        let url = format!("{}/workflows/{}/status", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            StatusCode::OK => response.json().await.map(Some).map_err(ControlError::Http),
            // The scheduler has not materialised the workflow yet.
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(ControlError::scheduler(format!(
                "status lookup failed: {status}"
            ))),
        }
    }
}
