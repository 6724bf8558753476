//! Archive-sourced deploy workflow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::scheduler::{WorkflowSubmission, WorkloadScheduler};
use crate::staging::{CodeFile, SourceStager};
use crate::state::StateStore;
use crate::types::{BuildEngine, JobId, UserToken, WebhookSecret};

use super::{render_payload, require, Workflow};

/// Scheduler template that runs archive-sourced builds.
const WORKFLOW_TEMPLATE: &str = "archive-build";

/// Arguments accepted by archive deployments.
///
/// Sources arrive either as a URL the build worker can download, or as an
/// inline file map that the control plane stages into an archive first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchiveArgs {
    /// Pre-uploaded source archive, when the caller staged one themselves.
    #[serde(rename = "archiveDownloadURL")]
    pub archive_download_url: Option<String>,
    /// Project the build belongs to.
    pub project_name: String,
    /// Deployment region.
    pub region: String,
    /// Stage override; wins over the request-level stage when present.
    pub stage: Option<String>,
    /// Directory within the unpacked archive to build from.
    pub base_path: Option<String>,
    /// Inline source files, keyed by relative path.
    pub code: HashMap<String, CodeFile>,
}

/// Everything the build worker needs, rendered as one opaque payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchivePayload<'a> {
    token: &'a str,
    webhook_secret: &'a str,
    #[serde(rename = "archiveDownloadURL")]
    archive_download_url: &'a str,
    project_name: &'a str,
    region: &'a str,
    stage: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_path: Option<&'a str>,
    env_vars: &'a HashMap<String, String>,
}

/// Deploys an uploaded or inline source archive through the external
/// scheduler.
pub struct ArchiveWorkflow {
    token: UserToken,
    stage: String,
    args: ArchiveArgs,
    env_vars: HashMap<String, String>,
    scheduler: Arc<dyn WorkloadScheduler>,
    stager: Arc<SourceStager>,
    store: Option<Arc<dyn StateStore>>,
}

impl ArchiveWorkflow {
    /// Create an archive workflow for one caller and deployment stage.
    #[must_use]
    pub fn new(
        token: UserToken,
        stage: String,
        scheduler: Arc<dyn WorkloadScheduler>,
        stager: Arc<SourceStager>,
    ) -> Self {
        Self {
            token,
            stage,
            args: ArchiveArgs::default(),
            env_vars: HashMap::new(),
            scheduler,
            stager,
            store: None,
        }
    }

    fn provided_archive_url(&self) -> Option<&str> {
        self.args
            .archive_download_url
            .as_deref()
            .filter(|url| !url.is_empty())
    }
}

#[async_trait]
impl Workflow for ArchiveWorkflow {
    fn engine(&self) -> BuildEngine {
        BuildEngine::ExternalScheduler
    }

    fn validate(&mut self, args: &serde_json::Value) -> ControlResult<()> {
        let args: ArchiveArgs = serde_json::from_value(args.clone())
            .map_err(|e| ControlError::invalid_argument(format!("malformed archive args: {e}")))?;

        require(&args.project_name, "projectName")?;
        require(&args.region, "region")?;

        if let Some(stage) = args.stage.as_deref() {
            if !stage.is_empty() {
                self.stage = stage.to_owned();
            }
        }
        self.args = args;

        if self.provided_archive_url().is_none() && self.args.code.is_empty() {
            return Err(ControlError::invalid_argument("code is required"));
        }
        Ok(())
    }

    fn assign_state_manager(&mut self, store: Arc<dyn StateStore>) {
        self.store = Some(store);
    }

    fn assign_environment(&mut self, vars: HashMap<String, String>) {
        self.env_vars.extend(vars);
    }

    async fn submit(&mut self) -> ControlResult<JobId> {
        let store = self.store.clone().ok_or_else(|| {
            ControlError::internal("archive workflow submitted without a state store")
        })?;

        let job_id = JobId::generate();
        let secret = WebhookSecret::generate();

        let download_url = match self.provided_archive_url() {
            Some(url) => url.to_owned(),
            None => {
                self.stager
                    .stage_code_map(&job_id, &self.args.project_name, &self.stage, &self.args.code)
                    .await?
            }
        };

        let payload = render_payload(&ArchivePayload {
            token: self.token.as_str(),
            webhook_secret: secret.as_str(),
            archive_download_url: &download_url,
            project_name: &self.args.project_name,
            region: &self.args.region,
            stage: &self.stage,
            base_path: self.args.base_path.as_deref(),
            env_vars: &self.env_vars,
        })?;

        self.scheduler
            .submit_workflow(&WorkflowSubmission {
                name: job_id.to_string(),
                template: WORKFLOW_TEMPLATE.to_owned(),
                payload,
            })
            .await?;

        store.attach_secret(&secret, &job_id).await?;
        store
            .create_state(&job_id, &self.token, BuildEngine::ExternalScheduler)
            .await?;

        info!(
            job = %job_id,
            project = %self.args.project_name,
            archive = %download_url,
            "archive deployment submitted"
        );
        Ok(job_id)
    }
}
