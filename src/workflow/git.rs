//! Git-sourced deploy workflow.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::scheduler::{WorkflowSubmission, WorkloadScheduler};
use crate::state::StateStore;
use crate::types::{BuildEngine, JobId, UserToken, WebhookSecret};

use super::{render_payload, require, Workflow};

/// Scheduler template that runs git-sourced builds.
const WORKFLOW_TEMPLATE: &str = "git-build";

/// Arguments accepted by git deployments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitArgs {
    /// Repository to clone, as a URL the build worker can reach.
    pub github_repository: String,
    /// Project the build belongs to.
    pub project_name: String,
    /// Deployment region.
    pub region: String,
    /// Stage override; wins over the request-level stage when present.
    pub stage: Option<String>,
    /// Directory within the repository to build from.
    pub base_path: Option<String>,
    /// Technology stack hints for the build worker.
    pub stack: Vec<String>,
    /// Whether the project is being deployed for the first time.
    pub is_new_project: bool,
}

/// Everything the build worker needs, rendered as one opaque payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GitPayload<'a> {
    token: &'a str,
    webhook_secret: &'a str,
    github_repository: &'a str,
    project_name: &'a str,
    region: &'a str,
    stage: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    base_path: Option<&'a str>,
    stack: &'a [String],
    is_new_project: bool,
    env_vars: &'a HashMap<String, String>,
}

/// Deploys a git repository through the external scheduler.
pub struct GitWorkflow {
    token: UserToken,
    stage: String,
    args: GitArgs,
    env_vars: HashMap<String, String>,
    scheduler: Arc<dyn WorkloadScheduler>,
    store: Option<Arc<dyn StateStore>>,
}

impl GitWorkflow {
    /// Create a git workflow for one caller and deployment stage.
    #[must_use]
    pub fn new(token: UserToken, stage: String, scheduler: Arc<dyn WorkloadScheduler>) -> Self {
        Self {
            token,
            stage,
            args: GitArgs::default(),
            env_vars: HashMap::new(),
            scheduler,
            store: None,
        }
    }
}

#[async_trait]
impl Workflow for GitWorkflow {
    fn engine(&self) -> BuildEngine {
        BuildEngine::ExternalScheduler
    }

    fn validate(&mut self, args: &serde_json::Value) -> ControlResult<()> {
        let args: GitArgs = serde_json::from_value(args.clone())
            .map_err(|e| ControlError::invalid_argument(format!("malformed git args: {e}")))?;

        require(&args.github_repository, "githubRepository")?;
        require(&args.project_name, "projectName")?;
        require(&args.region, "region")?;

        if let Some(stage) = args.stage.as_deref() {
            if !stage.is_empty() {
                self.stage = stage.to_owned();
            }
        }
        self.args = args;
        Ok(())
    }

    fn assign_state_manager(&mut self, store: Arc<dyn StateStore>) {
        self.store = Some(store);
    }

    fn assign_environment(&mut self, vars: HashMap<String, String>) {
        self.env_vars.extend(vars);
    }

    async fn submit(&mut self) -> ControlResult<JobId> {
        let store = self
            .store
            .clone()
            .ok_or_else(|| ControlError::internal("git workflow submitted without a state store"))?;

        let job_id = JobId::generate();
        let secret = WebhookSecret::generate();
        let payload = render_payload(&GitPayload {
            token: self.token.as_str(),
            webhook_secret: secret.as_str(),
            github_repository: &self.args.github_repository,
            project_name: &self.args.project_name,
            region: &self.args.region,
            stage: &self.stage,
            base_path: self.args.base_path.as_deref(),
            stack: &self.args.stack,
            is_new_project: self.args.is_new_project,
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
            repository = %self.args.github_repository,
            "git deployment submitted"
        );
        Ok(job_id)
    }
}
