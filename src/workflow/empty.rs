//! Empty-project scaffold workflow.
//!
//! Unlike the scheduler-backed variants, the scaffold never leaves the
//! control plane: the template checkout, project registration and archive
//! upload all happen here, and the workflow reports its own status moves
//! straight into the state store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{ControlError, ControlResult};
use crate::platform::{PlatformApi, ProjectRegistration};
use crate::staging::SourceStager;
use crate::state::StateStore;
use crate::types::{BuildEngine, BuildStatus, JobId, UserToken};

use super::{require, Workflow};

/// Arguments accepted by empty-project deployments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmptyArgs {
    /// Template repository the new project is scaffolded from.
    pub github_repository: String,
    /// Name of the project to create.
    pub project_name: String,
    /// Deployment region.
    pub region: String,
    /// Directory within the template to scaffold from.
    pub base_path: Option<String>,
    /// Technology stack recorded on the project.
    pub stack: Vec<String>,
}

/// Scaffolds a fresh project from a template repository.
pub struct EmptyWorkflow {
    token: UserToken,
    stage: String,
    args: EmptyArgs,
    stager: Arc<SourceStager>,
    platform: Arc<dyn PlatformApi>,
    cloud_provider: String,
    store: Option<Arc<dyn StateStore>>,
}

impl EmptyWorkflow {
    /// Create a scaffold workflow for one caller and deployment stage.
    #[must_use]
    pub fn new(
        token: UserToken,
        stage: String,
        stager: Arc<SourceStager>,
        platform: Arc<dyn PlatformApi>,
        cloud_provider: String,
    ) -> Self {
        Self {
            token,
            stage,
            args: EmptyArgs::default(),
            stager,
            platform,
            cloud_provider,
            store: None,
        }
    }

    async fn run_scaffold(
        &self,
        store: &Arc<dyn StateStore>,
        job_id: &JobId,
    ) -> ControlResult<()> {
        store
            .update_state(job_id, "cloning template repository", BuildStatus::PullingCode)
            .await?;
        let checkout = self
            .stager
            .checkout_template(job_id, &self.args.project_name, &self.args.github_repository)
            .await?;

        store
            .update_state(job_id, "registering project", BuildStatus::Authenticating)
            .await?;
        let registration = ProjectRegistration {
            project_name: self.args.project_name.clone(),
            region: self.args.region.clone(),
            cloud_provider: self.cloud_provider.clone(),
            stage: self.stage.clone(),
            stack: self.args.stack.clone(),
        };
        self.platform
            .register_project(&self.token, &registration)
            .await?;

        store
            .update_state(job_id, "packaging project code", BuildStatus::Building)
            .await?;
        let url = self
            .stager
            .publish_checkout(job_id, &self.args.project_name, &self.stage, &checkout)
            .await?;

        info!(
            job = %job_id,
            project = %self.args.project_name,
            commit = %checkout.commit_sha,
            archive = %url,
            "scaffold published"
        );
        store
            .update_state(job_id, "project code uploaded", BuildStatus::Succeeded)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Workflow for EmptyWorkflow {
    fn engine(&self) -> BuildEngine {
        BuildEngine::SelfManaged
    }

    fn validate(&mut self, args: &serde_json::Value) -> ControlResult<()> {
        let args: EmptyArgs = serde_json::from_value(args.clone())
            .map_err(|e| ControlError::invalid_argument(format!("malformed empty args: {e}")))?;

        require(&args.github_repository, "githubRepository")?;
        require(&args.project_name, "projectName")?;
        require(&args.region, "region")?;

        self.args = args;
        Ok(())
    }

    fn assign_state_manager(&mut self, store: Arc<dyn StateStore>) {
        self.store = Some(store);
    }

    fn assign_environment(&mut self, _vars: HashMap<String, String>) {
        // Scaffolds run no build step; resolved variables are dropped.
    }

    /// Register the job, then perform the scaffold inline.
    ///
    /// A step failure is recorded as a terminal [`BuildStatus::Failed`]
    /// move before the error surfaces, so the job stays queryable for the
    /// retention window.
    async fn submit(&mut self) -> ControlResult<JobId> {
        let store = self.store.clone().ok_or_else(|| {
            ControlError::internal("empty workflow submitted without a state store")
        })?;

        let job_id = JobId::generate();
        store
            .create_state(&job_id, &self.token, BuildEngine::SelfManaged)
            .await?;

        if let Err(e) = self.run_scaffold(&store, &job_id).await {
            let reason = e.to_string();
            if let Err(update) = store
                .update_state(&job_id, &reason, BuildStatus::Failed)
                .await
            {
                error!(job = %job_id, error = %update, "failed to record scaffold failure");
            }
            return Err(e);
        }
        Ok(job_id)
    }
}
