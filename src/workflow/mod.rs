//! Deploy workflow variants.
//!
//! A deploy request names its source with a `type` tag: `git` clones and
//! builds a repository, `archive` builds from an uploaded or inline source
//! archive, and `empty` scaffolds a fresh project from a template
//! repository. The first two render a workflow submission for the external
//! scheduler; the scaffold is cheap enough that the control plane performs
//! it itself.
//!
//! Variants share a lifecycle: construct for the caller, [`Workflow::validate`]
//! the request arguments, bind collaborators, then [`Workflow::submit`].

mod archive;
mod empty;
mod git;

pub use archive::ArchiveWorkflow;
pub use empty::EmptyWorkflow;
pub use git::GitWorkflow;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::platform::PlatformApi;
use crate::scheduler::WorkloadScheduler;
use crate::staging::SourceStager;
use crate::state::StateStore;
use crate::types::{BuildEngine, JobId, UserToken};

/// Source variant named by a deploy request's `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Build from a git repository.
    Git,
    /// Build from a source archive.
    Archive,
    /// Scaffold a new project from a template repository.
    Empty,
}

impl WorkflowKind {
    /// Get the tag as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Archive => "archive",
            Self::Empty => "empty",
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Collaborators a workflow needs besides its own arguments.
#[derive(Clone)]
pub struct WorkflowContext {
    /// External scheduler that runs git and archive builds.
    pub scheduler: Arc<dyn WorkloadScheduler>,
    /// Source staging for inline code and template checkouts.
    pub stager: Arc<SourceStager>,
    /// Platform API for project registration and environment lookups.
    pub platform: Arc<dyn PlatformApi>,
    /// Cloud provider name reported when registering scaffolded projects.
    pub cloud_provider: String,
}

/// One deploy request's journey from arguments to a registered job.
///
/// Implementations hold the request's arguments and drive their own
/// submission path; `submit` consumes staged sources, registers the job
/// with the state store and returns its id.
#[async_trait]
pub trait Workflow: Send {
    /// Which engine drives jobs submitted by this workflow.
    fn engine(&self) -> BuildEngine;

    /// Decode and check the variant arguments from the request's `args`.
    ///
    /// The first missing required field is reported as
    /// [`ControlError::InvalidArgument`] with the message
    /// `<field> is required`.
    fn validate(&mut self, args: &serde_json::Value) -> ControlResult<()>;

    /// Bind the store the workflow registers its job against.
    fn assign_state_manager(&mut self, store: Arc<dyn StateStore>);

    /// Merge resolved environment variables into the submission.
    ///
    /// Later calls win on key collisions.
    fn assign_environment(&mut self, vars: HashMap<String, String>);

    /// Stage sources, submit the job and register its state.
    ///
    /// Returns the id of the registered job. Scheduler-backed variants
    /// register no job when staging or submission fails.
    async fn submit(&mut self) -> ControlResult<JobId>;
}

/// Construct the workflow variant for a request's `type` tag.
///
/// `stage` is the request-level deployment stage; variants whose arguments
/// carry their own stage override it during validation.
#[must_use]
pub fn create_workflow(
    kind: WorkflowKind,
    token: UserToken,
    stage: String,
    context: &WorkflowContext,
) -> Box<dyn Workflow> {
    match kind {
        WorkflowKind::Git => Box::new(GitWorkflow::new(
            token,
            stage,
            Arc::clone(&context.scheduler),
        )),
        WorkflowKind::Archive => Box::new(ArchiveWorkflow::new(
            token,
            stage,
            Arc::clone(&context.scheduler),
            Arc::clone(&context.stager),
        )),
        WorkflowKind::Empty => Box::new(EmptyWorkflow::new(
            token,
            stage,
            Arc::clone(&context.stager),
            Arc::clone(&context.platform),
            context.cloud_provider.clone(),
        )),
    }
}

/// Render workflow parameters into the single opaque payload string the
/// scheduler passes through to the build worker.
pub(crate) fn render_payload<T: Serialize>(params: &T) -> ControlResult<String> {
    let json = serde_json::to_vec(params)
        .map_err(|e| ControlError::Serialisation(format!("failed to render payload: {e}")))?;
    Ok(BASE64.encode(json))
}

/// Reject empty required fields with the wire-level field name.
pub(crate) fn require(value: &str, field: &str) -> ControlResult<()> {
    if value.is_empty() {
        return Err(ControlError::invalid_argument(format!(
            "{field} is required"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactConfig;
    use crate::platform::MockPlatform;
    use crate::scheduler::MockScheduler;

    fn test_context() -> (WorkflowContext, tempfile::TempDir) {
        let checkouts = tempfile::tempdir().unwrap();
        let artifacts = ArtifactConfig {
            storage_type: "memory".to_owned(),
            ..ArtifactConfig::default()
        };
        let stager = SourceStager::new(&artifacts, checkouts.path()).unwrap();
        let context = WorkflowContext {
            scheduler: Arc::new(MockScheduler::new()),
            stager: Arc::new(stager),
            platform: Arc::new(MockPlatform::new()),
            cloud_provider: "aws".to_owned(),
        };
        (context, checkouts)
    }

    #[test]
    fn workflow_kind_parses_lowercase_tags() {
        let kind: WorkflowKind = serde_json::from_str("\"git\"").unwrap();
        assert_eq!(kind, WorkflowKind::Git);
        let kind: WorkflowKind = serde_json::from_str("\"archive\"").unwrap();
        assert_eq!(kind, WorkflowKind::Archive);
        let kind: WorkflowKind = serde_json::from_str("\"empty\"").unwrap();
        assert_eq!(kind, WorkflowKind::Empty);

        assert!(serde_json::from_str::<WorkflowKind>("\"zip\"").is_err());
        assert!(serde_json::from_str::<WorkflowKind>("\"GIT\"").is_err());
    }

    #[test]
    fn create_workflow_picks_the_engine_per_kind() {
        let (context, _checkouts) = test_context();
        let token = UserToken::new("caller");

        let git = create_workflow(
            WorkflowKind::Git,
            token.clone(),
            "prod".to_owned(),
            &context,
        );
        assert_eq!(git.engine(), BuildEngine::ExternalScheduler);

        let archive = create_workflow(
            WorkflowKind::Archive,
            token.clone(),
            "prod".to_owned(),
            &context,
        );
        assert_eq!(archive.engine(), BuildEngine::ExternalScheduler);

        let empty = create_workflow(WorkflowKind::Empty, token, "prod".to_owned(), &context);
        assert_eq!(empty.engine(), BuildEngine::SelfManaged);
    }

    #[test]
    fn render_payload_is_base64_of_json() {
        #[derive(Serialize)]
        struct Params<'a> {
            token: &'a str,
        }

        let rendered = render_payload(&Params { token: "tok" }).unwrap();
        let decoded = BASE64.decode(rendered).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["token"], "tok");
    }

    #[test]
    fn require_names_the_missing_field() {
        let err = require("", "projectName").unwrap_err();
        assert!(err.to_string().contains("projectName is required"));
        assert!(require("starlight", "projectName").is_ok());
    }
}
