//! Core types for forge-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a build job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique job ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque caller identity presented with deploy and state requests.
///
/// Tokens are compared verbatim and never interpreted. They key the
/// concurrency ledger and gate access to job state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserToken(String);

impl UserToken {
    /// Create a token from an existing string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for UserToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Secret minted per job and handed to the build workflow, which presents
/// it back on push status reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    /// Create a secret from an existing string.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Mint a new random secret.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the secret as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for WebhookSecret {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a build job.
///
/// Statuses generally advance in declaration order, but reporters may skip
/// intermediate steps. [`BuildStatus::Succeeded`] and [`BuildStatus::Failed`]
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    /// Request received, job not yet registered.
    Processing,
    /// Job registered, waiting for the workflow to start.
    Pending,
    /// Workflow accepted by the scheduler.
    Scheduled,
    /// Workflow is authenticating against upstream services.
    Authenticating,
    /// Workflow is fetching source code.
    PullingCode,
    /// Workflow is installing dependencies.
    InstallingDeps,
    /// Workflow is compiling the project.
    Building,
    /// Workflow is deploying backend resources.
    DeployingBackend,
    /// Workflow is deploying frontend resources.
    DeployingFrontend,
    /// Job finished successfully.
    Succeeded,
    /// Job finished with an error.
    Failed,
}

impl BuildStatus {
    /// Get the status name as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Authenticating => "AUTHENTICATING",
            Self::PullingCode => "PULLING_CODE",
            Self::InstallingDeps => "INSTALLING_DEPS",
            Self::Building => "BUILDING",
            Self::DeployingBackend => "DEPLOYING_BACKEND",
            Self::DeployingFrontend => "DEPLOYING_FRONTEND",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    /// Whether the status ends the job lifecycle.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "PENDING" => Ok(Self::Pending),
            "SCHEDULED" => Ok(Self::Scheduled),
            "AUTHENTICATING" => Ok(Self::Authenticating),
            "PULLING_CODE" => Ok(Self::PullingCode),
            "INSTALLING_DEPS" => Ok(Self::InstallingDeps),
            "BUILDING" => Ok(Self::Building),
            "DEPLOYING_BACKEND" => Ok(Self::DeployingBackend),
            "DEPLOYING_FRONTEND" => Ok(Self::DeployingFrontend),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("unknown build status: {s}")),
        }
    }
}

/// Which component drives a job's status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildEngine {
    /// The external workload scheduler runs the workflow and reports back.
    ExternalScheduler,
    /// The control plane itself performs the work and updates state inline.
    SelfManaged,
}

impl BuildEngine {
    /// Get the engine name as it appears on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalScheduler => "external-scheduler",
            Self::SelfManaged => "self-managed",
        }
    }
}

impl fmt::Display for BuildEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single recorded move between two statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    /// Status before the move.
    pub from: BuildStatus,
    /// Status after the move.
    pub to: BuildStatus,
    /// When the move was recorded.
    pub at: DateTime<Utc>,
    /// Human-readable explanation supplied by the reporter.
    pub reason: String,
}

/// Full tracked state of a build job.
///
/// Store-internal record; responses expose it through their own wire
/// shapes so the owner token never serializes.
#[derive(Debug, Clone)]
pub struct JobState {
    /// Which component drives this job.
    pub engine: BuildEngine,
    /// Latest status.
    pub status: BuildStatus,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// Caller that owns the job.
    pub owner_token: UserToken,
    /// Append-only transition log, oldest first.
    pub transitions: Vec<StateTransition>,
}

impl JobState {
    /// Create the state for a freshly accepted job.
    ///
    /// The log opens with the request-intake move from
    /// [`BuildStatus::Processing`] to [`BuildStatus::Pending`].
    #[must_use]
    pub fn new(owner_token: UserToken, engine: BuildEngine) -> Self {
        let now = Utc::now();
        Self {
            engine,
            status: BuildStatus::Pending,
            updated_at: now,
            owner_token,
            transitions: vec![StateTransition {
                from: BuildStatus::Processing,
                to: BuildStatus::Pending,
                at: now,
                reason: "deploy request accepted".to_string(),
            }],
        }
    }
}
