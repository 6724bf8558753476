//! Platform API integration.
//!
//! The platform is the upstream system of record for projects and their
//! per-stage configuration. The control plane talks to it for two things:
//! registering the project record behind an empty scaffold, and resolving
//! the environment variables a build should run with.

mod client;

pub use client::PlatformClient;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::UserToken;

/// Project record created upstream for an empty scaffold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRegistration {
    /// Project name.
    pub project_name: String,
    /// Deployment region.
    pub region: String,
    /// Cloud provider the project deploys to.
    pub cloud_provider: String,
    /// Deployment stage.
    pub stage: String,
    /// Technology stack labels.
    pub stack: Vec<String>,
}

/// Client-side view of the platform API.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Create the upstream project record for a scaffolded deployment.
    async fn register_project(
        &self,
        token: &UserToken,
        registration: &ProjectRegistration,
    ) -> ControlResult<()>;

    /// Resolve the build-machine environment variables configured for a
    /// stage.
    async fn resolve_environment(&self, stage: &str) -> ControlResult<HashMap<String, String>>;
}

/// In-memory platform for testing.
///
/// Records registrations and serves scripted environment maps; stages with
/// no script resolve to an empty map.
#[derive(Debug, Default)]
pub struct MockPlatform {
    registrations: RwLock<Vec<ProjectRegistration>>,
    environments: RwLock<HashMap<String, HashMap<String, String>>>,
    fail_registrations: AtomicBool,
}

impl MockPlatform {
    /// Create a new mock platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent registration fail.
    pub fn fail_registrations(&self) {
        self.fail_registrations.store(true, Ordering::SeqCst);
    }

    /// Script the environment map returned for a stage.
    pub fn set_environment(&self, stage: &str, vars: HashMap<String, String>) {
        let mut environments = self.environments.write().unwrap_or_else(|e| e.into_inner());
        environments.insert(stage.to_owned(), vars);
    }

    /// Registrations received so far.
    #[must_use]
    pub fn registrations(&self) -> Vec<ProjectRegistration> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn register_project(
        &self,
        _token: &UserToken,
        registration: &ProjectRegistration,
    ) -> ControlResult<()> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            return Err(ControlError::platform("mock platform rejected registration"));
        }

        let mut registrations = self
            .registrations
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        registrations.push(registration.clone());
        Ok(())
    }

    async fn resolve_environment(&self, stage: &str) -> ControlResult<HashMap<String, String>> {
        let environments = self
            .environments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(environments.get(stage).cloned().unwrap_or_default())
    }
}
