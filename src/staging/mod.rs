//! Source staging for deploy requests.
//!
//! Deployments that arrive without a downloadable archive need one made for
//! them: inline code maps are written to disk and scaffolded projects are
//! checked out from a template repository. Either way the resulting
//! directory is packed into a tar.zst archive and uploaded to object
//! storage, where the build workflow fetches it from.

mod checkout;
mod package;

pub use checkout::{CheckoutManager, TemplateCheckout};
pub use package::ArchiveStore;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::info;

use crate::config::ArtifactConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::JobId;

/// One inline source file supplied with an archive deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeFile {
    /// File contents, possibly base64-encoded.
    pub content: String,
    /// Whether `content` is base64-encoded.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// Stages deployment sources as downloadable archives.
pub struct SourceStager {
    archives: ArchiveStore,
    checkouts: CheckoutManager,
}

impl SourceStager {
    /// Create a stager from configuration.
    pub fn new(artifacts: &ArtifactConfig, checkout_dir: impl Into<PathBuf>) -> ControlResult<Self> {
        Ok(Self {
            archives: ArchiveStore::new(artifacts)?,
            checkouts: CheckoutManager::new(checkout_dir),
        })
    }

    /// Create a stager from pre-built parts.
    #[must_use]
    pub fn with_parts(archives: ArchiveStore, checkouts: CheckoutManager) -> Self {
        Self { archives, checkouts }
    }

    /// Write an inline code map to a scratch directory, pack it and upload
    /// it. Returns the URL the archive can be downloaded from.
    ///
    /// The scratch directory is removed whether or not staging succeeds.
    pub async fn stage_code_map(
        &self,
        job_id: &JobId,
        project: &str,
        stage: &str,
        files: &HashMap<String, CodeFile>,
    ) -> ControlResult<String> {
        let files = files.clone();
        let archive = task::spawn_blocking(move || -> ControlResult<Bytes> {
            let scratch = tempfile::tempdir()?;
            package::write_code_map(scratch.path(), &files)?;
            package::pack_directory(scratch.path())
        })
        .await
        .map_err(|e| ControlError::internal(format!("staging task failed: {e}")))??;

        let url = self.archives.upload(project, stage, job_id, archive).await?;
        info!(job = %job_id, url = %url, "code map staged");
        Ok(url)
    }

    /// Check out the head of `repo_url` into a job-scoped work directory.
    pub async fn checkout_template(
        &self,
        job_id: &JobId,
        project: &str,
        repo_url: &str,
    ) -> ControlResult<TemplateCheckout> {
        let checkout = self.checkouts.checkout_head(project, job_id, repo_url).await?;
        info!(
            job = %job_id,
            commit = %checkout.commit_sha,
            "template checked out"
        );
        Ok(checkout)
    }

    /// Pack a finished checkout and upload it. Returns the URL the archive
    /// can be downloaded from.
    ///
    /// The checkout's work directory is consumed: it is removed once its
    /// contents are packed.
    pub async fn publish_checkout(
        &self,
        job_id: &JobId,
        project: &str,
        stage: &str,
        checkout: &TemplateCheckout,
    ) -> ControlResult<String> {
        let source = checkout.path.clone();
        let archive = task::spawn_blocking(move || {
            let packed = package::pack_directory(&source)?;
            std::fs::remove_dir_all(&source)?;
            Ok::<_, ControlError>(packed)
        })
        .await
        .map_err(|e| ControlError::internal(format!("staging task failed: {e}")))??;

        let url = self.archives.upload(project, stage, job_id, archive).await?;
        info!(job = %job_id, url = %url, "checkout staged");
        Ok(url)
    }

    /// Remove checkout directories older than `max_age`.
    ///
    /// Returns the number of directories removed.
    pub async fn cleanup_checkouts(&self, max_age: Duration) -> ControlResult<usize> {
        self.checkouts.cleanup(max_age).await
    }
}
