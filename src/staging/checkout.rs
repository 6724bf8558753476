//! Template repository checkouts.
//!
//! Scaffolded projects start from the head of a template repository. The
//! repository is kept as a bare clone and its head tree is extracted into a
//! per-job working directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gix::progress::Discard;
use tokio::task;
use tracing::{debug, info, warn};

use crate::error::{ControlError, ControlResult};
use crate::types::JobId;

/// An extracted template tree ready for packaging.
#[derive(Debug)]
pub struct TemplateCheckout {
    /// Path to the extracted tree.
    pub path: PathBuf,
    /// The commit the tree was taken from.
    pub commit_sha: String,
}

/// Manages bare template clones and their extracted trees.
#[derive(Debug, Clone)]
pub struct CheckoutManager {
    checkout_dir: PathBuf,
    cache_dir: PathBuf,
}

impl CheckoutManager {
    /// Create a new checkout manager rooted at `root`.
    ///
    /// Bare clones live under `root/repos`, extracted trees under
    /// `root/work`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            checkout_dir: root.join("work"),
            cache_dir: root.join("repos"),
        }
    }

    /// Clone or refresh `repo_url` and extract its head commit into a fresh
    /// working directory for `job_id`.
    pub async fn checkout_head(
        &self,
        project: &str,
        job_id: &JobId,
        repo_url: &str,
    ) -> ControlResult<TemplateCheckout> {
        let project = project.to_owned();
        let job_id = job_id.clone();
        let repo_url = repo_url.to_owned();
        let checkout_dir = self.checkout_dir.clone();
        let cache_dir = self.cache_dir.clone();

        // gix operations are blocking; keep them off the runtime threads.
        task::spawn_blocking(move || {
            checkout_head_sync(&project, &job_id, &repo_url, &checkout_dir, &cache_dir)
        })
        .await
        .map_err(|e| ControlError::internal(format!("checkout task failed: {e}")))?
    }

    /// Clean up old working directories.
    ///
    /// Returns the number of directories removed.
    pub async fn cleanup(&self, max_age: Duration) -> ControlResult<usize> {
        let checkout_dir = self.checkout_dir.clone();

        task::spawn_blocking(move || cleanup_old_checkouts(&checkout_dir, max_age))
            .await
            .map_err(|e| ControlError::internal(format!("cleanup task failed: {e}")))?
    }
}

/// Synchronous checkout implementation.
fn checkout_head_sync(
    project: &str,
    job_id: &JobId,
    repo_url: &str,
    checkout_dir: &Path,
    cache_dir: &Path,
) -> ControlResult<TemplateCheckout> {
    std::fs::create_dir_all(checkout_dir)?;
    std::fs::create_dir_all(cache_dir)?;

    let cache_path = cache_dir.join(sanitise_for_path(repo_url));

    let repo = if cache_path.exists() {
        fetch_repository(&cache_path, repo_url)?
    } else {
        clone_repository(repo_url, &cache_path)?
    };

    // The job id keeps concurrent scaffolds of the same project apart.
    let work_dir = checkout_dir.join(format!(
        "{}-{}",
        sanitise_for_path(project),
        &job_id.as_str()[..8.min(job_id.as_str().len())]
    ));

    if work_dir.exists() {
        std::fs::remove_dir_all(&work_dir)?;
    }
    std::fs::create_dir_all(&work_dir)?;

    let head = repo
        .head_id()
        .map_err(|e| ControlError::staging(format!("cannot resolve template head: {e}")))?
        .detach();

    checkout_tree(&repo, &head, &work_dir)?;

    info!(path = %work_dir.display(), commit = %head, "template checkout complete");

    Ok(TemplateCheckout {
        path: work_dir,
        commit_sha: head.to_string(),
    })
}

/// Clone a repository as a bare repository.
fn clone_repository(url: &str, path: &Path) -> ControlResult<gix::Repository> {
    info!(url = %url, path = %path.display(), "cloning template repository");

    let mut prepare = gix::prepare_clone_bare(url, path)
        .map_err(|e| ControlError::staging(format!("failed to clone {url}: {e}")))?
        .with_shallow(gix::remote::fetch::Shallow::DepthAtRemote(
            1.try_into().expect("valid depth"),
        ));

    let (repo, _outcome) = prepare
        .fetch_only(Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| ControlError::staging(format!("failed to clone {url}: {e}")))?;

    Ok(repo)
}

/// Fetch updates to an existing repository.
fn fetch_repository(path: &Path, url: &str) -> ControlResult<gix::Repository> {
    debug!(path = %path.display(), "fetching template updates");

    let repo = gix::open(path)
        .map_err(|e| ControlError::staging(format!("failed to open template clone: {e}")))?;

    let remote = repo
        .find_remote("origin")
        .or_else(|_| repo.remote_at(url))
        .map_err(|e| ControlError::staging(format!("failed to resolve remote: {e}")))?;

    let _outcome = remote
        .connect(gix::remote::Direction::Fetch)
        .map_err(|e| ControlError::staging(format!("failed to connect to {url}: {e}")))?
        .prepare_fetch(Discard, Default::default())
        .map_err(|e| ControlError::staging(format!("failed to prepare fetch: {e}")))?
        .with_shallow(gix::remote::fetch::Shallow::DepthAtRemote(
            1.try_into().expect("valid depth"),
        ))
        .receive(Discard, &gix::interrupt::IS_INTERRUPTED)
        .map_err(|e| ControlError::staging(format!("failed to fetch {url}: {e}")))?;

    Ok(repo)
}

/// Extract a commit's tree to a working directory.
fn checkout_tree(
    repo: &gix::Repository,
    commit_id: &gix::ObjectId,
    work_dir: &Path,
) -> ControlResult<()> {
    let commit = repo
        .find_commit(*commit_id)
        .map_err(|e| ControlError::staging(format!("failed to find commit {commit_id}: {e}")))?;

    let tree = commit
        .tree()
        .map_err(|e| ControlError::staging(format!("failed to load tree of {commit_id}: {e}")))?;

    extract_tree(repo, &tree, work_dir)
}

/// Recursively extract a tree to a directory.
fn extract_tree(repo: &gix::Repository, tree: &gix::Tree<'_>, dest: &Path) -> ControlResult<()> {
    for entry in tree.iter() {
        let entry = entry
            .map_err(|e| ControlError::staging(format!("failed to read tree entry: {e}")))?;

        let name = std::str::from_utf8(entry.filename())
            .map_err(|_| ControlError::staging("invalid filename encoding in template"))?;

        if name.contains("..") || name.starts_with('/') || name.contains('\0') {
            return Err(ControlError::staging(format!(
                "unsafe path in template: {name}"
            )));
        }

        let entry_path = dest.join(name);

        match entry.mode().kind() {
            gix::object::tree::EntryKind::Tree => {
                std::fs::create_dir_all(&entry_path)?;
                let subtree = repo
                    .find_tree(entry.oid())
                    .map_err(|e| ControlError::staging(format!("failed to find subtree: {e}")))?;
                extract_tree(repo, &subtree, &entry_path)?;
            }
            gix::object::tree::EntryKind::Blob | gix::object::tree::EntryKind::BlobExecutable => {
                let object = repo
                    .find_object(entry.oid())
                    .map_err(|e| ControlError::staging(format!("failed to find blob: {e}")))?;
                std::fs::write(&entry_path, object.data.as_slice())?;

                #[cfg(unix)]
                if matches!(
                    entry.mode().kind(),
                    gix::object::tree::EntryKind::BlobExecutable
                ) {
                    use std::os::unix::fs::PermissionsExt;
                    let mut perms = std::fs::metadata(&entry_path)?.permissions();
                    perms.set_mode(0o755);
                    std::fs::set_permissions(&entry_path, perms)?;
                }
            }
            gix::object::tree::EntryKind::Link => {
                warn!(path = %entry_path.display(), "skipping symlink in template");
            }
            gix::object::tree::EntryKind::Commit => {
                warn!(path = %entry_path.display(), "skipping submodule in template");
            }
        }
    }

    Ok(())
}

/// Clean up old working directories.
fn cleanup_old_checkouts(checkout_dir: &Path, max_age: Duration) -> ControlResult<usize> {
    if !checkout_dir.exists() {
        return Ok(0);
    }

    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(checkout_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;

        if !metadata.is_dir() {
            continue;
        }

        if let Ok(modified) = metadata.modified() {
            if let Ok(age) = now.duration_since(modified) {
                if age > max_age {
                    debug!(path = %entry.path().display(), age = ?age, "removing old checkout");
                    if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                        warn!(path = %entry.path().display(), error = %e, "failed to remove old checkout");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
    }

    Ok(removed)
}

/// Sanitise a string for use in a filesystem path.
fn sanitise_for_path(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
