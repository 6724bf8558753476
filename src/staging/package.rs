//! Archive packaging and upload.
//!
//! Directories are packed as zstd-compressed tar archives and uploaded to
//! an object store keyed as `<project>/<stage>/<job>.tar.zst`.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::debug;

use crate::config::ArtifactConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::JobId;

use super::CodeFile;

const COMPRESSION_LEVEL: i32 = 3;

/// Object-store-backed archive storage.
pub struct ArchiveStore {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl ArchiveStore {
    /// Create an archive store from configuration.
    pub fn new(config: &ArtifactConfig) -> ControlResult<Self> {
        let store = create_object_store(config)?;
        Ok(Self {
            store,
            public_base_url: config.public_base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create an archive store with a pre-configured object store.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Upload a packed archive and return the URL it is reachable under.
    pub async fn upload(
        &self,
        project: &str,
        stage: &str,
        job_id: &JobId,
        data: Bytes,
    ) -> ControlResult<String> {
        let key = format!(
            "{}/{}/{}.tar.zst",
            sanitise_segment(project),
            sanitise_segment(stage),
            job_id
        );
        let path = ObjectPath::from(key.clone());

        debug!(path = %path, size = data.len(), "uploading source archive");
        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| ControlError::staging(format!("failed to upload archive: {e}")))?;

        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

/// Create an object store from configuration.
fn create_object_store(config: &ArtifactConfig) -> ControlResult<Arc<dyn ObjectStore>> {
    match config.storage_type.as_str() {
        "local" => {
            std::fs::create_dir_all(&config.path)?;
            let store = object_store::local::LocalFileSystem::new_with_prefix(&config.path)
                .map_err(|e| {
                    ControlError::staging(format!("failed to create local store: {e}"))
                })?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(object_store::memory::InMemory::new())),
        #[cfg(feature = "aws")]
        "s3" => {
            use object_store::aws::AmazonS3Builder;
            let bucket = config
                .bucket
                .as_ref()
                .ok_or_else(|| ControlError::Config("s3 storage requires a bucket".to_owned()))?;
            let mut builder = AmazonS3Builder::new().with_bucket_name(bucket);

            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }

            let store = builder
                .build()
                .map_err(|e| ControlError::staging(format!("failed to create S3 store: {e}")))?;
            Ok(Arc::new(store))
        }
        other => Err(ControlError::Config(format!(
            "unsupported storage type: {other}"
        ))),
    }
}

/// Write an inline code map into `dest`, decoding base64 entries.
pub(super) fn write_code_map(
    dest: &Path,
    files: &HashMap<String, CodeFile>,
) -> ControlResult<()> {
    for (rel_path, file) in files {
        validate_relative_path(rel_path)?;

        let target = dest.join(rel_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if file.is_base64_encoded {
            let data = BASE64.decode(&file.content).map_err(|e| {
                ControlError::staging(format!("invalid base64 content for {rel_path}: {e}"))
            })?;
            std::fs::write(&target, data)?;
        } else {
            std::fs::write(&target, file.content.as_bytes())?;
        }
    }

    Ok(())
}

/// Pack a directory into a tar.zst archive.
pub(super) fn pack_directory(src: &Path) -> ControlResult<Bytes> {
    let mut tar_data = Vec::new();

    {
        let mut builder = tar::Builder::new(&mut tar_data);
        builder.follow_symlinks(false);

        for path in collect_paths(src)? {
            let relative = path.strip_prefix(src).map_err(|e| {
                ControlError::staging(format!("path outside staging root: {e}"))
            })?;

            if path.is_file() {
                builder.append_path_with_name(&path, relative)?;
            } else if path.is_dir() {
                builder.append_dir(relative, &path)?;
            }
        }

        builder.finish()?;
    }

    debug!(uncompressed_size = tar_data.len(), "created tar archive");

    let compressed = zstd::encode_all(Cursor::new(&tar_data), COMPRESSION_LEVEL)?;

    debug!(compressed_size = compressed.len(), "compressed tar archive");

    Ok(Bytes::from(compressed))
}

/// Recursively collect all paths under `root`, excluding `root` itself.
fn collect_paths(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            paths.push(path.clone());
            paths.extend(collect_paths(&path)?);
        } else {
            paths.push(path);
        }
    }

    Ok(paths)
}

/// Reject code map paths that could land outside the staging directory.
fn validate_relative_path(path: &str) -> ControlResult<()> {
    if path.is_empty()
        || path.starts_with('/')
        || path.contains('\0')
        || Path::new(path)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ControlError::staging(format!(
            "unsafe code map path: {path}"
        )));
    }
    Ok(())
}

/// Sanitise a string for use as one storage path segment.
fn sanitise_segment(s: &str) -> String {
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
