//! Configuration for forge-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Workload scheduler client configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Platform API client configuration.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Source archive storage configuration.
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Build tracking behaviour configuration.
    #[serde(default)]
    pub build: BuildConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `forge.toml` in the current directory (if present)
    /// 3. Environment variables with `FORGE_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("forge.toml"))
            .merge(Env::prefixed("FORGE_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FORGE_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080)
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Workload scheduler client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Which scheduler implementation to use.
    #[serde(default)]
    pub mode: SchedulerMode,

    /// Base URL for the scheduler HTTP API.
    #[serde(default = "default_scheduler_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_scheduler_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between status poll attempts for one job (seconds).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How many poll attempts a job gets before polling stops.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_scheduler_url() -> String {
    "http://localhost:8082".to_owned()
}

const fn default_scheduler_timeout_secs() -> u64 {
    10
}

const fn default_poll_interval_secs() -> u64 {
    5
}

const fn default_max_poll_attempts() -> u32 {
    35
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::default(),
            url: default_scheduler_url(),
            timeout_secs: default_scheduler_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

/// Which scheduler client implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerMode {
    /// Talk to a real scheduler over HTTP.
    #[default]
    Http,

    /// In-memory scheduler for testing.
    Mock,
}

/// Platform API client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Base URL for the platform API.
    #[serde(default = "default_platform_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_platform_timeout_secs")]
    pub timeout_secs: u64,

    /// Basic-auth user for environment variable lookups.
    pub vault_user: Option<String>,

    /// Basic-auth password for environment variable lookups.
    pub vault_password: Option<String>,

    /// Cloud provider name reported when registering scaffolded projects.
    #[serde(default = "default_cloud_provider")]
    pub cloud_provider: String,
}

fn default_platform_url() -> String {
    "http://localhost:8081".to_owned()
}

const fn default_platform_timeout_secs() -> u64 {
    10
}

fn default_cloud_provider() -> String {
    "aws".to_owned()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: default_platform_url(),
            timeout_secs: default_platform_timeout_secs(),
            vault_user: None,
            vault_password: None,
            cloud_provider: default_cloud_provider(),
        }
    }
}

/// Source archive storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Storage backend: "local", "memory", or "s3".
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    /// Root directory for the local backend.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Bucket name for the S3 backend.
    pub bucket: Option<String>,

    /// S3 region.
    pub region: Option<String>,

    /// S3 endpoint URL (for S3-compatible stores).
    pub endpoint: Option<String>,

    /// Base URL under which uploaded archives are reachable by build workers.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_storage_type() -> String {
    "local".to_owned()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/forge/artifacts")
}

fn default_public_base_url() -> String {
    "http://localhost:9000/artifacts".to_owned()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            path: default_storage_path(),
            bucket: None,
            region: None,
            endpoint: None,
            public_base_url: default_public_base_url(),
        }
    }
}

/// Build tracking behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Maximum concurrent non-terminal jobs per caller token.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Buffered status updates retained per subscriber before old ones drop.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// How long finished job state stays queryable (seconds).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Delay between retention sweeps (seconds).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Directory for bare repository checkouts.
    #[serde(default = "default_checkout_dir")]
    pub checkout_dir: PathBuf,

    /// Checkouts older than this are removed on cleanup (seconds).
    #[serde(default = "default_checkout_max_age_secs")]
    pub checkout_max_age_secs: u64,
}

const fn default_max_concurrent() -> u32 {
    3
}

const fn default_subscriber_capacity() -> usize {
    15
}

const fn default_retention_secs() -> u64 {
    3600
}

const fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_checkout_dir() -> PathBuf {
    PathBuf::from("/var/lib/forge/checkouts")
}

const fn default_checkout_max_age_secs() -> u64 {
    86_400
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            subscriber_capacity: default_subscriber_capacity(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            checkout_dir: default_checkout_dir(),
            checkout_max_age_secs: default_checkout_max_age_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8080);
        assert_eq!(config.scheduler.url, "http://localhost:8082");
        assert_eq!(config.scheduler.max_poll_attempts, 35);
        assert_eq!(config.build.max_concurrent, 3);
        assert_eq!(config.build.subscriber_capacity, 15);
        assert_eq!(config.artifacts.storage_type, "local");
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [scheduler]
            url = "http://scheduler.internal:2746"
            mode = "mock"
            poll_interval_secs = 2

            [build]
            max_concurrent = 5
            retention_secs = 120
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.scheduler.url, "http://scheduler.internal:2746");
        assert_eq!(config.scheduler.mode, SchedulerMode::Mock);
        assert_eq!(config.scheduler.poll_interval_secs, 2);
        assert_eq!(config.build.max_concurrent, 5);
        assert_eq!(config.build.retention_secs, 120);
        assert_eq!(config.platform.url, "http://localhost:8081");
    }
}
