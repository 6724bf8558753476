//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::api;
use crate::config::{BuildConfig, ControlConfig};
use crate::error::{ControlError, ControlResult};
use crate::platform::{PlatformApi, PlatformClient};
use crate::reconcile::PollerRegistry;
use crate::scheduler::create_scheduler;
use crate::staging::SourceStager;
use crate::state::{MemoryStateStore, StateStore};
use crate::workflow::WorkflowContext;

/// The control service.
///
/// Manages the lifecycle of the control plane, including:
/// - Job state store and retention sweep
/// - Scheduler and platform clients
/// - Background status pollers
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service.
    ///
    /// This will:
    /// 1. Build the job state store
    /// 2. Create the scheduler and platform clients
    /// 3. Start the retention sweep
    /// 4. Start the HTTP API server
    /// 5. Wait for a shutdown signal
    pub async fn run(&self) -> ControlResult<()> {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::with_subscriber_capacity(
            self.config.build.subscriber_capacity,
        ));

        let scheduler = create_scheduler(&self.config.scheduler)?;
        info!(
            mode = ?self.config.scheduler.mode,
            url = %self.config.scheduler.url,
            "scheduler client configured"
        );

        let platform: Arc<dyn PlatformApi> = Arc::new(PlatformClient::new(&self.config.platform)?);
        info!(url = %self.config.platform.url, "platform client configured");

        let stager = Arc::new(SourceStager::new(
            &self.config.artifacts,
            self.config.build.checkout_dir.clone(),
        )?);

        let pollers = Arc::new(PollerRegistry::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Duration::from_secs(self.config.scheduler.poll_interval_secs),
            self.config.scheduler.max_poll_attempts,
        ));

        let sweep = tokio::spawn(retention_sweep(
            Arc::clone(&store),
            Arc::clone(&stager),
            self.config.build.clone(),
            self.cancel.child_token(),
        ));

        let state = api::AppState {
            store,
            workflows: WorkflowContext {
                scheduler,
                stager,
                platform,
                cloud_provider: self.config.platform.cloud_provider.clone(),
            },
            pollers: Arc::clone(&pollers),
            max_concurrent: self.config.build.max_concurrent,
        };
        let app = api::router(state).layer(TimeoutLayer::new(Duration::from_secs(
            self.config.server.request_timeout_secs,
        )));

        info!(listen = %self.config.server.listen_addr, "control service listening");
        serve(self.config.server.listen_addr, app, self.cancel.clone()).await?;

        pollers.shutdown();
        sweep.abort();

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Periodically drop expired finished jobs and stale template checkouts.
async fn retention_sweep(
    store: Arc<dyn StateStore>,
    stager: Arc<SourceStager>,
    build: BuildConfig,
    cancel: CancellationToken,
) {
    let retention = Duration::from_secs(build.retention_secs);
    let checkout_max_age = Duration::from_secs(build.checkout_max_age_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(build.sweep_interval_secs.max(1)));

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match store.evict_finished(retention).await {
            Ok(evicted) if evicted > 0 => info!(evicted, "expired job state removed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "job state sweep failed"),
        }

        match stager.cleanup_checkouts(checkout_max_age).await {
            Ok(removed) if removed > 0 => info!(removed, "stale checkouts removed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "checkout sweep failed"),
        }
    }
}

/// Serve an axum router with graceful shutdown.
async fn serve(addr: SocketAddr, app: axum::Router, cancel: CancellationToken) -> ControlResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControlError::Config(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .map_err(|e| ControlError::Config(format!("server error: {e}")))?;
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactConfig;
    use crate::types::{BuildEngine, BuildStatus, JobId, UserToken};

    #[test]
    fn service_creation() {
        let config = ControlConfig::default();
        let service = ControlService::new(config);
        assert!(!service.cancel.is_cancelled());
    }

    #[test]
    fn service_shutdown() {
        let config = ControlConfig::default();
        let service = ControlService::new(config);
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn retention_sweep_evicts_expired_jobs() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let job_id = JobId::generate();
        store
            .create_state(&job_id, &UserToken::new("caller"), BuildEngine::SelfManaged)
            .await
            .unwrap();
        store
            .update_state(&job_id, "done", BuildStatus::Succeeded)
            .await
            .unwrap();

        let artifacts = ArtifactConfig {
            storage_type: "memory".to_owned(),
            ..ArtifactConfig::default()
        };
        let checkouts = tempfile::tempdir().unwrap();
        let stager = Arc::new(SourceStager::new(&artifacts, checkouts.path()).unwrap());

        let build = BuildConfig {
            retention_secs: 0,
            sweep_interval_secs: 1,
            ..BuildConfig::default()
        };
        let cancel = CancellationToken::new();
        let sweep = tokio::spawn(retention_sweep(
            Arc::clone(&store),
            stager,
            build,
            cancel.clone(),
        ));

        for _ in 0..100 {
            if store.get_state(&job_id).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.get_state(&job_id).await.is_err());

        cancel.cancel();
        sweep.await.unwrap();
    }
}
