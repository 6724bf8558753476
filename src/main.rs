//! Forge control service binary.
//!
//! Runs the control plane for accepting deploy requests and tracking build
//! jobs through to completion.

use tracing::info;
use tracing_subscriber::EnvFilter;

use forge_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("forge_control=info".parse()?),
        )
        .init();

    info!("Forge control service starting");

    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen = %config.server.listen_addr,
        scheduler = %config.scheduler.url,
        platform = %config.platform.url,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
