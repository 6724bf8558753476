//! Forge Control Plane
//!
//! This crate provides the deployment intake layer for Forge projects. It
//! accepts deploy requests over HTTP, dispatches build workflows to the
//! workload scheduler, and tracks each job's lifecycle until it finishes.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Deploy intake**: Validating deploy requests, enforcing per-caller
//!   concurrency ceilings and registering accepted jobs
//! - **Workflow dispatch**: Rendering job payloads and submitting them to
//!   the workload scheduler, or scaffolding empty projects in-process
//! - **State tracking**: Keeping an append-only transition log per job,
//!   queryable synchronously or streamed over SSE
//! - **Reconciliation**: Applying status reports pushed by build workers
//!   and polling the scheduler for jobs that go quiet
//!
//! # Job Lifecycle
//!
//! Jobs move through a fixed ladder of build statuses:
//!
//! ```text
//! PROCESSING ──▶ PENDING ──▶ SCHEDULED ──▶ AUTHENTICATING ──▶ PULLING_CODE
//!     ──▶ INSTALLING_DEPS ──▶ BUILDING ──▶ DEPLOYING_BACKEND
//!     ──▶ DEPLOYING_FRONTEND ──▶ SUCCEEDED
//! ```
//!
//! `FAILED` may be reported from any step, and reporters are free to skip
//! steps. Re-delivered reports are dropped rather than logged twice, and
//! nothing moves a job once it reaches `SUCCEEDED` or `FAILED`.
//!
//! # Example
//!
//! ```ignore
//! use forge_control::{ControlConfig, ControlService};
//!
//! let config = ControlConfig::load().unwrap_or_default();
//! let service = ControlService::new(config);
//!
//! // Serves the API until Ctrl+C, SIGTERM or service.shutdown().
//! service.run().await?;
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod platform;
pub mod reconcile;
pub mod scheduler;
pub mod service;
pub mod staging;
pub mod state;
pub mod types;
pub mod workflow;

// Re-export commonly used types at the crate root
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use scheduler::StatusReport;
pub use service::ControlService;
pub use state::{MemoryStateStore, StateStore, StateSubscription};
pub use types::{
    BuildEngine, BuildStatus, JobId, JobState, StateTransition, UserToken, WebhookSecret,
};
