//! Error types for forge-control.

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Request payload failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Request carried no usable bearer credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is already running the maximum number of concurrent builds.
    #[error("concurrent build limit of {limit} reached")]
    TooManyBuilds {
        /// Configured per-caller ceiling.
        limit: u32,
    },

    /// No live state for the given job id or webhook secret.
    #[error("not found: {0}")]
    NotFound(String),

    /// Workflow scheduler communication error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Source staging error (checkout, packaging or upload).
    #[error("staging error: {0}")]
    Staging(String),

    /// Platform API communication error.
    #[error("platform error: {0}")]
    Platform(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an unauthorized error.
    #[must_use]
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a scheduler error.
    #[must_use]
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    /// Create a staging error.
    #[must_use]
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a platform error.
    #[must_use]
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
