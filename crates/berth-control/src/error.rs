//! Error types for the berth control plane.

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur while orchestrating site deployments.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A template placeholder had no supplied value.
    #[error("template variable not supplied: {0}")]
    MissingVariable(String),

    /// Site identifier falls outside the allocatable port window.
    #[error("site id {site_id} outside allocatable window 1..={max_site_id}")]
    PortRangeExhausted {
        /// Site identifier that failed to map.
        site_id: i64,
        /// Upper bound of the window.
        max_site_id: i64,
    },

    /// The derived upstream port is already bound by another container.
    #[error("port {port} already bound by container {holder}")]
    PortConflict {
        /// The derived upstream port.
        port: u16,
        /// Name of the container currently publishing it.
        holder: String,
    },

    /// The container engine could not be reached (or timed out).
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The rendered container spec was rejected by the engine.
    #[error("container spec invalid: {0}")]
    SpecInvalid(String),

    /// A container with the derived name already exists.
    #[error("container name already in use: {0}")]
    NameConflict(String),

    /// The proxy rejected the configuration during validation.
    #[error("proxy configuration invalid: {0}")]
    ProxyConfigInvalid(String),

    /// The health gate expired without a successful probe.
    #[error("health check timed out after {waited_secs}s on port {port}: {last_outcome}")]
    HealthCheckTimeout {
        /// Probed upstream port.
        port: u16,
        /// Total time waited.
        waited_secs: u64,
        /// Outcome of the last probe attempt.
        last_outcome: String,
        /// Recent container log lines, for diagnostics.
        log_tail: Vec<String>,
    },

    /// Store lookup on an unknown id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },

    /// A domain already has a live site; the container-name function would
    /// collide.
    #[error("domain {hostname} already has a live site")]
    SiteExists {
        /// Hostname of the domain.
        hostname: String,
    },

    /// The owning domain is suspended or deleted.
    #[error("domain {hostname} is {status}; deployments refused")]
    DomainNotDeployable {
        /// Hostname of the domain.
        hostname: String,
        /// The domain's current status.
        status: &'static str,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error while preparing site directories.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error is transient at the runtime boundary and worth a
    /// bounded retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RuntimeUnavailable(_))
    }
}

impl From<berth_runtime::EngineError> for ControlError {
    fn from(err: berth_runtime::EngineError) -> Self {
        use berth_runtime::EngineError;

        match err {
            EngineError::BinaryNotFound(path) => {
                Self::RuntimeUnavailable(format!("docker binary not found at {}", path.display()))
            }
            EngineError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            EngineError::SpecInvalid(msg) => Self::SpecInvalid(msg),
            EngineError::NameConflict(name) => Self::NameConflict(name),
            EngineError::ContainerNotFound(name) => Self::NotFound(format!("container {name}")),
            EngineError::StartFailed { name, message } => {
                Self::RuntimeUnavailable(format!("failed to start {name}: {message}"))
            }
            EngineError::Io(e) => Self::Io(e),
        }
    }
}

impl From<berth_proxy::ProxyError> for ControlError {
    fn from(err: berth_proxy::ProxyError) -> Self {
        use berth_proxy::ProxyError;

        match err {
            ProxyError::ConfigInvalid(output) => Self::ProxyConfigInvalid(output),
            ProxyError::BinaryNotFound(path) => {
                Self::Config(format!("nginx binary not found at {}", path.display()))
            }
            ProxyError::ReloadFailed(msg) => Self::internal(format!("proxy reload failed: {msg}")),
            ProxyError::NothingStaged(name) => {
                Self::internal(format!("no staged vhost for {name}"))
            }
            ProxyError::Io(e) => Self::Io(e),
        }
    }
}
