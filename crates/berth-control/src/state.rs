//! Typestate pattern for the site lifecycle.
//!
//! Encodes site states in the type system so invalid transitions are a
//! compile-time error rather than a runtime surprise. The persisted status
//! column is the runtime mirror of these types; [`AnySite`] bridges the
//! two when loading from the store.
//!
//! ```text
//! Pending ──▶ Deploying ──▶ Active ──▶ Stopped
//!    │            │  ▲         │  ▲        │
//!    │            ▼  │         │  └────────┘ (redeploy)
//!    │         Failed ─────────┘
//!    └──────────────▶ Deleted ◀── (any non-terminal state)
//! ```

use std::marker::PhantomData;

use crate::error::{ControlError, ControlResult};
use crate::types::{SiteId, SiteRecord, SiteStatus};

// =============================================================================
// State marker types (zero-sized)
// =============================================================================

/// Marker trait for site states.
pub trait SiteState: private::Sealed + Send + Sync {
    /// Get the persisted status representation.
    fn persisted() -> SiteStatus;

    /// Get the state name for error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Site created, never deployed.
#[derive(Debug, Clone, Copy)]
pub struct Pending;

/// Deployment in flight.
#[derive(Debug, Clone, Copy)]
pub struct Deploying;

/// Container healthy and routed by the proxy.
#[derive(Debug, Clone, Copy)]
pub struct Active;

/// Last deployment attempt failed.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

/// Stopped by request; container kept for restart.
#[derive(Debug, Clone, Copy)]
pub struct Stopped;

/// Soft-deleted. Terminal and absorbing.
#[derive(Debug, Clone, Copy)]
pub struct Deleted;

impl private::Sealed for Pending {}
impl private::Sealed for Deploying {}
impl private::Sealed for Active {}
impl private::Sealed for Failed {}
impl private::Sealed for Stopped {}
impl private::Sealed for Deleted {}

impl SiteState for Pending {
    fn persisted() -> SiteStatus {
        SiteStatus::Pending
    }
    fn name() -> &'static str {
        "pending"
    }
}

impl SiteState for Deploying {
    fn persisted() -> SiteStatus {
        SiteStatus::Deploying
    }
    fn name() -> &'static str {
        "deploying"
    }
}

impl SiteState for Active {
    fn persisted() -> SiteStatus {
        SiteStatus::Active
    }
    fn name() -> &'static str {
        "active"
    }
}

impl SiteState for Failed {
    fn persisted() -> SiteStatus {
        SiteStatus::Failed
    }
    fn name() -> &'static str {
        "failed"
    }
}

impl SiteState for Stopped {
    fn persisted() -> SiteStatus {
        SiteStatus::Stopped
    }
    fn name() -> &'static str {
        "stopped"
    }
}

impl SiteState for Deleted {
    fn persisted() -> SiteStatus {
        SiteStatus::Deleted
    }
    fn name() -> &'static str {
        "deleted"
    }
}

// =============================================================================
// Site struct parameterised by state
// =============================================================================

/// A site in a specific lifecycle state.
///
/// The state parameter `S` determines which transitions are available.
#[derive(Debug)]
pub struct Site<S: SiteState> {
    record: SiteRecord,
    _state: PhantomData<S>,
}

impl<S: SiteState> Site<S> {
    /// Get a reference to the underlying record.
    #[must_use]
    pub const fn record(&self) -> &SiteRecord {
        &self.record
    }

    /// Get the site ID.
    #[must_use]
    pub const fn id(&self) -> SiteId {
        self.record.id
    }

    /// Get the current state as a persisted value.
    #[must_use]
    pub fn status(&self) -> SiteStatus {
        S::persisted()
    }

    /// Convert into the underlying record (consuming the site).
    #[must_use]
    pub fn into_record(self) -> SiteRecord {
        self.record
    }

    fn transition<T: SiteState>(self) -> Site<T> {
        self.transition_with(|_| {})
    }

    fn transition_with<T: SiteState>(mut self, f: impl FnOnce(&mut SiteRecord)) -> Site<T> {
        f(&mut self.record);
        self.record.status = T::persisted();
        self.record.updated_at = chrono::Utc::now();
        Site {
            record: self.record,
            _state: PhantomData,
        }
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl Site<Pending> {
    /// Wrap a freshly created record.
    #[must_use]
    pub const fn create(record: SiteRecord) -> Self {
        Self {
            record,
            _state: PhantomData,
        }
    }

    /// Begin the first deployment attempt.
    #[must_use]
    pub fn begin_deploy(self) -> Site<Deploying> {
        self.transition_with(|r| r.error = None)
    }
}

impl Site<Deploying> {
    /// The deployment passed its health gate and the proxy was activated.
    #[must_use]
    pub fn activate(self, port: u16) -> Site<Active> {
        self.transition_with(|r| {
            r.port = Some(port);
            r.error = None;
            r.deployed_at = Some(chrono::Utc::now());
        })
    }

    /// The deployment attempt failed.
    #[must_use]
    pub fn fail(self, error: String) -> Site<Failed> {
        self.transition_with(|r| r.error = Some(error))
    }

    /// A redeploy candidate failed while the previous deployment is still
    /// serving: return to active, recording why the replacement was
    /// abandoned.
    #[must_use]
    pub fn abort_to_active(self, error: String) -> Site<Active> {
        self.transition_with(|r| r.error = Some(error))
    }
}

impl Site<Active> {
    /// Begin a redeploy. The assigned port is retained.
    #[must_use]
    pub fn begin_deploy(self) -> Site<Deploying> {
        self.transition()
    }

    /// Stop the site; the container is kept for restart.
    #[must_use]
    pub fn stop(self) -> Site<Stopped> {
        self.transition()
    }
}

impl Site<Failed> {
    /// Retry deployment after a failure.
    #[must_use]
    pub fn begin_deploy(self) -> Site<Deploying> {
        self.transition_with(|r| r.error = None)
    }
}

impl Site<Stopped> {
    /// Restart via the full deploy protocol.
    #[must_use]
    pub fn begin_deploy(self) -> Site<Deploying> {
        self.transition_with(|r| r.error = None)
    }
}

impl Site<Pending> {
    /// Remove the site before it was ever deployed.
    #[must_use]
    pub fn delete(self) -> Site<Deleted> {
        self.transition()
    }
}

impl Site<Deploying> {
    /// Remove the site mid-deployment (teardown recovers the pieces).
    #[must_use]
    pub fn delete(self) -> Site<Deleted> {
        self.transition()
    }
}

impl Site<Active> {
    /// Remove a serving site.
    #[must_use]
    pub fn delete(self) -> Site<Deleted> {
        self.transition()
    }
}

impl Site<Failed> {
    /// Remove a failed site.
    #[must_use]
    pub fn delete(self) -> Site<Deleted> {
        self.transition()
    }
}

impl Site<Stopped> {
    /// Remove a stopped site.
    #[must_use]
    pub fn delete(self) -> Site<Deleted> {
        self.transition()
    }
}

// =============================================================================
// Loading from persisted state
// =============================================================================

/// A type-erased site that can be in any state, used when loading from the
/// store where the state is only known at runtime.
#[derive(Debug)]
pub enum AnySite {
    /// Site in pending state.
    Pending(Site<Pending>),
    /// Site in deploying state.
    Deploying(Site<Deploying>),
    /// Site in active state.
    Active(Site<Active>),
    /// Site in failed state.
    Failed(Site<Failed>),
    /// Site in stopped state.
    Stopped(Site<Stopped>),
    /// Site in deleted state.
    Deleted(Site<Deleted>),
}

impl AnySite {
    /// Rehydrate from a stored record.
    #[must_use]
    pub fn from_record(record: SiteRecord) -> Self {
        match record.status {
            SiteStatus::Pending => Self::Pending(Site {
                record,
                _state: PhantomData,
            }),
            SiteStatus::Deploying => Self::Deploying(Site {
                record,
                _state: PhantomData,
            }),
            SiteStatus::Active => Self::Active(Site {
                record,
                _state: PhantomData,
            }),
            SiteStatus::Failed => Self::Failed(Site {
                record,
                _state: PhantomData,
            }),
            SiteStatus::Stopped => Self::Stopped(Site {
                record,
                _state: PhantomData,
            }),
            SiteStatus::Deleted => Self::Deleted(Site {
                record,
                _state: PhantomData,
            }),
        }
    }

    /// Get a reference to the underlying record.
    #[must_use]
    pub const fn record(&self) -> &SiteRecord {
        match self {
            Self::Pending(s) => s.record(),
            Self::Deploying(s) => s.record(),
            Self::Active(s) => s.record(),
            Self::Failed(s) => s.record(),
            Self::Stopped(s) => s.record(),
            Self::Deleted(s) => s.record(),
        }
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> SiteStatus {
        match self {
            Self::Pending(_) => SiteStatus::Pending,
            Self::Deploying(_) => SiteStatus::Deploying,
            Self::Active(_) => SiteStatus::Active,
            Self::Failed(_) => SiteStatus::Failed,
            Self::Stopped(_) => SiteStatus::Stopped,
            Self::Deleted(_) => SiteStatus::Deleted,
        }
    }

    /// Whether the site is in the terminal deleted state.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }

    /// Begin a deployment from any state that allows it.
    ///
    /// Valid from pending, active (redeploy), failed (retry) and stopped
    /// (restart); an in-flight or deleted site refuses.
    pub fn begin_deploy(self) -> ControlResult<Site<Deploying>> {
        match self {
            Self::Pending(s) => Ok(s.begin_deploy()),
            Self::Active(s) => Ok(s.begin_deploy()),
            Self::Failed(s) => Ok(s.begin_deploy()),
            Self::Stopped(s) => Ok(s.begin_deploy()),
            other => Err(ControlError::InvalidStateTransition {
                from: other.status().as_str(),
                to: "deploying",
            }),
        }
    }

    /// Extract an active site, for operations that require one.
    pub fn try_into_active(self) -> ControlResult<Site<Active>> {
        match self {
            Self::Active(s) => Ok(s),
            other => Err(ControlError::InvalidStateTransition {
                from: other.status().as_str(),
                to: "active",
            }),
        }
    }

    /// Move to deleted from any non-terminal state.
    pub fn delete(self) -> ControlResult<Site<Deleted>> {
        match self {
            Self::Pending(s) => Ok(s.delete()),
            Self::Deploying(s) => Ok(s.delete()),
            Self::Active(s) => Ok(s.delete()),
            Self::Failed(s) => Ok(s.delete()),
            Self::Stopped(s) => Ok(s.delete()),
            Self::Deleted(_) => Err(ControlError::InvalidStateTransition {
                from: "deleted",
                to: "deleted",
            }),
        }
    }
}
