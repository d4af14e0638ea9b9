//! Core types for the berth control plane.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Suffix appended to a domain hostname to form its container name.
pub const CONTAINER_SUFFIX: &str = "-app";

/// Unique identifier for a domain. Assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(i64);

impl DomainId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a site. Assigned by the store; feeds the port
/// arithmetic, so it must stay within the allocator window for the site to
/// be deployable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(i64);

impl SiteId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application runtime a site is deployed with. Closed set; each kind maps
/// to a fixed container image and in-container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    /// Node.js (express-style app listening on 3000).
    Node,
    /// Python (flask-style app listening on 3000).
    Python,
    /// PHP served by Apache on 80.
    Php,
}

impl RuntimeKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Php => "php",
        }
    }

    /// Container image for this runtime.
    #[must_use]
    pub const fn image(self) -> &'static str {
        match self {
            Self::Node => "node:18-alpine",
            Self::Python => "python:3.11-slim",
            Self::Php => "php:8.2-apache",
        }
    }

    /// Port the application listens on inside the container.
    #[must_use]
    pub const fn container_port(self) -> u16 {
        match self {
            Self::Php => 80,
            Self::Node | Self::Python => 3000,
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(Self::Node),
            "python" => Ok(Self::Python),
            "php" => Ok(Self::Php),
            _ => Err(format!("unknown runtime kind: {s}")),
        }
    }
}

/// Lifecycle status of a site, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    /// Created, never deployed.
    Pending,
    /// Deployment in flight.
    Deploying,
    /// Container healthy and routed by the proxy.
    Active,
    /// Last deployment attempt failed.
    Failed,
    /// Container stopped by request, kept for restart.
    Stopped,
    /// Soft-deleted. Terminal.
    Deleted,
}

impl SiteStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "deploying" => Ok(Self::Deploying),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("unknown site status: {s}")),
        }
    }
}

/// Lifecycle status of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    /// Serving (or eligible to serve) sites.
    Active,
    /// Administratively suspended; deployments refused.
    Suspended,
    /// Soft-deleted. Terminal.
    Deleted,
}

impl DomainStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DomainStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("unknown domain status: {s}")),
        }
    }
}

/// A domain as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    /// Domain identifier.
    pub id: DomainId,
    /// Hostname this domain serves.
    pub hostname: String,
    /// Runtime designated for sites under this domain.
    pub runtime: RuntimeKind,
    /// Lifecycle status.
    pub status: DomainStatus,
    /// When the domain was created.
    pub created_at: DateTime<Utc>,
    /// When the domain was last updated.
    pub updated_at: DateTime<Utc>,
}

impl DomainRecord {
    /// Container name for this domain's site: a pure function of the
    /// hostname plus a fixed suffix.
    #[must_use]
    pub fn container_name(&self) -> String {
        format!("{}{CONTAINER_SUFFIX}", self.hostname)
    }
}

/// A site as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    /// Site identifier.
    pub id: SiteId,
    /// Owning domain.
    pub domain_id: DomainId,
    /// Human-readable name.
    pub name: String,
    /// Runtime the site is deployed with.
    pub runtime: RuntimeKind,
    /// Boilerplate selector (e.g. `"blank"`, `"wordpress"`).
    pub boilerplate: String,
    /// Assigned upstream port, set once a deployment has succeeded.
    pub port: Option<u16>,
    /// Lifecycle status.
    pub status: SiteStatus,
    /// Last deployment error, if any.
    pub error: Option<String>,
    /// Runtime-specific extras (e.g. database credentials for a CMS
    /// boilerplate). Missing keys default to empty at render time.
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
    /// When the site was created.
    pub created_at: DateTime<Utc>,
    /// When the site was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the site last completed a successful deployment.
    pub deployed_at: Option<DateTime<Utc>>,
}

/// Outcome of a bulk migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Sites successfully redeployed.
    pub migrated: usize,
    /// Sites whose redeploy failed.
    pub failed: usize,
}
