//! Durable site and domain storage.
//!
//! The store is the single source of truth for lifecycle status and port
//! assignment. The runtime driver and proxy activator never write here;
//! every status mutation funnels through the orchestrator.
//!
//! The primary implementation uses PostgreSQL; an in-memory implementation
//! backs unit tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ControlResult;
use crate::types::{
    DomainId, DomainRecord, DomainStatus, RuntimeKind, SiteId, SiteRecord, SiteStatus,
};

/// Filter criteria for listing sites.
#[derive(Debug, Clone, Default)]
pub struct SiteFilter {
    /// Filter by owning domain.
    pub domain_id: Option<DomainId>,
    /// Filter by status.
    pub status: Option<SiteStatus>,
    /// Only sites whose last successful deployment predates this instant.
    pub deployed_before: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl SiteFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            domain_id: None,
            status: None,
            deployed_before: None,
            limit: None,
            offset: None,
        }
    }

    /// Filter by owning domain.
    #[must_use]
    pub const fn with_domain(mut self, domain_id: DomainId) -> Self {
        self.domain_id = Some(domain_id);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: SiteStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only sites deployed before the given instant.
    #[must_use]
    pub const fn with_deployed_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.deployed_before = Some(cutoff);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Backend for storing domains and sites.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Create a domain. The store assigns the id.
    async fn create_domain(
        &self,
        hostname: &str,
        runtime: RuntimeKind,
    ) -> ControlResult<DomainRecord>;

    /// Get a domain by id. Returns `None` if it does not exist.
    async fn get_domain(&self, id: DomainId) -> ControlResult<Option<DomainRecord>>;

    /// Update a domain's lifecycle status (soft deletion included).
    async fn update_domain_status(&self, id: DomainId, status: DomainStatus) -> ControlResult<()>;

    /// Create a site under a domain. The store assigns the id, which also
    /// determines the site's upstream port.
    async fn create_site(
        &self,
        domain_id: DomainId,
        name: &str,
        runtime: RuntimeKind,
        boilerplate: &str,
        extras: &BTreeMap<String, String>,
    ) -> ControlResult<SiteRecord>;

    /// Get a site by id. Returns `None` if it does not exist.
    async fn get_site(&self, id: SiteId) -> ControlResult<Option<SiteRecord>>;

    /// List sites matching the filter, newest first.
    async fn list_sites(&self, filter: &SiteFilter) -> ControlResult<Vec<SiteRecord>>;

    /// List every site belonging to a domain.
    async fn sites_for_domain(&self, domain_id: DomainId) -> ControlResult<Vec<SiteRecord>>;

    /// Update a site's status, replacing the recorded error.
    async fn update_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        error: Option<&str>,
    ) -> ControlResult<()>;

    /// Mark a site active: status, port, deployment timestamp and error
    /// are written together in one statement so a crash can never observe
    /// an active site without its port.
    async fn mark_active(&self, id: SiteId, port: u16) -> ControlResult<()>;
}
