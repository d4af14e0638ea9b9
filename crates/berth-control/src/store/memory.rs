//! In-memory site store for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ControlError, ControlResult};
use crate::types::{
    DomainId, DomainRecord, DomainStatus, RuntimeKind, SiteId, SiteRecord, SiteStatus,
};

use super::{SiteFilter, SiteStore};

/// In-memory store. Data is lost when the process exits; not suitable for
/// production use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: RwLock<HashMap<i64, DomainRecord>>,
    sites: RwLock<HashMap<i64, SiteRecord>>,
    next_domain_id: AtomicI64,
    next_site_id: AtomicI64,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose first site id is `first_site_id`.
    ///
    /// Site ids feed the port arithmetic, so tests sometimes need to pin
    /// them.
    #[must_use]
    pub fn with_first_site_id(first_site_id: i64) -> Self {
        let store = Self::new();
        store.next_site_id.store(first_site_id - 1, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn create_domain(
        &self,
        hostname: &str,
        runtime: RuntimeKind,
    ) -> ControlResult<DomainRecord> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if domains
            .values()
            .any(|d| d.hostname == hostname && d.status != DomainStatus::Deleted)
        {
            return Err(ControlError::internal(format!(
                "domain {hostname} already exists"
            )));
        }

        let id = self.next_domain_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = DomainRecord {
            id: DomainId::new(id),
            hostname: hostname.to_owned(),
            runtime,
            status: DomainStatus::Active,
            created_at: now,
            updated_at: now,
        };

        domains.insert(id, record.clone());
        Ok(record)
    }

    async fn get_domain(&self, id: DomainId) -> ControlResult<Option<DomainRecord>> {
        let domains = self
            .domains
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(domains.get(&id.get()).cloned())
    }

    async fn update_domain_status(&self, id: DomainId, status: DomainStatus) -> ControlResult<()> {
        let mut domains = self
            .domains
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = domains
            .get_mut(&id.get())
            .ok_or_else(|| ControlError::not_found(format!("domain {id}")))?;

        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn create_site(
        &self,
        domain_id: DomainId,
        name: &str,
        runtime: RuntimeKind,
        boilerplate: &str,
        extras: &BTreeMap<String, String>,
    ) -> ControlResult<SiteRecord> {
        {
            let domains = self
                .domains
                .read()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            if !domains.contains_key(&domain_id.get()) {
                return Err(ControlError::not_found(format!("domain {domain_id}")));
            }
        }

        let mut sites = self
            .sites
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let id = self.next_site_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = SiteRecord {
            id: SiteId::new(id),
            domain_id,
            name: name.to_owned(),
            runtime,
            boilerplate: boilerplate.to_owned(),
            port: None,
            status: SiteStatus::Pending,
            error: None,
            extras: extras.clone(),
            created_at: now,
            updated_at: now,
            deployed_at: None,
        };

        sites.insert(id, record.clone());
        Ok(record)
    }

    async fn get_site(&self, id: SiteId) -> ControlResult<Option<SiteRecord>> {
        let sites = self
            .sites
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(sites.get(&id.get()).cloned())
    }

    async fn list_sites(&self, filter: &SiteFilter) -> ControlResult<Vec<SiteRecord>> {
        let sites = self
            .sites
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = sites
            .values()
            .filter(|s| {
                if let Some(domain_id) = filter.domain_id {
                    if s.domain_id != domain_id {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if s.status != status {
                        return false;
                    }
                }
                if let Some(cutoff) = filter.deployed_before {
                    match s.deployed_at {
                        Some(deployed) if deployed < cutoff => {}
                        _ => return false,
                    }
                }
                true
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = usize::try_from(filter.offset.unwrap_or(0)).unwrap_or(0);
        let limit = filter
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(results.into_iter().skip(offset).take(limit).collect())
    }

    async fn sites_for_domain(&self, domain_id: DomainId) -> ControlResult<Vec<SiteRecord>> {
        self.list_sites(&SiteFilter::new().with_domain(domain_id))
            .await
    }

    async fn update_status(
        &self,
        id: SiteId,
        status: SiteStatus,
        error: Option<&str>,
    ) -> ControlResult<()> {
        let mut sites = self
            .sites
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = sites
            .get_mut(&id.get())
            .ok_or_else(|| ControlError::not_found(format!("site {id}")))?;

        record.status = status;
        record.error = error.map(ToOwned::to_owned);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_active(&self, id: SiteId, port: u16) -> ControlResult<()> {
        let mut sites = self
            .sites
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let record = sites
            .get_mut(&id.get())
            .ok_or_else(|| ControlError::not_found(format!("site {id}")))?;

        let now = Utc::now();
        record.status = SiteStatus::Active;
        record.port = Some(port);
        record.error = None;
        record.deployed_at = Some(now);
        record.updated_at = now;
        Ok(())
    }
}
