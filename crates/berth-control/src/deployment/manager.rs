//! Core deployment orchestration logic.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DeployConfig;
use crate::error::{ControlError, ControlResult};
use crate::ports::PortAllocator;
use crate::proxy::ProxyActivator;
use crate::runtime::{LaunchSpec, RuntimeDriver};
use crate::scaffold::scaffold_site;
use crate::state::AnySite;
use crate::store::{SiteFilter, SiteStore};
use crate::template::{self, Vars};
use crate::types::{
    DomainId, DomainRecord, DomainStatus, MigrationReport, RuntimeKind, SiteId, SiteRecord,
    SiteStatus,
};

/// Suffix for a redeploy candidate container.
const CANDIDATE_SUFFIX: &str = "-next";

/// Where a deployment attempt failed relative to the cutover point.
///
/// A redeploy only tears the serving container down after its candidate has
/// passed the health gate; failures before that point leave the previous
/// deployment serving.
enum DeployFailure {
    BeforeCutover(ControlError),
    AfterCutover(ControlError),
}

fn before(e: ControlError) -> DeployFailure {
    DeployFailure::BeforeCutover(e)
}

fn after(e: ControlError) -> DeployFailure {
    DeployFailure::AfterCutover(e)
}

/// Orchestrates site lifecycle operations.
///
/// Operations on the same site are serialised through a per-site lock;
/// operations on different sites run fully in parallel. The proxy
/// enable/validate/reload commit section is the one process-wide shared
/// resource and is serialised separately.
pub struct SiteManager {
    store: Arc<dyn SiteStore>,
    runtime: Arc<dyn RuntimeDriver>,
    proxy: Arc<dyn ProxyActivator>,
    allocator: PortAllocator,
    sites_dir: PathBuf,
    config: DeployConfig,
    locks: StdMutex<HashMap<i64, Arc<Mutex<()>>>>,
    proxy_commit: Mutex<()>,
}

impl SiteManager {
    /// Create a new site manager.
    pub fn new(
        store: Arc<dyn SiteStore>,
        runtime: Arc<dyn RuntimeDriver>,
        proxy: Arc<dyn ProxyActivator>,
        sites_dir: impl Into<PathBuf>,
        config: DeployConfig,
    ) -> Self {
        let allocator = PortAllocator::new(
            config.base_port,
            config.max_site_id,
            config.candidate_offset,
        );

        Self {
            store,
            runtime,
            proxy,
            allocator,
            sites_dir: sites_dir.into(),
            config,
            locks: StdMutex::new(HashMap::new()),
            proxy_commit: Mutex::new(()),
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Create a domain.
    pub async fn create_domain(
        &self,
        hostname: &str,
        runtime: RuntimeKind,
    ) -> ControlResult<DomainRecord> {
        info!(hostname = %hostname, runtime = %runtime, "creating domain");
        self.store.create_domain(hostname, runtime).await
    }

    /// Create a site under a domain, ready for deployment.
    ///
    /// Because container names are a pure function of the hostname, a
    /// domain can carry at most one live site; a second is refused here
    /// rather than failing later at the runtime.
    pub async fn create_site(
        &self,
        domain_id: DomainId,
        runtime: RuntimeKind,
        boilerplate: &str,
        extras: &BTreeMap<String, String>,
    ) -> ControlResult<SiteRecord> {
        let domain = self.load_domain(domain_id).await?;
        ensure_domain_deployable(&domain)?;

        let existing = self.store.sites_for_domain(domain_id).await?;
        if existing.iter().any(|s| s.status != SiteStatus::Deleted) {
            return Err(ControlError::SiteExists {
                hostname: domain.hostname,
            });
        }

        info!(
            domain = %domain.hostname,
            runtime = %runtime,
            boilerplate = %boilerplate,
            "creating site"
        );

        self.store
            .create_site(domain_id, &domain.hostname, runtime, boilerplate, extras)
            .await
    }

    /// Get a site's current record.
    pub async fn get_site(&self, id: SiteId) -> ControlResult<SiteRecord> {
        self.load_site(id).await
    }

    /// Deploy a site: start its container, gate on health, then activate
    /// its vhost.
    pub async fn deploy_site(&self, id: SiteId) -> ControlResult<()> {
        self.execute_deploy(id, false).await
    }

    /// Redeploy a site. Identical to deploy and explicitly idempotent: an
    /// unchanged active site converges back to active on the same port.
    pub async fn redeploy_site(&self, id: SiteId) -> ControlResult<()> {
        self.execute_deploy(id, false).await
    }

    /// Stop an active site. The container is kept for fast restart; what
    /// happens to the vhost is governed by the stopped-site policy.
    pub async fn stop_site(&self, id: SiteId) -> ControlResult<()> {
        let _guard = self.site_lock(id).await?;

        let record = self.load_site(id).await?;
        let domain = self.load_domain(record.domain_id).await?;
        let active = AnySite::from_record(record).try_into_active()?;

        let container = domain.container_name();
        info!(site = %id, container = %container, "stopping site");

        match self
            .retry_transient(|| self.runtime.stop(&container))
            .await
        {
            Ok(()) => {}
            Err(ControlError::NotFound(_)) => {
                warn!(container = %container, "stop: container already gone");
            }
            Err(e) => return Err(e),
        }

        if self.config.stopped_site_policy.disables_vhost() {
            let _commit = self.proxy_commit.lock().await;
            self.proxy.disable(&domain.hostname).await?;
            self.proxy.validate().await?;
            self.proxy.reload().await?;
        }

        let stopped = active.stop();
        self.store
            .update_status(id, stopped.status(), None)
            .await?;

        info!(site = %id, "site stopped");
        Ok(())
    }

    /// Delete a site: tear down its container, vhost and files, then mark
    /// it deleted.
    ///
    /// Every step checks current existence before acting, so a teardown
    /// interrupted half-way can be retried, including for sites that
    /// never successfully deployed.
    pub async fn delete_site(&self, id: SiteId) -> ControlResult<()> {
        let _guard = self.site_lock(id).await?;

        let record = self.load_site(id).await?;
        if record.status == SiteStatus::Deleted {
            debug!(site = %id, "delete: already deleted");
            return Ok(());
        }
        let domain = self.load_domain(record.domain_id).await?;
        let deleted = AnySite::from_record(record).delete()?;

        let container = domain.container_name();
        let candidate = format!("{container}{CANDIDATE_SUFFIX}");
        info!(site = %id, container = %container, "deleting site");

        if self.runtime.exists(&container).await? {
            if let Err(e) = self.runtime.stop(&container).await {
                warn!(container = %container, error = %e, "stop during delete failed, removing anyway");
            }
            self.retry_transient(|| self.runtime.remove(&container))
                .await?;
        }
        self.retry_transient(|| self.runtime.remove(&candidate))
            .await?;

        let was_enabled = self.proxy.is_enabled(&domain.hostname).await?;
        {
            let _commit = self.proxy_commit.lock().await;
            self.proxy.remove(&domain.hostname).await?;

            if was_enabled {
                // Teardown keeps going even if the proxy is unhappy; a
                // broken vhost elsewhere must not make this site
                // undeletable.
                match self.proxy.validate().await {
                    Ok(()) => {
                        if let Err(e) = self.proxy.reload().await {
                            warn!(site = %id, error = %e, "reload after vhost removal failed");
                        }
                    }
                    Err(e) => {
                        warn!(site = %id, error = %e, "proxy validation failed after vhost removal");
                    }
                }
            }
        }

        let site_dir = self.site_dir(&domain.hostname);
        if site_dir.exists() {
            tokio::fs::remove_dir_all(&site_dir).await?;
        }

        self.store
            .update_status(id, deleted.status(), None)
            .await?;

        info!(site = %id, "site deleted");
        Ok(())
    }

    /// Soft-delete a domain, cascading to its sites.
    pub async fn remove_domain(&self, id: DomainId) -> ControlResult<()> {
        let domain = self.load_domain(id).await?;
        if domain.status == DomainStatus::Deleted {
            return Ok(());
        }

        info!(domain = %domain.hostname, "removing domain");

        for site in self.store.sites_for_domain(id).await? {
            if site.status != SiteStatus::Deleted {
                self.delete_site(site.id).await?;
            }
        }

        self.store
            .update_domain_status(id, DomainStatus::Deleted)
            .await
    }

    /// Redeploy every active site whose last deployment predates `cutoff`
    /// (all active sites when `None`), regenerating boilerplate files.
    ///
    /// One broken site never blocks the rest; failures are counted and the
    /// failing site's previous deployment is left serving.
    pub async fn migrate_all_sites(
        &self,
        cutoff: Option<DateTime<Utc>>,
    ) -> ControlResult<MigrationReport> {
        let mut filter = SiteFilter::new().with_status(SiteStatus::Active);
        if let Some(cutoff) = cutoff {
            filter = filter.with_deployed_before(cutoff);
        }

        let sites = self.store.list_sites(&filter).await?;
        info!(count = sites.len(), "starting bulk migration");

        let mut report = MigrationReport::default();
        for site in sites {
            match self.execute_deploy(site.id, true).await {
                Ok(()) => report.migrated += 1,
                Err(e) => {
                    warn!(
                        site = %site.id,
                        error = %e,
                        "migration failed; previous deployment left serving"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            migrated = report.migrated,
            failed = report.failed,
            "bulk migration finished"
        );
        Ok(report)
    }

    /// Startup crash recovery: a site found in the deploying state was
    /// interrupted; mark it failed and eligible for redeploy. Returns how
    /// many sites were reconciled.
    pub async fn reconcile(&self) -> ControlResult<usize> {
        let stuck = self
            .store
            .list_sites(&SiteFilter::new().with_status(SiteStatus::Deploying))
            .await?;

        for site in &stuck {
            let message = match self.load_domain(site.domain_id).await {
                Ok(domain) => {
                    let container = domain.container_name();
                    let running = self
                        .runtime
                        .is_running(&container)
                        .await
                        .unwrap_or(false);
                    if running {
                        "deployment interrupted by restart; container is running but proxy \
                         state is unverified; redeploy to converge"
                    } else {
                        "deployment interrupted by restart; no running container found"
                    }
                }
                Err(_) => "deployment interrupted by restart",
            };

            warn!(site = %site.id, "reconciling interrupted deployment");
            self.store
                .update_status(site.id, SiteStatus::Failed, Some(message))
                .await?;
        }

        Ok(stuck.len())
    }

    // =========================================================================
    // Deploy protocol
    // =========================================================================

    async fn execute_deploy(&self, id: SiteId, regenerate_scaffold: bool) -> ControlResult<()> {
        let _guard = self.site_lock(id).await?;

        let record = self.load_site(id).await?;
        let domain = self.load_domain(record.domain_id).await?;
        ensure_domain_deployable(&domain)?;

        let container = domain.container_name();

        // Whether a previous deployment is serving right now decides the
        // path: candidate cutover keeps it serving until its replacement
        // has proven healthy; a fresh deploy has nothing to protect.
        let had_active = record.status == SiteStatus::Active
            && self.runtime.is_running(&container).await.unwrap_or(false);

        let deploying = AnySite::from_record(record).begin_deploy()?;
        let record = deploying.into_record();
        self.store
            .update_status(id, SiteStatus::Deploying, None)
            .await?;

        info!(
            site = %id,
            domain = %domain.hostname,
            redeploy = had_active,
            "deployment started"
        );

        let result = if had_active {
            self.run_candidate_redeploy(&record, &domain, regenerate_scaffold)
                .await
        } else {
            self.run_fresh_deploy(&record, &domain, regenerate_scaffold)
                .await
                .map_err(after)
        };

        match result {
            Ok(port) => {
                self.store.mark_active(id, port).await?;
                info!(site = %id, port = port, "deployment completed");
                Ok(())
            }
            Err(DeployFailure::BeforeCutover(e)) => {
                // The previous container was never touched and keeps
                // serving; record why the replacement was abandoned.
                error!(site = %id, error = %e, "redeploy candidate failed; previous deployment kept");
                self.store
                    .update_status(id, SiteStatus::Active, Some(&failure_message(&e)))
                    .await?;
                Err(e)
            }
            Err(DeployFailure::AfterCutover(e)) => {
                error!(site = %id, error = %e, "deployment failed");
                self.store
                    .update_status(id, SiteStatus::Failed, Some(&failure_message(&e)))
                    .await?;
                Err(e)
            }
        }
    }

    /// Plain deploy: nothing is serving, so remove-then-create is safe.
    async fn run_fresh_deploy(
        &self,
        record: &SiteRecord,
        domain: &DomainRecord,
        regenerate_scaffold: bool,
    ) -> ControlResult<u16> {
        let container = domain.container_name();

        let port = self.allocator.allocate(record.id)?;
        self.ensure_port_free(port, &container).await?;

        let site_dir = self
            .prepare_data_dir(domain, record, regenerate_scaffold)
            .await?;
        let spec = self
            .write_compose(&site_dir, domain, record, &container, port)
            .await?;

        // Idempotent cleanup of whatever a previous attempt left behind.
        self.retry_transient(|| self.runtime.remove(&container))
            .await?;
        let stale_candidate = format!("{container}{CANDIDATE_SUFFIX}");
        self.retry_transient(|| self.runtime.remove(&stale_candidate))
            .await?;

        self.retry_transient(|| self.runtime.start(&spec)).await?;

        self.health_gate(port, &container).await?;

        self.activate_vhost(domain, &site_dir, port).await?;

        Ok(port)
    }

    /// Redeploy with a serving container: boot the replacement on a
    /// derived candidate port, gate on its health, and only then cut over
    /// to the stable port.
    async fn run_candidate_redeploy(
        &self,
        record: &SiteRecord,
        domain: &DomainRecord,
        regenerate_scaffold: bool,
    ) -> Result<u16, DeployFailure> {
        let container = domain.container_name();
        let candidate = format!("{container}{CANDIDATE_SUFFIX}");

        // The stable port must not change across redeploys; vhost and
        // firewall entries depend on it.
        let port = self.allocator.allocate(record.id).map_err(before)?;
        let candidate_port = self.allocator.candidate(port);

        if let Some(holder) = self
            .runtime
            .port_holder(candidate_port)
            .await
            .map_err(before)?
        {
            if holder != candidate {
                return Err(before(ControlError::PortConflict {
                    port: candidate_port,
                    holder,
                }));
            }
        }

        let site_dir = self
            .prepare_data_dir(domain, record, regenerate_scaffold)
            .await
            .map_err(before)?;
        let candidate_spec = self
            .write_compose(&site_dir, domain, record, &candidate, candidate_port)
            .await
            .map_err(before)?;

        self.retry_transient(|| self.runtime.remove(&candidate))
            .await
            .map_err(before)?;
        self.retry_transient(|| self.runtime.start(&candidate_spec))
            .await
            .map_err(before)?;

        // Candidate failure leaves the candidate container running for
        // inspection and the old deployment serving.
        self.health_gate(candidate_port, &candidate)
            .await
            .map_err(before)?;

        debug!(site = %record.id, "candidate healthy, cutting over");
        self.retry_transient(|| self.runtime.remove(&candidate))
            .await
            .map_err(before)?;

        // Cutover point: from here the old container is gone and failures
        // land the site in the failed state.
        self.retry_transient(|| self.runtime.remove(&container))
            .await
            .map_err(after)?;

        let spec = self
            .write_compose(&site_dir, domain, record, &container, port)
            .await
            .map_err(after)?;
        self.retry_transient(|| self.runtime.start(&spec))
            .await
            .map_err(after)?;

        // The image is warm and the app already proved it boots; this
        // second gate only covers the rebind onto the stable port.
        self.health_gate(port, &container).await.map_err(after)?;

        self.activate_vhost(domain, &site_dir, port)
            .await
            .map_err(after)?;

        Ok(port)
    }

    /// Verify the derived port is actually free before binding it.
    ///
    /// The arithmetic mapping and reality can diverge after identifier
    /// reuse following a hard crash; that case must fail closed, never
    /// silently rebind. The site's own container holding its port is fine:
    /// it is about to be removed.
    async fn ensure_port_free(&self, port: u16, own_container: &str) -> ControlResult<()> {
        if let Some(holder) = self.runtime.port_holder(port).await? {
            if holder != own_container {
                return Err(ControlError::PortConflict { port, holder });
            }
        }
        Ok(())
    }

    /// Poll the upstream port until it answers or the window expires.
    ///
    /// On expiry the container is left running so an operator can inspect
    /// it; the error carries the last probe outcome and a log tail.
    async fn health_gate(&self, port: u16, container: &str) -> ControlResult<()> {
        let interval = Duration::from_millis(self.config.probe_interval_ms);
        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let window = Duration::from_secs(self.config.probe_window_secs);
        let deadline = tokio::time::Instant::now() + window;

        let mut attempts: u32 = 0;
        let mut last_outcome = String::from("no probe attempted");

        loop {
            attempts += 1;
            match self.runtime.probe_port(port, probe_timeout).await {
                Ok(true) => {
                    info!(port = port, attempts = attempts, "health probe succeeded");
                    return Ok(());
                }
                Ok(false) => {
                    last_outcome =
                        format!("attempt {attempts}: nothing listening on port {port}");
                }
                Err(e) => {
                    last_outcome = format!("attempt {attempts}: {e}");
                }
            }

            if tokio::time::Instant::now() + interval >= deadline {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        let log_tail = self
            .runtime
            .tail_logs(container, self.config.log_tail_lines)
            .await
            .unwrap_or_default();

        Err(ControlError::HealthCheckTimeout {
            port,
            waited_secs: window.as_secs(),
            last_outcome,
            log_tail,
        })
    }

    /// Render, stage, enable, validate and reload the site's vhost.
    ///
    /// The enable/validate/reload section is the process-wide shared
    /// resource: it runs under a single mutex so one site's half-applied
    /// candidate can never fail another site's validation. A failed
    /// validation rolls the vhost back before surfacing, leaving serving
    /// sites untouched.
    async fn activate_vhost(
        &self,
        domain: &DomainRecord,
        site_dir: &std::path::Path,
        port: u16,
    ) -> ControlResult<()> {
        let mut vars = Vars::new();
        vars.insert("DOMAIN".to_owned(), domain.hostname.clone());
        vars.insert(
            "UPSTREAM_NAME".to_owned(),
            template::upstream_name(&domain.hostname),
        );
        vars.insert("UPSTREAM_PORT".to_owned(), port.to_string());
        vars.insert(
            "SITE_DIR".to_owned(),
            site_dir.join("data").display().to_string(),
        );

        let vhost = template::render(template::VHOST, &vars)?;

        // Per-site staging writes can race freely; only the commit below
        // is serialised.
        self.proxy.write_vhost(&domain.hostname, &vhost).await?;

        let _commit = self.proxy_commit.lock().await;
        self.proxy.enable(&domain.hostname).await?;

        match self.proxy.validate().await {
            Ok(()) => {
                self.proxy.reload().await?;
                info!(domain = %domain.hostname, port = port, "vhost activated");
                Ok(())
            }
            Err(e) => {
                if let Err(rb) = self.proxy.rollback(&domain.hostname).await {
                    warn!(domain = %domain.hostname, error = %rb, "vhost rollback failed");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn prepare_data_dir(
        &self,
        domain: &DomainRecord,
        record: &SiteRecord,
        regenerate: bool,
    ) -> ControlResult<PathBuf> {
        let site_dir = self.site_dir(&domain.hostname);
        let data_dir = site_dir.join("data");
        tokio::fs::create_dir_all(&data_dir).await?;

        scaffold_site(
            &data_dir,
            &domain.hostname,
            record.runtime,
            &record.boilerplate,
            regenerate,
        )
        .await?;

        Ok(site_dir)
    }

    async fn write_compose(
        &self,
        site_dir: &std::path::Path,
        domain: &DomainRecord,
        record: &SiteRecord,
        container_name: &str,
        port: u16,
    ) -> ControlResult<LaunchSpec> {
        let mut vars = Vars::new();
        vars.insert("DOMAIN".to_owned(), domain.hostname.clone());
        vars.insert(
            "SITE_DIR".to_owned(),
            site_dir.join("data").display().to_string(),
        );
        vars.insert(
            "DOCKER_IMAGE".to_owned(),
            template::image_for(record.runtime, &record.boilerplate).to_owned(),
        );
        vars.insert("UPSTREAM_PORT".to_owned(), port.to_string());
        vars.insert(
            "CONTAINER_PORT".to_owned(),
            record.runtime.container_port().to_string(),
        );
        vars.insert("CONTAINER_NAME".to_owned(), container_name.to_owned());

        // Extras default to empty so an unconfigured CMS still renders.
        for key in ["DB_NAME", "DB_USER", "DB_PASSWORD"] {
            vars.insert(key.to_owned(), String::new());
        }
        for (key, value) in &record.extras {
            vars.insert(key.clone(), value.clone());
        }

        let rendered = template::render(
            template::compose_template(record.runtime, &record.boilerplate),
            &vars,
        )?;

        let file_name = if container_name.ends_with(CANDIDATE_SUFFIX) {
            "compose.next.yml"
        } else {
            "compose.yml"
        };
        let compose_file = site_dir.join(file_name);
        tokio::fs::write(&compose_file, &rendered).await?;

        Ok(LaunchSpec {
            container_name: container_name.to_owned(),
            compose_file,
            project_dir: site_dir.to_path_buf(),
            upstream_port: port,
        })
    }

    fn site_dir(&self, hostname: &str) -> PathBuf {
        self.sites_dir.join(hostname)
    }

    async fn load_site(&self, id: SiteId) -> ControlResult<SiteRecord> {
        self.store
            .get_site(id)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("site {id}")))
    }

    async fn load_domain(&self, id: DomainId) -> ControlResult<DomainRecord> {
        self.store
            .get_domain(id)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("domain {id}")))
    }

    /// Acquire this site's lock, creating it on first use.
    async fn site_lock(&self, id: SiteId) -> ControlResult<tokio::sync::OwnedMutexGuard<()>> {
        let handle = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            Arc::clone(locks.entry(id.get()).or_default())
        };
        Ok(handle.lock_owned().await)
    }

    /// Retry an operation a bounded number of times on transient runtime
    /// errors, doubling the backoff between attempts.
    async fn retry_transient<T, F, Fut>(&self, mut op: F) -> ControlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        let mut retries: u32 = 0;
        let mut delay = Duration::from_millis(self.config.retry_backoff_ms);

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retries < self.config.transient_retries => {
                    retries += 1;
                    warn!(retry = retries, error = %e, "transient runtime error, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl std::fmt::Debug for SiteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteManager")
            .field("sites_dir", &self.sites_dir)
            .finish_non_exhaustive()
    }
}

fn ensure_domain_deployable(domain: &DomainRecord) -> ControlResult<()> {
    match domain.status {
        DomainStatus::Active => Ok(()),
        status => Err(ControlError::DomainNotDeployable {
            hostname: domain.hostname.clone(),
            status: status.as_str(),
        }),
    }
}

/// Failure text persisted to the store. Health-gate expiries carry their
/// log tail so the recorded error is actionable on its own.
fn failure_message(error: &ControlError) -> String {
    match error {
        ControlError::HealthCheckTimeout { log_tail, .. } if !log_tail.is_empty() => {
            format!("{error}; recent container logs: {}", log_tail.join(" | "))
        }
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::MockProxy;
    use crate::runtime::MockRuntime;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    struct Harness {
        manager: SiteManager,
        store: Arc<MemoryStore>,
        runtime: Arc<MockRuntime>,
        proxy: Arc<MockProxy>,
        _sites_dir: TempDir,
    }

    fn fast_config() -> DeployConfig {
        DeployConfig {
            probe_interval_ms: 1,
            probe_timeout_ms: 1,
            probe_window_secs: 1,
            retry_backoff_ms: 1,
            ..DeployConfig::default()
        }
    }

    fn harness_with(store: MemoryStore, config: DeployConfig) -> Harness {
        let store = Arc::new(store);
        let runtime = Arc::new(MockRuntime::new());
        let proxy = Arc::new(MockProxy::new());
        let sites_dir = TempDir::new().expect("tempdir");

        let manager = SiteManager::new(
            Arc::clone(&store) as Arc<dyn SiteStore>,
            Arc::clone(&runtime) as Arc<dyn RuntimeDriver>,
            Arc::clone(&proxy) as Arc<dyn ProxyActivator>,
            sites_dir.path(),
            config,
        );

        Harness {
            manager,
            store,
            runtime,
            proxy,
            _sites_dir: sites_dir,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new(), fast_config())
    }

    async fn create_site(h: &Harness, hostname: &str, runtime: RuntimeKind) -> SiteRecord {
        let domain = h
            .manager
            .create_domain(hostname, runtime)
            .await
            .expect("create domain");
        h.manager
            .create_site(domain.id, runtime, "blank", &BTreeMap::new())
            .await
            .expect("create site")
    }

    /// Every reload in the recorded call sequence must be covered by a
    /// validate with no staging mutation in between.
    fn assert_validate_before_reload(calls: &[String]) {
        let mut validated = false;
        for call in calls {
            if call == "validate" {
                validated = true;
            } else if call == "reload" {
                assert!(validated, "reload without preceding validate: {calls:?}");
            } else if call.starts_with("write") || call.starts_with("enable") {
                validated = false;
            }
        }
    }

    #[tokio::test]
    async fn deploy_allocates_port_and_activates() {
        // Site id 7 with base port 3000 lands on 3007; the probe answers
        // on the second attempt.
        let h = harness_with(MemoryStore::with_first_site_id(7), fast_config());
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        assert_eq!(site.id.get(), 7);

        h.runtime.probe_succeeds_after(3007, 2);
        h.manager.deploy_site(site.id).await.expect("deploy");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
        assert_eq!(record.port, Some(3007));
        assert!(record.error.is_none());
        assert!(record.deployed_at.is_some());

        assert_eq!(h.runtime.probe_attempts(3007), 2);
        assert!(h.runtime.container_running("example.com-app"));
        assert!(h.proxy.enabled("example.com"));
        let vhost = h.proxy.promoted("example.com").expect("vhost promoted");
        assert!(vhost.contains("server 127.0.0.1:3007;"));
        assert_validate_before_reload(&h.proxy.calls());
    }

    #[tokio::test]
    async fn health_timeout_fails_site_and_keeps_container() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.runtime.probe_never_succeeds(3001);
        h.runtime.set_logs(
            "example.com-app",
            vec!["Error: listen EADDRINUSE".to_owned()],
        );

        let err = h.manager.deploy_site(site.id).await.unwrap_err();
        assert!(matches!(err, ControlError::HealthCheckTimeout { .. }));

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Failed);
        let error = record.error.expect("error recorded");
        assert!(error.contains("health check timed out"));
        assert!(error.contains("EADDRINUSE"));

        // The container is left running for inspection, and nothing ever
        // reached the proxy.
        assert!(h.runtime.container_running("example.com-app"));
        assert!(!h.proxy.enabled("example.com"));
        assert_eq!(h.proxy.reload_count(), 0);
    }

    #[tokio::test]
    async fn port_conflict_fails_closed() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        // Another container (crash-recovered identifier reuse) already
        // publishes this site's derived port.
        h.runtime.seed_container("stale-app", 3001, true);

        let err = h.manager.deploy_site(site.id).await.unwrap_err();
        match err {
            ControlError::PortConflict { port, holder } => {
                assert_eq!(port, 3001);
                assert_eq!(holder, "stale-app");
            }
            other => panic!("unexpected error: {other}"),
        }

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Failed);
        // The stale container was not touched.
        assert!(h.runtime.container_running("stale-app"));
    }

    #[tokio::test]
    async fn own_container_on_port_is_not_a_conflict() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        // A previous attempt left this site's own container bound to its
        // port; the forced removal in the protocol handles it.
        h.runtime.seed_container("example.com-app", 3001, true);

        h.manager.deploy_site(site.id).await.expect("deploy");
        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
    }

    #[tokio::test]
    async fn out_of_window_site_id_exhausts_range() {
        let h = harness_with(MemoryStore::with_first_site_id(1000), fast_config());
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        let err = h.manager.deploy_site(site.id).await.unwrap_err();
        assert!(matches!(err, ControlError::PortRangeExhausted { .. }));

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Failed);
    }

    #[tokio::test]
    async fn redeploy_is_idempotent_with_stable_port() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.manager.deploy_site(site.id).await.expect("deploy");
        let first = h.store.get_site(site.id).await.unwrap().unwrap();

        h.manager.redeploy_site(site.id).await.expect("redeploy 1");
        h.manager.redeploy_site(site.id).await.expect("redeploy 2");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
        assert_eq!(record.port, first.port);
        assert!(h.runtime.container_running("example.com-app"));
        assert!(!h.runtime.has_container("example.com-app-next"));
        assert_validate_before_reload(&h.proxy.calls());
    }

    #[tokio::test]
    async fn failed_candidate_leaves_previous_deployment_serving() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.manager.deploy_site(site.id).await.expect("deploy");
        let reloads_before = h.proxy.reload_count();

        // The replacement never becomes healthy on its candidate port.
        h.runtime.probe_never_succeeds(13_001);

        let err = h.manager.redeploy_site(site.id).await.unwrap_err();
        assert!(matches!(err, ControlError::HealthCheckTimeout { .. }));

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
        assert_eq!(record.port, Some(3001));
        assert!(record.error.is_some());

        // Old container untouched and serving; candidate kept for
        // inspection; the proxy was never poked.
        assert!(h.runtime.container_running("example.com-app"));
        assert!(h.runtime.has_container("example.com-app-next"));
        assert_eq!(h.proxy.reload_count(), reloads_before);
    }

    #[tokio::test]
    async fn proxy_validation_failure_rolls_back_without_reload() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.proxy.fail_next_validates(1);

        let err = h.manager.deploy_site(site.id).await.unwrap_err();
        assert!(matches!(err, ControlError::ProxyConfigInvalid(_)));

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Failed);

        assert!(!h.proxy.enabled("example.com"));
        assert_eq!(h.proxy.reload_count(), 0);
        assert!(h.proxy.calls().iter().any(|c| c == "rollback example.com"));
    }

    #[tokio::test]
    async fn transient_engine_errors_are_retried() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.runtime.fail_next_starts(2);
        h.manager.deploy_site(site.id).await.expect("deploy");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
    }

    #[tokio::test]
    async fn stop_keeps_container_and_vhost_by_default() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");
        let reloads_before = h.proxy.reload_count();

        h.manager.stop_site(site.id).await.expect("stop");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Stopped);
        assert!(h.runtime.has_container("example.com-app"));
        assert!(!h.runtime.container_running("example.com-app"));
        // Gateway-error policy: vhost stays enabled and simply 502s.
        assert!(h.proxy.enabled("example.com"));
        assert_eq!(h.proxy.reload_count(), reloads_before);
    }

    #[tokio::test]
    async fn stop_disables_vhost_under_unreachable_policy() {
        let config = DeployConfig {
            stopped_site_policy: crate::policy::StoppedSitePolicy::Unreachable,
            ..fast_config()
        };
        let h = harness_with(MemoryStore::new(), config);
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");
        let reloads_before = h.proxy.reload_count();

        h.manager.stop_site(site.id).await.expect("stop");

        assert!(!h.proxy.enabled("example.com"));
        assert_eq!(h.proxy.reload_count(), reloads_before + 1);
        assert_validate_before_reload(&h.proxy.calls());
    }

    #[tokio::test]
    async fn stop_requires_active_site() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        let err = h.manager.stop_site(site.id).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn stopped_site_redeploys() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");
        h.manager.stop_site(site.id).await.expect("stop");

        h.manager.redeploy_site(site.id).await.expect("restart");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
        assert!(h.runtime.container_running("example.com-app"));
    }

    #[tokio::test]
    async fn delete_of_never_deployed_site_succeeds() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.runtime.probe_never_succeeds(3001);
        let _ = h.manager.deploy_site(site.id).await;

        h.manager.delete_site(site.id).await.expect("delete");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Deleted);

        // Retrying a completed teardown is a no-op.
        h.manager.delete_site(site.id).await.expect("re-delete");
    }

    #[tokio::test]
    async fn delete_tears_down_container_and_vhost() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");

        h.manager.delete_site(site.id).await.expect("delete");

        assert!(!h.runtime.has_container("example.com-app"));
        assert!(!h.proxy.enabled("example.com"));
        assert!(h.proxy.promoted("example.com").is_none());

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Deleted);
    }

    #[tokio::test]
    async fn remove_domain_cascades() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");

        h.manager
            .remove_domain(site.domain_id)
            .await
            .expect("remove domain");

        let domain = h.store.get_domain(site.domain_id).await.unwrap().unwrap();
        assert_eq!(domain.status, DomainStatus::Deleted);
        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Deleted);
        assert!(!h.runtime.has_container("example.com-app"));
    }

    #[tokio::test]
    async fn migration_counts_failures_without_aborting() {
        let h = harness();
        let one = create_site(&h, "one.example", RuntimeKind::Node).await;
        let two = create_site(&h, "two.example", RuntimeKind::Python).await;
        let three = create_site(&h, "three.example", RuntimeKind::Php).await;

        for site in [&one, &two, &three] {
            h.manager.deploy_site(site.id).await.expect("deploy");
        }

        // Site two's replacement never passes its candidate health gate.
        let two_port = h.store.get_site(two.id).await.unwrap().unwrap().port.unwrap();
        h.runtime.probe_never_succeeds(two_port + 10_000);

        let report = h.manager.migrate_all_sites(None).await.expect("migrate");
        assert_eq!(
            report,
            MigrationReport {
                migrated: 2,
                failed: 1
            }
        );

        // The failed site's previous deployment is still serving.
        let record = h.store.get_site(two.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
        assert_eq!(record.port, Some(two_port));
        assert!(h.runtime.container_running("two.example-app"));
    }

    #[tokio::test]
    async fn migration_cutoff_skips_fresh_deployments() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");

        let past = Utc::now() - chrono::Duration::hours(1);
        let report = h
            .manager
            .migrate_all_sites(Some(past))
            .await
            .expect("migrate");
        assert_eq!(report, MigrationReport::default());
    }

    #[tokio::test]
    async fn reconcile_fails_interrupted_deployments() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        // Simulate a crash mid-deploy: status persisted, nothing running.
        h.store
            .update_status(site.id, SiteStatus::Deploying, None)
            .await
            .unwrap();

        let reconciled = h.manager.reconcile().await.expect("reconcile");
        assert_eq!(reconciled, 1);

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Failed);
        assert!(record.error.expect("error").contains("interrupted"));

        // The reconciled site can be redeployed.
        h.manager.redeploy_site(site.id).await.expect("redeploy");
        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
    }

    #[tokio::test]
    async fn second_live_site_per_domain_is_refused() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        let err = h
            .manager
            .create_site(site.domain_id, RuntimeKind::Node, "blank", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::SiteExists { .. }));

        // After deletion the slot frees up.
        h.manager.delete_site(site.id).await.expect("delete");
        h.manager
            .create_site(site.domain_id, RuntimeKind::Node, "blank", &BTreeMap::new())
            .await
            .expect("create after delete");
    }

    #[tokio::test]
    async fn suspended_domain_refuses_deployment() {
        let h = harness();
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;

        h.store
            .update_domain_status(site.domain_id, DomainStatus::Suspended)
            .await
            .unwrap();

        let err = h.manager.deploy_site(site.id).await.unwrap_err();
        assert!(matches!(err, ControlError::DomainNotDeployable { .. }));
    }

    #[tokio::test]
    async fn deploy_of_unknown_site_is_not_found() {
        let h = harness();
        let err = h.manager.deploy_site(SiteId::new(404)).await.unwrap_err();
        assert!(matches!(err, ControlError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_redeploys_of_same_site_serialise() {
        let h = Arc::new(harness());
        let site = create_site(&h, "example.com", RuntimeKind::Node).await;
        h.manager.deploy_site(site.id).await.expect("deploy");

        let (a, b) = tokio::join!(
            h.manager.redeploy_site(site.id),
            h.manager.redeploy_site(site.id)
        );
        a.expect("first redeploy");
        b.expect("second redeploy");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
        assert_eq!(record.port, Some(3001));
        assert!(!h.runtime.has_container("example.com-app-next"));
    }

    #[tokio::test]
    async fn concurrent_deploys_of_different_sites_both_succeed() {
        let h = Arc::new(harness());
        let one = create_site(&h, "one.example", RuntimeKind::Node).await;
        let two = create_site(&h, "two.example", RuntimeKind::Python).await;

        let (a, b) = tokio::join!(
            h.manager.deploy_site(one.id),
            h.manager.deploy_site(two.id)
        );
        a.expect("site one");
        b.expect("site two");

        let one_record = h.store.get_site(one.id).await.unwrap().unwrap();
        let two_record = h.store.get_site(two.id).await.unwrap().unwrap();
        assert_eq!(one_record.port, Some(3001));
        assert_eq!(two_record.port, Some(3002));
        assert_validate_before_reload(&h.proxy.calls());
    }

    #[tokio::test]
    async fn wordpress_extras_default_when_unset() {
        let h = harness();
        let domain = h
            .manager
            .create_domain("blog.example", RuntimeKind::Php)
            .await
            .expect("create domain");
        let site = h
            .manager
            .create_site(domain.id, RuntimeKind::Php, "wordpress", &BTreeMap::new())
            .await
            .expect("create site");

        h.manager.deploy_site(site.id).await.expect("deploy");

        let record = h.store.get_site(site.id).await.unwrap().unwrap();
        assert_eq!(record.status, SiteStatus::Active);
    }
}
