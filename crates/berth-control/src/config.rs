//! Configuration for the berth control plane.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};
use crate::policy::StoppedSitePolicy;

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BerthConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Container runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Reverse proxy configuration.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Deployment behaviour configuration.
    #[serde(default)]
    pub deploy: DeployConfig,
}

impl BerthConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources
    /// override earlier):
    /// 1. Default values
    /// 2. `berth.toml` in the current directory (if present)
    /// 3. Environment variables with `BERTH_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("berth.toml"))
            .merge(Env::prefixed("BERTH_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BERTH_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8088)
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/berth".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Container runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Explicit path to the docker binary. Discovered from PATH when unset.
    pub docker_bin: Option<PathBuf>,

    /// Root directory for per-site files (compose file + data dir).
    #[serde(default = "default_sites_dir")]
    pub sites_dir: PathBuf,

    /// Deadline for individual engine invocations, in seconds.
    #[serde(default = "default_engine_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_sites_dir() -> PathBuf {
    PathBuf::from("/srv/berth/sites")
}

const fn default_engine_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_bin: None,
            sites_dir: default_sites_dir(),
            command_timeout_secs: default_engine_timeout_secs(),
        }
    }
}

/// Reverse proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Promoted vhost directory (`sites-available`).
    #[serde(default = "default_available_dir")]
    pub available_dir: PathBuf,

    /// Enabled symlink directory (`sites-enabled`).
    #[serde(default = "default_enabled_dir")]
    pub enabled_dir: PathBuf,

    /// Staging directory for rendered vhosts awaiting promotion.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Explicit path to the nginx binary. Discovered from PATH when unset.
    pub nginx_bin: Option<PathBuf>,

    /// Command invoked for a graceful reload.
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
}

fn default_available_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-available")
}

fn default_enabled_dir() -> PathBuf {
    PathBuf::from("/etc/nginx/sites-enabled")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/var/lib/berth/vhost-staging")
}

fn default_reload_command() -> Vec<String> {
    vec![
        "systemctl".to_owned(),
        "reload".to_owned(),
        "nginx".to_owned(),
    ]
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            available_dir: default_available_dir(),
            enabled_dir: default_enabled_dir(),
            staging_dir: default_staging_dir(),
            nginx_bin: None,
            reload_command: default_reload_command(),
        }
    }
}

/// Deployment behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    /// First upstream port; site id 1 maps to `base_port + 1`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Largest deployable site id (bounds the upstream range).
    #[serde(default = "default_max_site_id")]
    pub max_site_id: i64,

    /// Offset added to a site's port for its redeploy candidate.
    #[serde(default = "default_candidate_offset")]
    pub candidate_offset: u16,

    /// Interval between health probes, in milliseconds.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Deadline for a single probe attempt, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Total health gate window, in seconds.
    #[serde(default = "default_probe_window_secs")]
    pub probe_window_secs: u64,

    /// How many times a transient runtime error is retried.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Initial backoff between transient retries, in milliseconds
    /// (doubled per attempt).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Log lines captured into a health-gate failure.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,

    /// What a stopped site's vhost does.
    #[serde(default)]
    pub stopped_site_policy: StoppedSitePolicy,
}

const fn default_base_port() -> u16 {
    3000
}

const fn default_max_site_id() -> i64 {
    999
}

const fn default_candidate_offset() -> u16 {
    10_000
}

const fn default_probe_interval_ms() -> u64 {
    2000
}

const fn default_probe_timeout_ms() -> u64 {
    2000
}

const fn default_probe_window_secs() -> u64 {
    60
}

const fn default_transient_retries() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    500
}

const fn default_log_tail_lines() -> u32 {
    20
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            max_site_id: default_max_site_id(),
            candidate_offset: default_candidate_offset(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_window_secs: default_probe_window_secs(),
            transient_retries: default_transient_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            log_tail_lines: default_log_tail_lines(),
            stopped_site_policy: StoppedSitePolicy::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BerthConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8088);
        assert_eq!(config.deploy.base_port, 3000);
        assert_eq!(config.deploy.max_site_id, 999);
        assert_eq!(
            config.deploy.stopped_site_policy,
            StoppedSitePolicy::GatewayError
        );
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [database]
            url = "postgres://user:pass@db:5432/panel"
            max_connections = 20

            [deploy]
            base_port = 4000
            probe_window_secs = 120
            stopped_site_policy = "unreachable"
        "#;

        let config: BerthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/panel");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.deploy.base_port, 4000);
        assert_eq!(config.deploy.probe_window_secs, 120);
        assert_eq!(
            config.deploy.stopped_site_policy,
            StoppedSitePolicy::Unreachable
        );
    }
}
