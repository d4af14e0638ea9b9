//! Nginx-backed proxy activator.

use async_trait::async_trait;
use berth_proxy::{NginxActivator, VhostPaths};

use crate::config::ProxyConfig;
use crate::error::ControlResult;

use super::ProxyActivator;

/// Proxy activator backed by the nginx adapter crate.
pub struct NginxProxy {
    activator: NginxActivator,
}

impl NginxProxy {
    /// Create an activator from configuration, locating the nginx binary if
    /// no explicit path is configured.
    pub fn new(config: &ProxyConfig) -> ControlResult<Self> {
        let paths = VhostPaths::new(
            &config.available_dir,
            &config.enabled_dir,
            &config.staging_dir,
        );

        let activator = match &config.nginx_bin {
            Some(bin) => {
                NginxActivator::with_commands(paths, bin, config.reload_command.clone())
            }
            None => NginxActivator::new(paths)?,
        };

        Ok(Self { activator })
    }
}

impl std::fmt::Debug for NginxProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NginxProxy").finish_non_exhaustive()
    }
}

#[async_trait]
impl ProxyActivator for NginxProxy {
    async fn write_vhost(&self, name: &str, config: &str) -> ControlResult<()> {
        self.activator.write_vhost(name, config).await?;
        Ok(())
    }

    async fn enable(&self, name: &str) -> ControlResult<()> {
        self.activator.enable(name).await?;
        Ok(())
    }

    async fn rollback(&self, name: &str) -> ControlResult<()> {
        self.activator.rollback(name).await?;
        Ok(())
    }

    async fn disable(&self, name: &str) -> ControlResult<()> {
        self.activator.disable(name).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> ControlResult<()> {
        self.activator.remove(name).await?;
        Ok(())
    }

    async fn is_enabled(&self, name: &str) -> ControlResult<bool> {
        Ok(self.activator.is_enabled(name))
    }

    async fn validate(&self) -> ControlResult<()> {
        self.activator.validate().await?;
        Ok(())
    }

    async fn reload(&self) -> ControlResult<()> {
        self.activator.reload().await?;
        Ok(())
    }
}
