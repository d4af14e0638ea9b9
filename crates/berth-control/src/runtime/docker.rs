//! Docker-backed runtime driver.

use std::time::Duration;

use async_trait::async_trait;
use berth_runtime::{ContainerSpec, DockerEngine};

use crate::config::RuntimeConfig;
use crate::error::ControlResult;

use super::{LaunchSpec, RuntimeDriver};

/// Runtime driver backed by the docker adapter crate.
pub struct DockerDriver {
    engine: DockerEngine,
}

impl DockerDriver {
    /// Create a driver from configuration, locating the docker binary if no
    /// explicit path is configured.
    pub fn new(config: &RuntimeConfig) -> ControlResult<Self> {
        let engine = match &config.docker_bin {
            Some(path) => DockerEngine::with_binary(path),
            None => DockerEngine::new()?,
        };

        Ok(Self {
            engine: engine
                .with_command_timeout(Duration::from_secs(config.command_timeout_secs)),
        })
    }
}

impl std::fmt::Debug for DockerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerDriver").finish_non_exhaustive()
    }
}

#[async_trait]
impl RuntimeDriver for DockerDriver {
    async fn start(&self, spec: &LaunchSpec) -> ControlResult<()> {
        let container_spec = ContainerSpec::new(
            &spec.container_name,
            &spec.compose_file,
            &spec.project_dir,
        );
        self.engine.start(&container_spec).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> ControlResult<()> {
        self.engine.stop(name).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> ControlResult<()> {
        self.engine.remove(name).await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> ControlResult<bool> {
        Ok(self.engine.is_running(name).await?)
    }

    async fn exists(&self, name: &str) -> ControlResult<bool> {
        Ok(self.engine.exists(name).await?)
    }

    async fn probe_port(&self, port: u16, timeout: Duration) -> ControlResult<bool> {
        Ok(berth_runtime::probe_port(port, timeout).await)
    }

    async fn port_holder(&self, port: u16) -> ControlResult<Option<String>> {
        Ok(self.engine.port_holder(port).await?)
    }

    async fn tail_logs(&self, name: &str, lines: u32) -> ControlResult<Vec<String>> {
        Ok(self.engine.tail_logs(name, lines).await?)
    }
}
