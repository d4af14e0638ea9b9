//! Docker engine driving via the CLI.

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::spec::ContainerSpec;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `compose up`, which may pull images on first deployment.
const START_TIMEOUT: Duration = Duration::from_secs(300);

/// Manages site containers through the `docker` CLI.
///
/// Every invocation runs under a deadline; an engine that hangs is reported
/// as unavailable rather than blocking the caller indefinitely.
pub struct DockerEngine {
    docker_bin: PathBuf,
    command_timeout: Duration,
}

impl DockerEngine {
    /// Create a new engine adapter, locating the `docker` binary.
    pub fn new() -> Result<Self> {
        Ok(Self {
            docker_bin: Self::find_docker()?,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Create an engine adapter with an explicit binary path.
    pub fn with_binary(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the per-command deadline.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Find the docker binary in PATH or common locations.
    fn find_docker() -> Result<PathBuf> {
        if let Ok(path) = which::which("docker") {
            return Ok(path);
        }

        let common_paths = ["/usr/bin/docker", "/usr/local/bin/docker"];

        for path in common_paths {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(path);
            }
        }

        Err(EngineError::BinaryNotFound(PathBuf::from("docker")))
    }

    /// Run a docker subcommand under the given deadline.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        debug!(args = ?args, "invoking docker");

        let mut command = Command::new(&self.docker_bin);
        command.args(args);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(EngineError::Unavailable(format!(
                "failed to invoke docker: {e}"
            ))),
            Err(_) => Err(EngineError::Unavailable(format!(
                "docker {} did not complete within {}s",
                args.first().unwrap_or(&""),
                timeout.as_secs()
            ))),
        }
    }

    fn stderr_excerpt(output: &Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr);
        stderr.trim().lines().take(5).collect::<Vec<_>>().join("\n")
    }

    /// Check that the engine daemon is reachable.
    pub async fn ensure_available(&self) -> Result<()> {
        let output = self
            .run(
                &["version", "--format", "{{.Server.Version}}"],
                self.command_timeout,
            )
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::Unavailable(Self::stderr_excerpt(&output)))
        }
    }

    /// Validate a rendered compose document without starting anything.
    pub async fn validate_spec(&self, spec: &ContainerSpec) -> Result<()> {
        let compose = spec.compose_file.display().to_string();
        let output = self
            .run(
                &["compose", "-f", &compose, "config", "--quiet"],
                self.command_timeout,
            )
            .await?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::SpecInvalid(Self::stderr_excerpt(&output)))
        }
    }

    /// Start the container described by `spec`.
    ///
    /// Fails with [`EngineError::NameConflict`] if a container with that name
    /// already exists; the caller must remove it first. The engine never
    /// removes a container implicitly.
    pub async fn start(&self, spec: &ContainerSpec) -> Result<()> {
        self.ensure_available().await?;

        if self.exists(&spec.name).await? {
            return Err(EngineError::NameConflict(spec.name.clone()));
        }

        self.validate_spec(spec).await?;

        info!(container = %spec.name, compose = %spec.compose_file.display(), "starting container");

        let compose = spec.compose_file.display().to_string();
        let output = self
            .run(&["compose", "-f", &compose, "up", "-d"], START_TIMEOUT)
            .await?;

        if output.status.success() {
            info!(container = %spec.name, "container started");
            Ok(())
        } else {
            Err(EngineError::StartFailed {
                name: spec.name.clone(),
                message: Self::stderr_excerpt(&output),
            })
        }
    }

    /// Stop a container, keeping it on disk for later restart.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let output = self.run(&["stop", name], self.command_timeout).await?;

        if output.status.success() {
            info!(container = %name, "container stopped");
            Ok(())
        } else if self.exists(name).await? {
            Err(EngineError::Unavailable(Self::stderr_excerpt(&output)))
        } else {
            Err(EngineError::ContainerNotFound(name.to_owned()))
        }
    }

    /// Remove a container. Removing a container that does not exist is not
    /// an error, so interrupted teardowns can be retried.
    pub async fn remove(&self, name: &str) -> Result<()> {
        if !self.exists(name).await? {
            debug!(container = %name, "remove: container absent");
            return Ok(());
        }

        let output = self.run(&["rm", "-f", name], self.command_timeout).await?;

        if output.status.success() {
            info!(container = %name, "container removed");
            Ok(())
        } else {
            warn!(container = %name, stderr = %Self::stderr_excerpt(&output), "container removal failed");
            Err(EngineError::Unavailable(Self::stderr_excerpt(&output)))
        }
    }

    /// Check whether a container with this name is currently running.
    pub async fn is_running(&self, name: &str) -> Result<bool> {
        let filter = format!("name=^{name}$");
        let output = self
            .run(
                &["ps", "--filter", &filter, "--format", "{{.Names}}"],
                self.command_timeout,
            )
            .await?;

        if !output.status.success() {
            return Err(EngineError::Unavailable(Self::stderr_excerpt(&output)));
        }

        Ok(Self::names_contain(&output.stdout, name))
    }

    /// Check whether a container with this name exists (running or not).
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let filter = format!("name=^{name}$");
        let output = self
            .run(
                &["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"],
                self.command_timeout,
            )
            .await?;

        if !output.status.success() {
            return Err(EngineError::Unavailable(Self::stderr_excerpt(&output)));
        }

        Ok(Self::names_contain(&output.stdout, name))
    }

    /// Find which running container, if any, publishes `port` on the host.
    pub async fn port_holder(&self, port: u16) -> Result<Option<String>> {
        let output = self
            .run(
                &["ps", "--format", "{{.Names}}\t{{.Ports}}"],
                self.command_timeout,
            )
            .await?;

        if !output.status.success() {
            return Err(EngineError::Unavailable(Self::stderr_excerpt(&output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            let Some((name, ports)) = line.split_once('\t') else {
                continue;
            };
            if published_host_ports(ports).any(|p| p == port) {
                return Ok(Some(name.to_owned()));
            }
        }

        Ok(None)
    }

    /// Fetch the last `lines` log lines from a container.
    pub async fn tail_logs(&self, name: &str, lines: u32) -> Result<Vec<String>> {
        let tail = lines.to_string();
        let output = self
            .run(&["logs", "--tail", &tail, name], self.command_timeout)
            .await?;

        if !output.status.success() {
            return Err(EngineError::ContainerNotFound(name.to_owned()));
        }

        // Container logs may land on either stream depending on the app.
        let mut collected: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(ToOwned::to_owned)
            .collect();
        collected.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(ToOwned::to_owned),
        );

        Ok(collected)
    }

    fn names_contain(stdout: &[u8], name: &str) -> bool {
        String::from_utf8_lossy(stdout)
            .lines()
            .any(|line| line.trim() == name)
    }
}

impl std::fmt::Debug for DockerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerEngine")
            .field("docker_bin", &self.docker_bin)
            .finish_non_exhaustive()
    }
}

/// Parse host ports out of a `docker ps` Ports column, e.g.
/// `"0.0.0.0:3007->3000/tcp, :::3007->3000/tcp"`.
fn published_host_ports(ports: &str) -> impl Iterator<Item = u16> + '_ {
    ports.split(',').filter_map(|mapping| {
        let host_side = mapping.trim().split_once("->")?.0;
        host_side.rsplit_once(':')?.1.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_published_ports() {
        let ports = "0.0.0.0:3007->3000/tcp, :::3007->3000/tcp";
        let parsed: Vec<u16> = published_host_ports(ports).collect();
        assert_eq!(parsed, vec![3007, 3007]);
    }

    #[test]
    fn parse_ports_ignores_unpublished() {
        // A container exposing a port without publishing it has no "->".
        let parsed: Vec<u16> = published_host_ports("3000/tcp").collect();
        assert!(parsed.is_empty());
    }

    #[test]
    fn parse_ports_empty_column() {
        let parsed: Vec<u16> = published_host_ports("").collect();
        assert!(parsed.is_empty());
    }

    #[test]
    fn names_matching_is_exact() {
        assert!(DockerEngine::names_contain(b"example.com-app\n", "example.com-app"));
        assert!(!DockerEngine::names_contain(
            b"example.com-app-next\n",
            "example.com-app"
        ));
    }
}
