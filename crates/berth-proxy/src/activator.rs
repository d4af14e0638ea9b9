//! Staged vhost activation against a live nginx.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::paths::{VhostPaths, entry_exists};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Applies vhost configuration to an nginx installation.
///
/// The activator never reloads on its own; the control plane sequences
/// write → enable → validate → reload and decides when a rollback is due.
pub struct NginxActivator {
    nginx_bin: PathBuf,
    reload_command: Vec<String>,
    paths: VhostPaths,
}

impl NginxActivator {
    /// Create an activator, locating the `nginx` binary.
    pub fn new(paths: VhostPaths) -> Result<Self> {
        Ok(Self {
            nginx_bin: Self::find_nginx()?,
            reload_command: default_reload_command(),
            paths,
        })
    }

    /// Create an activator with explicit binary and reload command.
    pub fn with_commands(
        paths: VhostPaths,
        nginx_bin: impl Into<PathBuf>,
        reload_command: Vec<String>,
    ) -> Self {
        Self {
            nginx_bin: nginx_bin.into(),
            reload_command,
            paths,
        }
    }

    fn find_nginx() -> Result<PathBuf> {
        if let Ok(path) = which::which("nginx") {
            return Ok(path);
        }

        let common_paths = ["/usr/sbin/nginx", "/usr/local/sbin/nginx"];

        for path in common_paths {
            let expanded = shellexpand::tilde(path);
            let path = PathBuf::from(expanded.as_ref());
            if path.exists() {
                return Ok(path);
            }
        }

        Err(ProxyError::BinaryNotFound(PathBuf::from("nginx")))
    }

    /// Write a rendered vhost document to the staging path.
    ///
    /// Nothing nginx reads is touched until [`enable`](Self::enable).
    pub async fn write_vhost(&self, name: &str, config: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.paths.staging_dir).await?;

        let staged = self.paths.staged(name);
        tokio::fs::write(&staged, config).await?;

        debug!(vhost = %name, path = %staged.display(), "vhost staged");
        Ok(())
    }

    /// Promote the staged vhost into `sites-available` and ensure the
    /// `sites-enabled` symlink.
    ///
    /// The previously promoted file, if any, is kept as a backup so a
    /// failed validation can be rolled back.
    pub async fn enable(&self, name: &str) -> Result<()> {
        let staged = self.paths.staged(name);
        if !staged.exists() {
            return Err(ProxyError::NothingStaged(name.to_owned()));
        }

        let available = self.paths.available(name);
        let enabled = self.paths.enabled(name);

        tokio::fs::create_dir_all(&self.paths.available_dir).await?;
        tokio::fs::create_dir_all(&self.paths.enabled_dir).await?;

        if available.exists() {
            tokio::fs::copy(&available, self.paths.backup(name)).await?;
        }

        tokio::fs::rename(&staged, &available).await?;

        if !entry_exists(&enabled) {
            tokio::fs::symlink(&available, &enabled).await?;
        }

        info!(vhost = %name, "vhost enabled");
        Ok(())
    }

    /// Undo a failed [`enable`](Self::enable): restore the previous vhost
    /// if one existed, otherwise remove the never-validated files entirely.
    pub async fn rollback(&self, name: &str) -> Result<()> {
        let backup = self.paths.backup(name);
        let available = self.paths.available(name);
        let enabled = self.paths.enabled(name);

        if backup.exists() {
            tokio::fs::rename(&backup, &available).await?;
            info!(vhost = %name, "vhost rolled back to previous version");
        } else {
            if entry_exists(&enabled) {
                tokio::fs::remove_file(&enabled).await?;
            }
            if available.exists() {
                tokio::fs::remove_file(&available).await?;
            }
            info!(vhost = %name, "new vhost removed after failed validation");
        }

        Ok(())
    }

    /// Remove the enabled symlink, leaving the vhost file in place.
    pub async fn disable(&self, name: &str) -> Result<()> {
        let enabled = self.paths.enabled(name);
        if entry_exists(&enabled) {
            tokio::fs::remove_file(&enabled).await?;
            info!(vhost = %name, "vhost disabled");
        }
        Ok(())
    }

    /// Remove every trace of a vhost: symlink, promoted file, staging
    /// leftovers. Each step checks existence first, so a partially
    /// completed removal can be retried.
    pub async fn remove(&self, name: &str) -> Result<()> {
        for path in [
            self.paths.enabled(name),
            self.paths.available(name),
            self.paths.staged(name),
            self.paths.backup(name),
        ] {
            if entry_exists(&path) {
                tokio::fs::remove_file(&path).await?;
                debug!(path = %path.display(), "removed");
            }
        }

        info!(vhost = %name, "vhost removed");
        Ok(())
    }

    /// Whether this vhost is currently in the enabled set.
    pub fn is_enabled(&self, name: &str) -> bool {
        entry_exists(&self.paths.enabled(name))
    }

    /// Syntax-check the global nginx configuration (`nginx -t`).
    pub async fn validate(&self) -> Result<()> {
        let output = self.run(&self.nginx_bin, &["-t".to_owned()]).await?;

        if output.status.success() {
            debug!("nginx configuration valid");
            Ok(())
        } else {
            // `nginx -t` reports on stderr.
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(output = %stderr.trim(), "nginx configuration invalid");
            Err(ProxyError::ConfigInvalid(stderr.trim().to_owned()))
        }
    }

    /// Gracefully reload nginx to pick up the enabled set.
    pub async fn reload(&self) -> Result<()> {
        let (program, args) = self
            .reload_command
            .split_first()
            .ok_or_else(|| ProxyError::ReloadFailed("empty reload command".to_owned()))?;

        let output = self.run(Path::new(program), args).await?;

        if output.status.success() {
            info!("nginx reloaded");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ProxyError::ReloadFailed(stderr.trim().to_owned()))
        }
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<Output> {
        debug!(program = %program.display(), args = ?args, "invoking");

        let mut command = Command::new(program);
        command.args(args);

        match tokio::time::timeout(COMMAND_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ProxyError::ReloadFailed(format!(
                "failed to invoke {}: {e}",
                program.display()
            ))),
            Err(_) => Err(ProxyError::ReloadFailed(format!(
                "{} did not complete within {}s",
                program.display(),
                COMMAND_TIMEOUT.as_secs()
            ))),
        }
    }
}

impl std::fmt::Debug for NginxActivator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NginxActivator")
            .field("nginx_bin", &self.nginx_bin)
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

fn default_reload_command() -> Vec<String> {
    vec!["systemctl".to_owned(), "reload".to_owned(), "nginx".to_owned()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_activator(dir: &TempDir) -> NginxActivator {
        let paths = VhostPaths::new(
            dir.path().join("available"),
            dir.path().join("enabled"),
            dir.path().join("staging"),
        );
        // `true`/`false` stand in for nginx so validation outcomes can be
        // forced without a live install.
        NginxActivator::with_commands(paths, "/bin/true", vec!["/bin/true".to_owned()])
    }

    fn failing_validate_activator(dir: &TempDir) -> NginxActivator {
        let paths = VhostPaths::new(
            dir.path().join("available"),
            dir.path().join("enabled"),
            dir.path().join("staging"),
        );
        NginxActivator::with_commands(paths, "/bin/false", vec!["/bin/true".to_owned()])
    }

    #[tokio::test]
    async fn stage_then_enable_promotes_file() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);

        activator
            .write_vhost("example.com", "server {}")
            .await
            .unwrap();
        assert!(dir.path().join("staging/example.com.conf").exists());
        assert!(!activator.is_enabled("example.com"));

        activator.enable("example.com").await.unwrap();
        assert!(dir.path().join("available/example.com.conf").exists());
        assert!(activator.is_enabled("example.com"));
        assert!(!dir.path().join("staging/example.com.conf").exists());
    }

    #[tokio::test]
    async fn enable_without_staged_file_fails() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);

        let result = activator.enable("example.com").await;
        assert!(matches!(result, Err(ProxyError::NothingStaged(_))));
    }

    #[tokio::test]
    async fn rollback_restores_previous_version() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);

        activator.write_vhost("example.com", "old").await.unwrap();
        activator.enable("example.com").await.unwrap();

        activator.write_vhost("example.com", "new").await.unwrap();
        activator.enable("example.com").await.unwrap();

        activator.rollback("example.com").await.unwrap();

        let promoted =
            std::fs::read_to_string(dir.path().join("available/example.com.conf")).unwrap();
        assert_eq!(promoted, "old");
        assert!(activator.is_enabled("example.com"));
    }

    #[tokio::test]
    async fn rollback_of_new_vhost_removes_it() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);

        activator.write_vhost("example.com", "bad").await.unwrap();
        activator.enable("example.com").await.unwrap();

        activator.rollback("example.com").await.unwrap();

        assert!(!dir.path().join("available/example.com.conf").exists());
        assert!(!activator.is_enabled("example.com"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);

        activator.write_vhost("example.com", "x").await.unwrap();
        activator.enable("example.com").await.unwrap();

        activator.remove("example.com").await.unwrap();
        assert!(!activator.is_enabled("example.com"));

        // A second removal finds nothing and succeeds.
        activator.remove("example.com").await.unwrap();
    }

    #[tokio::test]
    async fn disable_keeps_vhost_file() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);

        activator.write_vhost("example.com", "x").await.unwrap();
        activator.enable("example.com").await.unwrap();

        activator.disable("example.com").await.unwrap();
        assert!(!activator.is_enabled("example.com"));
        assert!(dir.path().join("available/example.com.conf").exists());
    }

    #[tokio::test]
    async fn validate_success_and_failure() {
        let dir = TempDir::new().unwrap();

        assert!(test_activator(&dir).validate().await.is_ok());

        let result = failing_validate_activator(&dir).validate().await;
        assert!(matches!(result, Err(ProxyError::ConfigInvalid(_))));
    }

    #[tokio::test]
    async fn reload_runs_configured_command() {
        let dir = TempDir::new().unwrap();
        let activator = test_activator(&dir);
        activator.reload().await.unwrap();

        let paths = VhostPaths::new(
            dir.path().join("available"),
            dir.path().join("enabled"),
            dir.path().join("staging"),
        );
        let failing =
            NginxActivator::with_commands(paths, "/bin/true", vec!["/bin/false".to_owned()]);
        assert!(matches!(
            failing.reload().await,
            Err(ProxyError::ReloadFailed(_))
        ));
    }
}
