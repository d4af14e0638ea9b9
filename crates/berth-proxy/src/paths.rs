//! Vhost file locations.

use std::path::{Path, PathBuf};

/// Directory layout for vhost configuration files.
#[derive(Debug, Clone)]
pub struct VhostPaths {
    /// Where promoted vhost files live (`sites-available`).
    pub available_dir: PathBuf,

    /// Where enabled symlinks live (`sites-enabled`).
    pub enabled_dir: PathBuf,

    /// Where freshly rendered vhosts are staged before promotion.
    pub staging_dir: PathBuf,
}

impl VhostPaths {
    pub fn new(
        available_dir: impl Into<PathBuf>,
        enabled_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            available_dir: available_dir.into(),
            enabled_dir: enabled_dir.into(),
            staging_dir: staging_dir.into(),
        }
    }

    /// Standard Debian-style nginx layout.
    pub fn system_default() -> Self {
        Self::new(
            "/etc/nginx/sites-available",
            "/etc/nginx/sites-enabled",
            "/var/lib/berth/vhost-staging",
        )
    }

    pub fn staged(&self, name: &str) -> PathBuf {
        self.staging_dir.join(Self::file_name(name))
    }

    pub fn backup(&self, name: &str) -> PathBuf {
        self.staging_dir.join(format!("{name}.conf.prev"))
    }

    pub fn available(&self, name: &str) -> PathBuf {
        self.available_dir.join(Self::file_name(name))
    }

    pub fn enabled(&self, name: &str) -> PathBuf {
        self.enabled_dir.join(Self::file_name(name))
    }

    fn file_name(name: &str) -> String {
        format!("{name}.conf")
    }
}

impl Default for VhostPaths {
    fn default() -> Self {
        Self::system_default()
    }
}

/// True if the path exists, following nothing (symlinks count even when
/// their target is gone).
pub(crate) fn entry_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
