//! Container launch specification.

use std::path::PathBuf;

/// Everything the engine needs to start one site container.
///
/// The compose document itself is rendered by the control plane; the spec
/// carries its on-disk location plus the identity the engine manages the
/// container under.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name (unique across the host).
    pub name: String,

    /// Path to the rendered compose file.
    pub compose_file: PathBuf,

    /// Working directory for compose invocations (the site directory).
    pub project_dir: PathBuf,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        compose_file: impl Into<PathBuf>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            compose_file: compose_file.into(),
            project_dir: project_dir.into(),
        }
    }
}
