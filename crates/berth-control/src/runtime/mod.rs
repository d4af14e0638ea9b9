//! Runtime driver seam.
//!
//! The orchestrator drives containers through the [`RuntimeDriver`] trait.
//! The production implementation wraps the docker adapter crate; a mock
//! with scripted probe outcomes and failure injection backs the
//! orchestrator tests.

mod docker;

pub use docker::DockerDriver;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};

/// Everything needed to start one site container.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Container name (unique across the host).
    pub container_name: String,
    /// Rendered compose file on disk.
    pub compose_file: PathBuf,
    /// Site directory compose runs from.
    pub project_dir: PathBuf,
    /// Host port the container publishes.
    pub upstream_port: u16,
}

/// Trait for container runtime implementations.
///
/// Drivers are stateless executors: they never touch the site store, and
/// they never remove a container the caller did not explicitly name.
#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    /// Start a container.
    ///
    /// Fails with [`ControlError::NameConflict`] if a container with that
    /// name already exists; the caller must `remove` first.
    async fn start(&self, spec: &LaunchSpec) -> ControlResult<()>;

    /// Stop a container, keeping it for later restart.
    async fn stop(&self, name: &str) -> ControlResult<()>;

    /// Remove a container. Removing an absent container succeeds, so
    /// interrupted teardowns can be retried.
    async fn remove(&self, name: &str) -> ControlResult<()>;

    /// Whether a container with this name is currently running.
    async fn is_running(&self, name: &str) -> ControlResult<bool>;

    /// Whether a container with this name exists at all.
    async fn exists(&self, name: &str) -> ControlResult<bool>;

    /// Attempt a TCP connection to the port within `timeout`.
    ///
    /// Listener-level reachability only, not application health.
    async fn probe_port(&self, port: u16, timeout: Duration) -> ControlResult<bool>;

    /// Name of the running container publishing `port`, if any.
    async fn port_holder(&self, port: u16) -> ControlResult<Option<String>>;

    /// Last `lines` log lines from a container.
    async fn tail_logs(&self, name: &str, lines: u32) -> ControlResult<Vec<String>>;
}

#[derive(Debug, Clone)]
struct MockContainer {
    running: bool,
    port: u16,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    /// Probe plans per port: succeed once this many attempts have been
    /// made. `u32::MAX` never succeeds.
    probe_after: HashMap<u16, u32>,
    probe_attempts: HashMap<u16, u32>,
    /// Remaining `start` calls that fail as transient.
    start_failures: u32,
    logs: HashMap<String, Vec<String>>,
    calls: Vec<String>,
}

/// Mock runtime driver for orchestrator tests.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create an empty mock runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ControlResult<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }

    /// Script the probe on `port` to succeed on the `n`th attempt.
    pub fn probe_succeeds_after(&self, port: u16, n: u32) {
        if let Ok(mut state) = self.lock() {
            state.probe_after.insert(port, n);
        }
    }

    /// Script the probe on `port` to never succeed.
    pub fn probe_never_succeeds(&self, port: u16) {
        if let Ok(mut state) = self.lock() {
            state.probe_after.insert(port, u32::MAX);
        }
    }

    /// Make the next `n` start calls fail as transient engine outages.
    pub fn fail_next_starts(&self, n: u32) {
        if let Ok(mut state) = self.lock() {
            state.start_failures = n;
        }
    }

    /// Seed a pre-existing container (e.g. left over from a crash).
    pub fn seed_container(&self, name: &str, port: u16, running: bool) {
        if let Ok(mut state) = self.lock() {
            state
                .containers
                .insert(name.to_owned(), MockContainer { running, port });
        }
    }

    /// Set the log lines returned for a container.
    pub fn set_logs(&self, name: &str, lines: Vec<String>) {
        if let Ok(mut state) = self.lock() {
            state.logs.insert(name.to_owned(), lines);
        }
    }

    /// Every driver call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Number of probe attempts made against a port.
    #[must_use]
    pub fn probe_attempts(&self, port: u16) -> u32 {
        self.lock()
            .map(|s| s.probe_attempts.get(&port).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Whether a container currently exists in the mock.
    #[must_use]
    pub fn has_container(&self, name: &str) -> bool {
        self.lock()
            .map(|s| s.containers.contains_key(name))
            .unwrap_or(false)
    }

    /// Whether a container exists and is running.
    #[must_use]
    pub fn container_running(&self, name: &str) -> bool {
        self.lock()
            .map(|s| s.containers.get(name).is_some_and(|c| c.running))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RuntimeDriver for MockRuntime {
    async fn start(&self, spec: &LaunchSpec) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("start {}", spec.container_name));

        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(ControlError::RuntimeUnavailable(
                "engine unreachable (injected)".to_owned(),
            ));
        }

        if state.containers.contains_key(&spec.container_name) {
            return Err(ControlError::NameConflict(spec.container_name.clone()));
        }

        state.containers.insert(
            spec.container_name.clone(),
            MockContainer {
                running: true,
                port: spec.upstream_port,
            },
        );
        Ok(())
    }

    async fn stop(&self, name: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("stop {name}"));

        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| ControlError::not_found(format!("container {name}")))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, name: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("remove {name}"));
        state.containers.remove(name);
        Ok(())
    }

    async fn is_running(&self, name: &str) -> ControlResult<bool> {
        let state = self.lock()?;
        Ok(state.containers.get(name).is_some_and(|c| c.running))
    }

    async fn exists(&self, name: &str) -> ControlResult<bool> {
        let state = self.lock()?;
        Ok(state.containers.contains_key(name))
    }

    async fn probe_port(&self, port: u16, _timeout: Duration) -> ControlResult<bool> {
        let mut state = self.lock()?;
        let attempts = state.probe_attempts.entry(port).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;

        if let Some(&after) = state.probe_after.get(&port) {
            return Ok(after != u32::MAX && attempts >= after);
        }

        // Unscripted ports answer when a running container publishes them.
        Ok(state
            .containers
            .values()
            .any(|c| c.running && c.port == port))
    }

    async fn port_holder(&self, port: u16) -> ControlResult<Option<String>> {
        let state = self.lock()?;
        Ok(state
            .containers
            .iter()
            .find(|(_, c)| c.running && c.port == port)
            .map(|(name, _)| name.clone()))
    }

    async fn tail_logs(&self, name: &str, lines: u32) -> ControlResult<Vec<String>> {
        let state = self.lock()?;
        let logs = state.logs.get(name).cloned().unwrap_or_default();
        let keep = usize::try_from(lines).unwrap_or(usize::MAX);
        let skip = logs.len().saturating_sub(keep);
        Ok(logs.into_iter().skip(skip).collect())
    }
}
