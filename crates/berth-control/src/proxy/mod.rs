//! Proxy activator seam.
//!
//! The orchestrator drives the reverse proxy through the
//! [`ProxyActivator`] trait. The production implementation wraps the nginx
//! adapter crate; a mock recording the call sequence (and able to inject
//! validation failures) backs the orchestrator tests.

mod nginx;

pub use nginx::NginxProxy;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};

/// Trait for reverse proxy implementations.
///
/// Activation is staged: `write_vhost` touches only a staging area, and
/// `enable` promotes it while keeping a backup, so the orchestrator can
/// always `rollback` a candidate that fails `validate` without disturbing
/// serving sites. `reload` is only ever called after a successful
/// `validate`.
#[async_trait]
pub trait ProxyActivator: Send + Sync {
    /// Stage a rendered vhost document.
    async fn write_vhost(&self, name: &str, config: &str) -> ControlResult<()>;

    /// Promote the staged vhost and ensure it is in the enabled set.
    async fn enable(&self, name: &str) -> ControlResult<()>;

    /// Undo a failed enable, restoring whatever was promoted before.
    async fn rollback(&self, name: &str) -> ControlResult<()>;

    /// Take the vhost out of the enabled set, keeping its file.
    async fn disable(&self, name: &str) -> ControlResult<()>;

    /// Remove every trace of the vhost. Idempotent.
    async fn remove(&self, name: &str) -> ControlResult<()>;

    /// Whether the vhost is currently enabled.
    async fn is_enabled(&self, name: &str) -> ControlResult<bool>;

    /// Syntax-check the global proxy configuration.
    async fn validate(&self) -> ControlResult<()>;

    /// Gracefully reload the proxy.
    async fn reload(&self) -> ControlResult<()>;
}

#[derive(Debug, Default)]
struct MockProxyState {
    staged: HashMap<String, String>,
    promoted: HashMap<String, String>,
    backups: HashMap<String, String>,
    enabled: HashSet<String>,
    calls: Vec<String>,
    /// Remaining `validate` calls that fail.
    validate_failures: u32,
    reloads: u32,
}

/// Mock proxy activator for orchestrator tests.
#[derive(Debug, Default)]
pub struct MockProxy {
    state: Mutex<MockProxyState>,
}

impl MockProxy {
    /// Create an empty mock proxy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> ControlResult<std::sync::MutexGuard<'_, MockProxyState>> {
        self.state
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }

    /// Make the next `n` validate calls fail.
    pub fn fail_next_validates(&self, n: u32) {
        if let Ok(mut state) = self.lock() {
            state.validate_failures = n;
        }
    }

    /// Every activator call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Whether the vhost is in the enabled set.
    #[must_use]
    pub fn enabled(&self, name: &str) -> bool {
        self.lock().map(|s| s.enabled.contains(name)).unwrap_or(false)
    }

    /// The promoted vhost document, if any.
    #[must_use]
    pub fn promoted(&self, name: &str) -> Option<String> {
        self.lock().ok().and_then(|s| s.promoted.get(name).cloned())
    }

    /// How many times the proxy was reloaded.
    #[must_use]
    pub fn reload_count(&self) -> u32 {
        self.lock().map(|s| s.reloads).unwrap_or(0)
    }
}

#[async_trait]
impl ProxyActivator for MockProxy {
    async fn write_vhost(&self, name: &str, config: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("write {name}"));
        state.staged.insert(name.to_owned(), config.to_owned());
        Ok(())
    }

    async fn enable(&self, name: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("enable {name}"));

        let staged = state
            .staged
            .remove(name)
            .ok_or_else(|| ControlError::internal(format!("no staged vhost for {name}")))?;

        if let Some(previous) = state.promoted.get(name).cloned() {
            state.backups.insert(name.to_owned(), previous);
        }
        state.promoted.insert(name.to_owned(), staged);
        state.enabled.insert(name.to_owned());
        Ok(())
    }

    async fn rollback(&self, name: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("rollback {name}"));

        if let Some(backup) = state.backups.remove(name) {
            state.promoted.insert(name.to_owned(), backup);
        } else {
            state.promoted.remove(name);
            state.enabled.remove(name);
        }
        Ok(())
    }

    async fn disable(&self, name: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("disable {name}"));
        state.enabled.remove(name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push(format!("remove {name}"));
        state.staged.remove(name);
        state.promoted.remove(name);
        state.backups.remove(name);
        state.enabled.remove(name);
        Ok(())
    }

    async fn is_enabled(&self, name: &str) -> ControlResult<bool> {
        let state = self.lock()?;
        Ok(state.enabled.contains(name))
    }

    async fn validate(&self) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push("validate".to_owned());

        if state.validate_failures > 0 {
            state.validate_failures -= 1;
            return Err(ControlError::ProxyConfigInvalid(
                "nginx: configuration file test failed (injected)".to_owned(),
            ));
        }
        Ok(())
    }

    async fn reload(&self) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.push("reload".to_owned());
        state.reloads += 1;
        Ok(())
    }
}
