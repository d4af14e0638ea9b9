//! Reverse proxy adapter for berth.
//!
//! Drives an nginx installation through its file-based configuration
//! surface: vhost documents staged to disk, promoted into
//! `sites-available`, symlinked into `sites-enabled`, syntax-checked with
//! `nginx -t`, and applied with a graceful reload.
//!
//! Activation is two-phase: a vhost is written to a staging path and only
//! promoted after the control plane has sequenced validation, so a bad
//! render can always be rolled back without touching what nginx is
//! currently serving.

#![forbid(unsafe_code)]

pub mod activator;
pub mod error;
pub mod paths;

pub use activator::NginxActivator;
pub use error::{ProxyError, Result};
pub use paths::VhostPaths;
