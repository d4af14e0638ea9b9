//! Container engine adapter for berth.
//!
//! This crate drives the `docker` CLI to manage per-site containers:
//! - Compose-file validation and container start/stop/remove
//! - Running/existence inspection and published-port lookup
//! - Log tailing for deployment failure diagnostics
//! - TCP reachability probing of upstream ports
//!
//! The adapter is a stateless executor. It holds no knowledge of sites or
//! deployment status; the control plane sequences its operations and owns
//! all persisted state.

#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod probe;
pub mod spec;

pub use engine::DockerEngine;
pub use error::{EngineError, Result};
pub use probe::probe_port;
pub use spec::ContainerSpec;
