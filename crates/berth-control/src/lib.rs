//! Berth control plane.
//!
//! This crate is the orchestration layer of the berth hosting panel. It
//! turns a declarative request ("deploy runtime R for domain D") into a
//! running, externally reachable, health-verified container, and can
//! safely redeploy, stop, migrate or tear that state down without leaving
//! the reverse proxy or the container runtime inconsistent.
//!
//! # Architecture
//!
//! The control plane is responsible for:
//!
//! - **Deployment orchestration**: sequencing template rendering, port
//!   derivation, container start, health gating and proxy activation into
//!   a crash-recoverable protocol
//! - **State management**: the durable domain/site records, including the
//!   canonical lifecycle status and port assignment
//! - **Adapter seams**: object-safe traits over the container runtime and
//!   the reverse proxy so the protocol is testable without either
//! - **API surface**: HTTP endpoints for the panel's dashboard layer
//!
//! # State machine
//!
//! Sites follow a strict lifecycle enforced at compile time using the
//! typestate pattern:
//!
//! ```text
//! Pending ──▶ Deploying ──▶ Active ──▶ Stopped
//!    │            │  ▲         │  ▲        │
//!    │            ▼  │         │  └────────┘ (redeploy)
//!    │         Failed ─────────┘
//!    └──────────────▶ Deleted ◀── (any non-terminal state)
//! ```
//!
//! A site never appears active before its container has passed the health
//! gate, and a proxy vhost is never enabled for an unhealthy container.

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod deployment;
pub mod error;
pub mod policy;
pub mod ports;
pub mod proxy;
pub mod runtime;
pub mod scaffold;
pub mod state;
pub mod store;
pub mod template;
pub mod types;

// Re-export commonly used types at the crate root
pub use config::BerthConfig;
pub use deployment::SiteManager;
pub use error::{ControlError, ControlResult};
pub use policy::StoppedSitePolicy;
pub use ports::PortAllocator;
pub use state::{Active, AnySite, Deleted, Deploying, Failed, Pending, Site, SiteState, Stopped};
pub use store::{MemoryStore, PostgresStore, SiteFilter, SiteStore};
pub use types::{
    DomainId, DomainRecord, DomainStatus, MigrationReport, RuntimeKind, SiteId, SiteRecord,
    SiteStatus,
};
