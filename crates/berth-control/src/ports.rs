//! Upstream port derivation.
//!
//! Ports are a pure function of the site identifier (`base + id`), so no
//! allocation table needs to be persisted or locked. The trade-off is that
//! identifier reuse after a hard crash can disagree with reality, which is
//! why the orchestrator verifies the derived port is actually free against
//! the runtime driver immediately before binding.

use crate::error::{ControlError, ControlResult};
use crate::types::SiteId;

/// Derives upstream ports from site identifiers.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base_port: u16,
    max_site_id: i64,
    candidate_offset: u16,
}

impl PortAllocator {
    /// Create an allocator over `base_port + 1 ..= base_port + max_site_id`.
    #[must_use]
    pub const fn new(base_port: u16, max_site_id: i64, candidate_offset: u16) -> Self {
        Self {
            base_port,
            max_site_id,
            candidate_offset,
        }
    }

    /// Derive the upstream port for a site.
    ///
    /// Pure and injective over the valid window; identifiers outside
    /// `1..=max_site_id` fail with [`ControlError::PortRangeExhausted`] so
    /// the result always stays inside the designated upstream range.
    pub fn allocate(&self, site_id: SiteId) -> ControlResult<u16> {
        let id = site_id.get();
        if id < 1 || id > self.max_site_id {
            return Err(ControlError::PortRangeExhausted {
                site_id: id,
                max_site_id: self.max_site_id,
            });
        }

        let offset = u16::try_from(id).map_err(|_| ControlError::PortRangeExhausted {
            site_id: id,
            max_site_id: self.max_site_id,
        })?;
        Ok(self.base_port + offset)
    }

    /// Derive the temporary port a redeploy candidate binds while it is
    /// health-checked alongside the still-serving container.
    #[must_use]
    pub const fn candidate(&self, port: u16) -> u16 {
        port + self.candidate_offset
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(3000, 999, 10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_base_plus_id() {
        let allocator = PortAllocator::default();
        assert_eq!(allocator.allocate(SiteId::new(7)).unwrap(), 3007);
        assert_eq!(allocator.allocate(SiteId::new(1)).unwrap(), 3001);
        assert_eq!(allocator.allocate(SiteId::new(999)).unwrap(), 3999);
    }

    #[test]
    fn allocation_is_injective_over_window() {
        let allocator = PortAllocator::default();
        let mut seen = std::collections::HashSet::new();
        for id in 1..=999 {
            let port = allocator.allocate(SiteId::new(id)).unwrap();
            assert!(seen.insert(port), "port {port} allocated twice");
        }
    }

    #[test]
    fn out_of_window_ids_fail() {
        let allocator = PortAllocator::default();
        for id in [0, -1, 1000, i64::MAX] {
            let err = allocator.allocate(SiteId::new(id)).unwrap_err();
            assert!(matches!(err, ControlError::PortRangeExhausted { .. }));
        }
    }

    #[test]
    fn candidate_port_is_offset() {
        let allocator = PortAllocator::default();
        assert_eq!(allocator.candidate(3007), 13_007);
    }
}
