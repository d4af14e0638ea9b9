//! Policy for what a stopped site's vhost does.

use serde::{Deserialize, Serialize};

/// What happens to a site's vhost when the site is stopped.
///
/// Either behaviour is defensible; the panel commits to one per
/// installation so operators know what a stopped site looks like from
/// outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppedSitePolicy {
    /// The vhost stays enabled and nginx answers 502 while the container
    /// is down.
    ///
    /// **Pros:** restart needs no proxy work; visitors see an error page
    /// from the panel's proxy rather than a connection reset.
    ///
    /// **Cons:** the hostname still resolves to the panel, which can be
    /// surprising for a site meant to be offline.
    #[default]
    GatewayError,

    /// The vhost is disabled on stop; connections are refused until the
    /// site is deployed again.
    ///
    /// **Pros:** a stopped site is genuinely unreachable.
    ///
    /// **Cons:** stop and restart both touch the shared proxy state
    /// (validate + reload).
    Unreachable,
}

impl StoppedSitePolicy {
    /// Get the policy name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GatewayError => "gateway_error",
            Self::Unreachable => "unreachable",
        }
    }

    /// Whether stopping a site must disable its vhost.
    #[must_use]
    pub const fn disables_vhost(self) -> bool {
        matches!(self, Self::Unreachable)
    }
}

impl std::fmt::Display for StoppedSitePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
