//! Configuration for the coordinator and the activation probe.

use std::time::Duration;

use lw_core::types::DEFAULT_EXPIRES;
use lw_core::ListRole;
use lw_merger::MergeLimits;

/// Identifier of the content blocker both components reload.
pub const DEFAULT_CONTENT_BLOCKER_IDENTIFIER: &str = "org.listwarden.content-blocker";

/// A subscription seeded into an empty store on first start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSubscription {
    pub name: String,
    pub url: String,
    pub expires: Duration,
    pub role: ListRole,
}

impl DefaultSubscription {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expires: DEFAULT_EXPIRES,
            role: ListRole::Additional,
        }
    }

    pub fn with_role(mut self, role: ListRole) -> Self {
        self.role = role;
        self
    }
}

/// Configuration for the update coordinator.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Content blocker reloaded after each settled generation.
    pub content_blocker_identifier: String,

    /// Upper bound on a single download, transport timeouts included.
    /// A download still running after this counts as a transport failure.
    pub download_timeout: Duration,

    /// Attempts per reload before giving up.
    pub reload_retry_count: u32,

    /// Platform ceilings for the merged ruleset.
    pub merge_limits: MergeLimits,

    /// Seeded when the store holds no subscriptions at all.
    pub default_subscriptions: Vec<DefaultSubscription>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            content_blocker_identifier: DEFAULT_CONTENT_BLOCKER_IDENTIFIER.to_string(),
            download_timeout: Duration::from_secs(60),
            reload_retry_count: 3,
            merge_limits: MergeLimits::default(),
            default_subscriptions: Vec::new(),
        }
    }
}

/// Configuration for the activation probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub content_blocker_identifier: String,

    /// A confirmation younger than this skips the probe.
    pub freshness: Duration,

    /// How long to wait for the extension's answer.
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            content_blocker_identifier: DEFAULT_CONTENT_BLOCKER_IDENTIFIER.to_string(),
            freshness: Duration::from_secs(60 * 60),
            timeout: Duration::from_secs(15),
        }
    }
}
