//! Content-blocker host capability.
//!
//! The platform can (re)load a named content-blocker ruleset and reports
//! the outcome through a single error slot. That slot is also the only
//! channel the sandboxed extension has back to the host: during an activity
//! test it aborts with a reserved sentinel error instead of loading rules.

use async_trait::async_trait;

/// Error domain reserved for the activity-test sentinel.
pub const ACTIVITY_TEST_ERROR_DOMAIN: &str = "org.listwarden.activity-test";

/// Error code reserved for the activity-test sentinel.
pub const ACTIVITY_TEST_ERROR_CODE: i64 = 0x4C57;

/// Error reported by a content-blocker reload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{domain} ({code}): {message}")]
pub struct HostError {
    pub domain: String,
    pub code: i64,
    pub message: String,
}

impl HostError {
    /// An ordinary platform failure.
    pub fn platform(code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: "platform".to_string(),
            code,
            message: message.into(),
        }
    }

    /// The sentinel the extension raises when it detects an activity test.
    pub fn activity_test() -> Self {
        Self {
            domain: ACTIVITY_TEST_ERROR_DOMAIN.to_string(),
            code: ACTIVITY_TEST_ERROR_CODE,
            message: "Extension aborted for activity test".to_string(),
        }
    }

    /// Distinguishes the sentinel from every ordinary load failure.
    pub fn is_activity_test_sentinel(&self) -> bool {
        self.domain == ACTIVITY_TEST_ERROR_DOMAIN && self.code == ACTIVITY_TEST_ERROR_CODE
    }
}

/// Platform capability to reload a content blocker by identifier.
#[async_trait]
pub trait ContentBlockerHost: Send + Sync {
    /// Ask the platform to reload the content blocker. Resolves when the
    /// platform reports back.
    async fn reload(&self, identifier: &str) -> Result<(), HostError>;
}
