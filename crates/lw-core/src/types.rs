//! Identifiers and constants shared by every Listwarden crate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval after which a subscription is considered stale.
pub const DEFAULT_EXPIRES: Duration = Duration::from_secs(86_400);

/// File name of the merged ruleset inside the list cache.
pub const RULESET_FILE_NAME: &str = "ruleset.json";

// =============================================================================
// Task Identifier
// =============================================================================

/// Opaque handle correlating an in-flight transport operation to a
/// subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

// =============================================================================
// Generation Identifier
// =============================================================================

/// Generation tag stamped onto every subscription a single update call
/// starts. Strictly increasing within one coordinator lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl GroupId {
    /// The id after this one.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}
