//! What the coordinator tells its observers.

use chrono::{DateTime, Utc};
use lw_core::{FailureKind, GroupId};
use serde::Serialize;

/// One subscription that failed within a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSubscription {
    pub name: String,
    pub kind: FailureKind,
    pub detail: String,
}

/// The aggregated failure of one user-triggered generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub generation: GroupId,
    pub failures: Vec<FailedSubscription>,
}

impl FailureReport {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// The live generation finished; every member is out of `updating`.
    Settled {
        generation: GroupId,
        changed: bool,
        failed: usize,
    },
    /// Raised once per failed user-triggered generation.
    UpdateFailed(FailureReport),
    /// The ruleset could not be built. Always raised.
    MergeFailed {
        generation: Option<GroupId>,
        message: String,
        capacity: bool,
    },
    /// Raised only when the reload served a user action.
    ReloadFailed { message: String },
}

/// Snapshot for UI display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    /// Members of the current generation are still downloading.
    pub updating: bool,
    pub reloading: bool,
    /// Last settled generation that merged new content.
    pub last_update: Option<DateTime<Utc>>,
    pub generation: Option<GroupId>,
    /// Pending failure report, until dismissed.
    pub failure: Option<FailureReport>,
}
