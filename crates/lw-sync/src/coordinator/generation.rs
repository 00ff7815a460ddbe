use lw_core::GroupId;

use super::download::DownloadOutcome;
use crate::events::{FailedSubscription, FailureReport};

/// Bookkeeping for the live generation.
///
/// Members are not listed here: a subscription belongs to the generation
/// whose id it is stamped with, and the generation settles once no stamped
/// subscription is still `updating`.
#[derive(Debug)]
pub(crate) struct Generation {
    pub id: GroupId,
    pub user_triggered: bool,
    /// A live member changed content since the last merge.
    pub changed: bool,
    pub failures: Vec<FailedSubscription>,
}

impl Generation {
    /// Open generation `id`, replacing `previous` if it never settled.
    ///
    /// Content changes the superseded generation already took in live are
    /// carried over so they still get merged. Its failures are dropped.
    pub fn supersede(previous: Option<Generation>, id: GroupId, user_triggered: bool) -> Self {
        let changed = previous.map_or(false, |prev| prev.changed);
        Self {
            id,
            user_triggered,
            changed,
            failures: Vec::new(),
        }
    }

    /// Fold one live completion into the generation.
    pub fn record(&mut self, name: &str, changed: bool, outcome: &DownloadOutcome) {
        self.changed |= changed;
        if let DownloadOutcome::Failed { kind, detail } = outcome {
            self.failures.push(FailedSubscription {
                name: name.to_string(),
                kind: *kind,
                detail: detail.clone(),
            });
        }
    }

    /// The one failure report this generation raises, if any. Background
    /// generations never raise one.
    pub fn report(&self) -> Option<FailureReport> {
        if !self.user_triggered || self.failures.is_empty() {
            return None;
        }
        Some(FailureReport {
            generation: self.id,
            failures: self.failures.clone(),
        })
    }
}
