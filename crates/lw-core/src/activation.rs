//! Host-side view of whether the extension is live.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Activation state owned by the host process. The extension never writes
/// it; it can only answer the activity test through the reload error slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationState {
    /// Last confirmed probe result. Never flipped back to false by a probe
    /// that merely failed to confirm.
    #[serde(default)]
    pub activated: bool,
    /// Time of the last confirmed probe success.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// A probe is in flight.
    #[serde(default)]
    pub performing_activity_test: bool,
}

impl ActivationState {
    /// True when the last confirmation is younger than `threshold`.
    pub fn is_fresh(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_activity else {
            return false;
        };
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => now - last < threshold,
            Err(_) => true,
        }
    }
}
