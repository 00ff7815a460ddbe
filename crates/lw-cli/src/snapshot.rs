//! Read-only view of the shared container.
//!
//! Loaded straight from the settings store. Records of downloads that a
//! running `watch` has in flight are shown as they are and never reset.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use lw_core::{ActivationState, AllowList, ListSelection, Settings, StoreError, Subscription};

pub struct Snapshot {
    pub subscriptions: Vec<Subscription>,
    pub allow_list: AllowList,
    pub selection: ListSelection,
    pub activation: ActivationState,
    /// Last merge that produced a new ruleset.
    pub last_update: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn load(settings: &Settings) -> Result<Self, StoreError> {
        Ok(Self {
            subscriptions: settings.load_subscriptions()?,
            allow_list: settings.load_allow_list()?,
            selection: settings.load_list_selection()?,
            activation: settings.load_activation_state()?,
            last_update: settings.last_ruleset_update()?,
        })
    }

    pub fn is_active(&self, sub: &Subscription) -> bool {
        self.selection.is_active(sub.role)
    }

    /// Active subscriptions whose content has expired at `now`.
    pub fn outdated(&self, now: DateTime<Utc>) -> Vec<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|sub| self.is_active(sub) && sub.is_expired(now))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "lastUpdate": self.last_update,
            "subscriptions": self.subscriptions.iter().map(Subscription::store).collect::<Vec<_>>(),
            "allowList": self.allow_list.hosts(),
            "listSelection": self.selection,
            "activation": self.activation,
        })
    }
}
