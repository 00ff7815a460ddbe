//! Durable, app-group shared storage.
//!
//! Two kinds of storage are shared between the host and the extension:
//!
//! - a [`SettingsStore`]: small JSON values by key (subscription records,
//!   allow-list, list selection, activation state, the one-bit
//!   activity-test flag)
//! - a [`ListCache`]: downloaded payloads and the merged ruleset, by file name
//!
//! [`Settings`] is the typed handle components receive in their
//! constructors. There is no global lookup.

mod file;
mod memory;

pub use file::{DirCache, FileStore};
pub use memory::{MemoryCache, MemoryStore};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::activation::ActivationState;
use crate::allowlist::AllowList;
use crate::selection::ListSelection;
use crate::subscription::{Subscription, SubscriptionRecord};

/// Error type for storage access.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed value for '{key}': {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),
}

// =============================================================================
// Storage Traits
// =============================================================================

/// Process-wide durable key-value store surviving restarts.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Durable blob storage keyed by file name.
pub trait ListCache: Send + Sync {
    fn read(&self, file_name: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, file_name: &str, contents: &str) -> Result<(), StoreError>;
    fn remove(&self, file_name: &str) -> Result<(), StoreError>;
}

/// Reject names that could escape the cache directory.
pub(crate) fn validate_file_name(file_name: &str) -> Result<(), StoreError> {
    if file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains('/')
        || file_name.contains('\\')
    {
        return Err(StoreError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

// =============================================================================
// Typed Settings
// =============================================================================

/// Keys used in the shared settings store.
pub mod keys {
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const ALLOW_LIST: &str = "allowList";
    pub const LIST_SELECTION: &str = "listSelection";
    pub const ACTIVATION_STATE: &str = "activationState";
    pub const ACTIVITY_TEST_FLAG: &str = "activityTestFlag";
    pub const LAST_RULESET_UPDATE: &str = "lastRulesetUpdate";
}

/// Typed handle over a [`SettingsStore`].
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl Settings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Settings backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Malformed {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Malformed {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, value)
    }

    /// Load every persisted subscription, ordered by name. Records that fail
    /// validation are skipped with a warning.
    pub fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let records: BTreeMap<String, SubscriptionRecord> =
            self.get_typed(keys::SUBSCRIPTIONS)?.unwrap_or_default();

        let mut subscriptions = Vec::with_capacity(records.len());
        for (name, record) in records {
            match Subscription::load(record) {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => log::warn!("Skipping persisted subscription '{}': {}", name, e),
            }
        }
        Ok(subscriptions)
    }

    pub fn save_subscriptions<'a, I>(&self, subscriptions: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = &'a Subscription>,
    {
        let records: BTreeMap<String, SubscriptionRecord> = subscriptions
            .into_iter()
            .map(|sub| (sub.name.clone(), sub.store()))
            .collect();
        self.set_typed(keys::SUBSCRIPTIONS, &records)
    }

    /// Load the allow-list. Entries that no longer normalize are dropped.
    pub fn load_allow_list(&self) -> Result<AllowList, StoreError> {
        let hosts: Vec<String> = self.get_typed(keys::ALLOW_LIST)?.unwrap_or_default();
        let mut list = AllowList::new();
        for host in hosts {
            if let Err(e) = list.add(&host) {
                log::warn!("Dropping allow-list entry '{}': {}", host, e);
            }
        }
        Ok(list)
    }

    pub fn save_allow_list(&self, list: &AllowList) -> Result<(), StoreError> {
        self.set_typed(keys::ALLOW_LIST, &list.hosts())
    }

    pub fn load_list_selection(&self) -> Result<ListSelection, StoreError> {
        Ok(self.get_typed(keys::LIST_SELECTION)?.unwrap_or_default())
    }

    pub fn save_list_selection(&self, selection: &ListSelection) -> Result<(), StoreError> {
        self.set_typed(keys::LIST_SELECTION, selection)
    }

    pub fn load_activation_state(&self) -> Result<ActivationState, StoreError> {
        Ok(self.get_typed(keys::ACTIVATION_STATE)?.unwrap_or_default())
    }

    pub fn save_activation_state(&self, state: &ActivationState) -> Result<(), StoreError> {
        self.set_typed(keys::ACTIVATION_STATE, state)
    }

    /// The one-bit probe flag the host raises right before an activity test.
    pub fn activity_test_flag(&self) -> Result<bool, StoreError> {
        Ok(self.get_typed(keys::ACTIVITY_TEST_FLAG)?.unwrap_or(false))
    }

    pub fn set_activity_test_flag(&self, raised: bool) -> Result<(), StoreError> {
        if raised {
            self.store.set(keys::ACTIVITY_TEST_FLAG, Value::Bool(true))
        } else {
            self.store.remove(keys::ACTIVITY_TEST_FLAG)
        }
    }

    pub fn last_ruleset_update(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get_typed(keys::LAST_RULESET_UPDATE)
    }

    pub fn set_last_ruleset_update(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.set_typed(keys::LAST_RULESET_UPDATE, &at)
    }
}
