//! Filter list subscriptions.
//!
//! A [`Subscription`] is an inert record: it knows its identity, its
//! download bookkeeping and how to map itself to and from the persisted
//! [`SubscriptionRecord`]. Scheduling, networking and merging live in the
//! coordinator, which is the only writer of the mutable fields.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::selection::ListRole;
use crate::types::{GroupId, TaskId};

/// Error type for loading a persisted subscription record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Subscription '{0}' is marked updating without a task identifier")]
    UpdatingWithoutTask(String),
}

// =============================================================================
// Failure Kinds
// =============================================================================

/// Class of failure a single download attempt ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network error, HTTP error status or timeout. Retryable.
    Transport,
    /// The payload downloaded but is not a valid rule list. Retryable.
    Validation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Validation => "validation",
        }
    }
}

/// What a finished download attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// A valid payload with the given version token was stored.
    Fetched { version: String },
    /// The attempt failed; stale content stays in force.
    Failed(FailureKind),
}

// =============================================================================
// Subscription
// =============================================================================

/// One remotely hosted filter list.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Identity key within the coordinator's collection.
    pub name: String,
    url: String,
    file_name: String,
    pub role: ListRole,
    /// Opaque ordering token supplied by the remote source.
    pub version: Option<String>,
    /// Whether the in-flight (or last) download was requested by the user.
    pub user_triggered: bool,
    /// Payload present locally at least once.
    pub downloaded: bool,
    /// A download is currently in flight.
    pub updating: bool,
    pub last_update_failed: bool,
    pub task_identifier: Option<TaskId>,
    pub updating_group_identifier: Option<GroupId>,
    /// Last successful completion.
    pub last_update: Option<DateTime<Utc>>,
    /// Time after `last_update` at which the list becomes stale.
    pub expires: Duration,
    /// Completed attempts, successful or not.
    pub download_count: u64,
    pub last_failure: Option<FailureKind>,
}

impl Subscription {
    /// Create a never-downloaded subscription.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        file_name: impl Into<String>,
        expires: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            file_name: file_name.into(),
            role: ListRole::Additional,
            version: None,
            user_triggered: false,
            downloaded: false,
            updating: false,
            last_update_failed: false,
            task_identifier: None,
            updating_group_identifier: None,
            last_update: None,
            expires,
            download_count: 0,
            last_failure: None,
        }
    }

    pub fn with_role(mut self, role: ListRole) -> Self {
        self.role = role;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Restore a subscription from its persisted form.
    pub fn load(record: SubscriptionRecord) -> Result<Self, RecordError> {
        if record.name.is_empty() {
            return Err(RecordError::MissingField("name"));
        }
        if record.url.is_empty() {
            return Err(RecordError::MissingField("url"));
        }
        if record.file_name.is_empty() {
            return Err(RecordError::MissingField("fileName"));
        }
        if record.updating && record.task_identifier.is_none() {
            return Err(RecordError::UpdatingWithoutTask(record.name));
        }

        Ok(Self {
            name: record.name,
            url: record.url,
            file_name: record.file_name,
            role: record.role,
            version: record.version,
            user_triggered: record.user_triggered,
            downloaded: record.downloaded,
            updating: record.updating,
            last_update_failed: record.last_update_failed,
            task_identifier: record.task_identifier,
            updating_group_identifier: record.updating_group_identifier,
            last_update: record.last_update,
            expires: record.expires,
            download_count: record.download_count,
            last_failure: record.last_failure,
        })
    }

    /// Produce the persisted form. `load(store())` yields an equal value.
    pub fn store(&self) -> SubscriptionRecord {
        SubscriptionRecord {
            name: self.name.clone(),
            url: self.url.clone(),
            file_name: self.file_name.clone(),
            role: self.role,
            version: self.version.clone(),
            user_triggered: self.user_triggered,
            downloaded: self.downloaded,
            updating: self.updating,
            last_update_failed: self.last_update_failed,
            task_identifier: self.task_identifier,
            updating_group_identifier: self.updating_group_identifier,
            last_update: self.last_update,
            expires: self.expires,
            download_count: self.download_count,
            last_failure: self.last_failure,
        }
    }

    /// True when `last_update + expires` has passed. A list that was never
    /// downloaded is always expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(last_update) = self.last_update else {
            return true;
        };
        match chrono::Duration::from_std(self.expires) {
            Ok(expires) => last_update + expires <= now,
            // Beyond chrono's range: effectively never expires.
            Err(_) => false,
        }
    }

    /// Mark a download as started for the given generation.
    pub fn begin_download(&mut self, task: TaskId, group: GroupId, user_triggered: bool) {
        self.updating = true;
        self.task_identifier = Some(task);
        self.updating_group_identifier = Some(group);
        self.user_triggered = user_triggered;
        self.last_update_failed = false;
    }

    /// Move an in-flight download into a newer generation.
    pub fn join_generation(&mut self, group: GroupId, user_triggered: bool) {
        debug_assert!(self.updating);
        self.updating_group_identifier = Some(group);
        self.user_triggered |= user_triggered;
    }

    /// Record the end of a download attempt.
    ///
    /// Returns true if the content changed: a first download, or a version
    /// different from the one held before.
    pub fn finish_download(&mut self, result: &AttemptResult, now: DateTime<Utc>) -> bool {
        self.updating = false;
        self.task_identifier = None;
        self.download_count += 1;

        match result {
            AttemptResult::Fetched { version } => {
                let changed = !self.downloaded || self.version.as_deref() != Some(version.as_str());
                self.version = Some(version.clone());
                self.downloaded = true;
                self.last_update = Some(now);
                self.last_update_failed = false;
                self.last_failure = None;
                changed
            }
            AttemptResult::Failed(kind) => {
                self.last_update_failed = true;
                self.last_failure = Some(*kind);
                false
            }
        }
    }

    /// Forget any in-flight download. Used at startup, when transport
    /// operations from a previous process can no longer complete.
    pub fn clear_in_flight(&mut self) {
        self.updating = false;
        self.task_identifier = None;
        self.updating_group_identifier = None;
    }
}

// =============================================================================
// Persisted Record
// =============================================================================

/// Durable key-value form of a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub name: String,
    pub url: String,
    pub file_name: String,
    #[serde(default)]
    pub role: ListRole,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub user_triggered: bool,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub updating: bool,
    #[serde(default)]
    pub last_update_failed: bool,
    #[serde(default)]
    pub task_identifier: Option<TaskId>,
    #[serde(default)]
    pub updating_group_identifier: Option<GroupId>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    pub expires: Duration,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub last_failure: Option<FailureKind>,
}
