use lw_core::hostname::HostnameError;
use lw_core::{HostError, StoreError};
use lw_merger::MergeError;

/// Error type for coordinator and probe operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("No tokio runtime is running")]
    NoRuntime,
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid host: {0}")]
    Host(#[from] HostnameError),
    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("Reload failed: {0}")]
    Reload(#[from] HostError),
    #[error("Already subscribed to '{0}'")]
    AlreadySubscribed(String),
    #[error("Unknown subscription '{0}'")]
    UnknownSubscription(String),
    #[error("Invalid subscription name '{0}'")]
    InvalidName(String),
}
