//! Fetch capability for subscription payloads.

use std::time::Duration;

use async_trait::async_trait;

/// A downloaded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: String,
    /// Version token supplied by the remote source, if any.
    pub version: Option<String>,
}

impl FetchResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Error type for fetching a payload. Every variant is a transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("Response too large: {size} bytes (max: {max} bytes)")]
    TooLarge { size: usize, max: usize },
    #[error("No response within {0:?}")]
    TimedOut(Duration),
    #[error("Response is not valid UTF-8: {0}")]
    InvalidEncoding(String),
}

/// Transport capability. Implementations own their own retry and timeout
/// policy; callers still bound the wait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError>;
}
