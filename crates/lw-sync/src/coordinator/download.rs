use std::time::Duration;

use lw_core::{AttemptResult, FailureKind, Transport, TransportError};
use lw_merger::{content_digest, parse_rule_list};

/// Result of one download task, before it is applied to the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DownloadOutcome {
    Fetched { version: String, body: String },
    Failed { kind: FailureKind, detail: String },
}

impl DownloadOutcome {
    pub fn fetched(version: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Fetched {
            version: version.into(),
            body: body.into(),
        }
    }

    pub fn attempt(&self) -> AttemptResult {
        match self {
            Self::Fetched { version, .. } => AttemptResult::Fetched {
                version: version.clone(),
            },
            Self::Failed { kind, .. } => AttemptResult::Failed(*kind),
        }
    }
}

/// Version token of a payload: the transport's, else a content digest.
pub(crate) fn payload_version(token: Option<String>, body: &str) -> String {
    token.unwrap_or_else(|| format!("{:016x}", content_digest(body)))
}

/// Fetch and validate one subscription payload. Never takes longer than
/// `timeout`.
pub(crate) async fn fetch_payload(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
) -> DownloadOutcome {
    let response = match tokio::time::timeout(timeout, transport.fetch(url)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return transport_failure(url, e),
        Err(_) => return transport_failure(url, TransportError::TimedOut(timeout)),
    };

    if let Err(e) = parse_rule_list(&response.body) {
        log::warn!("Discarding invalid rule list from {}: {}", url, e);
        return DownloadOutcome::Failed {
            kind: FailureKind::Validation,
            detail: e.to_string(),
        };
    }

    let version = payload_version(response.version, &response.body);
    log::debug!("Fetched {} ({} bytes, version {})", url, response.body.len(), version);
    DownloadOutcome::Fetched {
        version,
        body: response.body,
    }
}

fn transport_failure(url: &str, error: TransportError) -> DownloadOutcome {
    log::info!("Download of {} failed: {}", url, error);
    DownloadOutcome::Failed {
        kind: FailureKind::Transport,
        detail: error.to_string(),
    }
}
