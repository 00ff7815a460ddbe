//! HTTP transport for subscription downloads.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ETAG, LAST_MODIFIED};
use reqwest::Client;

use lw_core::{FetchResponse, Transport, TransportError};

/// Maximum rule list size (10 MB)
const MAX_LIST_SIZE: usize = 10 * 1024 * 1024;

pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("listwarden/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, timeout })
    }

    fn request_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::TimedOut(self.timeout)
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        log::debug!("Fetching {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            check_size(length as usize)?;
        }

        let version = version_token(response.headers());
        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        check_size(bytes.len())?;

        let body = decode_body(bytes.to_vec())?;
        Ok(FetchResponse { body, version })
    }
}

fn check_size(size: usize) -> Result<(), TransportError> {
    if size > MAX_LIST_SIZE {
        return Err(TransportError::TooLarge {
            size,
            max: MAX_LIST_SIZE,
        });
    }
    Ok(())
}

/// Rule lists are JSON text; invalid UTF-8 fails the download.
fn decode_body(bytes: Vec<u8>) -> Result<String, TransportError> {
    String::from_utf8(bytes).map_err(|e| TransportError::InvalidEncoding(e.utf8_error().to_string()))
}

/// The server's ETag, else its Last-Modified date. Without either the
/// coordinator versions the payload by content digest.
fn version_token(headers: &HeaderMap) -> Option<String> {
    [ETAG, LAST_MODIFIED]
        .iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
