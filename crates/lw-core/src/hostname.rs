//! Hostname normalization for allow-list entries.
//!
//! Allow-list entries arrive as whatever the user typed or shared: bare
//! hosts, full URLs, mixed case, Unicode labels. Everything is reduced to
//! the lower-case ASCII (punycode) form the content blocker compares
//! against, so `Bücher.de`, `xn--bcher-kva.de` and
//! `https://BÜCHER.de/path` all denote the same entry.
//!
//! # Examples
//!
//! ```
//! use lw_core::hostname::normalize_hostname;
//!
//! assert_eq!(normalize_hostname("Example.COM").unwrap(), "example.com");
//! assert_eq!(normalize_hostname("https://bücher.de/x").unwrap(), "xn--bcher-kva.de");
//! ```

use url::{Host, Url};

/// Error type for hostname normalization.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostnameError {
    #[error("Empty hostname")]
    Empty,
    #[error("Invalid hostname '{input}': {reason}")]
    Invalid { input: String, reason: String },
}

/// Normalize a user-supplied host or URL to its canonical hostname.
///
/// Scheme, port, path, query and a trailing root dot are dropped; labels are
/// IDNA-mapped and case-folded.
pub fn normalize_hostname(input: &str) -> Result<String, HostnameError> {
    let trimmed = input.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Err(HostnameError::Empty);
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate).map_err(|e| HostnameError::Invalid {
        input: input.to_string(),
        reason: e.to_string(),
    })?;

    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.trim_end_matches('.').to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => {
            return Err(HostnameError::Invalid {
                input: input.to_string(),
                reason: "no host component".to_string(),
            })
        }
    };

    if host.is_empty() {
        return Err(HostnameError::Empty);
    }

    Ok(host)
}
