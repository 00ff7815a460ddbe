//! User allow-list.
//!
//! An ordered set of normalized hostnames. Only explicit user action mutates
//! it; every ruleset build includes it regardless of which subscriptions
//! changed.

use crate::hostname::{normalize_hostname, HostnameError};

/// Ordered set of user-approved hostnames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    hosts: Vec<String>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw entries, normalizing each. Duplicates after
    /// normalization collapse into the first occurrence.
    pub fn from_hosts<I, S>(entries: I) -> Result<Self, HostnameError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for entry in entries {
            list.add(entry.as_ref())?;
        }
        Ok(list)
    }

    /// Add a host. Returns false if it was already present.
    pub fn add(&mut self, input: &str) -> Result<bool, HostnameError> {
        let host = normalize_hostname(input)?;
        if self.hosts.contains(&host) {
            return Ok(false);
        }
        self.hosts.push(host);
        Ok(true)
    }

    /// Remove a host. Returns false if it was not present.
    pub fn remove(&mut self, input: &str) -> bool {
        let host = match normalize_hostname(input) {
            Ok(host) => host,
            Err(_) => return false,
        };
        let before = self.hosts.len();
        self.hosts.retain(|h| *h != host);
        self.hosts.len() != before
    }

    pub fn contains(&self, input: &str) -> bool {
        normalize_hostname(input)
            .map(|host| self.hosts.contains(&host))
            .unwrap_or(false)
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
