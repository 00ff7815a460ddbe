//! Configuration file handling.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lw_core::ListRole;
use lw_merger::builder::DEFAULT_MAX_RULES;
use lw_merger::MergeLimits;
use lw_sync::config::DEFAULT_CONTENT_BLOCKER_IDENTIFIER;
use lw_sync::{DefaultSubscription, ProbeConfig, UpdaterConfig};

/// Name of the settings file inside the data directory.
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Directory holding downloaded lists and the merged ruleset.
const LISTS_DIR_NAME: &str = "lists";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared container: settings store and list cache live here.
    pub data_dir: PathBuf,
    pub content_blocker_identifier: String,
    pub download_timeout_secs: u64,
    pub reload_retry_count: u32,
    pub max_rules: usize,
    pub max_bytes: Option<usize>,
    pub probe: ProbeSection,
    /// Seeded on first start only.
    pub subscriptions: Vec<SubscriptionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub freshness_mins: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub name: String,
    pub url: String,
    #[serde(default = "default_expires_hours")]
    pub expires_hours: u64,
    /// Marks one of the two default-list variants.
    #[serde(default)]
    pub role: ListRole,
}

fn default_expires_hours() -> u64 {
    24
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            content_blocker_identifier: DEFAULT_CONTENT_BLOCKER_IDENTIFIER.to_string(),
            download_timeout_secs: 60,
            reload_retry_count: 3,
            max_rules: DEFAULT_MAX_RULES,
            max_bytes: None,
            probe: ProbeSection::default(),
            subscriptions: Vec::new(),
        }
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            freshness_mins: 60,
            timeout_secs: 15,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".local")
                .join("share")
        })
        .join("listwarden")
}

/// Default location of the configuration file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        })
        .join("listwarden")
        .join("config.toml")
}

impl Config {
    /// Load the configuration. An explicit path must exist; a missing file
    /// at the default location yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, String> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = config_path();
                if !path.exists() {
                    log::debug!("No config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("Invalid config '{}': {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE_NAME)
    }

    pub fn lists_dir(&self) -> PathBuf {
        self.data_dir.join(LISTS_DIR_NAME)
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            content_blocker_identifier: self.content_blocker_identifier.clone(),
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            reload_retry_count: self.reload_retry_count,
            merge_limits: self.merge_limits(),
            default_subscriptions: self
                .subscriptions
                .iter()
                .map(|entry| DefaultSubscription {
                    name: entry.name.clone(),
                    url: entry.url.clone(),
                    expires: hours(entry.expires_hours),
                    role: entry.role,
                })
                .collect(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            content_blocker_identifier: self.content_blocker_identifier.clone(),
            freshness: Duration::from_secs(self.probe.freshness_mins * 60),
            timeout: Duration::from_secs(self.probe.timeout_secs),
        }
    }

    pub fn merge_limits(&self) -> MergeLimits {
        MergeLimits {
            max_rules: self.max_rules,
            max_bytes: self.max_bytes,
        }
    }
}

pub fn hours(count: u64) -> Duration {
    Duration::from_secs(count * 60 * 60)
}
