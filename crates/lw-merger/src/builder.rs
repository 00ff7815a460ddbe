use std::collections::BTreeMap;
use std::hash::Hasher;

use lw_core::hostname::{normalize_hostname, HostnameError};
use twox_hash::XxHash64;

use crate::optimizer::optimize_rules;
use crate::parser::{parse_rule_list, Action, ActionType, ParseError, Rule, Trigger};

/// Safari refuses content blockers with more rules than this.
pub const DEFAULT_MAX_RULES: usize = 50_000;

const DIGEST_SEED: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLimits {
    pub max_rules: usize,
    pub max_bytes: Option<usize>,
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self {
            max_rules: DEFAULT_MAX_RULES,
            max_bytes: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("Payload {index} is invalid: {source}")]
    InvalidPayload {
        index: usize,
        #[source]
        source: ParseError,
    },
    #[error("Invalid allow-list entry: {0}")]
    InvalidHost(#[from] HostnameError),
    #[error("Ruleset has {count} rules (max: {max})")]
    TooManyRules { count: usize, max: usize },
    #[error("Ruleset is {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
    #[error("Failed to serialize ruleset: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl MergeError {
    /// The ruleset would exceed a platform ceiling. Re-downloading does not
    /// help; the subscription set itself is too large.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::TooManyRules { .. } | Self::TooLarge { .. })
    }
}

/// A merged, platform-loadable ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub json: String,
    pub rule_count: usize,
    pub subscription_rules: usize,
    pub exception_rules: usize,
    pub deduped: usize,
    pub digest: u64,
}

/// xxHash64 of a text, used as a change token for payloads and rulesets.
pub fn content_digest(text: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(DIGEST_SEED);
    hasher.write(text.as_bytes());
    hasher.finish()
}

/// Exception rule exempting every load on `host` (and its subdomains) from
/// all rules before it.
pub fn exception_rule(host: &str) -> Rule {
    Rule {
        trigger: Trigger {
            url_filter: ".*".to_string(),
            url_filter_is_case_sensitive: None,
            if_domain: Some(vec![format!("*{}", host)]),
            unless_domain: None,
            resource_type: None,
            load_type: None,
            if_top_url: None,
            unless_top_url: None,
            extra: BTreeMap::new(),
        },
        action: Action {
            kind: ActionType::IgnorePreviousRules,
            selector: None,
            extra: BTreeMap::new(),
        },
    }
}

/// Merge subscription payloads (in order) with the allow-list.
///
/// Identical inputs always yield byte-identical output. Allow-list hosts
/// are normalized, sorted and emitted after every subscription rule, so an
/// allow-listed site bypasses rules from all lists. Exceeding `limits`
/// fails without producing a partial ruleset.
pub fn merge<P, H>(payloads: &[P], allow_list: &[H], limits: &MergeLimits) -> Result<Ruleset, MergeError>
where
    P: AsRef<str>,
    H: AsRef<str>,
{
    let mut rules = Vec::new();
    for (index, payload) in payloads.iter().enumerate() {
        let parsed = parse_rule_list(payload.as_ref())
            .map_err(|source| MergeError::InvalidPayload { index, source })?;
        rules.extend(parsed);
    }

    let stats = optimize_rules(&mut rules);
    let subscription_rules = rules.len();

    let mut hosts = Vec::with_capacity(allow_list.len());
    for entry in allow_list {
        hosts.push(normalize_hostname(entry.as_ref())?);
    }
    hosts.sort();
    hosts.dedup();

    let exception_rules = hosts.len();
    rules.extend(hosts.iter().map(|host| exception_rule(host)));

    let rule_count = rules.len();
    if rule_count > limits.max_rules {
        return Err(MergeError::TooManyRules {
            count: rule_count,
            max: limits.max_rules,
        });
    }

    let json = serde_json::to_string(&rules)?;
    if let Some(max) = limits.max_bytes {
        if json.len() > max {
            return Err(MergeError::TooLarge {
                size: json.len(),
                max,
            });
        }
    }

    log::debug!(
        "Merged {} payloads: {} rules ({} deduped), {} exceptions, {} bytes",
        payloads.len(),
        subscription_rules,
        stats.deduped,
        exception_rules,
        json.len()
    );

    let digest = content_digest(&json);
    Ok(Ruleset {
        json,
        rule_count,
        subscription_rules,
        exception_rules,
        deduped: stats.deduped,
        digest,
    })
}
