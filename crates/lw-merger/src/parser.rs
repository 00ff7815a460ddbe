use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for validating a subscription payload.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Rule list must be a JSON array")]
    NotAnArray,
    #[error("Rule {index}: {reason}")]
    InvalidRule { index: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub trigger: Trigger,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Trigger {
    pub url_filter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_filter_is_case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_domain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_type: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_top_url: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_top_url: Option<Vec<String>>,
    /// Keys this crate does not interpret, kept in sorted order.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Block,
    BlockCookies,
    CssDisplayNone,
    IgnorePreviousRules,
    MakeHttps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Rule {
    pub fn is_blocking(&self) -> bool {
        self.action.kind != ActionType::IgnorePreviousRules
    }
}

pub fn parse_rule_list(text: &str) -> Result<Vec<Rule>, ParseError> {
    let document: Value = serde_json::from_str(text)?;
    let Value::Array(items) = document else {
        return Err(ParseError::NotAnArray);
    };

    let mut rules = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let rule: Rule = serde_json::from_value(item).map_err(|e| ParseError::InvalidRule {
            index,
            reason: e.to_string(),
        })?;
        validate_rule(&rule).map_err(|reason| ParseError::InvalidRule { index, reason })?;
        rules.push(rule);
    }

    Ok(rules)
}

fn validate_rule(rule: &Rule) -> Result<(), String> {
    if rule.trigger.url_filter.is_empty() {
        return Err("empty url-filter".to_string());
    }

    if rule.trigger.if_domain.is_some() && rule.trigger.unless_domain.is_some() {
        return Err("if-domain and unless-domain are mutually exclusive".to_string());
    }

    if rule.trigger.if_top_url.is_some() && rule.trigger.unless_top_url.is_some() {
        return Err("if-top-url and unless-top-url are mutually exclusive".to_string());
    }

    for domains in [&rule.trigger.if_domain, &rule.trigger.unless_domain]
        .into_iter()
        .flatten()
    {
        if domains.is_empty() {
            return Err("empty domain list".to_string());
        }
        if domains.iter().any(|d| d.trim_start_matches('*').is_empty()) {
            return Err("empty domain entry".to_string());
        }
    }

    if rule.action.kind == ActionType::CssDisplayNone
        && rule.action.selector.as_deref().map_or(true, str::is_empty)
    {
        return Err("css-display-none requires a selector".to_string());
    }

    Ok(())
}
