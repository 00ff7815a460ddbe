//! Which of the default lists feed the ruleset.
//!
//! The default filter list ships in two variants: plain, and with the
//! acceptable-ads exception rules appended. At most one of them is active
//! at a time, chosen by the user's [`ListSelection`]. Every other
//! subscription is additional and always active.

use serde::{Deserialize, Serialize};

/// Part a subscription plays in the list selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListRole {
    /// A user-chosen list, merged whenever it has content.
    #[default]
    Additional,
    /// The default list without exception rules.
    Default,
    /// The default list with the acceptable-ads exception rules.
    DefaultWithExceptions,
}

impl ListRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Additional => "additional",
            Self::Default => "default",
            Self::DefaultWithExceptions => "default-with-exceptions",
        }
    }
}

/// User choice between the default list variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListSelection {
    /// Show acceptable ads. Wins over `default_list_enabled`.
    pub acceptable_ads: bool,
    pub default_list_enabled: bool,
}

impl Default for ListSelection {
    fn default() -> Self {
        Self {
            acceptable_ads: true,
            default_list_enabled: true,
        }
    }
}

impl ListSelection {
    /// The default-list variant in force, if any.
    pub fn active_default(&self) -> Option<ListRole> {
        if self.acceptable_ads {
            Some(ListRole::DefaultWithExceptions)
        } else if self.default_list_enabled {
            Some(ListRole::Default)
        } else {
            None
        }
    }

    pub fn is_active(&self, role: ListRole) -> bool {
        match role {
            ListRole::Additional => true,
            variant => self.active_default() == Some(variant),
        }
    }
}
