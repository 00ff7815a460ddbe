//! Listwarden Ruleset Merger
//!
//! This crate merges downloaded content-blocker rule lists and the user
//! allow-list into the single ruleset document the content-blocker host
//! loads. The merge is a pure function of its inputs.

pub mod builder;
pub mod optimizer;
pub mod parser;

pub use builder::{content_digest, exception_rule, merge, MergeError, MergeLimits, Ruleset};
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_rule_list, Action, ActionType, ParseError, Rule, Trigger};
