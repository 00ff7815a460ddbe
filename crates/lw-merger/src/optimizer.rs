use std::collections::HashSet;

use crate::parser::Rule;

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Drop exact duplicate rules, keeping the first occurrence so the relative
/// order of the survivors is unchanged.
pub fn optimize_rules(rules: &mut Vec<Rule>) -> OptimizeStats {
    let before = rules.len();

    let mut seen: HashSet<String> = HashSet::with_capacity(rules.len());
    let mut deduped = 0usize;
    rules.retain(|rule| {
        let key = rule_key(rule);
        if seen.contains(&key) {
            deduped += 1;
            false
        } else {
            seen.insert(key);
            true
        }
    });

    OptimizeStats {
        before,
        after: rules.len(),
        deduped,
    }
}

// Serialized form is canonical: fixed field order, sorted extra keys.
fn rule_key(rule: &Rule) -> String {
    serde_json::to_string(rule).unwrap_or_else(|_| format!("{:?}", rule))
}
