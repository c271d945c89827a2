//! Rules file loading.
//!
//! Accepts either `{ "default_policy": "deny", "rules": [...] }` or a bare
//! JSON array of rules. Entries are decoded one at a time so a single
//! malformed rule is skipped instead of failing the whole file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::error_handling::AccessError;
use crate::rules::{RuleAction, RuleConfig};

/// Parsed contents of a rules file.
#[derive(Debug, Default)]
pub struct RulesFile {
    /// Overrides the configured default policy when present
    pub default_policy: Option<RuleAction>,
    /// Raw rule definitions (compiled later by the rule store)
    pub rules: Vec<RuleConfig>,
    /// Entries that did not match the rule schema and were skipped
    pub invalid: Vec<AccessError>,
}

/// Loads and parses a rules file.
///
/// Only the file structure is fatal: unreadable files, invalid JSON and a
/// top level that is neither an array nor an object. Each rule entry is
/// decoded on its own, and entries with the wrong shape (unknown `action`,
/// missing `id`) land in [`RulesFile::invalid`]. Semantic problems such as a
/// bad CIDR are caught later by the rule store.
pub async fn load_rules_file(path: &Path) -> Result<RulesFile> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read rules file {}", path.display()))?;
    parse_rules(&content)
        .with_context(|| format!("Failed to parse rules file {}", path.display()))
}

fn parse_rules(content: &str) -> Result<RulesFile> {
    let (default_policy, entries) = match serde_json::from_str::<Value>(content)? {
        Value::Array(entries) => (None, entries),
        Value::Object(mut document) => {
            let default_policy = match document.remove("default_policy") {
                None | Some(Value::Null) => None,
                Some(value) => Some(
                    serde_json::from_value::<RuleAction>(value)
                        .context("Invalid default_policy")?,
                ),
            };
            let entries = match document.remove("rules") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(entries)) => entries,
                Some(_) => bail!("\"rules\" must be an array"),
            };
            (default_policy, entries)
        }
        _ => bail!("expected an array of rules or an object with a \"rules\" array"),
    };

    let mut rules = Vec::with_capacity(entries.len());
    let mut invalid = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let rule_id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("<rule #{}>", index + 1));
        match serde_json::from_value::<RuleConfig>(entry) {
            Ok(rule) => rules.push(rule),
            Err(e) => {
                let err = AccessError::InvalidRuleConfig {
                    rule_id,
                    reason: e.to_string(),
                };
                log::warn!("Skipping rule: {}", err);
                invalid.push(err);
            }
        }
    }

    Ok(RulesFile {
        default_policy,
        rules,
        invalid,
    })
}
