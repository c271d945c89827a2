//! Restriction rule types.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use crate::geoip::CountryCode;

/// What a rule (or the default policy) does with a matching request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Let the request through
    #[default]
    Allow,
    /// Block the request
    Deny,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Allow => f.write_str("allow"),
            RuleAction::Deny => f.write_str("deny"),
        }
    }
}

/// A rule as written in the rules file, before validation.
///
/// ```json
/// { "id": "block-ru", "priority": 10, "countries": ["RU"], "action": "deny" }
/// { "id": "office", "priority": 0, "networks": ["203.0.113.0/24"], "action": "allow" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Identifier used in logs and verdicts
    pub id: String,
    /// Lower values are evaluated first
    #[serde(default)]
    pub priority: u32,
    /// Single address shorthand, merged into `networks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// CIDR ranges (bare addresses are accepted as host routes)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// ISO country codes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,
    /// Action taken on match
    pub action: RuleAction,
}

/// A validated rule.
///
/// Matches when every declared criterion matches: the address is inside one
/// of `networks` (if any are declared) and the resolved country is in
/// `countries` (if any are declared).
#[derive(Debug, Clone, PartialEq)]
pub struct IpRangeRule {
    /// Identifier from the rules file
    pub id: String,
    /// Evaluation order (ascending)
    pub priority: u32,
    /// Address criterion
    pub networks: Vec<IpNet>,
    /// Country criterion
    pub countries: BTreeSet<CountryCode>,
    /// Action on match
    pub action: RuleAction,
}

impl IpRangeRule {
    /// Whether this rule matches the request.
    ///
    /// A rule with a country criterion never matches a request whose
    /// country is unknown.
    pub fn matches(&self, ip: IpAddr, country: Option<&CountryCode>) -> bool {
        if !self.networks.is_empty() && !self.networks.iter().any(|net| net.contains(&ip)) {
            return false;
        }
        if !self.countries.is_empty() {
            match country {
                Some(code) if self.countries.contains(code) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Result of evaluating the rule store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleVerdict {
    /// Decided action
    pub action: RuleAction,
    /// Id of the rule that decided, `None` when the default policy applied
    pub matched_rule: Option<String>,
}
