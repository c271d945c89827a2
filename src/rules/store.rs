//! Compiled rule set and first-match evaluation.

use ipnet::IpNet;
use std::collections::BTreeSet;
use std::net::IpAddr;

use super::types::{IpRangeRule, RuleAction, RuleConfig, RuleVerdict};
use crate::error_handling::AccessError;
use crate::geoip::CountryCode;

/// Ordered, validated restriction rules plus the default policy.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Vec<IpRangeRule>,
    default_policy: RuleAction,
}

impl RuleStore {
    /// Creates an empty store that always answers `default_policy`.
    pub fn new(default_policy: RuleAction) -> Self {
        RuleStore {
            rules: Vec::new(),
            default_policy,
        }
    }

    /// Validates and orders rule definitions.
    ///
    /// Malformed rules are skipped and logged; each one is reported in the
    /// returned error list. The store is usable either way.
    ///
    /// Rules are sorted by ascending `priority`. The sort is stable, so rules
    /// sharing a priority keep their declaration order.
    pub fn compile(
        configs: Vec<RuleConfig>,
        default_policy: RuleAction,
    ) -> (Self, Vec<AccessError>) {
        let mut rules = Vec::with_capacity(configs.len());
        let mut errors = Vec::new();

        for config in configs {
            match compile_rule(config) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    log::warn!("Skipping restriction rule: {}", e);
                    errors.push(e);
                }
            }
        }

        rules.sort_by_key(|rule| rule.priority);
        log::debug!(
            "Compiled {} restriction rules ({} skipped, default policy: {})",
            rules.len(),
            errors.len(),
            default_policy
        );

        (
            RuleStore {
                rules,
                default_policy,
            },
            errors,
        )
    }

    /// Evaluates the rules in order; the first match decides.
    ///
    /// `country` is `None` when the address could not be resolved. Rules that
    /// require a country then do not match.
    pub fn evaluate(&self, ip: IpAddr, country: Option<&CountryCode>) -> RuleVerdict {
        let ip = ip.to_canonical();
        match self.rules.iter().find(|rule| rule.matches(ip, country)) {
            Some(rule) => RuleVerdict {
                action: rule.action,
                matched_rule: Some(rule.id.clone()),
            },
            None => RuleVerdict {
                action: self.default_policy,
                matched_rule: None,
            },
        }
    }

    /// Number of active rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are active.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Action applied when no rule matches.
    pub fn default_policy(&self) -> RuleAction {
        self.default_policy
    }

    /// Active rules in evaluation order.
    pub fn rules(&self) -> &[IpRangeRule] {
        &self.rules
    }
}

fn compile_rule(config: RuleConfig) -> Result<IpRangeRule, AccessError> {
    let id = config.id.trim().to_string();
    let invalid = |reason: String| AccessError::InvalidRuleConfig {
        rule_id: if id.is_empty() { "<unnamed>".to_string() } else { id.clone() },
        reason,
    };

    if id.is_empty() {
        return Err(invalid("rule id is empty".to_string()));
    }

    let mut networks = Vec::new();
    for raw in config.ip.iter().chain(config.networks.iter()) {
        networks.push(parse_network(raw).map_err(&invalid)?);
    }

    let mut countries = BTreeSet::new();
    for raw in &config.countries {
        countries.insert(CountryCode::parse(raw).map_err(&invalid)?);
    }

    if networks.is_empty() && countries.is_empty() {
        return Err(invalid(
            "rule declares no criteria (needs ip, networks or countries)".to_string(),
        ));
    }

    Ok(IpRangeRule {
        id,
        priority: config.priority,
        networks,
        countries,
        action: config.action,
    })
}

/// Parses a CIDR or a bare address (stored as a host route).
fn parse_network(raw: &str) -> Result<IpNet, String> {
    let trimmed = raw.trim();
    if let Ok(net) = trimmed.parse::<IpNet>() {
        // Normalise 10.1.2.3/8 to 10.0.0.0/8
        return Ok(net.trunc());
    }
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => {
            let ip = ip.to_canonical();
            let prefix = if ip.is_ipv4() { 32 } else { 128 };
            IpNet::new(ip, prefix).map_err(|e| format!("invalid address '{}': {}", raw, e))
        }
        Err(_) => Err(format!("unparsable CIDR or IP '{}'", raw)),
    }
}
