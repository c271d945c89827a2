//! Access decision engine.
//!
//! Combines the GeoIP/rule decision with the lockout decision for one
//! request. Deny wins over Challenge, which wins over Allow.

use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{load_rules_file, Config};
use crate::error_handling::{AccessError, DecisionEvent, DecisionStats};
use crate::geoip::{CountryCode, GeoIpResolver};
use crate::lockout::{account_key, ip_key, LockoutState, LockoutTracker};
use crate::rules::{RuleAction, RuleConfig, RuleStore};

/// Audit log target for decisions and authentication outcomes.
pub(crate) const AUDIT_TARGET: &str = "access_guard::audit";

/// Final decision for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessDecision {
    /// Let the request through
    Allow,
    /// Let it through only after an additional check (captcha, 2FA, ...)
    Challenge,
    /// Reject the request
    Deny,
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDecision::Allow => f.write_str("allow"),
            AccessDecision::Challenge => f.write_str("challenge"),
            AccessDecision::Deny => f.write_str("deny"),
        }
    }
}

/// Decision plus what led to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessVerdict {
    /// Combined decision
    pub decision: AccessDecision,
    /// Resolved country, when GeoIP was consulted and knew the address
    pub country: Option<CountryCode>,
    /// Rule that decided the restriction part, if any
    pub matched_rule: Option<String>,
    /// Most severe lockout state among the checked keys
    pub lockout: LockoutState,
    /// Human readable reasons for a non-Allow decision
    pub reasons: Vec<String>,
}

/// Evaluates requests and records authentication outcomes.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct AccessEngine {
    config: Config,
    resolver: Arc<GeoIpResolver>,
    rules: RwLock<Arc<RuleStore>>,
    tracker: Arc<LockoutTracker>,
    stats: Arc<DecisionStats>,
}

impl AccessEngine {
    /// Creates an engine over the given components.
    pub fn new(
        config: Config,
        resolver: Arc<GeoIpResolver>,
        rules: RuleStore,
        tracker: Arc<LockoutTracker>,
    ) -> Self {
        AccessEngine {
            config,
            resolver,
            rules: RwLock::new(Arc::new(rules)),
            tracker,
            stats: Arc::new(DecisionStats::new()),
        }
    }

    /// Decides whether a request from `ip` (optionally for `account`) may
    /// proceed.
    ///
    /// Never fails: an unavailable GeoIP database degrades to fail-open or
    /// fail-closed per configuration.
    pub async fn evaluate_request(&self, ip: IpAddr, account: Option<&str>) -> AccessVerdict {
        let mut decision = AccessDecision::Allow;
        let mut reasons = Vec::new();
        let mut country = None;
        let mut matched_rule = None;

        if self.config.restriction_enabled {
            let mut geoip_denied = false;
            match self.resolver.resolve(ip) {
                Ok(resolution) => country = resolution.country().cloned(),
                Err(e) => {
                    self.stats.increment(DecisionEvent::GeoIpUnavailable);
                    if self.config.geoip_fail_open {
                        log::warn!("{} for {}; failing open", e, ip);
                    } else {
                        log::warn!("{} for {}; failing closed", e, ip);
                        decision = AccessDecision::Deny;
                        geoip_denied = true;
                        reasons.push(format!("{} (fail closed)", e));
                    }
                }
            }

            if !geoip_denied {
                let verdict = self.rules().evaluate(ip, country.as_ref());
                if verdict.action == RuleAction::Deny {
                    self.stats.increment(DecisionEvent::RuleDenied);
                    decision = AccessDecision::Deny;
                    reasons.push(match &verdict.matched_rule {
                        Some(id) => format!("denied by rule '{}'", id),
                        None => "denied by default policy".to_string(),
                    });
                }
                matched_rule = verdict.matched_rule;
            }
        }

        let mut lockout = LockoutState::Clear;
        if self.config.lockout_enabled {
            for key in lockout_keys(ip, account) {
                let state = self.tracker.check_state(&key).await;
                match state {
                    LockoutState::Locked { locked_until, .. } => {
                        self.stats.increment(DecisionEvent::LockoutRejected);
                        decision = decision.max(AccessDecision::Deny);
                        reasons.push(format!("'{}' locked until {}", key, locked_until));
                    }
                    LockoutState::Warning { failures, .. } => {
                        decision = decision.max(AccessDecision::Challenge);
                        reasons.push(format!("'{}' has {} recent failures", key, failures));
                    }
                    LockoutState::Clear => {}
                }
                if state.severity() > lockout.severity() {
                    lockout = state;
                }
            }
        }

        self.stats.increment(match decision {
            AccessDecision::Allow => DecisionEvent::Allowed,
            AccessDecision::Challenge => DecisionEvent::Challenged,
            AccessDecision::Deny => DecisionEvent::Denied,
        });

        let country_str = country.as_ref().map_or("-", |c| c.as_str());
        if decision == AccessDecision::Allow {
            log::debug!(
                target: AUDIT_TARGET,
                "decision={} ip={} account={} country={}",
                decision,
                ip,
                account.unwrap_or("-"),
                country_str
            );
        } else {
            log::info!(
                target: AUDIT_TARGET,
                "decision={} ip={} account={} country={} reasons=[{}]",
                decision,
                ip,
                account.unwrap_or("-"),
                country_str,
                reasons.join("; ")
            );
        }

        AccessVerdict {
            decision,
            country,
            matched_rule,
            lockout,
            reasons,
        }
    }

    /// Records the outcome of an authentication attempt.
    ///
    /// Success clears the address and account keys. Failure is counted
    /// against both and the most severe resulting state is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::LockoutExceeded`] when a key is already locked;
    /// the attempt is rejected and not counted.
    pub async fn record_authentication(
        &self,
        ip: IpAddr,
        account: Option<&str>,
        success: bool,
    ) -> Result<LockoutState, AccessError> {
        if !self.config.lockout_enabled {
            return Ok(LockoutState::Clear);
        }
        let keys = lockout_keys(ip, account);

        if success {
            self.stats.increment(DecisionEvent::AuthSuccess);
            for key in &keys {
                self.tracker.record_success(key).await;
            }
            return Ok(LockoutState::Clear);
        }

        for key in &keys {
            if let LockoutState::Locked { locked_until, .. } = self.tracker.check_state(key).await {
                self.stats.increment(DecisionEvent::LockoutRejected);
                let err = AccessError::LockoutExceeded {
                    key: key.clone(),
                    locked_until,
                };
                log::warn!(
                    target: AUDIT_TARGET,
                    "kind={} ip={} account={}: {}",
                    err.kind(),
                    ip,
                    account.unwrap_or("-"),
                    err
                );
                return Err(err);
            }
        }

        self.stats.increment(DecisionEvent::AuthFailure);
        let mut worst = LockoutState::Clear;
        for key in &keys {
            let state = self.tracker.record_failure(key).await;
            if state.severity() > worst.severity() {
                worst = state;
            }
        }
        log::info!(
            target: AUDIT_TARGET,
            "kind=auth_failure ip={} account={} state={:?}",
            ip,
            account.unwrap_or("-"),
            worst
        );
        Ok(worst)
    }

    /// Replaces the rule set. Returns the rules that were skipped.
    ///
    /// `default_policy` falls back to the configured one when `None`.
    pub fn reload_rules(
        &self,
        configs: Vec<RuleConfig>,
        default_policy: Option<RuleAction>,
    ) -> Vec<AccessError> {
        let policy = default_policy.unwrap_or(self.config.default_policy);
        let (store, errors) = RuleStore::compile(configs, policy);
        for _ in &errors {
            self.stats.increment(DecisionEvent::InvalidRuleSkipped);
        }
        log::info!(
            "Loaded {} restriction rules (default policy: {})",
            store.len(),
            policy
        );
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(store);
        errors
    }

    /// Re-reads the configured rules file.
    ///
    /// Returns `Ok(None)` when no rules file is configured. A file that
    /// cannot be read or parsed leaves the current rules in place; entries
    /// with the wrong shape are skipped and returned with the other errors.
    pub async fn reload_rules_file(&self) -> anyhow::Result<Option<Vec<AccessError>>> {
        let Some(path) = self.config.rules_file.as_deref() else {
            return Ok(None);
        };
        let file = load_rules_file(path).await?;
        for _ in &file.invalid {
            self.stats.increment(DecisionEvent::InvalidRuleSkipped);
        }
        let mut skipped = file.invalid;
        skipped.extend(self.reload_rules(file.rules, file.default_policy));
        Ok(Some(skipped))
    }

    /// The active rule set.
    pub fn rules(&self) -> Arc<RuleStore> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// The GeoIP resolver.
    pub fn resolver(&self) -> &Arc<GeoIpResolver> {
        &self.resolver
    }

    /// The lockout tracker.
    pub fn tracker(&self) -> &Arc<LockoutTracker> {
        &self.tracker
    }

    /// Decision counters.
    pub fn stats(&self) -> &Arc<DecisionStats> {
        &self.stats
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn lockout_keys(ip: IpAddr, account: Option<&str>) -> Vec<String> {
    let mut keys = vec![ip_key(ip)];
    if let Some(account) = account.filter(|a| !a.trim().is_empty()) {
        keys.push(account_key(account));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::LoadedSnapshot;
    use crate::lockout::LockoutConfig;
    use std::time::Duration;

    fn resolver(table: &str) -> Arc<GeoIpResolver> {
        let snapshot =
            LoadedSnapshot::from_bytes(table.as_bytes().to_vec(), "test", None).expect("table");
        Arc::new(GeoIpResolver::with_snapshot(snapshot))
    }

    fn deny_country(code: &str) -> RuleConfig {
        RuleConfig {
            id: format!("deny-{}", code.to_lowercase()),
            priority: 10,
            ip: None,
            networks: Vec::new(),
            countries: vec![code.to_string()],
            action: RuleAction::Deny,
        }
    }

    fn engine_with(
        config: Config,
        resolver: Arc<GeoIpResolver>,
        rules: Vec<RuleConfig>,
    ) -> AccessEngine {
        let (store, errors) = RuleStore::compile(rules, config.default_policy);
        assert!(errors.is_empty());
        let tracker = Arc::new(LockoutTracker::new(config.lockout));
        AccessEngine::new(config, resolver, store, tracker)
    }

    fn lockout_config(threshold: u32) -> Config {
        Config {
            lockout: LockoutConfig {
                threshold,
                window: Duration::from_secs(900),
                duration: Duration::from_secs(900),
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_country_rule_denies() {
        let engine = engine_with(
            Config::default(),
            resolver("198.51.100.0/24,RU\n203.0.113.0/24,CA\n"),
            vec![deny_country("RU")],
        );

        let verdict = engine
            .evaluate_request("198.51.100.10".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Deny);
        assert_eq!(verdict.country.as_ref().map(|c| c.as_str()), Some("RU"));
        assert_eq!(verdict.matched_rule.as_deref(), Some("deny-ru"));

        let verdict = engine
            .evaluate_request("203.0.113.10".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Allow);
        assert!(verdict.reasons.is_empty());
        assert_eq!(engine.stats().get(DecisionEvent::Denied), 1);
        assert_eq!(engine.stats().get(DecisionEvent::Allowed), 1);
    }

    #[tokio::test]
    async fn test_geoip_unavailable_fails_open_by_default() {
        let engine = engine_with(
            Config::default(),
            Arc::new(GeoIpResolver::new()),
            vec![deny_country("RU")],
        );
        let verdict = engine
            .evaluate_request("198.51.100.10".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Allow);
        assert!(verdict.country.is_none());
        assert_eq!(engine.stats().get(DecisionEvent::GeoIpUnavailable), 1);
    }

    #[tokio::test]
    async fn test_geoip_unavailable_fail_closed() {
        let config = Config {
            geoip_fail_open: false,
            ..Config::default()
        };
        let engine = engine_with(config, Arc::new(GeoIpResolver::new()), Vec::new());
        let verdict = engine
            .evaluate_request("198.51.100.10".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Deny);
        assert!(verdict.reasons[0].contains("fail closed"));
    }

    #[tokio::test]
    async fn test_restriction_disabled_skips_geoip() {
        let config = Config {
            restriction_enabled: false,
            geoip_fail_open: false,
            ..Config::default()
        };
        let engine = engine_with(config, Arc::new(GeoIpResolver::new()), vec![deny_country("RU")]);
        let verdict = engine
            .evaluate_request("198.51.100.10".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Allow);
        assert_eq!(engine.stats().get(DecisionEvent::GeoIpUnavailable), 0);
    }

    #[tokio::test]
    async fn test_warning_challenges_and_lock_denies() {
        let engine = engine_with(lockout_config(3), resolver("10.0.0.0/8,US\n"), Vec::new());
        let ip: IpAddr = "10.1.1.1".parse().unwrap();

        let state = engine
            .record_authentication(ip, Some("alice"), false)
            .await
            .unwrap();
        assert!(matches!(state, LockoutState::Warning { failures: 1, .. }));
        let verdict = engine.evaluate_request(ip, Some("alice")).await;
        assert_eq!(verdict.decision, AccessDecision::Challenge);

        engine.record_authentication(ip, Some("alice"), false).await.unwrap();
        let state = engine
            .record_authentication(ip, Some("alice"), false)
            .await
            .unwrap();
        assert!(state.is_locked());

        let verdict = engine.evaluate_request(ip, Some("alice")).await;
        assert_eq!(verdict.decision, AccessDecision::Deny);
        assert!(verdict.lockout.is_locked());

        // A further attempt is rejected, not counted
        let err = engine
            .record_authentication(ip, Some("alice"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::LockoutExceeded { .. }));
        assert_eq!(err.kind(), "lockout_exceeded");
    }

    #[tokio::test]
    async fn test_account_lock_follows_account_across_addresses() {
        let engine = engine_with(lockout_config(2), resolver("10.0.0.0/8,US\n"), Vec::new());
        engine
            .record_authentication("10.0.0.1".parse().unwrap(), Some("bob"), false)
            .await
            .unwrap();
        engine
            .record_authentication("10.0.0.2".parse().unwrap(), Some("bob"), false)
            .await
            .unwrap();

        let verdict = engine
            .evaluate_request("10.0.0.3".parse().unwrap(), Some("bob"))
            .await;
        assert_eq!(verdict.decision, AccessDecision::Deny);

        // Other accounts from a fresh address are unaffected
        let verdict = engine
            .evaluate_request("10.0.0.3".parse().unwrap(), Some("carol"))
            .await;
        assert_eq!(verdict.decision, AccessDecision::Allow);
    }

    #[tokio::test]
    async fn test_success_resets() {
        let engine = engine_with(lockout_config(3), resolver("10.0.0.0/8,US\n"), Vec::new());
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        engine.record_authentication(ip, Some("dave"), false).await.unwrap();
        engine.record_authentication(ip, Some("dave"), true).await.unwrap();

        let verdict = engine.evaluate_request(ip, Some("dave")).await;
        assert_eq!(verdict.decision, AccessDecision::Allow);
        assert_eq!(verdict.lockout, LockoutState::Clear);
    }

    #[tokio::test]
    async fn test_lockout_disabled() {
        let mut config = lockout_config(0);
        config.lockout_enabled = false;
        let engine = engine_with(config, resolver("10.0.0.0/8,US\n"), Vec::new());
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        for _ in 0..10 {
            assert_eq!(
                engine.record_authentication(ip, None, false).await.unwrap(),
                LockoutState::Clear
            );
        }
    }

    #[tokio::test]
    async fn test_deny_wins_over_challenge() {
        let engine = engine_with(
            lockout_config(3),
            resolver("198.51.100.0/24,RU\n"),
            vec![deny_country("RU")],
        );
        let ip: IpAddr = "198.51.100.1".parse().unwrap();
        engine.record_authentication(ip, None, false).await.unwrap();

        let verdict = engine.evaluate_request(ip, None).await;
        assert_eq!(verdict.decision, AccessDecision::Deny);
        assert_eq!(verdict.reasons.len(), 2);
    }

    #[tokio::test]
    async fn test_reload_rules_reports_skipped() {
        let engine = engine_with(Config::default(), resolver("198.51.100.0/24,RU\n"), Vec::new());
        let mut bad = deny_country("RU");
        bad.countries = vec!["Russia".to_string()];

        let errors = engine.reload_rules(vec![bad, deny_country("RU")], Some(RuleAction::Allow));
        assert_eq!(errors.len(), 1);
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.stats().get(DecisionEvent::InvalidRuleSkipped), 1);

        let verdict = engine
            .evaluate_request("198.51.100.1".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Deny);
    }

    #[tokio::test]
    async fn test_reload_rules_file_without_file() {
        let engine = engine_with(Config::default(), resolver("10.0.0.0/8,US\n"), Vec::new());
        assert!(engine.reload_rules_file().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_rules_file_skips_malformed_entry() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[
                { "id": "block-ru", "countries": ["RU"], "action": "deny" },
                { "id": "typo", "countries": ["CN"], "action": "block" }
            ]"#,
        )
        .unwrap();
        let config = Config {
            rules_file: Some(path),
            ..Config::default()
        };
        let engine = engine_with(config, resolver("198.51.100.0/24,RU
"), Vec::new());

        let skipped = engine.reload_rules_file().await.unwrap().unwrap();
        assert_eq!(skipped.len(), 1);
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.stats().get(DecisionEvent::InvalidRuleSkipped), 1);

        let verdict = engine
            .evaluate_request("198.51.100.1".parse().unwrap(), None)
            .await;
        assert_eq!(verdict.decision, AccessDecision::Deny);
    }

    #[test]
    fn test_decision_order() {
        assert!(AccessDecision::Deny > AccessDecision::Challenge);
        assert!(AccessDecision::Challenge > AccessDecision::Allow);
        assert_eq!(
            serde_json::to_string(&AccessDecision::Challenge).unwrap(),
            "\"challenge\""
        );
    }
}
