// Shared test helpers for building engines over small range tables.
//
// This module provides common utilities used across multiple test files to reduce duplication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use access_guard::geoip::LoadedSnapshot;
use access_guard::lockout::LockoutTracker;
use access_guard::rules::RuleConfig;
use access_guard::{AccessEngine, Config, GeoIpResolver, RuleAction, RuleStore};

/// Range table used by most tests.
#[allow(dead_code)] // Used by other test files
pub const TABLE: &str = "\
# network,country
198.51.100.0/24,RU
203.0.113.0/24,DE
2001:db8::/32,FR
";

/// Writes a snapshot file into `dir` and returns its path.
#[allow(dead_code)]
pub fn write_snapshot(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write snapshot file");
    path
}

/// A loaded range-table snapshot.
#[allow(dead_code)]
pub fn table_snapshot(content: &str, source: &str) -> LoadedSnapshot {
    LoadedSnapshot::from_bytes(content.as_bytes().to_vec(), source, None)
        .expect("Failed to load test table")
}

/// Builds a rule definition.
#[allow(dead_code)]
pub fn rule(
    id: &str,
    priority: u32,
    networks: &[&str],
    countries: &[&str],
    action: RuleAction,
) -> RuleConfig {
    RuleConfig {
        id: id.to_string(),
        priority,
        ip: None,
        networks: networks.iter().map(|s| s.to_string()).collect(),
        countries: countries.iter().map(|s| s.to_string()).collect(),
        action,
    }
}

/// Engine over [`TABLE`] with the given rules and an in-memory tracker.
#[allow(dead_code)]
pub fn engine_with_rules(config: Config, rules: Vec<RuleConfig>) -> AccessEngine {
    let resolver = Arc::new(GeoIpResolver::with_snapshot(table_snapshot(TABLE, "test")));
    let (store, errors) = RuleStore::compile(rules, config.default_policy);
    assert!(errors.is_empty(), "unexpected invalid rules: {:?}", errors);
    let tracker = Arc::new(LockoutTracker::new(config.lockout));
    AccessEngine::new(config, resolver, store, tracker)
}

/// Config with auto-update off, so it validates without a GeoIP source.
#[allow(dead_code)]
pub fn offline_config() -> Config {
    Config {
        auto_update: false,
        ..Default::default()
    }
}
