//! Admin server data structures.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::AccessEngine;
use crate::rules::RuleAction;
use crate::scheduler::RefreshScheduler;

/// Shared state for the admin server
#[derive(Clone)]
pub struct AdminState {
    /// Decision engine (rules, resolver, tracker, counters)
    pub engine: Arc<AccessEngine>,
    /// Refresh scheduler used for manual refreshes
    pub scheduler: Arc<RefreshScheduler>,
    /// Process start, for uptime
    pub start_time: Arc<Instant>,
}

impl AdminState {
    /// Creates the state, starting the uptime clock now.
    pub fn new(engine: Arc<AccessEngine>, scheduler: Arc<RefreshScheduler>) -> Self {
        AdminState {
            engine,
            scheduler,
            start_time: Arc::new(Instant::now()),
        }
    }
}

/// JSON response for `/status` endpoint
#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_seconds: f64,
    pub geoip: Option<GeoIpStatus>,
    pub rules: RulesStatus,
    pub lockout: LockoutStatus,
    pub decisions: BTreeMap<&'static str, usize>,
}

#[derive(Serialize)]
pub struct GeoIpStatus {
    pub version: String,
    pub source: String,
    pub source_checksum: String,
    pub age_seconds: Option<u64>,
}

#[derive(Serialize)]
pub struct RulesStatus {
    pub count: usize,
    pub default_policy: RuleAction,
}

#[derive(Serialize)]
pub struct LockoutStatus {
    pub enabled: bool,
    pub threshold: u32,
    pub tracked_keys: usize,
    pub locked_keys: usize,
}

/// JSON body for failed admin actions
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}
