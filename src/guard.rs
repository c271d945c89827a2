//! Component wiring.
//!
//! Builds the resolver, rule store, lockout tracker, engine and refresh
//! scheduler from a [`Config`], the way the binary runs them.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{load_rules_file, Config};
use crate::engine::AccessEngine;
use crate::error_handling::DecisionEvent;
use crate::geoip::{GeoIpResolver, SnapshotSource};
use crate::initialization::{init_db_pool_with_path, init_download_client, run_migrations};
use crate::lockout::{LockoutStore, LockoutTracker};
use crate::rules::RuleStore;
use crate::scheduler::{RefreshConfig, RefreshScheduler};

/// A fully wired engine and its refresh scheduler.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    /// Decision engine
    pub engine: Arc<AccessEngine>,
    /// Snapshot refresher sharing the engine's resolver and counters
    pub scheduler: Arc<RefreshScheduler>,
}

impl AccessGuard {
    /// Builds every component from `config`.
    ///
    /// The rules file, when configured, must be readable: a broken file at
    /// startup is an error, while individual bad rules are only skipped.
    /// With `lockout_db_path` set, lockout records are restored from and
    /// persisted to SQLite.
    ///
    /// No GeoIP snapshot is loaded here; call [`AccessGuard::load_snapshot`].
    pub async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let tracker = match &config.lockout_db_path {
            Some(path) => {
                let pool = init_db_pool_with_path(path).await.with_context(|| {
                    format!("Failed to open lockout database {}", path.display())
                })?;
                run_migrations(&pool).await?;
                let tracker = LockoutTracker::with_store(config.lockout, LockoutStore::new(pool));
                tracker.restore().await;
                tracker
            }
            None => LockoutTracker::new(config.lockout),
        };

        let (rules, skipped) = match &config.rules_file {
            Some(path) => {
                let file = load_rules_file(path).await?;
                let (store, errors) = RuleStore::compile(
                    file.rules,
                    file.default_policy.unwrap_or(config.default_policy),
                );
                let mut skipped = file.invalid;
                skipped.extend(errors);
                (store, skipped)
            }
            None => (RuleStore::new(config.default_policy), Vec::new()),
        };
        log::info!(
            "Loaded {} restriction rules ({} skipped, default policy: {})",
            rules.len(),
            skipped.len(),
            rules.default_policy()
        );

        let source = SnapshotSource::from_config(&config);
        let client = init_download_client(
            config.download_timeout,
            source.as_ref().is_some_and(SnapshotSource::allows_private_hosts),
        )?;
        let refresh_config = RefreshConfig::from(&config);

        let resolver = Arc::new(GeoIpResolver::new());
        let engine = Arc::new(AccessEngine::new(
            config,
            Arc::clone(&resolver),
            rules,
            Arc::new(tracker),
        ));
        for _ in &skipped {
            engine.stats().increment(DecisionEvent::InvalidRuleSkipped);
        }
        let scheduler = Arc::new(RefreshScheduler::new(
            resolver,
            source,
            client,
            refresh_config,
            Arc::clone(engine.stats()),
        ));

        Ok(AccessGuard { engine, scheduler })
    }

    /// Loads the cached snapshot, or fetches one when nothing is cached.
    ///
    /// A failed fetch is not fatal: the engine runs in its unavailable mode
    /// (fail-open or fail-closed) until a later refresh succeeds.
    pub async fn load_snapshot(&self) {
        match self.scheduler.restore_cached().await {
            Ok(Some(_)) => return,
            Ok(None) => log::info!("No cached GeoIP snapshot, fetching"),
            Err(e) => log::warn!("Failed to restore cached GeoIP snapshot: {:#}", e),
        }
        if let Err(e) = self.scheduler.refresh_once().await {
            log::warn!(
                "Starting without a GeoIP snapshot ({}): {}",
                if self.engine.config().geoip_fail_open {
                    "fail-open"
                } else {
                    "fail-closed"
                },
                e
            );
        }
    }

    /// Starts the periodic refresh when auto-update is enabled.
    pub fn start_refresh(&self) -> Option<CancellationToken> {
        let config = self.engine.config();
        if !config.auto_update {
            return None;
        }
        log::info!(
            "Refreshing GeoIP snapshot every {}s",
            config.refresh_interval.as_secs()
        );
        Some(
            self.scheduler
                .start(config.refresh_interval, Some(Arc::clone(&self.engine))),
        )
    }
}
