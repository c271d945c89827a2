//! GeoIP snapshot refresh.
//!
//! A refresh fetches a candidate, verifies it, trial-loads it from a
//! temporary file in the cache directory and only then swaps it into the
//! resolver. Any failure leaves the active snapshot untouched.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::types::{RefreshConfig, RefreshOutcome};
use crate::config::METADATA_FILE_NAME;
use crate::engine::AccessEngine;
use crate::error_handling::{AccessError, DecisionEvent, DecisionStats};
use crate::geoip::metadata::{load_metadata, save_metadata, sha256_hex};
use crate::geoip::{
    extract_database_from_tar_gz, is_gzip, load_from_file, GeoIpMetadata, GeoIpResolver,
    GeoIpSnapshot, LoadedSnapshot, SnapshotSource,
};

/// Keeps the resolver's snapshot current.
#[derive(Debug)]
pub struct RefreshScheduler {
    resolver: Arc<GeoIpResolver>,
    source: Option<SnapshotSource>,
    client: reqwest::Client,
    config: RefreshConfig,
    stats: Arc<DecisionStats>,
    // Serialises scheduled and manual refreshes and file retirement
    refresh_lock: Arc<Mutex<()>>,
}

impl RefreshScheduler {
    /// Creates a scheduler. Without a source every refresh fails.
    pub fn new(
        resolver: Arc<GeoIpResolver>,
        source: Option<SnapshotSource>,
        client: reqwest::Client,
        config: RefreshConfig,
        stats: Arc<DecisionStats>,
    ) -> Self {
        RefreshScheduler {
            resolver,
            source,
            client,
            config,
            stats,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Runs one refresh. This is also the admin-triggered manual refresh.
    ///
    /// Re-running while the source still serves the active snapshot is a
    /// no-op returning [`RefreshOutcome::Unchanged`].
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::RefreshFailed`] on any fetch, verification or
    /// load failure. The active snapshot is retained.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome, AccessError> {
        let _guard = self.refresh_lock.lock().await;

        match self.try_refresh().await {
            Ok(outcome) => {
                match &outcome {
                    RefreshOutcome::Updated(metadata) => {
                        self.stats.increment(DecisionEvent::RefreshSucceeded);
                        log::info!(
                            "GeoIP snapshot updated to version {} from {}",
                            metadata.version,
                            metadata.source
                        );
                    }
                    RefreshOutcome::Unchanged => {
                        self.stats.increment(DecisionEvent::RefreshUnchanged);
                        log::info!("GeoIP snapshot unchanged");
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.stats.increment(DecisionEvent::RefreshFailed);
                let err = AccessError::RefreshFailed(e);
                log::warn!("{} (keeping current snapshot)", err);
                Err(err)
            }
        }
    }

    /// Loads the snapshot recorded in the cache directory, without touching
    /// the network. Returns `Ok(None)` when nothing is cached.
    pub async fn restore_cached(&self) -> Result<Option<GeoIpMetadata>> {
        let metadata_file = self.metadata_file();
        if !metadata_file.exists() {
            return Ok(None);
        }
        let metadata = load_metadata(&metadata_file)
            .await
            .with_context(|| format!("Failed to read {}", metadata_file.display()))?;
        let Some(path) = metadata.path.clone() else {
            return Ok(None);
        };

        let mut loaded = load_from_file(&path).await?;
        // The recorded checksum is the one the source published (archive
        // checksum for vendor downloads), which is what refreshes compare.
        loaded.metadata = metadata.clone();
        self.resolver.install(loaded);
        log::info!(
            "Restored cached GeoIP snapshot version {} from {}",
            metadata.version,
            path.display()
        );
        Ok(Some(metadata))
    }

    /// Starts the periodic background task.
    ///
    /// Each tick refreshes the snapshot and, when an engine is given, re-reads
    /// the rules file and purges expired lockout records. The first tick
    /// fires one `interval` after the call. Cancel the returned token to stop.
    pub fn start(
        self: &Arc<Self>,
        interval: Duration,
        engine: Option<Arc<AccessEngine>>,
    ) -> CancellationToken {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let scheduler = Arc::clone(self);

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.tick(engine.as_deref()).await;
                    }
                    _ = token.cancelled() => {
                        log::debug!("Refresh scheduler stopped");
                        break;
                    }
                }
            }
        });

        shutdown
    }

    /// One scheduler tick.
    pub async fn tick(&self, engine: Option<&AccessEngine>) {
        // Failures are logged and counted by refresh_once; the next tick retries
        let _ = self.refresh_once().await;

        if let Some(engine) = engine {
            match engine.reload_rules_file().await {
                Ok(_) => {}
                Err(e) => log::warn!(
                    "Failed to reload rules file (keeping current rules): {:#}",
                    e
                ),
            }
            engine.tracker().purge_expired().await;
        }
    }

    async fn try_refresh(&self) -> Result<RefreshOutcome> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No GeoIP source configured"))?;
        let active_checksum = self
            .resolver
            .metadata()
            .map(|metadata| metadata.source_checksum);

        if let Some(published) = source.probe_checksum(&self.client).await {
            if active_checksum.as_deref() == Some(published.as_str()) {
                log::debug!("Published checksum matches active snapshot");
                return Ok(RefreshOutcome::Unchanged);
            }
        }

        let deadline = self.config.fetch_deadline();
        let fetched = tokio::time::timeout(deadline, source.fetch(&self.client))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Fetching {} timed out after {}s",
                    source.describe(),
                    deadline.as_secs()
                )
            })??;

        let checksum = sha256_hex(&fetched.bytes);
        if let Some(expected) = &fetched.expected_checksum {
            if !expected.eq_ignore_ascii_case(&checksum) {
                return Err(anyhow::anyhow!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    fetched.origin,
                    expected,
                    checksum
                ));
            }
        }
        if active_checksum.as_deref() == Some(checksum.as_str()) {
            return Ok(RefreshOutcome::Unchanged);
        }

        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create cache directory {}",
                    self.config.cache_dir.display()
                )
            })?;

        let candidate = Candidate {
            payload: fetched.bytes,
            checksum,
            origin: fetched.origin,
            archive_member: source.database_file_suffix(),
            file_stem: file_stem(source),
            cache_dir: self.config.cache_dir.clone(),
        };
        let loaded = tokio::task::spawn_blocking(move || candidate.prepare())
            .await
            .map_err(|e| anyhow::anyhow!("Snapshot preparation task failed: {}", e))??;

        let metadata = loaded.metadata.clone();
        let previous = self.resolver.install(loaded);

        if let Err(e) = save_metadata(&metadata, &self.metadata_file()).await {
            log::warn!("Failed to save GeoIP metadata: {:#}", e);
        }
        if let Some(old_path) = previous.and_then(|p| p.metadata.path.clone()) {
            if metadata.path.as_ref() != Some(&old_path) {
                self.retire(old_path);
            }
        }

        Ok(RefreshOutcome::Updated(metadata))
    }

    /// Deletes a superseded snapshot file after the grace period.
    ///
    /// File names derive from content checksums, so a source that flips back
    /// to an earlier snapshot republishes the same path. The file is kept if
    /// it is the active snapshot again by the time the grace period ends.
    fn retire(&self, path: PathBuf) {
        let grace_period = self.config.grace_period;
        let resolver = Arc::clone(&self.resolver);
        let refresh_lock = Arc::clone(&self.refresh_lock);
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            let _guard = refresh_lock.lock().await;
            let active = resolver.metadata().and_then(|metadata| metadata.path);
            if active.as_deref() == Some(path.as_path()) {
                log::debug!("Keeping {}: it is the active snapshot again", path.display());
                return;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::debug!("Removed superseded snapshot {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "Failed to remove superseded snapshot {}: {}",
                    path.display(),
                    e
                ),
            }
        });
    }

    fn metadata_file(&self) -> PathBuf {
        self.config.cache_dir.join(METADATA_FILE_NAME)
    }
}

fn file_stem(source: &SnapshotSource) -> String {
    match source {
        SnapshotSource::MaxMind { edition_id, .. } => edition_id.clone(),
        _ => "geoip".to_string(),
    }
}

/// A verified payload on its way into the cache directory.
struct Candidate {
    payload: Vec<u8>,
    checksum: String,
    origin: String,
    archive_member: String,
    file_stem: String,
    cache_dir: PathBuf,
}

impl Candidate {
    /// Extracts, writes to a temporary file, trial-loads and persists under
    /// a versioned name. Blocking; run on the blocking pool.
    ///
    /// The temporary file is removed on every error path.
    fn prepare(self) -> Result<LoadedSnapshot> {
        let db_bytes = if is_gzip(&self.payload) {
            extract_database_from_tar_gz(&self.payload, &self.archive_member)?
        } else {
            self.payload
        };

        let mut temp = tempfile::Builder::new()
            .prefix(".candidate-")
            .tempfile_in(&self.cache_dir)
            .with_context(|| {
                format!("Failed to create temporary file in {}", self.cache_dir.display())
            })?;
        temp.write_all(&db_bytes)
            .and_then(|_| temp.as_file().sync_all())
            .with_context(|| "Failed to write candidate snapshot")?;

        let mut loaded =
            LoadedSnapshot::from_bytes(db_bytes, &self.origin, Some(self.checksum.clone()))
                .with_context(|| {
                    format!("Candidate snapshot from {} failed to load", self.origin)
                })?;

        let extension = match loaded.snapshot {
            GeoIpSnapshot::Mmdb(_) => "mmdb",
            GeoIpSnapshot::RangeTable(_) => "csv",
        };
        let final_path =
            versioned_path(&self.cache_dir, &self.file_stem, &self.checksum, extension);
        temp.persist(&final_path)
            .with_context(|| format!("Failed to persist snapshot to {}", final_path.display()))?;

        loaded.metadata.path = Some(final_path);
        Ok(loaded)
    }
}

fn versioned_path(cache_dir: &Path, stem: &str, checksum: &str, extension: &str) -> PathBuf {
    let short = &checksum[..checksum.len().min(16)];
    cache_dir.join(format!("{}-{}.{}", stem, short, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geoip::{create_test_tar_gz, CountryCode, Resolution};
    use tempfile::TempDir;

    const TABLE_V1: &str = "# version: v1\n8.8.8.0/24,US\n";
    const TABLE_V2: &str = "# version: v2\n8.8.8.0/24,CA\n";

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("client builds")
    }

    fn scheduler(source_path: &Path, cache_dir: &Path) -> RefreshScheduler {
        scheduler_with_grace(source_path, cache_dir, Duration::ZERO)
    }

    fn scheduler_with_grace(
        source_path: &Path,
        cache_dir: &Path,
        grace_period: Duration,
    ) -> RefreshScheduler {
        RefreshScheduler::new(
            Arc::new(GeoIpResolver::new()),
            Some(SnapshotSource::File {
                path: source_path.to_path_buf(),
            }),
            client(),
            RefreshConfig {
                cache_dir: cache_dir.to_path_buf(),
                download_timeout: Duration::from_secs(5),
                grace_period,
            },
            Arc::new(DecisionStats::new()),
        )
    }

    async fn assert_no_candidates(cache_dir: &Path) {
        let Ok(mut entries) = tokio::fs::read_dir(cache_dir).await else {
            return;
        };
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(!name.starts_with(".candidate-"), "leftover {}", name);
        }
    }

    fn country_of(scheduler: &RefreshScheduler, ip: &str) -> Resolution {
        scheduler.resolver.resolve(ip.parse().unwrap()).unwrap()
    }

    fn cc(code: &str) -> Resolution {
        Resolution::Country(CountryCode::parse(code).unwrap())
    }

    #[tokio::test]
    async fn test_refresh_publishes_and_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        let cache_dir = temp_dir.path().join("cache");
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        let scheduler = scheduler(&source_path, &cache_dir);

        let outcome = scheduler.refresh_once().await.expect("refresh succeeds");
        let RefreshOutcome::Updated(metadata) = outcome else {
            panic!("expected Updated, got {:?}", outcome);
        };
        assert_eq!(metadata.version, "v1");
        assert_eq!(country_of(&scheduler, "8.8.8.8"), cc("US"));
        assert!(metadata.path.as_ref().unwrap().exists());
        assert!(cache_dir.join(METADATA_FILE_NAME).exists());

        let outcome = scheduler.refresh_once().await.expect("second refresh succeeds");
        assert!(matches!(outcome, RefreshOutcome::Unchanged));
        assert_eq!(scheduler.stats.get(DecisionEvent::RefreshUnchanged), 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_keeps_current_snapshot() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        let cache_dir = temp_dir.path().join("cache");
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        let scheduler = scheduler(&source_path, &cache_dir);
        scheduler.refresh_once().await.unwrap();

        tokio::fs::write(&source_path, TABLE_V2).await.unwrap();
        tokio::fs::write(
            temp_dir.path().join("ranges.csv.sha256"),
            format!("{}  ranges.csv\n", sha256_hex(b"something else")),
        )
        .await
        .unwrap();

        let err = scheduler.refresh_once().await.unwrap_err();
        assert!(matches!(err, AccessError::RefreshFailed(_)));
        assert!(err.to_string().contains("Checksum mismatch"), "got: {}", err);
        assert_eq!(country_of(&scheduler, "8.8.8.8"), cc("US"));
        assert_eq!(scheduler.stats.get(DecisionEvent::RefreshFailed), 1);

        assert_no_candidates(&cache_dir).await;
    }

    #[tokio::test]
    async fn test_invalid_candidate_keeps_current_snapshot() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        let cache_dir = temp_dir.path().join("cache");
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        let scheduler = scheduler(&source_path, &cache_dir);
        scheduler.refresh_once().await.unwrap();

        // Overlapping ranges fail the trial load
        tokio::fs::write(&source_path, "8.8.0.0/16,US\n8.8.8.0/24,CA\n")
            .await
            .unwrap();
        let err = scheduler.refresh_once().await.unwrap_err();
        assert!(err.to_string().contains("failed to load"), "got: {}", err);
        assert_eq!(country_of(&scheduler, "8.8.8.8"), cc("US"));
    }

    #[tokio::test]
    async fn test_swap_retires_previous_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        let cache_dir = temp_dir.path().join("cache");
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        let scheduler = scheduler(&source_path, &cache_dir);

        let RefreshOutcome::Updated(v1) = scheduler.refresh_once().await.unwrap() else {
            panic!("expected Updated");
        };
        tokio::fs::write(&source_path, TABLE_V2).await.unwrap();
        let RefreshOutcome::Updated(v2) = scheduler.refresh_once().await.unwrap() else {
            panic!("expected Updated");
        };
        assert_eq!(country_of(&scheduler, "8.8.8.8"), cc("CA"));

        let old_path = v1.path.unwrap();
        for _ in 0..50 {
            if !old_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!old_path.exists(), "superseded snapshot not removed");
        assert!(v2.path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_flip_back_within_grace_keeps_active_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        let cache_dir = temp_dir.path().join("cache");
        let scheduler = scheduler_with_grace(&source_path, &cache_dir, Duration::from_millis(300));

        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        scheduler.refresh_once().await.unwrap();
        tokio::fs::write(&source_path, TABLE_V2).await.unwrap();
        scheduler.refresh_once().await.unwrap();
        // Back to v1 while v1's retirement is still pending
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        let RefreshOutcome::Updated(active) = scheduler.refresh_once().await.unwrap() else {
            panic!("expected Updated");
        };

        tokio::time::sleep(Duration::from_millis(800)).await;
        let active_path = active.path.expect("persisted");
        assert!(active_path.exists(), "active snapshot {} deleted", active_path.display());

        // The cache stays usable after a restart
        tokio::fs::remove_file(&source_path).await.unwrap();
        let restarted = scheduler_with_grace(&source_path, &cache_dir, Duration::ZERO);
        restarted.restore_cached().await.unwrap().expect("cached");
        assert_eq!(country_of(&restarted, "8.8.8.8"), cc("US"));
    }

    #[tokio::test]
    async fn test_fetch_deadline_keeps_current_snapshot() {
        use httptest::{matchers::*, responders::*, Expectation, Server};

        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/ranges.csv.sha256"))
                .times(..)
                .respond_with(status_code(404)),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/ranges.csv"))
                .times(..)
                .respond_with(delay_and_then(
                    Duration::from_secs(15),
                    status_code(200).body(TABLE_V2),
                )),
        );

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache_dir = temp_dir.path().join("cache");
        let initial = LoadedSnapshot::from_bytes(TABLE_V1.as_bytes().to_vec(), "initial", None)
            .expect("valid table");
        let scheduler = RefreshScheduler::new(
            Arc::new(GeoIpResolver::with_snapshot(initial)),
            Some(SnapshotSource::Url {
                url: server.url("/ranges.csv").to_string(),
                allow_private_hosts: true,
            }),
            reqwest::Client::new(),
            RefreshConfig {
                cache_dir: cache_dir.clone(),
                download_timeout: Duration::from_secs(1),
                grace_period: Duration::ZERO,
            },
            Arc::new(DecisionStats::new()),
        );

        let started = std::time::Instant::now();
        let err = scheduler.refresh_once().await.unwrap_err();
        assert!(matches!(err, AccessError::RefreshFailed(_)));
        assert!(err.to_string().contains("timed out"), "got: {}", err);
        assert!(started.elapsed() < Duration::from_secs(15));

        assert_eq!(country_of(&scheduler, "8.8.8.8"), cc("US"));
        assert_eq!(scheduler.stats.get(DecisionEvent::RefreshFailed), 1);
        assert_no_candidates(&cache_dir).await;
    }

    #[tokio::test]
    async fn test_tar_gz_payload_is_extracted() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("snapshot.tar.gz");
        let cache_dir = temp_dir.path().join("cache");
        // Range tables inside archives are found by the generic .mmdb suffix
        let archive = create_test_tar_gz(&[
            ("snapshot_20240604/LICENSE.txt", b"license"),
            ("snapshot_20240604/ranges.mmdb", TABLE_V1.as_bytes()),
        ]);
        tokio::fs::write(&source_path, &archive).await.unwrap();
        let scheduler = scheduler(&source_path, &cache_dir);

        let RefreshOutcome::Updated(metadata) = scheduler.refresh_once().await.unwrap() else {
            panic!("expected Updated");
        };
        assert_eq!(metadata.source_checksum, sha256_hex(&archive));
        assert_eq!(country_of(&scheduler, "8.8.8.8"), cc("US"));
    }

    #[tokio::test]
    async fn test_restore_cached() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        let cache_dir = temp_dir.path().join("cache");
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        scheduler(&source_path, &cache_dir).refresh_once().await.unwrap();

        // A fresh process restores without fetching
        tokio::fs::remove_file(&source_path).await.unwrap();
        let restarted = scheduler(&source_path, &cache_dir);
        let metadata = restarted.restore_cached().await.unwrap().expect("cached");
        assert_eq!(metadata.version, "v1");
        assert_eq!(country_of(&restarted, "8.8.8.8"), cc("US"));
    }

    #[tokio::test]
    async fn test_restore_cached_empty_dir() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let scheduler = scheduler(&temp_dir.path().join("ranges.csv"), temp_dir.path());
        assert!(scheduler.restore_cached().await.unwrap().is_none());
        assert!(!scheduler.resolver.is_loaded());
    }

    #[tokio::test]
    async fn test_refresh_without_source_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let scheduler = RefreshScheduler::new(
            Arc::new(GeoIpResolver::new()),
            None,
            client(),
            RefreshConfig {
                cache_dir: temp_dir.path().to_path_buf(),
                download_timeout: Duration::from_secs(5),
                grace_period: Duration::ZERO,
            },
            Arc::new(DecisionStats::new()),
        );
        let err = scheduler.refresh_once().await.unwrap_err();
        assert!(err.to_string().contains("No GeoIP source configured"));
    }

    #[tokio::test]
    async fn test_start_and_cancel() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_path = temp_dir.path().join("ranges.csv");
        tokio::fs::write(&source_path, TABLE_V1).await.unwrap();
        let scheduler = Arc::new(scheduler(&source_path, &temp_dir.path().join("cache")));

        let token = scheduler.start(Duration::from_millis(20), None);
        for _ in 0..100 {
            if scheduler.resolver.is_loaded() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        assert!(scheduler.resolver.is_loaded());
    }

    #[test]
    fn test_versioned_path() {
        let path = versioned_path(Path::new("cache"), "GeoLite2-Country", &"a".repeat(64), "mmdb");
        assert_eq!(
            path,
            Path::new("cache").join(format!("GeoLite2-Country-{}.mmdb", "a".repeat(16)))
        );
    }
}
