//! Per-identity failure counting and lockout.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::store::LockoutStore;
use super::types::{saturating_add, LockoutConfig, LockoutRecord, LockoutState};

type Slot = Arc<tokio::sync::Mutex<Option<LockoutRecord>>>;

/// Tracks failed authentication attempts per key.
///
/// Each key has its own async mutex, so the read-modify-persist sequence for
/// one key is serialised while different keys proceed in parallel. The outer
/// map lock is only held to look up or insert a slot and never across an
/// await point.
#[derive(Debug)]
pub struct LockoutTracker {
    config: LockoutConfig,
    slots: Mutex<HashMap<String, Slot>>,
    store: Option<LockoutStore>,
}

impl LockoutTracker {
    /// Creates an in-memory tracker.
    pub fn new(config: LockoutConfig) -> Self {
        LockoutTracker {
            config,
            slots: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Creates a tracker that mirrors its records into `store`.
    pub fn with_store(config: LockoutConfig, store: LockoutStore) -> Self {
        LockoutTracker {
            store: Some(store),
            ..Self::new(config)
        }
    }

    /// Lockout parameters.
    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Records a failed attempt for `key` and returns the resulting state.
    pub async fn record_failure(&self, key: &str) -> LockoutState {
        self.record_failure_at(key, Utc::now()).await
    }

    /// [`record_failure`](Self::record_failure) at an explicit time.
    ///
    /// A failure on a locked key does not increase the count.
    pub async fn record_failure_at(&self, key: &str, now: DateTime<Utc>) -> LockoutState {
        if !self.config.is_enabled() {
            return LockoutState::Clear;
        }

        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if guard
            .as_ref()
            .is_some_and(|record| record.is_expired(&self.config, now))
        {
            *guard = None;
        }

        if let Some(record) = guard.as_ref().filter(|record| record.locked_until.is_some()) {
            log::debug!("Failure on locked key '{}' ignored", key);
            return record.state(&self.config, now);
        }

        let record = guard.get_or_insert_with(|| LockoutRecord {
            key: key.to_string(),
            failure_count: 0,
            window_start: now,
            locked_until: None,
        });
        record.failure_count = record.failure_count.saturating_add(1);

        if record.failure_count >= self.config.threshold {
            let locked_until = saturating_add(now, self.config.duration);
            record.locked_until = Some(locked_until);
            log::warn!(
                "Locking '{}' after {} failed attempts (until {})",
                key,
                record.failure_count,
                locked_until
            );
        }

        let state = record.state(&self.config, now);
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(record).await {
                log::warn!("Failed to persist lockout record for '{}': {}", key, e);
            }
        }
        state
    }

    /// Current state of `key`.
    pub async fn check_state(&self, key: &str) -> LockoutState {
        self.check_state_at(key, Utc::now()).await
    }

    /// [`check_state`](Self::check_state) at an explicit time.
    ///
    /// An expired record is discarded on the way.
    pub async fn check_state_at(&self, key: &str, now: DateTime<Utc>) -> LockoutState {
        if !self.config.is_enabled() {
            return LockoutState::Clear;
        }
        let Some(slot) = self.existing_slot(key) else {
            return LockoutState::Clear;
        };

        let mut guard = slot.lock().await;
        let state = match guard.as_ref() {
            None => return LockoutState::Clear,
            Some(record) => record.state(&self.config, now),
        };
        if state == LockoutState::Clear {
            *guard = None;
            self.forget(key).await;
        }
        state
    }

    /// Resets `key` to `Clear` (successful authentication or admin unlock).
    ///
    /// Returns whether a record existed.
    pub async fn record_success(&self, key: &str) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let mut guard = slot.lock().await;
        if guard.take().is_none() {
            return false;
        }
        log::debug!("Cleared lockout record for '{}'", key);
        self.forget(key).await;
        true
    }

    /// Reloads unexpired records from the store. Returns how many were restored.
    ///
    /// Keys that already have an in-memory record keep it.
    pub async fn restore(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let records = match store.load_all().await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Failed to restore lockout records: {}", e);
                return 0;
            }
        };

        let now = Utc::now();
        let mut restored = 0;
        for record in records {
            if record.is_expired(&self.config, now) {
                continue;
            }
            let slot = self.slot(&record.key);
            let mut guard = slot.lock().await;
            if guard.is_none() {
                *guard = Some(record);
                restored += 1;
            }
        }
        if restored > 0 {
            log::info!("Restored {} lockout records", restored);
        }
        restored
    }

    /// Drops expired records from memory and the store. Returns how many
    /// in-memory records were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    /// [`purge_expired`](Self::purge_expired) at an explicit time.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut purged = 0;
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.retain(|_, slot| {
                // A slot somebody else holds a clone of may be about to be
                // written; it is left for the next purge.
                if Arc::strong_count(slot) > 1 {
                    return true;
                }
                let Ok(guard) = slot.try_lock() else {
                    return true;
                };
                match guard.as_ref() {
                    None => false,
                    Some(record) if record.is_expired(&self.config, now) => {
                        purged += 1;
                        false
                    }
                    Some(_) => true,
                }
            });
        }

        if let Some(store) = &self.store {
            let window_cutoff = chrono::Duration::from_std(self.config.window)
                .ok()
                .and_then(|window| now.checked_sub_signed(window))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            if let Err(e) = store.purge_expired(now, window_cutoff).await {
                log::warn!("Failed to purge expired lockout records: {}", e);
            }
        }

        if purged > 0 {
            log::debug!("Purged {} expired lockout records", purged);
        }
        purged
    }

    /// Unexpired records, sorted by key.
    pub async fn snapshot(&self) -> Vec<LockoutRecord> {
        self.snapshot_at(Utc::now()).await
    }

    /// Unexpired records at `now`, sorted by key.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<LockoutRecord> {
        let slots: Vec<Slot> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values().cloned().collect()
        };

        let mut records = Vec::new();
        for slot in slots {
            if let Some(record) = slot.lock().await.as_ref() {
                if !record.is_expired(&self.config, now) {
                    records.push(record.clone());
                }
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Number of keys currently locked.
    pub async fn locked_count(&self) -> usize {
        self.locked_count_at(Utc::now()).await
    }

    /// Number of keys locked at `now`.
    pub async fn locked_count_at(&self, now: DateTime<Utc>) -> usize {
        self.snapshot_at(now)
            .await
            .iter()
            .filter(|record| record.state(&self.config, now).is_locked())
            .count()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn existing_slot(&self, key: &str) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).cloned()
    }

    async fn forget(&self, key: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(key).await {
                log::warn!("Failed to delete lockout record for '{}': {}", key, e);
            }
        }
    }
}
