//! SQLite persistence for lockout records.
//!
//! The tracker's in-memory map is authoritative; this table mirrors it so a
//! restart does not forget who is locked out. Timestamps are stored as epoch
//! milliseconds.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::types::LockoutRecord;
use crate::error_handling::DatabaseError;

/// Lockout record table access.
#[derive(Debug, Clone)]
pub struct LockoutStore {
    pool: SqlitePool,
}

impl LockoutStore {
    /// Wraps a pool whose migrations have been run.
    pub fn new(pool: SqlitePool) -> Self {
        LockoutStore { pool }
    }

    /// Inserts or replaces the record for `record.key`.
    pub async fn upsert(&self, record: &LockoutRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO lockout_records
                 (lockout_key, failure_count, window_start_ms, locked_until_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(lockout_key) DO UPDATE SET
                 failure_count=excluded.failure_count,
                 window_start_ms=excluded.window_start_ms,
                 locked_until_ms=excluded.locked_until_ms,
                 updated_at_ms=excluded.updated_at_ms",
        )
        .bind(&record.key)
        .bind(i64::from(record.failure_count))
        .bind(record.window_start.timestamp_millis())
        .bind(record.locked_until.map(|t| t.timestamp_millis()))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::SqlError)?;

        Ok(())
    }

    /// Removes the record for `key`, if any.
    pub async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM lockout_records WHERE lockout_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::SqlError)?;
        Ok(())
    }

    /// Loads every stored record.
    ///
    /// Expiry is judged by the caller, which knows the counting window.
    pub async fn load_all(&self) -> Result<Vec<LockoutRecord>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT lockout_key, failure_count, window_start_ms, locked_until_ms
             FROM lockout_records",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::SqlError)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("lockout_key")?;
            let failure_count: i64 = row.try_get("failure_count")?;
            let window_start_ms: i64 = row.try_get("window_start_ms")?;
            let locked_until_ms: Option<i64> = row.try_get("locked_until_ms")?;

            let Some(window_start) = DateTime::<Utc>::from_timestamp_millis(window_start_ms) else {
                log::warn!("Ignoring lockout record '{}' with invalid window start", key);
                continue;
            };
            records.push(LockoutRecord {
                key,
                failure_count: u32::try_from(failure_count).unwrap_or(0),
                window_start,
                locked_until: locked_until_ms.and_then(DateTime::<Utc>::from_timestamp_millis),
            });
        }
        Ok(records)
    }

    /// Deletes records that can no longer affect any decision at `now`:
    /// locks that have ended, and unlocked windows that started before
    /// `window_cutoff`.
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM lockout_records
             WHERE (locked_until_ms IS NOT NULL AND locked_until_ms <= ?)
                OR (locked_until_ms IS NULL AND window_start_ms <= ?)",
        )
        .bind(now.timestamp_millis())
        .bind(window_cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::SqlError)?;

        Ok(result.rows_affected())
    }
}
