//! Override store: manual (user-driven, time-expiring) and schedule
//! (externally driven, heartbeat-refreshed) overrides.
//!
//! Invariants enforced here:
//! - at most one active manual override per device, via the atomic
//!   deactivate-then-insert transaction (backed by a unique partial index);
//! - one schedule row per device, upsert semantics;
//! - a schedule row whose heartbeat is older than the stale threshold is
//!   reported inactive regardless of its stored flag.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::domain::Device;

pub const CLEARED_BY_REPLACED: &str = "system_replaced";
pub const CLEARED_BY_EXPIRY: &str = "system_expiry";
pub const CLEARED_BY_REPAIR: &str = "system_repair";

/// A manual override row as stored.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ManualOverrideRow {
    pub id: i64,
    pub device_id: String,
    pub is_active: bool,
    pub desired_state: bool,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub cleared_by: Option<String>,
}

/// Active-manual-override view used by the resolver and the status API.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ManualStatus {
    pub desired_state: bool,
    pub source: String,
    pub expires_at: DateTime<Utc>,
    pub time_remaining_minutes: i64,
}

/// Active-schedule view. Kept as a struct so a future `desired_state`
/// field extends it without touching the resolver contract.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScheduleStatus {
    pub reason: String,
    pub activated_at: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
}

/// One row of the schedule transitions log.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, serde::Serialize)]
pub struct ScheduleEvent {
    pub id: i64,
    pub device_id: String,
    pub is_active: bool,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ManualOverrideStore {
    pool: SqlitePool,
}

impl ManualOverrideStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new active override, replacing any prior active one for the
    /// device in the same transaction.
    pub async fn set(
        &self,
        device: Device,
        desired_state: bool,
        duration: chrono::Duration,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<ManualOverrideRow> {
        anyhow::ensure!(
            duration > chrono::Duration::zero(),
            "override duration must be positive"
        );

        let expires_at = now + duration;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE manual_overrides \
             SET is_active = 0, cleared_at = ?, cleared_by = ? \
             WHERE device_id = ? AND is_active = 1",
        )
        .bind(now)
        .bind(CLEARED_BY_REPLACED)
        .bind(device.as_str())
        .execute(&mut *tx)
        .await?;

        let row: ManualOverrideRow = sqlx::query_as(
            "INSERT INTO manual_overrides \
             (device_id, is_active, desired_state, source, created_at, expires_at) \
             VALUES (?, 1, ?, ?, ?, ?) \
             RETURNING id, device_id, is_active, desired_state, source, \
                       created_at, expires_at, cleared_at, cleared_by",
        )
        .bind(device.as_str())
        .bind(desired_state)
        .bind(source)
        .bind(now)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await
        .context("manual override insert failed")?;

        tx.commit().await?;

        info!(
            device = %device,
            desired_state,
            source,
            %expires_at,
            "manual override set"
        );
        Ok(row)
    }

    /// Deactivate active overrides for one device. Idempotent; returns the
    /// number of rows cleared.
    pub async fn clear(
        &self,
        device: Device,
        cleared_by: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE manual_overrides \
             SET is_active = 0, cleared_at = ?, cleared_by = ? \
             WHERE device_id = ? AND is_active = 1",
        )
        .bind(now)
        .bind(cleared_by)
        .bind(device.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deactivate active overrides for every device. Idempotent.
    pub async fn clear_all(&self, cleared_by: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE manual_overrides \
             SET is_active = 0, cleared_at = ?, cleared_by = ? \
             WHERE is_active = 1",
        )
        .bind(now)
        .bind(cleared_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Most recent unexpired active override for the device, if any.
    ///
    /// Observing more than one active row means the single-active invariant
    /// was violated; the newest wins and the older rows are repaired.
    pub async fn status(
        &self,
        device: Device,
        now: DateTime<Utc>,
    ) -> Result<Option<ManualStatus>> {
        let rows: Vec<ManualOverrideRow> = sqlx::query_as(
            "SELECT id, device_id, is_active, desired_state, source, \
                    created_at, expires_at, cleared_at, cleared_by \
             FROM manual_overrides \
             WHERE device_id = ? AND is_active = 1 \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(device.as_str())
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            error!(
                device = %device,
                count = rows.len(),
                "multiple active manual overrides found, repairing"
            );
            let newest_id = rows[0].id;
            sqlx::query(
                "UPDATE manual_overrides \
                 SET is_active = 0, cleared_at = ?, cleared_by = ? \
                 WHERE device_id = ? AND is_active = 1 AND id != ?",
            )
            .bind(now)
            .bind(CLEARED_BY_REPAIR)
            .bind(device.as_str())
            .bind(newest_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(rows
            .into_iter()
            .next()
            .filter(|row| row.expires_at > now)
            .map(|row| ManualStatus {
                desired_state: row.desired_state,
                source: row.source,
                time_remaining_minutes: (row.expires_at - now).num_minutes().max(0),
                expires_at: row.expires_at,
            }))
    }

    /// Deactivate overrides whose expiry has passed. Called by the expiry
    /// worker; idempotent and safe under redundant runs.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE manual_overrides \
             SET is_active = 0, cleared_at = ?, cleared_by = ? \
             WHERE is_active = 1 AND expires_at <= ?",
        )
        .bind(now)
        .bind(CLEARED_BY_EXPIRY)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Full row history for a device, newest first. Test and audit helper.
    pub async fn rows_for(&self, device: Device) -> Result<Vec<ManualOverrideRow>> {
        let rows = sqlx::query_as(
            "SELECT id, device_id, is_active, desired_state, source, \
                    created_at, expires_at, cleared_at, cleared_by \
             FROM manual_overrides WHERE device_id = ? \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(device.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(Clone)]
pub struct ScheduleOverrideStore {
    pool: SqlitePool,
    stale_threshold: chrono::Duration,
}

impl ScheduleOverrideStore {
    pub fn new(pool: SqlitePool, stale_threshold_s: u64) -> Self {
        Self {
            pool,
            stale_threshold: chrono::Duration::seconds(stale_threshold_s as i64),
        }
    }

    /// Heartbeat-bearing report from the external schedule source.
    pub async fn report(
        &self,
        device: Device,
        is_active: bool,
        reason: &str,
        reported_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if is_active {
            sqlx::query(
                "INSERT INTO schedule_overrides \
                 (device_id, is_active, reason, activated_at, deactivated_at, updated_at) \
                 VALUES (?, 1, ?, ?, NULL, ?) \
                 ON CONFLICT(device_id) DO UPDATE SET \
                     is_active = 1, \
                     reason = excluded.reason, \
                     activated_at = CASE WHEN schedule_overrides.is_active = 1 \
                                         THEN schedule_overrides.activated_at \
                                         ELSE excluded.activated_at END, \
                     deactivated_at = NULL, \
                     updated_at = excluded.updated_at",
            )
            .bind(device.as_str())
            .bind(reason)
            .bind(reported_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO schedule_overrides \
                 (device_id, is_active, reason, activated_at, deactivated_at, updated_at) \
                 VALUES (?, 0, ?, NULL, ?, ?) \
                 ON CONFLICT(device_id) DO UPDATE SET \
                     is_active = 0, \
                     deactivated_at = excluded.deactivated_at, \
                     updated_at = excluded.updated_at",
            )
            .bind(device.as_str())
            .bind(reason)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO schedule_override_events (device_id, is_active, reason, reported_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(device.as_str())
        .bind(is_active)
        .bind(reason)
        .bind(reported_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Active iff the stored flag is set and the heartbeat is fresh.
    pub async fn status(
        &self,
        device: Device,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleStatus>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            is_active: bool,
            reason: String,
            activated_at: Option<DateTime<Utc>>,
            updated_at: DateTime<Utc>,
        }

        let row: Option<Row> = sqlx::query_as(
            "SELECT is_active, reason, activated_at, updated_at \
             FROM schedule_overrides WHERE device_id = ?",
        )
        .bind(device.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .filter(|r| r.is_active && (now - r.updated_at) <= self.stale_threshold)
            .map(|r| ScheduleStatus {
                reason: r.reason,
                duration_minutes: r
                    .activated_at
                    .map(|t| (now - t).num_minutes().max(0))
                    .unwrap_or(0),
                activated_at: r.activated_at,
            }))
    }

    /// Recent transitions, newest first.
    pub async fn history(
        &self,
        device: Option<Device>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ScheduleEvent>> {
        let device_filter = device.map(|d| d.as_str().to_string());
        let rows = sqlx::query_as(
            "SELECT id, device_id, is_active, reason, reported_at \
             FROM schedule_override_events \
             WHERE (?1 IS NULL OR device_id = ?1) \
               AND (?2 IS NULL OR reported_at >= ?2) \
               AND (?3 IS NULL OR reported_at < ?3) \
             ORDER BY reported_at DESC, id DESC \
             LIMIT ?4",
        )
        .bind(device_filter)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
