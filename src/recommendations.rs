//! Audit store for emitted recommendations.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{
    BatteryMode, DecisionSource, DeviceDecision, OptimizationStatus, PerDevice, Recommendation,
};

#[derive(Clone)]
pub struct RecommendationStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    id: String,
    timestamp: DateTime<Utc>,
    horizon_steps: i64,
    battery_mode: String,
    discharge_current_amps: i64,
    main_desired: bool,
    main_source: String,
    main_reason: String,
    lucy_desired: bool,
    lucy_source: String,
    lucy_reason: String,
    optimization_status: String,
    optimization_time_ms: i64,
    expected_soc_percent: f64,
    manual_override_active: bool,
    schedule_override_active: bool,
}

impl RecommendationRow {
    fn into_recommendation(self) -> Result<Recommendation> {
        let battery_mode: BatteryMode = self
            .battery_mode
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown battery mode: {}", self.battery_mode))?;
        let status: OptimizationStatus = self
            .optimization_status
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown status: {}", self.optimization_status))?;

        let decision = |desired: bool, source: &str, reason: String| -> Result<DeviceDecision> {
            Ok(DeviceDecision {
                desired,
                source: source
                    .parse::<DecisionSource>()
                    .map_err(|_| anyhow::anyhow!("unknown decision source: {source}"))?,
                reason,
            })
        };

        Ok(Recommendation {
            id: Uuid::parse_str(&self.id).context("bad recommendation id")?,
            timestamp: self.timestamp,
            horizon_steps: self.horizon_steps as usize,
            battery_mode,
            discharge_current_amps: self.discharge_current_amps,
            devices: PerDevice::new(
                decision(self.main_desired, &self.main_source, self.main_reason)?,
                decision(self.lucy_desired, &self.lucy_source, self.lucy_reason)?,
            ),
            optimization_status: status,
            optimization_time_ms: self.optimization_time_ms as u64,
            expected_soc_percent: self.expected_soc_percent,
            manual_override_active: self.manual_override_active,
            schedule_override_active: self.schedule_override_active,
        })
    }
}

impl RecommendationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, rec: &Recommendation) -> Result<()> {
        sqlx::query(
            "INSERT INTO recommendations \
             (id, timestamp, horizon_steps, battery_mode, discharge_current_amps, \
              main_desired, main_source, main_reason, \
              lucy_desired, lucy_source, lucy_reason, \
              optimization_status, optimization_time_ms, expected_soc_percent, \
              manual_override_active, schedule_override_active) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rec.id.to_string())
        .bind(rec.timestamp)
        .bind(rec.horizon_steps as i64)
        .bind(rec.battery_mode.to_string())
        .bind(rec.discharge_current_amps)
        .bind(rec.devices.main.desired)
        .bind(rec.devices.main.source.to_string())
        .bind(&rec.devices.main.reason)
        .bind(rec.devices.lucy.desired)
        .bind(rec.devices.lucy.source.to_string())
        .bind(&rec.devices.lucy.reason)
        .bind(rec.optimization_status.to_string())
        .bind(rec.optimization_time_ms as i64)
        .bind(rec.expected_soc_percent)
        .bind(rec.manual_override_active)
        .bind(rec.schedule_override_active)
        .execute(&self.pool)
        .await
        .context("recommendation insert failed")?;
        Ok(())
    }

    pub async fn latest(&self) -> Result<Option<Recommendation>> {
        let row: Option<RecommendationRow> = sqlx::query_as(
            "SELECT id, timestamp, horizon_steps, battery_mode, discharge_current_amps, \
                    main_desired, main_source, main_reason, \
                    lucy_desired, lucy_source, lucy_reason, \
                    optimization_status, optimization_time_ms, expected_soc_percent, \
                    manual_override_active, schedule_override_active \
             FROM recommendations ORDER BY timestamp DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecommendationRow::into_recommendation).transpose()
    }
}
