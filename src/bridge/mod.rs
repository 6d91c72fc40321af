//! Forecast & state adapter: the only part of the core that talks to the
//! smart-home bridge.

pub mod solar;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{BridgeConfig, SolarConfig};
use crate::domain::SystemState;

#[async_trait]
pub trait StateBridge: Send + Sync {
    /// One bounded-latency read of the plant state.
    async fn snapshot(&self, now: DateTime<Utc>) -> Result<SystemState>;
}

/// REST bridge reading individual sensor entities.
///
/// Sensors that are missing or report a non-numeric state fall back to the
/// safe defaults (`solar = 0`, `soc = 50`) and flag the snapshot degraded.
pub struct HttpStateBridge {
    base_url: String,
    soc_entity: String,
    solar_power_entity: String,
    solar_remaining_entity: String,
    solar_next_hour_entity: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct EntityState {
    state: String,
}

impl HttpStateBridge {
    pub fn new(cfg: &BridgeConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &cfg.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("bridge token is not a valid header value")?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.read_deadline_secs))
            .default_headers(headers)
            .build()
            .context("Failed to build bridge HTTP client")?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            soc_entity: cfg.soc_entity.clone(),
            solar_power_entity: cfg.solar_power_entity.clone(),
            solar_remaining_entity: cfg.solar_remaining_entity.clone(),
            solar_next_hour_entity: cfg.solar_next_hour_entity.clone(),
            client,
        })
    }

    /// Read one sensor, returning `None` for unknown/unavailable states.
    async fn read_sensor(&self, entity_id: &str) -> Result<Option<f64>> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("bridge GET failed for {entity_id}"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("bridge error for {entity_id}: HTTP {}", resp.status());
        }

        let entity: EntityState = resp
            .json()
            .await
            .with_context(|| format!("bridge JSON parse failed for {entity_id}"))?;
        Ok(entity.state.parse::<f64>().ok())
    }
}

#[async_trait]
impl StateBridge for HttpStateBridge {
    async fn snapshot(&self, now: DateTime<Utc>) -> Result<SystemState> {
        let (soc, solar_power, solar_remaining, solar_next_hour) = tokio::try_join!(
            self.read_sensor(&self.soc_entity),
            self.read_sensor(&self.solar_power_entity),
            self.read_sensor(&self.solar_remaining_entity),
            self.read_sensor(&self.solar_next_hour_entity),
        )?;

        let degraded = soc.is_none()
            || solar_power.is_none()
            || solar_remaining.is_none()
            || solar_next_hour.is_none();
        if degraded {
            warn!("one or more bridge sensors unavailable, using safe defaults");
        }

        Ok(SystemState {
            battery_soc_percent: soc.unwrap_or(50.0).clamp(0.0, 100.0),
            solar_power_kw: solar_power.unwrap_or(0.0).max(0.0),
            solar_remaining_today_kwh: solar_remaining.unwrap_or(0.0).max(0.0),
            solar_next_hour_kwh: solar_next_hour.unwrap_or(0.0).max(0.0),
            timestamp: now,
            degraded,
        })
    }
}

/// Where a snapshot came from. `Fallback` tells the engine to skip the
/// solve and emit the conservative recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    Live,
    Cached,
    Fallback,
}

/// Caches the last good snapshot so a flaky bridge degrades gracefully
/// instead of failing a recommendation.
pub struct StateAdapter {
    bridge: Arc<dyn StateBridge>,
    last_good: RwLock<Option<SystemState>>,
    read_deadline: Duration,
    stale_after: chrono::Duration,
    solar_capacity_kw: f64,
}

impl StateAdapter {
    pub fn new(bridge: Arc<dyn StateBridge>, cfg: &BridgeConfig, solar: &SolarConfig) -> Self {
        Self {
            bridge,
            last_good: RwLock::new(None),
            read_deadline: Duration::from_secs(cfg.read_deadline_secs),
            stale_after: chrono::Duration::seconds(cfg.snapshot_stale_secs as i64),
            solar_capacity_kw: solar.capacity_kw,
        }
    }

    /// Infallible snapshot: live read, else cached-if-fresh, else the
    /// conservative fallback state (which downstream reports as such).
    pub async fn snapshot(&self, now: DateTime<Utc>) -> (SystemState, SnapshotOrigin) {
        let read = tokio::time::timeout(self.read_deadline, self.bridge.snapshot(now)).await;

        match read {
            Ok(Ok(state)) => {
                let state = self.sanity_check(state);
                *self.last_good.write().await = Some(state.clone());
                (state, SnapshotOrigin::Live)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "bridge read failed");
                self.cached_or_fallback(now).await
            }
            Err(_) => {
                warn!(deadline = ?self.read_deadline, "bridge read timed out");
                self.cached_or_fallback(now).await
            }
        }
    }

    async fn cached_or_fallback(&self, now: DateTime<Utc>) -> (SystemState, SnapshotOrigin) {
        let cached = self.last_good.read().await.clone();
        match cached {
            Some(state) if now - state.timestamp <= self.stale_after => {
                (state, SnapshotOrigin::Cached)
            }
            _ => (SystemState::fallback(now), SnapshotOrigin::Fallback),
        }
    }

    fn sanity_check(&self, mut state: SystemState) -> SystemState {
        if state.solar_power_kw > self.solar_capacity_kw {
            warn!(
                reported = state.solar_power_kw,
                capacity = self.solar_capacity_kw,
                "solar reading exceeds array capacity, clamping"
            );
            state.solar_power_kw = self.solar_capacity_kw;
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedBridge(SystemState);

    #[async_trait]
    impl StateBridge for FixedBridge {
        async fn snapshot(&self, _now: DateTime<Utc>) -> Result<SystemState> {
            Ok(self.0.clone())
        }
    }

    struct FailingBridge;

    #[async_trait]
    impl StateBridge for FailingBridge {
        async fn snapshot(&self, _now: DateTime<Utc>) -> Result<SystemState> {
            anyhow::bail!("bridge down")
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap()
    }

    fn state_at(ts: DateTime<Utc>) -> SystemState {
        SystemState {
            battery_soc_percent: 72.0,
            solar_power_kw: 2.5,
            solar_remaining_today_kwh: 6.0,
            solar_next_hour_kwh: 1.5,
            timestamp: ts,
            degraded: false,
        }
    }

    fn adapter(bridge: Arc<dyn StateBridge>) -> StateAdapter {
        let cfg = crate::config::test_config();
        StateAdapter::new(bridge, &cfg.bridge, &cfg.solar)
    }

    #[tokio::test]
    async fn live_read_wins_and_populates_cache() {
        let adapter = adapter(Arc::new(FixedBridge(state_at(t0()))));
        let (snap, origin) = adapter.snapshot(t0()).await;
        assert_eq!(snap.battery_soc_percent, 72.0);
        assert!(!snap.degraded);
        assert_eq!(origin, SnapshotOrigin::Live);
    }

    #[tokio::test]
    async fn failure_serves_fresh_cache() {
        let adapter = adapter(Arc::new(FixedBridge(state_at(t0()))));
        adapter.snapshot(t0()).await;

        // Swap in a failing bridge behind the same cache.
        let failing = StateAdapter {
            bridge: Arc::new(FailingBridge),
            last_good: RwLock::new(Some(state_at(t0()))),
            read_deadline: adapter.read_deadline,
            stale_after: adapter.stale_after,
            solar_capacity_kw: adapter.solar_capacity_kw,
        };

        let two_minutes_later = t0() + chrono::Duration::minutes(2);
        let (snap, origin) = failing.snapshot(two_minutes_later).await;
        assert_eq!(snap.battery_soc_percent, 72.0, "fresh cache is served");
        assert_eq!(origin, SnapshotOrigin::Cached);

        let ten_minutes_later = t0() + chrono::Duration::minutes(10);
        let (snap, origin) = failing.snapshot(ten_minutes_later).await;
        assert!(snap.degraded, "stale cache falls back to defaults");
        assert_eq!(snap.battery_soc_percent, 50.0);
        assert_eq!(origin, SnapshotOrigin::Fallback);
    }

    #[tokio::test]
    async fn solar_above_capacity_is_clamped() {
        let mut state = state_at(t0());
        state.solar_power_kw = 50.0;
        let adapter = adapter(Arc::new(FixedBridge(state)));
        let (snap, _) = adapter.snapshot(t0()).await;
        assert_eq!(snap.solar_power_kw, 8.0);
    }
}
