use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time reading of the plant, as reported by the smart-home bridge.
///
/// This is an ephemeral snapshot: it feeds one optimisation run and is not
/// durably stored by the core (telemetry export is an external concern).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// Battery state of charge, percent of usable capacity.
    pub battery_soc_percent: f64,
    /// Instantaneous solar generation, kW.
    pub solar_power_kw: f64,
    /// Forecast solar still to come today, kWh.
    pub solar_remaining_today_kwh: f64,
    /// Forecast solar over the next hour, kWh.
    pub solar_next_hour_kwh: f64,
    pub timestamp: DateTime<Utc>,
    /// True when one or more sensors were unavailable and a safe default
    /// was substituted.
    pub degraded: bool,
}

impl SystemState {
    /// Conservative stand-in used when no live or cached snapshot exists.
    pub fn fallback(now: DateTime<Utc>) -> Self {
        Self {
            battery_soc_percent: 50.0,
            solar_power_kw: 0.0,
            solar_remaining_today_kwh: 0.0,
            solar_next_hour_kwh: 0.0,
            timestamp: now,
            degraded: true,
        }
    }
}
