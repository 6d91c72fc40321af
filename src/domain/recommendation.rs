use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Device, PerDevice};

/// Inverter operating mode for the current half hour.
///
/// Serialised with the inverter's own display strings so the record can be
/// applied verbatim by the actuator adapter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum BatteryMode {
    #[serde(rename = "Force Charge")]
    #[strum(serialize = "Force Charge")]
    ForceCharge,
    #[serde(rename = "Force Discharge")]
    #[strum(serialize = "Force Discharge")]
    ForceDischarge,
    #[serde(rename = "Self Use")]
    #[strum(serialize = "Self Use")]
    SelfUse,
    #[serde(rename = "Feed-in First")]
    #[strum(serialize = "Feed-in First")]
    FeedInFirst,
}

/// Which tier of the priority resolver produced a device decision.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecisionSource {
    ManualOverride,
    ScheduleOverride,
    Optimizer,
}

/// How the solver run ended.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OptimizationStatus {
    Optimal,
    Feasible,
    Fallback,
}

/// Final on/off decision for one immersion, tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDecision {
    pub desired: bool,
    pub source: DecisionSource,
    pub reason: String,
}

impl DeviceDecision {
    pub fn off(source: DecisionSource, reason: impl Into<String>) -> Self {
        Self {
            desired: false,
            source,
            reason: reason.into(),
        }
    }
}

/// The full decision record for one control interval, persisted for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Number of half-hour steps the optimisation covered.
    pub horizon_steps: usize,
    pub battery_mode: BatteryMode,
    pub discharge_current_amps: i64,
    pub devices: PerDevice<DeviceDecision>,
    pub optimization_status: OptimizationStatus,
    pub optimization_time_ms: u64,
    /// Solver's SoC prediction for the end of the current half hour.
    pub expected_soc_percent: f64,
    pub manual_override_active: bool,
    pub schedule_override_active: bool,
}

impl Recommendation {
    pub fn device(&self, device: Device) -> &DeviceDecision {
        self.devices.get(device)
    }
}
