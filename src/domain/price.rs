use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relative position of a half-hour unit rate within the look-ahead window.
///
/// `Negative` is absolute (price below zero); `Cheap`/`Expensive` are
/// percentile buckets over the non-negative prices in the window, so the
/// same pence value can land in different buckets on different days.
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
pub enum Classification {
    Negative,
    Cheap,
    Normal,
    Expensive,
}

/// One half-hour tariff window.
///
/// `unit_price` is pence per kWh and may be negative. Windows are
/// contiguous 30-minute slots aligned to the half hour, UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub unit_price: f64,
    pub classification: Classification,
}

/// Summary statistics over a price window. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceWindowStats {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub cheap_threshold: f64,
    pub expensive_threshold: f64,
    pub negative_count: usize,
    pub cheap_count: usize,
    pub normal_count: usize,
    pub expensive_count: usize,
}
