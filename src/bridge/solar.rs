//! Per-step solar allocation from the bridge's aggregate forecasts.
//!
//! The bridge reports two aggregates: kWh expected over the next hour and
//! kWh remaining today. The next-hour figure is split across the first two
//! half-hour steps; whatever remains of today's forecast is spread evenly
//! over the later steps that still fall on the forecast day. Steps on
//! following days get zero (the bridge has no forecast for them).

use chrono::{DateTime, Utc};

use crate::domain::SystemState;

pub fn solar_per_step(state: &SystemState, step_starts: &[DateTime<Utc>]) -> Vec<f64> {
    let mut out = vec![0.0; step_starts.len()];
    if step_starts.is_empty() {
        return out;
    }

    let next_hour = state.solar_next_hour_kwh.min(state.solar_remaining_today_kwh);
    for slot in out.iter_mut().take(2) {
        *slot = next_hour / 2.0;
    }

    let forecast_day = state.timestamp.date_naive();
    let later_today: Vec<usize> = step_starts
        .iter()
        .enumerate()
        .skip(2)
        .filter(|(_, start)| start.date_naive() == forecast_day)
        .map(|(i, _)| i)
        .collect();

    let remainder = (state.solar_remaining_today_kwh - next_hour).max(0.0);
    if !later_today.is_empty() && remainder > 0.0 {
        let per_step = remainder / later_today.len() as f64;
        for i in later_today {
            out[i] = per_step;
        }
    }

    out
}
