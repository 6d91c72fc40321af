//! End-to-end decision scenarios over an in-memory store and a stubbed
//! smart-home bridge.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use homeflux::bridge::StateBridge;
use homeflux::config::test_config;
use homeflux::domain::{
    BatteryMode, DecisionSource, Device, OptimizationStatus, SystemState,
};
use homeflux::engine::AppState;
use homeflux::overrides::CLEARED_BY_EXPIRY;
use homeflux::tariff::RawPricePoint;

struct StubBridge {
    soc_percent: f64,
    solar_kw: f64,
}

#[async_trait]
impl StateBridge for StubBridge {
    async fn snapshot(&self, now: DateTime<Utc>) -> Result<SystemState> {
        Ok(SystemState {
            battery_soc_percent: self.soc_percent,
            solar_power_kw: self.solar_kw,
            solar_remaining_today_kwh: 0.0,
            solar_next_hour_kwh: 0.0,
            timestamp: now,
            degraded: false,
        })
    }
}

fn t0() -> DateTime<Utc> {
    // A half-hour boundary, so step 0 of the horizon starts exactly here.
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
}

async fn app_with(soc_percent: f64, solar_kw: f64) -> AppState {
    AppState::with_bridge(
        test_config(),
        Arc::new(StubBridge {
            soc_percent,
            solar_kw,
        }),
    )
    .await
    .unwrap()
}

/// 48 half-hour points starting at `start`, three price tiers in order.
fn tiered_prices(start: DateTime<Utc>, tiers: [f64; 3]) -> Vec<RawPricePoint> {
    (0..48)
        .map(|i| {
            let valid_from = start + chrono::Duration::minutes(30 * i);
            RawPricePoint {
                valid_from,
                valid_to: valid_from + chrono::Duration::minutes(30),
                unit_price: tiers[(i / 16) as usize],
            }
        })
        .collect()
}

#[tokio::test]
async fn s1_manual_override_wins_over_cheap_price() {
    let app = app_with(98.0, 0.0).await;
    let now = t0();

    // Cheap window now: the optimiser alone would heat both tanks.
    app.tariff
        .ingest(tiered_prices(now, [2.0, 10.0, 30.0]), now)
        .await
        .unwrap();

    app.manual
        .set(Device::Main, false, chrono::Duration::hours(2), "user", now)
        .await
        .unwrap();

    let rec = app.recommend(now).await.unwrap();

    let main = rec.device(Device::Main);
    assert!(!main.desired);
    assert_eq!(main.source, DecisionSource::ManualOverride);
    assert_eq!(main.reason, "Manual override (120 min remaining)");

    let lucy = rec.device(Device::Lucy);
    assert!(lucy.desired, "lucy still follows the optimiser");
    assert_eq!(lucy.source, DecisionSource::Optimizer);
    assert!(lucy.reason.contains("Cheap price"));

    assert!(rec.manual_override_active);
    assert!(!rec.schedule_override_active);
}

#[tokio::test]
async fn s2_schedule_override_wins_over_expensive_price() {
    let app = app_with(45.0, 0.0).await;
    let now = t0();

    // Expensive window now: the optimiser alone would leave main off.
    app.tariff
        .ingest(tiered_prices(now, [30.0, 10.0, 2.0]), now)
        .await
        .unwrap();

    app.schedule
        .report(Device::Main, true, "Wed 15:00-17:00", now, now)
        .await
        .unwrap();

    let rec = app.recommend(now).await.unwrap();

    let main = rec.device(Device::Main);
    assert!(main.desired);
    assert_eq!(main.source, DecisionSource::ScheduleOverride);
    assert_eq!(main.reason, "Wed 15:00-17:00");

    let lucy = rec.device(Device::Lucy);
    assert!(!lucy.desired);
    assert_eq!(lucy.source, DecisionSource::Optimizer);

    assert!(rec.schedule_override_active);
}

#[tokio::test]
async fn s3_expired_override_returns_control_to_optimizer() {
    let app = app_with(50.0, 0.0).await;
    let now = t0();

    app.tariff
        .ingest(tiered_prices(now, [10.0, 15.0, 20.0]), now)
        .await
        .unwrap();

    // 3-minute override; the worker tick lands at +4 minutes.
    app.manual
        .set(
            Device::Main,
            true,
            chrono::Duration::seconds(180),
            "user",
            now,
        )
        .await
        .unwrap();

    let tick_time = now + chrono::Duration::seconds(240);
    let swept = app.manual.expire_due(tick_time).await.unwrap();
    assert_eq!(swept, 1);

    let rec = app.recommend(tick_time).await.unwrap();
    assert_eq!(rec.device(Device::Main).source, DecisionSource::Optimizer);

    let rows = app.manual.rows_for(Device::Main).await.unwrap();
    assert!(!rows[0].is_active);
    assert_eq!(rows[0].cleared_by.as_deref(), Some(CLEARED_BY_EXPIRY));
}

#[tokio::test]
async fn s4_second_set_replaces_first() {
    let app = app_with(50.0, 0.0).await;
    let now = t0();

    app.manual
        .set(Device::Main, true, chrono::Duration::hours(2), "user", now)
        .await
        .unwrap();
    app.manual
        .set(
            Device::Main,
            false,
            chrono::Duration::hours(2),
            "user",
            now + chrono::Duration::seconds(1),
        )
        .await
        .unwrap();

    let rows = app.manual.rows_for(Device::Main).await.unwrap();
    let active: Vec<_> = rows.iter().filter(|r| r.is_active).collect();
    assert_eq!(active.len(), 1);
    assert!(!active[0].desired_state, "second call wins");

    let replaced = rows.iter().find(|r| !r.is_active).unwrap();
    assert_eq!(replaced.cleared_by.as_deref(), Some("system_replaced"));
}

#[tokio::test]
async fn s5_negative_price_with_full_battery_heats_and_charges() {
    let app = app_with(92.0, 0.0).await;
    let now = t0();

    let mut points = tiered_prices(now, [3.0, 5.0, 8.0]);
    points[0].unit_price = -2.0;
    app.tariff.ingest(points, now).await.unwrap();

    let rec = app.recommend(now).await.unwrap();

    assert_eq!(rec.battery_mode, BatteryMode::ForceCharge);
    assert_eq!(rec.discharge_current_amps, 0);

    for device in Device::ALL {
        let decision = rec.device(device);
        assert!(decision.desired);
        assert_eq!(decision.source, DecisionSource::Optimizer);
        assert!(decision.reason.contains("Negative price"));
    }
}

#[tokio::test]
async fn s6_empty_tariff_store_falls_back() {
    let app = app_with(50.0, 0.0).await;
    let now = t0();

    let rec = app.recommend(now).await.unwrap();

    assert_eq!(rec.battery_mode, BatteryMode::SelfUse);
    assert_eq!(rec.discharge_current_amps, 50);
    assert_eq!(rec.optimization_status, OptimizationStatus::Fallback);
    for device in Device::ALL {
        let decision = rec.device(device);
        assert!(!decision.desired);
        assert_eq!(decision.reason, "fallback: no tariff data");
    }
}

#[tokio::test]
async fn stale_schedule_heartbeat_is_ignored_by_the_pipeline() {
    let app = app_with(50.0, 0.0).await;
    let now = t0();

    app.tariff
        .ingest(tiered_prices(now, [10.0, 15.0, 20.0]), now)
        .await
        .unwrap();
    app.schedule
        .report(Device::Main, true, "slot", now, now)
        .await
        .unwrap();

    // Heartbeat threshold is 300 s; six minutes later the schedule source
    // is presumed dead.
    let later = now + chrono::Duration::seconds(360);
    let rec = app.recommend(later).await.unwrap();

    assert_eq!(rec.device(Device::Main).source, DecisionSource::Optimizer);
    assert!(!rec.schedule_override_active);
}

#[tokio::test]
async fn every_recommendation_is_persisted_for_audit() {
    let app = app_with(50.0, 0.0).await;
    let now = t0();

    app.tariff
        .ingest(tiered_prices(now, [10.0, 15.0, 20.0]), now)
        .await
        .unwrap();

    let rec = app.recommend(now).await.unwrap();
    let stored = app.recommendations.latest().await.unwrap().unwrap();
    assert_eq!(stored, rec);
}
