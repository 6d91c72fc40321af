//! Decision engine: wires the tariff store, bridge adapter, optimiser,
//! override store and resolver into the recommendation pipeline.

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::bridge::{solar, HttpStateBridge, SnapshotOrigin, StateAdapter, StateBridge};
use crate::config::Config;
use crate::domain::{
    DeviceDecision, OptimizationStatus, PerDevice, Recommendation, SystemState,
};
use crate::optimizer::{
    immersion, BatteryParams, Optimizer, OptimizerInput, OptimizerOutcome, StepPrice,
};
use crate::overrides::{ManualOverrideStore, ScheduleOverrideStore};
use crate::recommendations::RecommendationStore;
use crate::resolver;
use crate::tariff::{classifier, IngestReport, TariffStore};
use crate::tariff::client::TariffClient;

/// Shared state handed to every request handler. Cheap to clone; all
/// long-lived state lives behind the pool or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub pool: SqlitePool,
    pub tariff: TariffStore,
    pub tariff_client: TariffClient,
    pub manual: ManualOverrideStore,
    pub schedule: ScheduleOverrideStore,
    pub recommendations: RecommendationStore,
    pub adapter: Arc<StateAdapter>,
    pub optimizer: Arc<Optimizer>,
}

/// Result of a tariff refresh; `stale` marks a response served from the
/// store after the external fetch failed.
#[derive(Debug, serde::Serialize)]
pub struct RefreshOutcome {
    /// Rows written by this refresh (inserted + updated).
    pub prices_stored: usize,
    #[serde(flatten)]
    pub report: IngestReport,
    pub coverage_hours: f64,
    pub stale: bool,
    pub statistics: Option<crate::domain::PriceWindowStats>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let bridge: Arc<dyn StateBridge> = Arc::new(HttpStateBridge::new(&cfg.bridge)?);
        Self::with_bridge(cfg, bridge).await
    }

    /// Test seam: same wiring with a caller-supplied bridge.
    pub async fn with_bridge(cfg: Config, bridge: Arc<dyn StateBridge>) -> Result<Self> {
        let pool = crate::db::connect(&cfg.database).await?;
        let adapter = Arc::new(StateAdapter::new(bridge, &cfg.bridge, &cfg.solar));
        let optimizer = Arc::new(Optimizer::new(&cfg));

        Ok(Self {
            tariff: TariffStore::new(pool.clone()),
            tariff_client: TariffClient::new(&cfg.tariff)?,
            manual: ManualOverrideStore::new(pool.clone()),
            schedule: ScheduleOverrideStore::new(
                pool.clone(),
                cfg.overrides.schedule_stale_threshold_s,
            ),
            recommendations: RecommendationStore::new(pool.clone()),
            adapter,
            optimizer,
            pool,
            cfg,
        })
    }

    /// Pull the look-ahead window from the tariff API into the store.
    ///
    /// A fetch failure is not an error: the response is built from the
    /// store and flagged stale.
    pub async fn refresh_prices(&self, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let from = classifier::align_to_half_hour(now);
        let to = from + chrono::Duration::hours(48);

        let fetched = self
            .tariff_client
            .fetch_unit_rates(from - chrono::Duration::hours(1), to)
            .await;

        let (report, stale) = match fetched {
            Ok(points) => (self.tariff.ingest(points, now).await?, false),
            Err(e) => {
                warn!(error = %e, "tariff fetch failed, serving stored prices");
                (IngestReport::default(), true)
            }
        };

        let window = self.tariff.get_window(from, to).await?;
        Ok(RefreshOutcome {
            prices_stored: report.inserted + report.updated,
            report,
            coverage_hours: window.points.len() as f64 * 0.5,
            stale,
            statistics: classifier::window_stats(&window.points),
        })
    }

    /// Latest plant state, through the cache/fallback ladder.
    pub async fn current_state(&self, now: DateTime<Utc>) -> SystemState {
        self.adapter.snapshot(now).await.0
    }

    /// The full pipeline: prices → snapshot → solve → rules → overrides →
    /// resolve → persist.
    ///
    /// Only persistence failures surface as errors; missing prices, bridge
    /// outages and solver trouble all land in a fallback recommendation.
    pub async fn recommend(&self, now: DateTime<Utc>) -> Result<Recommendation> {
        let start = classifier::align_to_half_hour(now);
        let end = start
            + chrono::Duration::minutes(30 * self.cfg.optimizer.horizon_steps as i64);

        let window = self.tariff.get_window(start, end).await?;
        let (snapshot, origin) = self.adapter.snapshot(now).await;

        let (outcome, optimizer_devices) = if window.is_empty() {
            self.fallback_outcome("fallback: no tariff data", &snapshot)
        } else if origin == SnapshotOrigin::Fallback {
            self.fallback_outcome("fallback: bridge state unavailable", &snapshot)
        } else {
            self.optimize(&window.points, &snapshot).await
        };

        let manual = PerDevice::new(
            self.manual.status(crate::domain::Device::Main, now).await?,
            self.manual.status(crate::domain::Device::Lucy, now).await?,
        );
        let schedule = PerDevice::new(
            self.schedule
                .status(crate::domain::Device::Main, now)
                .await?,
            self.schedule
                .status(crate::domain::Device::Lucy, now)
                .await?,
        );

        let resolved = resolver::resolve(&optimizer_devices, &schedule, &manual);

        let recommendation = Recommendation {
            id: Uuid::new_v4(),
            timestamp: now,
            horizon_steps: outcome.horizon_steps,
            battery_mode: outcome.mode,
            discharge_current_amps: outcome.discharge_current_amps,
            devices: resolved.devices,
            optimization_status: outcome.status,
            optimization_time_ms: outcome.solve_time_ms,
            expected_soc_percent: outcome.expected_soc_percent,
            manual_override_active: resolved.manual_override_active,
            schedule_override_active: resolved.schedule_override_active,
        };

        self.recommendations.insert(&recommendation).await?;
        Ok(recommendation)
    }

    async fn optimize(
        &self,
        points: &[crate::domain::PricePoint],
        snapshot: &SystemState,
    ) -> (OptimizerOutcome, PerDevice<DeviceDecision>) {
        let step_starts: Vec<DateTime<Utc>> = points.iter().map(|p| p.valid_from).collect();

        let input = OptimizerInput {
            initial_soc_percent: snapshot.battery_soc_percent,
            prices: points
                .iter()
                .map(|p| StepPrice {
                    valid_from: p.valid_from,
                    unit_price: p.unit_price,
                    classification: p.classification,
                })
                .collect(),
            solar_kwh: solar::solar_per_step(snapshot, &step_starts),
            load_kwh: step_starts
                .iter()
                .map(|t| {
                    let slot = (t.hour() * 2 + t.minute() / 30) as usize;
                    self.cfg.optimizer.load_kwh_for_slot(slot)
                })
                .collect(),
            battery: BatteryParams::from_config(&self.cfg.battery),
            export_price_ppkwh: self.cfg.tariff.export_price_ppkwh,
            grid_import_limit_kw: self.cfg.grid.import_limit_kw,
            grid_export_limit_kw: self.cfg.grid.export_limit_kw,
            current_solar_kw: snapshot.solar_power_kw,
        };

        let (outcome, _schedule) = self.optimizer.run(input).await;

        let devices = if outcome.status == OptimizationStatus::Fallback {
            PerDevice::uniform(DeviceDecision::off(
                crate::domain::DecisionSource::Optimizer,
                outcome.reason.clone(),
            ))
        } else {
            let prices: Vec<f64> = points.iter().map(|p| p.unit_price).collect();
            let cheap_threshold = classifier::thresholds(&prices).map(|t| t.cheap);
            PerDevice::uniform(immersion::evaluate(
                &self.cfg.immersion,
                &immersion::ImmersionInputs {
                    unit_price: points[0].unit_price,
                    cheap_threshold,
                    solar_power_kw: snapshot.solar_power_kw,
                    battery_soc_percent: snapshot.battery_soc_percent,
                },
            ))
        };

        (outcome, devices)
    }

    fn fallback_outcome(
        &self,
        reason: &str,
        snapshot: &SystemState,
    ) -> (OptimizerOutcome, PerDevice<DeviceDecision>) {
        let outcome = OptimizerOutcome {
            mode: crate::domain::BatteryMode::SelfUse,
            discharge_current_amps: self.cfg.battery.default_discharge_current_a,
            expected_soc_percent: snapshot.battery_soc_percent,
            status: OptimizationStatus::Fallback,
            reason: reason.to_string(),
            solve_time_ms: 0,
            horizon_steps: 0,
        };
        let devices = PerDevice::uniform(DeviceDecision::off(
            crate::domain::DecisionSource::Optimizer,
            reason,
        ));
        (outcome, devices)
    }
}
