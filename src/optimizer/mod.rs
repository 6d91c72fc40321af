//! Battery scheduling optimiser.
//!
//! Formulates and solves a linear program over the price horizon, then
//! decodes step 0 into an inverter mode and discharge current. The solve
//! runs on a blocking thread under a hard wall-clock timeout; every failure
//! path decodes to the deterministic fallback instead of an error.

pub mod immersion;
pub mod lp;

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use crate::config::AppConfig;
use crate::domain::{BatteryMode, Classification, OptimizationStatus};

/// Charge/discharge amounts below this are treated as idle, kWh.
const DECISION_EPSILON_KWH: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct BatteryParams {
    pub capacity_kwh: f64,
    pub max_charge_kw: f64,
    pub max_discharge_kw: f64,
    pub efficiency: f64,
    pub min_soc_percent: f64,
    pub max_soc_percent: f64,
    pub min_terminal_soc_percent: f64,
}

impl BatteryParams {
    pub fn from_config(cfg: &crate::config::BatteryConfig) -> Self {
        Self {
            capacity_kwh: cfg.capacity_kwh,
            max_charge_kw: cfg.max_charge_kw,
            max_discharge_kw: cfg.max_discharge_kw,
            efficiency: cfg.efficiency,
            min_soc_percent: cfg.min_soc_percent,
            max_soc_percent: cfg.max_soc_percent,
            min_terminal_soc_percent: cfg.min_terminal_soc(),
        }
    }
}

/// One horizon step's price, as the solver sees it.
#[derive(Debug, Clone)]
pub struct StepPrice {
    pub valid_from: DateTime<Utc>,
    pub unit_price: f64,
    pub classification: Classification,
}

/// Everything one solve needs; built by the engine from store + bridge.
#[derive(Debug, Clone)]
pub struct OptimizerInput {
    pub initial_soc_percent: f64,
    pub prices: Vec<StepPrice>,
    pub solar_kwh: Vec<f64>,
    pub load_kwh: Vec<f64>,
    pub battery: BatteryParams,
    pub export_price_ppkwh: f64,
    pub grid_import_limit_kw: f64,
    pub grid_export_limit_kw: f64,
    /// Instantaneous solar output, used only by the step-0 decode.
    pub current_solar_kw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecision {
    pub valid_from: DateTime<Utc>,
    pub charge_kwh: f64,
    pub discharge_kwh: f64,
    pub import_kwh: f64,
    pub export_kwh: f64,
    pub end_soc_percent: f64,
}

#[derive(Debug, Clone)]
pub struct SolvedSchedule {
    pub steps: Vec<StepDecision>,
    pub expected_cost_pence: f64,
    pub status: OptimizationStatus,
}

/// Decoded battery action for the current half hour.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub mode: BatteryMode,
    pub discharge_current_amps: i64,
    pub expected_soc_percent: f64,
    pub status: OptimizationStatus,
    pub reason: String,
    pub solve_time_ms: u64,
    pub horizon_steps: usize,
}

pub struct Optimizer {
    solver_timeout: Duration,
    max_discharge_current_a: i64,
    default_discharge_current_a: i64,
    high_solar_kw: f64,
}

impl Optimizer {
    pub fn new(cfg: &AppConfig) -> Self {
        Self {
            solver_timeout: Duration::from_millis(cfg.optimizer.solver_timeout_ms),
            max_discharge_current_a: cfg.battery.max_discharge_current_a,
            default_discharge_current_a: cfg.battery.default_discharge_current_a,
            high_solar_kw: cfg.immersion.high_solar_kw,
        }
    }

    /// Solve and decode. Also returns the full schedule for callers that
    /// want the horizon, when one was produced.
    pub async fn run(&self, input: OptimizerInput) -> (OptimizerOutcome, Option<SolvedSchedule>) {
        let started = std::time::Instant::now();

        if input.prices.is_empty() {
            return (
                self.fallback(&input, "fallback: no tariff data", started),
                None,
            );
        }

        let solve_input = input.clone();
        let solved = tokio::time::timeout(
            self.solver_timeout,
            tokio::task::spawn_blocking(move || lp::solve(&solve_input)),
        )
        .await;

        match solved {
            Ok(Ok(Ok(schedule))) => {
                let outcome = self.decode(&input, &schedule, started);
                (outcome, Some(schedule))
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "solver failed, using fallback");
                (
                    self.fallback(&input, &format!("fallback: solver error: {e}"), started),
                    None,
                )
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "solver task aborted, using fallback");
                (
                    self.fallback(&input, "fallback: solver task aborted", started),
                    None,
                )
            }
            Err(_) => {
                warn!(timeout = ?self.solver_timeout, "solver timed out, using fallback");
                (
                    self.fallback(&input, "fallback: solver timeout", started),
                    None,
                )
            }
        }
    }

    fn decode(
        &self,
        input: &OptimizerInput,
        schedule: &SolvedSchedule,
        started: std::time::Instant,
    ) -> OptimizerOutcome {
        let step0 = &schedule.steps[0];
        let class0 = input.prices[0].classification;

        let (mode, amps, reason) = if step0.charge_kwh > DECISION_EPSILON_KWH
            && matches!(class0, Classification::Negative | Classification::Cheap)
        {
            (
                BatteryMode::ForceCharge,
                0,
                format!(
                    "Charging {:.2} kWh at {:.1}p ({class0})",
                    step0.charge_kwh, input.prices[0].unit_price
                ),
            )
        } else if step0.discharge_kwh > DECISION_EPSILON_KWH
            && class0 == Classification::Expensive
            && input.current_solar_kw < self.high_solar_kw
        {
            (
                BatteryMode::ForceDischarge,
                self.max_discharge_current_a,
                format!(
                    "Discharging {:.2} kWh at {:.1}p (expensive)",
                    step0.discharge_kwh, input.prices[0].unit_price
                ),
            )
        } else {
            (
                BatteryMode::SelfUse,
                self.default_discharge_current_a,
                "Self-use: no arbitrage signal this half hour".to_string(),
            )
        };

        OptimizerOutcome {
            mode,
            discharge_current_amps: amps,
            expected_soc_percent: step0.end_soc_percent,
            status: schedule.status,
            reason,
            solve_time_ms: started.elapsed().as_millis() as u64,
            horizon_steps: schedule.steps.len(),
        }
    }

    fn fallback(
        &self,
        input: &OptimizerInput,
        reason: &str,
        started: std::time::Instant,
    ) -> OptimizerOutcome {
        OptimizerOutcome {
            mode: BatteryMode::SelfUse,
            discharge_current_amps: self.default_discharge_current_a,
            expected_soc_percent: input.initial_soc_percent,
            status: OptimizationStatus::Fallback,
            reason: reason.to_string(),
            solve_time_ms: started.elapsed().as_millis() as u64,
            horizon_steps: input.prices.len(),
        }
    }
}
