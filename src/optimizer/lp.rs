//! Linear program for battery scheduling over the half-hourly horizon.
//!
//! One formulation, one entry point. All constants (efficiency inverse,
//! SoC-per-kWh) are precomputed so no decision variable is ever divided by.

use good_lp::{constraint, default_solver, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel};

use super::{OptimizerInput, SolvedSchedule, StepDecision};
use crate::domain::OptimizationStatus;

/// Half-hour step length in hours.
pub const STEP_HOURS: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("no price steps in horizon")]
    EmptyHorizon,
    #[error("solver failed: {0}")]
    Solver(String),
}

/// Solve the scheduling LP.
///
/// The terminal-SoC constraint is tried first; if it alone makes the
/// problem infeasible (deeply discharged battery, short horizon) the solve
/// is retried without it and the result downgraded to `Feasible`.
pub fn solve(input: &OptimizerInput) -> Result<SolvedSchedule, SolveError> {
    if input.prices.is_empty() {
        return Err(SolveError::EmptyHorizon);
    }

    match solve_inner(input, true) {
        Ok(schedule) => Ok(schedule),
        Err(ResolutionError::Infeasible) => {
            let mut schedule =
                solve_inner(input, false).map_err(|e| SolveError::Solver(e.to_string()))?;
            schedule.status = OptimizationStatus::Feasible;
            Ok(schedule)
        }
        Err(e) => Err(SolveError::Solver(e.to_string())),
    }
}

fn solve_inner(
    input: &OptimizerInput,
    with_terminal: bool,
) -> Result<SolvedSchedule, ResolutionError> {
    let n = input.prices.len();
    let battery = &input.battery;

    let max_charge_kwh = battery.max_charge_kw * STEP_HOURS;
    let max_discharge_kwh = battery.max_discharge_kw * STEP_HOURS;
    let envelope_kwh = battery.max_charge_kw.max(battery.max_discharge_kw) * STEP_HOURS;

    // SoC percent gained per kWh charged / lost per kWh discharged.
    let charge_gain = battery.efficiency * 100.0 / battery.capacity_kwh;
    let discharge_loss = (1.0 / battery.efficiency) * 100.0 / battery.capacity_kwh;

    let max_import_kwh = input.grid_import_limit_kw * STEP_HOURS;
    let max_export_kwh = input.grid_export_limit_kw * STEP_HOURS;

    let mut problem = ProblemVariables::new();
    let charge = problem.add_vector(variable().min(0.0).max(max_charge_kwh), n);
    let discharge = problem.add_vector(variable().min(0.0).max(max_discharge_kwh), n);
    let import = problem.add_vector(variable().min(0.0).max(max_import_kwh), n);
    let export = problem.add_vector(variable().min(0.0).max(max_export_kwh), n);
    // soc[0] carries the measured value even when it sits outside the
    // operating band, so the boundary variables span the full percent
    // range and the band is enforced on soc[1..] below.
    let soc = problem.add_vector(variable().min(0.0).max(100.0), n + 1);

    let objective = (0..n)
        .map(|t| import[t] * input.prices[t].unit_price - export[t] * input.export_price_ppkwh)
        .sum::<Expression>();

    let mut model = problem.minimise(objective).using(default_solver);

    model = model.with(constraint!(soc[0] == input.initial_soc_percent));

    for t in 0..n {
        let net_load = input.load_kwh[t] - input.solar_kwh[t];

        // Energy balance: solar + discharge + import = load + charge + export.
        model = model.with(constraint!(
            discharge[t] + import[t] - charge[t] - export[t] == net_load
        ));

        model = model.with(constraint!(
            soc[t + 1] == soc[t] + charge[t] * charge_gain - discharge[t] * discharge_loss
        ));

        // The battery cannot push and pull at full power simultaneously;
        // efficiency losses make the objective avoid overlap anyway.
        model = model.with(constraint!(charge[t] + discharge[t] <= envelope_kwh));

        model = model.with(constraint!(soc[t + 1] >= battery.min_soc_percent));
        model = model.with(constraint!(soc[t + 1] <= battery.max_soc_percent));
    }

    if with_terminal {
        model = model.with(constraint!(soc[n] >= battery.min_terminal_soc_percent));
    }

    let solution = model.solve()?;

    let steps = (0..n)
        .map(|t| StepDecision {
            valid_from: input.prices[t].valid_from,
            charge_kwh: solution.value(charge[t]),
            discharge_kwh: solution.value(discharge[t]),
            import_kwh: solution.value(import[t]),
            export_kwh: solution.value(export[t]),
            end_soc_percent: solution.value(soc[t + 1]),
        })
        .collect::<Vec<_>>();

    let cost_pence = steps
        .iter()
        .zip(&input.prices)
        .map(|(s, p)| s.import_kwh * p.unit_price - s.export_kwh * input.export_price_ppkwh)
        .sum();

    Ok(SolvedSchedule {
        steps,
        expected_cost_pence: cost_pence,
        status: OptimizationStatus::Optimal,
    })
}
