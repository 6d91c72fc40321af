//! Deterministic immersion rules evaluated against the optimiser's inputs.
//!
//! The immersions are not LP decision variables: heating water is only
//! worthwhile when energy is effectively free, which reduces to three
//! clauses over the current price, SoC and solar output.

use crate::config::ImmersionConfig;
use crate::domain::{DecisionSource, DeviceDecision};

/// The subset of optimiser inputs the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct ImmersionInputs {
    /// Current half-hour unit price, pence/kWh.
    pub unit_price: f64,
    /// Cheap threshold of the current window, when one exists.
    pub cheap_threshold: Option<f64>,
    pub solar_power_kw: f64,
    pub battery_soc_percent: f64,
}

/// Both devices follow the same rule; per-device divergence only enters
/// through overrides.
pub fn evaluate(cfg: &ImmersionConfig, inputs: &ImmersionInputs) -> DeviceDecision {
    let soc = inputs.battery_soc_percent;

    if inputs.unit_price < 0.0 && soc >= cfg.negative_soc_percent {
        return DeviceDecision {
            desired: true,
            source: DecisionSource::Optimizer,
            reason: format!(
                "Negative price ({:.1}p) + high SoC ({:.0}%)",
                inputs.unit_price, soc
            ),
        };
    }

    if let Some(cheap) = inputs.cheap_threshold {
        if inputs.unit_price >= 0.0 && inputs.unit_price <= cheap && soc >= cfg.cheap_soc_percent {
            return DeviceDecision {
                desired: true,
                source: DecisionSource::Optimizer,
                reason: format!(
                    "Cheap price ({:.1}p) + very high SoC ({:.0}%)",
                    inputs.unit_price, soc
                ),
            };
        }
    }

    if inputs.solar_power_kw >= cfg.high_solar_kw && soc >= cfg.cheap_soc_percent {
        return DeviceDecision {
            desired: true,
            source: DecisionSource::Optimizer,
            reason: format!(
                "High solar ({:.1} kW) + very high SoC ({:.0}%)",
                inputs.solar_power_kw, soc
            ),
        };
    }

    DeviceDecision::off(
        DecisionSource::Optimizer,
        "No surplus energy conditions met",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cfg() -> ImmersionConfig {
        crate::config::test_config().immersion
    }

    #[rstest]
    // negative price + high SoC turns on
    #[case(-2.0, Some(5.0), 0.0, 92.0, true)]
    // negative price but battery not full enough stays off
    #[case(-2.0, Some(5.0), 0.0, 85.0, false)]
    // cheap price + very high SoC turns on
    #[case(2.0, Some(5.0), 0.0, 98.0, true)]
    // cheap price below the very-high-SoC floor stays off
    #[case(2.0, Some(5.0), 0.0, 92.0, false)]
    // high solar + very high SoC turns on regardless of price
    #[case(25.0, Some(5.0), 6.0, 96.0, true)]
    // expensive price, no solar, full battery stays off
    #[case(30.0, Some(5.0), 0.0, 100.0, false)]
    fn rule_table(
        #[case] unit_price: f64,
        #[case] cheap_threshold: Option<f64>,
        #[case] solar_kw: f64,
        #[case] soc: f64,
        #[case] expect_on: bool,
    ) {
        let decision = evaluate(
            &cfg(),
            &ImmersionInputs {
                unit_price,
                cheap_threshold,
                solar_power_kw: solar_kw,
                battery_soc_percent: soc,
            },
        );
        assert_eq!(decision.desired, expect_on);
        assert_eq!(decision.source, DecisionSource::Optimizer);
    }

    #[test]
    fn reason_names_the_triggering_clause() {
        let negative = evaluate(
            &cfg(),
            &ImmersionInputs {
                unit_price: -2.0,
                cheap_threshold: Some(5.0),
                solar_power_kw: 0.0,
                battery_soc_percent: 92.0,
            },
        );
        assert!(negative.reason.contains("Negative price"));

        let solar = evaluate(
            &cfg(),
            &ImmersionInputs {
                unit_price: 10.0,
                cheap_threshold: Some(5.0),
                solar_power_kw: 7.0,
                battery_soc_percent: 97.0,
            },
        );
        assert!(solar.reason.contains("High solar"));
    }
}
