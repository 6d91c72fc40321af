//! Priority resolver: composes optimiser output with override state into
//! the final per-device decisions.
//!
//! Pure and synchronous. Given any combination of inputs it produces a
//! decision; it has no failure path. Precedence per device, highest first:
//! manual override, schedule override, optimiser rule. Battery mode and
//! discharge current are never overridden by device overrides.

use crate::domain::{DecisionSource, Device, DeviceDecision, PerDevice};
use crate::overrides::{ManualStatus, ScheduleStatus};

/// Resolver output: final device decisions plus the override roll-up flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub devices: PerDevice<DeviceDecision>,
    pub manual_override_active: bool,
    pub schedule_override_active: bool,
}

pub fn resolve(
    optimizer: &PerDevice<DeviceDecision>,
    schedule: &PerDevice<Option<ScheduleStatus>>,
    manual: &PerDevice<Option<ManualStatus>>,
) -> Resolved {
    let devices = PerDevice::new(
        resolve_device(Device::Main, optimizer, schedule, manual),
        resolve_device(Device::Lucy, optimizer, schedule, manual),
    );

    Resolved {
        manual_override_active: Device::ALL
            .iter()
            .any(|d| manual.get(*d).is_some()),
        schedule_override_active: Device::ALL
            .iter()
            .any(|d| schedule.get(*d).is_some()),
        devices,
    }
}

fn resolve_device(
    device: Device,
    optimizer: &PerDevice<DeviceDecision>,
    schedule: &PerDevice<Option<ScheduleStatus>>,
    manual: &PerDevice<Option<ManualStatus>>,
) -> DeviceDecision {
    if let Some(manual) = manual.get(device) {
        return DeviceDecision {
            desired: manual.desired_state,
            source: DecisionSource::ManualOverride,
            reason: format!(
                "Manual override ({} min remaining)",
                manual.time_remaining_minutes
            ),
        };
    }

    if let Some(schedule) = schedule.get(device) {
        // A schedule is an assertion of "heat now".
        return DeviceDecision {
            desired: true,
            source: DecisionSource::ScheduleOverride,
            reason: schedule.reason.clone(),
        };
    }

    optimizer.get(device).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn optimizer_says(main_on: bool, lucy_on: bool) -> PerDevice<DeviceDecision> {
        PerDevice::new(
            DeviceDecision {
                desired: main_on,
                source: DecisionSource::Optimizer,
                reason: "rule".to_string(),
            },
            DeviceDecision {
                desired: lucy_on,
                source: DecisionSource::Optimizer,
                reason: "rule".to_string(),
            },
        )
    }

    fn manual(desired: bool, minutes: i64) -> ManualStatus {
        ManualStatus {
            desired_state: desired,
            source: "user".to_string(),
            expires_at: Utc.with_ymd_and_hms(2026, 3, 5, 14, 0, 0).unwrap(),
            time_remaining_minutes: minutes,
        }
    }

    fn schedule(reason: &str) -> ScheduleStatus {
        ScheduleStatus {
            reason: reason.to_string(),
            activated_at: None,
            duration_minutes: 0,
        }
    }

    #[test]
    fn manual_wins_over_optimizer() {
        // Cheap window and nearly-full battery: the optimiser wants heat.
        let resolved = resolve(
            &optimizer_says(true, true),
            &PerDevice::uniform(None),
            &PerDevice::new(Some(manual(false, 120)), None),
        );

        let main = resolved.devices.get(Device::Main);
        assert!(!main.desired);
        assert_eq!(main.source, DecisionSource::ManualOverride);
        assert_eq!(main.reason, "Manual override (120 min remaining)");

        // Lucy still follows the optimiser.
        let lucy = resolved.devices.get(Device::Lucy);
        assert!(lucy.desired);
        assert_eq!(lucy.source, DecisionSource::Optimizer);

        assert!(resolved.manual_override_active);
        assert!(!resolved.schedule_override_active);
    }

    #[test]
    fn schedule_asserts_on_even_when_optimizer_says_off() {
        // Expensive half hour: the optimiser would leave the tank cold.
        let resolved = resolve(
            &optimizer_says(false, false),
            &PerDevice::new(Some(schedule("Wed 15:00-17:00")), None),
            &PerDevice::uniform(None),
        );

        let main = resolved.devices.get(Device::Main);
        assert!(main.desired);
        assert_eq!(main.source, DecisionSource::ScheduleOverride);
        assert_eq!(main.reason, "Wed 15:00-17:00");
        assert!(resolved.schedule_override_active);
    }

    #[test]
    fn manual_beats_schedule() {
        let resolved = resolve(
            &optimizer_says(false, false),
            &PerDevice::new(Some(schedule("slot")), None),
            &PerDevice::new(Some(manual(false, 30)), None),
        );

        let main = resolved.devices.get(Device::Main);
        assert!(!main.desired);
        assert_eq!(main.source, DecisionSource::ManualOverride);
    }

    #[test]
    fn no_overrides_passes_optimizer_through() {
        let optimizer = optimizer_says(true, false);
        let resolved = resolve(
            &optimizer,
            &PerDevice::uniform(None),
            &PerDevice::uniform(None),
        );
        assert_eq!(resolved.devices, optimizer);
        assert!(!resolved.manual_override_active);
        assert!(!resolved.schedule_override_active);
    }

    proptest! {
        /// Precedence holds for every combination of inputs.
        #[test]
        fn precedence_invariant(
            opt_main in any::<bool>(),
            opt_lucy in any::<bool>(),
            manual_main in proptest::option::of((any::<bool>(), 0i64..1000)),
            manual_lucy in proptest::option::of((any::<bool>(), 0i64..1000)),
            sched_main in any::<bool>(),
            sched_lucy in any::<bool>(),
        ) {
            let optimizer = optimizer_says(opt_main, opt_lucy);
            let manual_pd = PerDevice::new(
                manual_main.map(|(d, m)| manual(d, m)),
                manual_lucy.map(|(d, m)| manual(d, m)),
            );
            let schedule_pd = PerDevice::new(
                sched_main.then(|| schedule("s")),
                sched_lucy.then(|| schedule("s")),
            );

            let resolved = resolve(&optimizer, &schedule_pd, &manual_pd);

            for device in Device::ALL {
                let decision = resolved.devices.get(device);
                match (manual_pd.get(device), schedule_pd.get(device)) {
                    (Some(m), _) => {
                        prop_assert_eq!(decision.desired, m.desired_state);
                        prop_assert_eq!(decision.source, DecisionSource::ManualOverride);
                    }
                    (None, Some(_)) => {
                        prop_assert!(decision.desired);
                        prop_assert_eq!(decision.source, DecisionSource::ScheduleOverride);
                    }
                    (None, None) => {
                        prop_assert_eq!(decision, optimizer.get(device));
                    }
                }
            }

            prop_assert_eq!(
                resolved.manual_override_active,
                manual_pd.main.is_some() || manual_pd.lucy.is_some()
            );
            prop_assert_eq!(
                resolved.schedule_override_active,
                schedule_pd.main.is_some() || schedule_pd.lucy.is_some()
            );
        }
    }
}
