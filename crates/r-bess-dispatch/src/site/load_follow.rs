//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

use crate::command::{CommandBounds, PowerCommand};
use crate::inputs::DispatchInputs;
use crate::site::SitePolicy;
use crate::Result;

/// Grid readings closer than this to the last acted-on value are treated as
/// unchanged, in kW.
const REACT_EPSILON_KW: f64 = 0.05;

/// Grid power inside this band counts as balanced, in kW.
const DEADBAND_KW: f64 = 0.5;

/// Drives the inverter to follow the ambient site load, pushing the grid
/// exchange toward zero.
///
/// The meter on these sites updates slower than the scan cycle, so the
/// policy only acts when the reading actually moved; a frozen reading holds
/// the command rather than winding it further.
#[derive(Debug, Default)]
pub struct AmbientLoadFollow {
    last_grid_kw: Option<f64>,
}

impl SitePolicy for AmbientLoadFollow {
    fn id(&self) -> &'static str {
        "load_follow"
    }

    fn evaluate(
        &mut self,
        inputs: &DispatchInputs<'_>,
        command: &mut PowerCommand,
        bounds: &CommandBounds,
        claimed: bool,
    ) -> Result<Option<f64>> {
        if claimed {
            return Ok(None);
        }
        let Some(grid_kw) = inputs.grid_power_kw() else {
            self.last_grid_kw = None;
            return Ok(None);
        };
        let changed = self
            .last_grid_kw
            .map_or(true, |last| (last - grid_kw).abs() > REACT_EPSILON_KW);
        if !changed {
            return Ok(Some(command.kw()));
        }
        self.last_grid_kw = Some(grid_kw);
        if grid_kw.abs() <= DEADBAND_KW {
            return Ok(Some(command.kw()));
        }
        // Shifting the command by the grid exchange zeroes the meter once
        // the inverter settles.
        let target = command.kw() + grid_kw;
        command.ramp_toward(target, bounds);
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::StaleTracker;
    use crate::settings::DispatchSettings;
    use chrono::NaiveTime;
    use r_bess_fleet::{AcMeterBlock, DeviceRecord, FleetSnapshot, ModuleData};

    fn snapshot(grid_kw: f64) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            "meter1",
            ModuleData::AcMeter(AcMeterBlock {
                power_kw: grid_kw,
                ..AcMeterBlock::default()
            }),
        ));
        snapshot
    }

    fn settings() -> DispatchSettings {
        let mut settings = DispatchSettings::default();
        settings.ramp_rate_kw = 2.0;
        settings.max_charge_kw = 40.0;
        settings.max_discharge_kw = 40.0;
        settings
    }

    fn cycle(
        policy: &mut AmbientLoadFollow,
        snapshot: &FleetSnapshot,
        command: &mut PowerCommand,
    ) -> Option<f64> {
        let settings = settings();
        let tracker = StaleTracker::default();
        let now = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let inputs = DispatchInputs::new(snapshot, &settings, now, &tracker);
        let bounds = settings.bounds();
        policy.evaluate(&inputs, command, &bounds, false).unwrap()
    }

    #[test]
    fn import_pulls_the_command_up() {
        let mut policy = AmbientLoadFollow::default();
        let mut command = PowerCommand::default();
        let target = cycle(&mut policy, &snapshot(5.0), &mut command);
        assert_eq!(target, Some(5.0));
        assert_eq!(command.kw(), 2.0);
    }

    #[test]
    fn frozen_reading_holds_instead_of_winding() {
        let mut policy = AmbientLoadFollow::default();
        let mut command = PowerCommand::default();
        cycle(&mut policy, &snapshot(5.0), &mut command);
        assert_eq!(command.kw(), 2.0);
        // Same reading again: the meter has not updated yet.
        cycle(&mut policy, &snapshot(5.0), &mut command);
        assert_eq!(command.kw(), 2.0);
        // Fresh reading resumes the follow.
        cycle(&mut policy, &snapshot(3.2), &mut command);
        assert_eq!(command.kw(), 4.0);
    }

    #[test]
    fn balanced_grid_claims_without_moving() {
        let mut policy = AmbientLoadFollow::default();
        let mut command = PowerCommand::default();
        let target = cycle(&mut policy, &snapshot(0.3), &mut command);
        assert_eq!(target, Some(0.0));
        assert_eq!(command.kw(), 0.0);
    }

    #[test]
    fn missing_meter_deactivates_the_policy() {
        let mut policy = AmbientLoadFollow::default();
        let mut command = PowerCommand::default();
        let target = cycle(&mut policy, &FleetSnapshot::new(), &mut command);
        assert_eq!(target, None);
    }
}
