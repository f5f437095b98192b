//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//!
//! One policy wins each cycle and applies exactly one mutation to the
//! [`PowerCommand`]. Policies are pure evaluations over the cycle inputs; a
//! policy that errors is logged, recorded in the report, and skipped, so a
//! bad reading in one rung can never stall the rungs below it.

use tracing::{debug, error};

use crate::command::{CommandBounds, PowerCommand};
use crate::inputs::DispatchInputs;
use crate::site::SiteRegistry;
use crate::{DispatchError, Result};

/// Import must exceed the window limit by this margin before peak shaving
/// starts discharging, in kW.
pub const PEAK_HYSTERESIS_KW: f64 = 1.0;

/// Policy label: time-of-use window charging.
pub const POLICY_TOU: &str = "tou_charge";
/// Policy label: solar-surplus charging.
pub const POLICY_SOLAR: &str = "solar_charge";
/// Policy label: peak shaving.
pub const POLICY_PEAK: &str = "peak_shave";
/// Policy label: site-specific dispatch.
pub const POLICY_SITE: &str = "site";
/// Policy label: fallback decay toward zero.
pub const POLICY_DECAY: &str = "decay";

/// Every policy label, in priority order. Metrics pre-register one series
/// per entry.
pub const POLICIES: [&str; 5] = [
    POLICY_TOU,
    POLICY_SOLAR,
    POLICY_PEAK,
    POLICY_SITE,
    POLICY_DECAY,
];

/// Outcome of one arbitration cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbiterReport {
    /// Label of the policy that mutated the command this cycle.
    pub policy: &'static str,
    /// Target the winning policy was moving toward, in kW.
    pub target_kw: f64,
    /// Policies that errored this cycle, with their causes.
    pub faults: Vec<(&'static str, String)>,
}

type PolicyFn =
    fn(&DispatchInputs<'_>, &mut PowerCommand, &CommandBounds) -> Result<Option<f64>>;

const LADDER: [(&str, PolicyFn); 3] = [
    (POLICY_TOU, tou_charge),
    (POLICY_SOLAR, solar_charge),
    (POLICY_PEAK, peak_shave),
];

/// Runs the policy ladder for one cycle.
pub fn arbitrate(
    inputs: &DispatchInputs<'_>,
    command: &mut PowerCommand,
    bounds: &CommandBounds,
    sites: &mut SiteRegistry,
) -> ArbiterReport {
    let mut faults: Vec<(&'static str, String)> = Vec::new();
    let mut winner: Option<(&'static str, f64)> = None;

    for (name, policy) in LADDER {
        match policy(inputs, command, bounds) {
            Ok(Some(target_kw)) => {
                winner = Some((name, target_kw));
                break;
            }
            Ok(None) => {}
            Err(err) => {
                error!(policy = name, error = %err, "dispatch policy failed, skipping");
                faults.push((name, err.to_string()));
            }
        }
    }

    // Site policies run after the fixed rungs. A policy that overrides
    // priority is still evaluated when a rung above already claimed the
    // cycle; it only claims the command itself when nothing else did.
    let claimed = winner.is_some();
    match sites.evaluate(inputs, command, bounds, claimed) {
        Ok(Some(target_kw)) if !claimed => winner = Some((POLICY_SITE, target_kw)),
        Ok(_) => {}
        Err(err) => {
            error!(policy = POLICY_SITE, error = %err, "site policy failed, skipping");
            faults.push((POLICY_SITE, err.to_string()));
        }
    }

    let (policy, target_kw) = winner.unwrap_or_else(|| {
        command.ramp_toward(0.0, bounds);
        (POLICY_DECAY, 0.0)
    });
    debug!(policy, target_kw, command_kw = command.kw(), "arbitration cycle");

    ArbiterReport {
        policy,
        target_kw,
        faults,
    }
}

/// Shared shape of the two window-charge policies: hold at zero once the
/// battery reports full, charge toward the target while there is headroom,
/// otherwise sit on the max-charge boundary.
fn charge_toward(
    target_kw: f64,
    met: bool,
    bus_power_kw: f64,
    command: &mut PowerCommand,
    bounds: &CommandBounds,
) -> Result<f64> {
    if !bus_power_kw.is_finite() {
        return Err(DispatchError::NonFinite {
            context: "battery bus power",
        });
    }
    let target = if met {
        0.0
    } else if -bounds.max_charge_kw < bus_power_kw {
        target_kw
    } else {
        -bounds.max_charge_kw
    };
    command.ramp_toward(target, bounds);
    Ok(target)
}

/// Rung 1: charge inside time-of-use windows toward the negated window
/// limit. Overlapping windows already resolved to the lowest limit.
fn tou_charge(
    inputs: &DispatchInputs<'_>,
    command: &mut PowerCommand,
    bounds: &CommandBounds,
) -> Result<Option<f64>> {
    let Some(limit_kw) = inputs.settings.tou.effective_limit(inputs.now) else {
        return Ok(None);
    };
    let Some(battery) = inputs.battery() else {
        return Ok(None);
    };
    let Some(met) = inputs.settings.charge_target_met(battery) else {
        return Ok(None);
    };
    if !limit_kw.is_finite() {
        return Err(DispatchError::NonFinite {
            context: "tou window limit",
        });
    }
    let target = charge_toward(-limit_kw, met, battery.bus_power_kw, command, bounds)?;
    Ok(Some(target))
}

/// Rung 2: absorb live AC-solar surplus inside the solar window.
///
/// The target rides the grid meter: while the site exports, the command
/// deepens to soak the surplus; once the export is gone the command holds,
/// and import pushes it back toward zero. The window limit caps the depth.
fn solar_charge(
    inputs: &DispatchInputs<'_>,
    command: &mut PowerCommand,
    bounds: &CommandBounds,
) -> Result<Option<f64>> {
    let Some(window) = inputs.settings.solar else {
        return Ok(None);
    };
    if !window.is_active(inputs.now) || inputs.ac_solar().is_none() {
        return Ok(None);
    }
    let Some(battery) = inputs.battery() else {
        return Ok(None);
    };
    let Some(met) = inputs.settings.charge_target_met(battery) else {
        return Ok(None);
    };
    let Some(grid_kw) = inputs.grid_power_kw() else {
        return Ok(None);
    };
    if !window.limit_kw.is_finite() {
        return Err(DispatchError::NonFinite {
            context: "solar window limit",
        });
    }
    let surplus_target = (command.kw() + grid_kw).clamp(-window.limit_kw.max(0.0), 0.0);
    let target = charge_toward(surplus_target, met, battery.bus_power_kw, command, bounds)?;
    Ok(Some(target))
}

/// Rung 3: discharge against grid import peaks inside the peak windows.
fn peak_shave(
    inputs: &DispatchInputs<'_>,
    command: &mut PowerCommand,
    bounds: &CommandBounds,
) -> Result<Option<f64>> {
    let Some(limit_kw) = inputs.settings.peak.effective_limit(inputs.now) else {
        return Ok(None);
    };
    let Some(battery) = inputs.battery() else {
        return Ok(None);
    };
    let Some(below_floor) = inputs.settings.below_min_discharge(battery) else {
        return Ok(None);
    };
    let Some(grid_kw) = inputs.grid_power_kw() else {
        return Ok(None);
    };
    if !limit_kw.is_finite() {
        return Err(DispatchError::NonFinite {
            context: "peak window limit",
        });
    }

    if below_floor {
        // Depleted battery: stop discharging, and take a 1 kW trickle
        // charge whenever the site is already exporting.
        if grid_kw < 0.0 {
            let target = command.nudge(-1.0, bounds);
            return Ok(Some(target));
        }
        command.ramp_toward(0.0, bounds);
        return Ok(Some(0.0));
    }

    if grid_kw > limit_kw + PEAK_HYSTERESIS_KW {
        let target = bounds.ceiling();
        command.ramp_toward(target, bounds);
        return Ok(Some(target));
    }
    let solar_active = inputs
        .settings
        .solar
        .map(|w| w.is_active(inputs.now))
        .unwrap_or(false);
    if grid_kw < 0.0 && !solar_active {
        // Shaving overshot into export and no solar policy is there to
        // absorb it.
        let target = command.nudge(-1.0, bounds);
        return Ok(Some(target));
    }
    // Inside the hysteresis band: hold.
    Ok(Some(command.kw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::StaleTracker;
    use crate::settings::DispatchSettings;
    use crate::site::SitePolicy;
    use crate::window::{DispatchWindow, WindowFamily};
    use chrono::NaiveTime;
    use r_bess_common::FieldValue;
    use r_bess_fleet::{
        AcMeterBlock, AcSolarBlock, BatteryBlock, DeviceRecord, FleetSnapshot, ModuleData,
    };

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn page(entries: &[(&str, FieldValue)]) -> r_bess_common::FieldPage {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fleet(battery: BatteryBlock, grid_kw: f64, solar_kw: Option<f64>) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new("bat1", ModuleData::Battery(battery)));
        snapshot.insert(DeviceRecord::new(
            "meter1",
            ModuleData::AcMeter(AcMeterBlock {
                power_kw: grid_kw,
                ..AcMeterBlock::default()
            }),
        ));
        if let Some(power_kw) = solar_kw {
            snapshot.insert(DeviceRecord::new(
                "pv1",
                ModuleData::AcSolar(AcSolarBlock {
                    power_kw,
                    ..AcSolarBlock::default()
                }),
            ));
        }
        snapshot
    }

    fn run(
        settings: &DispatchSettings,
        snapshot: &FleetSnapshot,
        command: &mut PowerCommand,
    ) -> ArbiterReport {
        let tracker = StaleTracker::default();
        let inputs = DispatchInputs::new(snapshot, settings, noon(), &tracker);
        let bounds = settings.bounds();
        let mut sites = SiteRegistry::with_builtin();
        arbitrate(&inputs, command, &bounds, &mut sites)
    }

    #[test]
    fn overlapping_tou_windows_charge_at_the_lower_limit() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(80.0)),
            ("max_discharge_kw", FieldValue::Float(80.0)),
            ("max_charge_soc", FieldValue::Float(80.0)),
            ("tou1_enable", FieldValue::Bool(true)),
            ("tou1_limit_kw", FieldValue::Float(10.0)),
            ("tou1_start", FieldValue::Text("10:00".into())),
            ("tou1_end", FieldValue::Text("14:00".into())),
            ("tou2_enable", FieldValue::Bool(true)),
            ("tou2_limit_kw", FieldValue::Float(6.0)),
            ("tou2_start", FieldValue::Text("11:00".into())),
            ("tou2_end", FieldValue::Text("13:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 50.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, 5.0, None), &mut command);
        assert_eq!(report.policy, POLICY_TOU);
        assert_eq!(report.target_kw, -6.0);
        assert_eq!(command.kw(), -2.0);
    }

    #[test]
    fn met_charge_target_ramps_back_to_zero() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(80.0)),
            ("max_charge_soc", FieldValue::Float(80.0)),
            ("tou1_enable", FieldValue::Bool(true)),
            ("tou1_limit_kw", FieldValue::Float(10.0)),
            ("tou1_start", FieldValue::Text("10:00".into())),
            ("tou1_end", FieldValue::Text("14:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 85.0,
            bus_power_kw: -4.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        command.nudge(-4.0, &settings.bounds());
        let report = run(&settings, &fleet(battery, 0.0, None), &mut command);
        assert_eq!(report.policy, POLICY_TOU);
        assert_eq!(command.kw(), -2.0);
    }

    #[test]
    fn missing_charge_threshold_leaves_tou_inactive() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(80.0)),
            ("tou1_enable", FieldValue::Bool(true)),
            ("tou1_limit_kw", FieldValue::Float(10.0)),
            ("tou1_start", FieldValue::Text("10:00".into())),
            ("tou1_end", FieldValue::Text("14:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 50.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, 0.0, None), &mut command);
        assert_eq!(report.policy, POLICY_DECAY);
        assert_eq!(command.kw(), 0.0);
    }

    #[test]
    fn solar_surplus_deepens_the_charge() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(80.0)),
            ("max_charge_soc", FieldValue::Float(95.0)),
            ("solar_enable", FieldValue::Bool(true)),
            ("solar_limit_kw", FieldValue::Float(25.0)),
            ("solar_start", FieldValue::Text("08:00".into())),
            ("solar_end", FieldValue::Text("18:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 40.0,
            ..BatteryBlock::default()
        };
        // Site exporting 5 kW of solar.
        let report = run(
            &settings,
            &fleet(battery, -5.0, Some(6.0)),
            &mut PowerCommand::default(),
        );
        assert_eq!(report.policy, POLICY_SOLAR);
        assert_eq!(report.target_kw, -5.0);
    }

    #[test]
    fn solar_import_releases_the_charge() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(80.0)),
            ("max_charge_soc", FieldValue::Float(95.0)),
            ("solar_enable", FieldValue::Bool(true)),
            ("solar_limit_kw", FieldValue::Float(25.0)),
            ("solar_start", FieldValue::Text("08:00".into())),
            ("solar_end", FieldValue::Text("18:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 40.0,
            bus_power_kw: -6.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        command.nudge(-6.0, &settings.bounds());
        // Clouds rolled in: importing 4 kW while still charging 6.
        let report = run(&settings, &fleet(battery, 4.0, Some(0.5)), &mut command);
        assert_eq!(report.policy, POLICY_SOLAR);
        assert_eq!(report.target_kw, -2.0);
        assert_eq!(command.kw(), -4.0);
    }

    #[test]
    fn peak_import_above_limit_discharges_toward_export_bound() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_discharge_kw", FieldValue::Float(40.0)),
            ("min_discharge_soc", FieldValue::Float(20.0)),
            ("peak1_enable", FieldValue::Bool(true)),
            ("peak1_limit_kw", FieldValue::Float(5.0)),
            ("peak1_start", FieldValue::Text("10:00".into())),
            ("peak1_end", FieldValue::Text("14:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 60.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, 12.0, None), &mut command);
        assert_eq!(report.policy, POLICY_PEAK);
        assert_eq!(report.target_kw, 40.0);
        assert_eq!(command.kw(), 2.0);
    }

    #[test]
    fn import_inside_hysteresis_band_holds() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_discharge_kw", FieldValue::Float(40.0)),
            ("min_discharge_soc", FieldValue::Float(20.0)),
            ("peak1_enable", FieldValue::Bool(true)),
            ("peak1_limit_kw", FieldValue::Float(0.0)),
            ("peak1_start", FieldValue::Text("10:00".into())),
            ("peak1_end", FieldValue::Text("14:00".into())),
        ]));
        // Battery exactly at the floor still counts as dischargeable.
        let battery = BatteryBlock {
            soc_pct: 20.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, 0.8, None), &mut command);
        assert_eq!(report.policy, POLICY_PEAK);
        assert_eq!(command.kw(), 0.0);
    }

    #[test]
    fn depleted_battery_trickle_charges_from_export() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(40.0)),
            ("max_discharge_kw", FieldValue::Float(40.0)),
            ("min_discharge_soc", FieldValue::Float(20.0)),
            ("peak1_enable", FieldValue::Bool(true)),
            ("peak1_limit_kw", FieldValue::Float(5.0)),
            ("peak1_start", FieldValue::Text("10:00".into())),
            ("peak1_end", FieldValue::Text("14:00".into())),
        ]));
        let battery = BatteryBlock {
            soc_pct: 10.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, -3.0, None), &mut command);
        assert_eq!(report.policy, POLICY_PEAK);
        assert_eq!(command.kw(), -1.0);
    }

    #[test]
    fn idle_ladder_decays_toward_zero() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_discharge_kw", FieldValue::Float(40.0)),
        ]));
        let battery = BatteryBlock::default();
        let mut command = PowerCommand::default();
        command.nudge(6.0, &settings.bounds());
        let report = run(&settings, &fleet(battery, 0.0, None), &mut command);
        assert_eq!(report.policy, POLICY_DECAY);
        assert_eq!(command.kw(), 4.0);
    }

    #[test]
    fn faulted_rung_falls_through_to_the_next() {
        let mut settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_charge_kw", FieldValue::Float(80.0)),
            ("max_charge_soc", FieldValue::Float(80.0)),
        ]));
        settings.tou = WindowFamily::new(vec![DispatchWindow {
            enabled: true,
            limit_kw: f64::NAN,
            start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
        }]);
        let battery = BatteryBlock {
            soc_pct: 50.0,
            ..BatteryBlock::default()
        };
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, 0.0, None), &mut command);
        assert_eq!(report.policy, POLICY_DECAY);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].0, POLICY_TOU);
    }

    struct FixedTarget;

    impl SitePolicy for FixedTarget {
        fn id(&self) -> &'static str {
            "fixed_target"
        }

        fn evaluate(
            &mut self,
            _inputs: &DispatchInputs<'_>,
            command: &mut PowerCommand,
            bounds: &CommandBounds,
            claimed: bool,
        ) -> crate::Result<Option<f64>> {
            if claimed {
                return Ok(None);
            }
            command.ramp_toward(12.0, bounds);
            Ok(Some(12.0))
        }
    }

    #[test]
    fn selected_site_policy_claims_an_idle_cycle() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("max_discharge_kw", FieldValue::Float(40.0)),
            ("site_id", FieldValue::Text("fixed_target".into())),
        ]));
        let battery = BatteryBlock::default();
        let snapshot = fleet(battery, 0.0, None);
        let tracker = StaleTracker::default();
        let inputs = DispatchInputs::new(&snapshot, &settings, noon(), &tracker);
        let bounds = settings.bounds();
        let mut sites = SiteRegistry::with_builtin();
        sites.register(Box::new(FixedTarget));
        let mut command = PowerCommand::default();
        let report = arbitrate(&inputs, &mut command, &bounds, &mut sites);
        assert_eq!(report.policy, POLICY_SITE);
        assert_eq!(report.target_kw, 12.0);
        assert_eq!(command.kw(), 2.0);
    }

    #[test]
    fn unknown_site_id_disables_the_layer() {
        let settings = DispatchSettings::from_page(&page(&[
            ("ramp_rate_kw", FieldValue::Float(2.0)),
            ("site_id", FieldValue::Text("no_such_site".into())),
        ]));
        let battery = BatteryBlock::default();
        let mut command = PowerCommand::default();
        let report = run(&settings, &fleet(battery, 0.0, None), &mut command);
        assert_eq!(report.policy, POLICY_DECAY);
        assert!(report.faults.is_empty());
    }
}
