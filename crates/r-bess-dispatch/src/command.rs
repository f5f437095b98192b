//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// Limits every mutation of [`PowerCommand`] must respect.
///
/// Sign convention follows the inverter setpoint: negative commands charge
/// the battery, positive commands discharge it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandBounds {
    /// Maximum change per cycle, in kW. Convergence steps of 1 kW are
    /// allowed once the remaining distance is inside one ramp quantum.
    pub ramp_rate_kw: f64,
    /// Maximum charge power, in kW (magnitude of the negative bound).
    pub max_charge_kw: f64,
    /// Maximum discharge power, in kW (positive bound).
    pub max_discharge_kw: f64,
    /// Optional grid import restriction tightening the charge bound, in kW.
    pub import_limit_kw: Option<f64>,
    /// Optional grid export restriction tightening the discharge bound, in kW.
    pub export_limit_kw: Option<f64>,
}

impl CommandBounds {
    /// Lowest permitted command value (deepest charge).
    pub fn floor(&self) -> f64 {
        let limit = self
            .import_limit_kw
            .map_or(self.max_charge_kw, |l| l.min(self.max_charge_kw));
        -limit.max(0.0)
    }

    /// Highest permitted command value (deepest discharge).
    pub fn ceiling(&self) -> f64 {
        let limit = self
            .export_limit_kw
            .map_or(self.max_discharge_kw, |l| l.min(self.max_discharge_kw));
        limit.max(0.0)
    }

    /// Clamps `value` into `[floor, ceiling]`.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.floor(), self.ceiling())
    }
}

impl Default for CommandBounds {
    fn default() -> Self {
        // Defaults pin the command to zero until the settings page supplies
        // real limits.
        Self {
            ramp_rate_kw: 1.0,
            max_charge_kw: 0.0,
            max_discharge_kw: 0.0,
            import_limit_kw: None,
            export_limit_kw: None,
        }
    }
}

/// The single integrator all policies mutate, at most once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerCommand {
    value_kw: f64,
}

impl PowerCommand {
    /// Current command value, in kW.
    pub fn kw(&self) -> f64 {
        self.value_kw
    }

    /// Moves one step toward `target_kw` and returns the new value.
    ///
    /// The target is clamped into bounds first. Steps are `ramp_rate_kw`
    /// while the distance exceeds one ramp quantum, then 1 kW, then the
    /// exact remainder. Repeated calls therefore converge without
    /// overshoot.
    pub fn ramp_toward(&mut self, target_kw: f64, bounds: &CommandBounds) -> f64 {
        let target = bounds.clamp(target_kw);
        let diff = target - self.value_kw;
        if diff == 0.0 {
            return self.value_kw;
        }
        let distance = diff.abs();
        let ramp = bounds.ramp_rate_kw.max(0.0);
        let step = if distance >= ramp && ramp > 0.0 {
            ramp
        } else {
            distance.min(1.0)
        };
        self.value_kw = bounds.clamp(self.value_kw + step.copysign(diff));
        self.value_kw
    }

    /// Applies a fixed correction, saturating at the bounds.
    pub fn nudge(&mut self, delta_kw: f64, bounds: &CommandBounds) -> f64 {
        self.value_kw = bounds.clamp(self.value_kw + delta_kw);
        self.value_kw
    }

    /// Re-clamps the held value after a bounds change.
    pub fn clamp(&mut self, bounds: &CommandBounds) -> f64 {
        self.value_kw = bounds.clamp(self.value_kw);
        self.value_kw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(ramp: f64, charge: f64, discharge: f64) -> CommandBounds {
        CommandBounds {
            ramp_rate_kw: ramp,
            max_charge_kw: charge,
            max_discharge_kw: discharge,
            import_limit_kw: None,
            export_limit_kw: None,
        }
    }

    #[test]
    fn first_charge_step_moves_one_ramp_quantum() {
        let b = bounds(2.0, 80.0, 80.0);
        let mut cmd = PowerCommand::default();
        assert_eq!(cmd.ramp_toward(-10.0, &b), -2.0);
        assert_eq!(cmd.ramp_toward(-10.0, &b), -4.0);
    }

    #[test]
    fn decay_reaches_zero_without_overshoot() {
        let b = bounds(2.0, 80.0, 80.0);
        let mut cmd = PowerCommand::default();
        cmd.nudge(6.0, &b);
        assert_eq!(cmd.ramp_toward(0.0, &b), 4.0);
        assert_eq!(cmd.ramp_toward(0.0, &b), 2.0);
        assert_eq!(cmd.ramp_toward(0.0, &b), 0.0);
        assert_eq!(cmd.ramp_toward(0.0, &b), 0.0);
    }

    #[test]
    fn converges_by_one_kilowatt_inside_a_ramp_step() {
        let b = bounds(5.0, 80.0, 80.0);
        let mut cmd = PowerCommand::default();
        cmd.nudge(3.5, &b);
        // Distance 3.5 is inside the 5 kW quantum: 1 kW steps, then the
        // remainder.
        assert_eq!(cmd.ramp_toward(0.0, &b), 2.5);
        assert_eq!(cmd.ramp_toward(0.0, &b), 1.5);
        assert_eq!(cmd.ramp_toward(0.0, &b), 0.5);
        assert_eq!(cmd.ramp_toward(0.0, &b), 0.0);
    }

    #[test]
    fn target_saturates_at_bounds() {
        let b = CommandBounds {
            ramp_rate_kw: 50.0,
            max_charge_kw: 80.0,
            max_discharge_kw: 60.0,
            import_limit_kw: Some(20.0),
            export_limit_kw: Some(30.0),
        };
        assert_eq!(b.floor(), -20.0);
        assert_eq!(b.ceiling(), 30.0);
        let mut cmd = PowerCommand::default();
        cmd.ramp_toward(-100.0, &b);
        assert_eq!(cmd.kw(), -20.0);
        cmd.ramp_toward(100.0, &b);
        cmd.ramp_toward(100.0, &b);
        assert_eq!(cmd.kw(), 30.0);
    }

    #[test]
    fn nudge_saturates() {
        let b = bounds(1.0, 5.0, 5.0);
        let mut cmd = PowerCommand::default();
        cmd.nudge(-4.5, &b);
        assert_eq!(cmd.nudge(-1.0, &b), -5.0);
        assert_eq!(cmd.nudge(-1.0, &b), -5.0);
    }

    #[test]
    fn step_never_exceeds_ramp_when_ramp_is_small() {
        let b = bounds(0.5, 10.0, 10.0);
        let mut cmd = PowerCommand::default();
        let mut last = cmd.kw();
        for _ in 0..30 {
            let next = cmd.ramp_toward(-4.2, &b);
            assert!((next - last).abs() <= 0.5 + 1e-9);
            last = next;
        }
        assert!((cmd.kw() + 4.2).abs() < 1e-9);
    }

    #[test]
    fn bounds_shrink_reclamps_held_value() {
        let wide = bounds(10.0, 50.0, 50.0);
        let mut cmd = PowerCommand::default();
        cmd.ramp_toward(-30.0, &wide);
        cmd.ramp_toward(-30.0, &wide);
        cmd.ramp_toward(-30.0, &wide);
        assert_eq!(cmd.kw(), -30.0);
        let narrow = bounds(10.0, 10.0, 10.0);
        assert_eq!(cmd.clamp(&narrow), -10.0);
    }
}
