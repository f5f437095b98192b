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
//! The sequencer moves at most one step per scan cycle, in both directions.
//! Enabling walks rack supply, battery contactor, then inverter, each stage
//! waiting on the hardware echo from the previous cycle's snapshot.
//! Disabling retraces the same stages in reverse, releasing one actuator per
//! cycle while the client ramps the power command back to zero.

use std::fmt;

use tracing::{info, warn};

use crate::inputs::DispatchInputs;

/// Retry attempts granted per enable request before the system is forced
/// back to disabled.
pub const RETRY_BUDGET: u32 = 5;

/// Cycles a stage may wait before its diagnostic text is produced. Every
/// further multiple consumes one retry attempt.
const DIAG_WAIT_CYCLES: u32 = 10;

/// Cycles after which the diagnostic text stops updating until the stage
/// resolves.
const TEXT_FREEZE_CYCLES: u32 = 15;

/// Startup sequence position, reported verbatim in the client block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum SequenceStep {
    /// Everything released, command pinned to zero.
    Idle = 0,
    /// Rack safety contactor supply commanded on.
    RmscEnable = 1,
    /// Battery contactor commanded closed.
    BatteryContactor = 2,
    /// Inverter commanded enabled.
    InverterEnable = 3,
    /// Arbitration active.
    Running = 4,
}

impl SequenceStep {
    /// Register representation of the step.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    fn next(self) -> Self {
        match self {
            SequenceStep::Idle => SequenceStep::RmscEnable,
            SequenceStep::RmscEnable => SequenceStep::BatteryContactor,
            SequenceStep::BatteryContactor => SequenceStep::InverterEnable,
            SequenceStep::InverterEnable | SequenceStep::Running => SequenceStep::Running,
        }
    }

    fn prev(self) -> Self {
        match self {
            SequenceStep::Idle | SequenceStep::RmscEnable => SequenceStep::Idle,
            SequenceStep::BatteryContactor => SequenceStep::RmscEnable,
            SequenceStep::InverterEnable => SequenceStep::BatteryContactor,
            SequenceStep::Running => SequenceStep::InverterEnable,
        }
    }
}

impl fmt::Display for SequenceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequenceStep::Idle => "idle",
            SequenceStep::RmscEnable => "rmsc_enable",
            SequenceStep::BatteryContactor => "battery_contactor",
            SequenceStep::InverterEnable => "inverter_enable",
            SequenceStep::Running => "running",
        };
        f.write_str(name)
    }
}

/// Actuator requests produced by one sequencer step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerOutputs {
    /// Close the RMSC supply relay.
    pub close_rmsc: bool,
    /// Assert the battery enable command.
    pub battery_enable: bool,
    /// Assert the inverter enable command.
    pub inverter_enable: bool,
    /// Arbitration may run this cycle.
    pub running: bool,
}

/// Walks the fleet through startup and shutdown, one step per cycle.
#[derive(Debug)]
pub struct StartupSequencer {
    step: SequenceStep,
    wait_cycles: u32,
    attempts_used: u32,
    forced_off: bool,
    status_text: String,
}

impl Default for StartupSequencer {
    fn default() -> Self {
        Self {
            step: SequenceStep::Idle,
            wait_cycles: 0,
            attempts_used: 0,
            forced_off: false,
            status_text: "disabled".to_owned(),
        }
    }
}

impl StartupSequencer {
    /// Current sequence position.
    pub fn step(&self) -> SequenceStep {
        self.step
    }

    /// Operator-facing status line.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Retry attempts consumed by the pending enable request.
    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    /// Runs one cycle. Reads hardware echoes from the snapshot, moves at
    /// most one step, and returns the actuator requests for this cycle.
    pub fn advance(&mut self, inputs: &DispatchInputs<'_>) -> SequencerOutputs {
        let enable = inputs.settings.system_enable && !self.forced_off;
        if !inputs.settings.system_enable {
            // Operator acknowledged the forced disable by dropping the
            // request; a fresh request starts with a full budget.
            self.forced_off = false;
        }

        if enable {
            self.step_up(inputs);
            self.outputs(true)
        } else {
            self.step_down();
            self.outputs(false)
        }
    }

    fn step_up(&mut self, inputs: &DispatchInputs<'_>) {
        match self.step {
            SequenceStep::Idle => {
                self.transition(SequenceStep::RmscEnable, "enabling rack supply");
            }
            SequenceStep::RmscEnable => {
                let confirmed = inputs
                    .battery()
                    .map(|battery| battery.rmsc_power_on)
                    .unwrap_or(false);
                if confirmed {
                    self.transition(SequenceStep::BatteryContactor, "closing battery contactor");
                } else {
                    self.stall(|inputs| match inputs.battery() {
                        Some(_) => "could not enable rack supply".to_owned(),
                        None => "battery not responding".to_owned(),
                    }, inputs);
                }
            }
            SequenceStep::BatteryContactor => {
                let confirmed = inputs
                    .battery()
                    .map(|battery| battery.enabled)
                    .unwrap_or(false);
                if confirmed {
                    self.transition(SequenceStep::InverterEnable, "enabling inverter");
                } else {
                    self.stall(|inputs| match inputs.battery() {
                        Some(battery) if battery.warnings != 0 => {
                            format!("battery warnings 0x{:04x}", battery.warnings)
                        }
                        Some(battery) if battery.alarms != 0 => {
                            format!("battery alarms 0x{:04x}", battery.alarms)
                        }
                        Some(battery) if battery.faults != 0 => {
                            format!("battery faults 0x{:04x}", battery.faults)
                        }
                        Some(battery) if battery.estop_active => {
                            "battery e-stop active".to_owned()
                        }
                        Some(_) => "battery contactor did not close".to_owned(),
                        None => "battery not responding".to_owned(),
                    }, inputs);
                }
            }
            SequenceStep::InverterEnable => {
                let confirmed = inputs
                    .inverter()
                    .map(|inverter| inverter.enabled)
                    .unwrap_or(false);
                if confirmed {
                    self.transition(SequenceStep::Running, "running");
                    self.attempts_used = 0;
                } else {
                    self.stall(|inputs| match inputs.inverter() {
                        Some(inverter) if inverter.warnings != 0 => {
                            format!("inverter warnings 0x{:04x}", inverter.warnings)
                        }
                        Some(inverter) if inverter.alarms != 0 => {
                            format!("inverter alarms 0x{:04x}", inverter.alarms)
                        }
                        Some(inverter) if inverter.faults != 0 => {
                            format!("inverter faults 0x{:04x}", inverter.faults)
                        }
                        Some(_) => "inverter did not enable".to_owned(),
                        None => "inverter not responding".to_owned(),
                    }, inputs);
                }
            }
            SequenceStep::Running => {
                self.status_text = "running".to_owned();
            }
        }
    }

    fn step_down(&mut self) {
        if self.step == SequenceStep::Idle {
            self.wait_cycles = 0;
            self.attempts_used = 0;
            self.status_text = "disabled".to_owned();
            return;
        }
        let from = self.step;
        self.step = self.step.prev();
        self.wait_cycles = 0;
        self.status_text = format!("disabling: {}", self.step);
        info!(from = %from, to = %self.step, "sequence step released");
    }

    fn transition(&mut self, to: SequenceStep, text: &str) {
        info!(from = %self.step, to = %to, "sequence step advanced");
        self.step = to;
        self.wait_cycles = 0;
        self.status_text = text.to_owned();
    }

    fn stall(
        &mut self,
        diagnose: impl Fn(&DispatchInputs<'_>) -> String,
        inputs: &DispatchInputs<'_>,
    ) {
        self.wait_cycles = self.wait_cycles.saturating_add(1);
        if self.wait_cycles < DIAG_WAIT_CYCLES {
            self.status_text = format!("waiting: {}", self.step);
            return;
        }
        // Text keeps tracking the live bits for a few cycles, then holds so
        // the operator display stops flickering.
        if self.wait_cycles <= TEXT_FREEZE_CYCLES {
            self.status_text = diagnose(inputs);
        }
        if self.wait_cycles % DIAG_WAIT_CYCLES == 0 {
            self.attempts_used += 1;
            warn!(
                step = %self.step,
                attempts = self.attempts_used,
                budget = RETRY_BUDGET,
                status = %self.status_text,
                "enable stage stalled"
            );
            if self.attempts_used >= RETRY_BUDGET {
                self.forced_off = true;
                self.status_text = "enable attempts exhausted".to_owned();
                warn!(step = %self.step, "enable request abandoned, forcing disable");
            }
        }
    }

    fn outputs(&self, enabling: bool) -> SequencerOutputs {
        let held = self.step.as_u16();
        // While enabling the current stage's actuator is asserted; while
        // disabling it has already been released.
        let asserted = |stage: u16| {
            if enabling {
                held >= stage
            } else {
                held > stage
            }
        };
        SequencerOutputs {
            close_rmsc: asserted(SequenceStep::RmscEnable.as_u16()),
            battery_enable: asserted(SequenceStep::BatteryContactor.as_u16()),
            inverter_enable: asserted(SequenceStep::InverterEnable.as_u16()),
            running: enabling && self.step == SequenceStep::Running,
        }
    }
}
