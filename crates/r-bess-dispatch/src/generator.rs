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
//! Generator-backed charging runs on its own channel, next to the power
//! command rather than through it: the coordinator only drives the
//! generator's remote-start, mains-parallel, and max-load commands, plus an
//! inverter enable override during fault recovery. Charge power still flows
//! through the normal arbitration ladder.

use std::fmt;

use tracing::{info, warn};

use crate::inputs::DispatchInputs;
use crate::settings::ChargeMode;

/// Cycles a start request may wait for the generator to reach band.
pub const START_TIMEOUT_CYCLES: u32 = 30;

/// Generator frequency band that counts as running, inclusive, in Hz.
pub const RUNNING_BAND_HZ: (f64, f64) = (45.0, 55.0);

/// Max-load command floor while paralleling, percent.
const MAX_LOAD_FLOOR_PCT: f64 = 5.0;

/// Max-load command ceiling, percent.
const MAX_LOAD_CEIL_PCT: f64 = 100.0;

/// Generator coordination state, reported in the client block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GeneratorStep {
    /// Not coordinating; all generator commands released.
    Idle = 0,
    /// Preconditions confirmed, watching the start floor.
    Ready = 1,
    /// Remote start issued, waiting for the set to reach band.
    Starting = 2,
    /// Inverter fault recovery: generator carries the site alone.
    Fault = 3,
}

impl GeneratorStep {
    /// Register representation of the step.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for GeneratorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeneratorStep::Idle => "idle",
            GeneratorStep::Ready => "ready",
            GeneratorStep::Starting => "starting",
            GeneratorStep::Fault => "fault",
        };
        f.write_str(name)
    }
}

/// Commands the coordinator produced this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorOutputs {
    /// Remote-start request to the generator controller.
    pub remote_start: bool,
    /// Mains-parallel mode request.
    pub mains_parallel: bool,
    /// Max-load command, percent of generator rating.
    pub max_load_pct: f64,
    /// `Some(false)` while fault recovery holds the inverter off.
    pub inverter_enable_override: Option<bool>,
}

impl Default for GeneratorOutputs {
    fn default() -> Self {
        Self {
            remote_start: false,
            mains_parallel: false,
            max_load_pct: MAX_LOAD_FLOOR_PCT,
            inverter_enable_override: None,
        }
    }
}

/// Runs the generator state machine one step per scan cycle.
#[derive(Debug)]
pub struct GeneratorCoordinator {
    step: GeneratorStep,
    timeout_cycles: u32,
    max_load_pct: f64,
    remote_start: bool,
    mains_parallel: bool,
    charging: bool,
    emergency: bool,
}

impl Default for GeneratorCoordinator {
    fn default() -> Self {
        Self {
            step: GeneratorStep::Idle,
            timeout_cycles: 0,
            max_load_pct: MAX_LOAD_FLOOR_PCT,
            remote_start: false,
            mains_parallel: false,
            charging: false,
            emergency: false,
        }
    }
}

impl GeneratorCoordinator {
    /// Current state.
    pub fn step(&self) -> GeneratorStep {
        self.step
    }

    /// Current max-load command, percent.
    pub fn max_load_pct(&self) -> f64 {
        self.max_load_pct
    }

    /// Whether the night (emergency) floor triggered the current start.
    pub fn emergency(&self) -> bool {
        self.emergency
    }

    /// Whether generator-backed charging is currently enabled.
    pub fn charging(&self) -> bool {
        self.charging
    }

    /// Releases every command and returns to `Idle`. The client calls this
    /// the moment the system leaves `Running`.
    pub fn reset(&mut self) {
        if self.step != GeneratorStep::Idle {
            info!(from = %self.step, "generator coordination released");
        }
        *self = Self::default();
    }

    /// Runs one cycle against the current inputs.
    pub fn evaluate(&mut self, inputs: &DispatchInputs<'_>) -> GeneratorOutputs {
        let settings = &inputs.settings.generator;
        if !settings.enabled {
            self.reset();
            return self.outputs();
        }
        let (Some(generator), Some(battery)) = (inputs.generator(), inputs.battery()) else {
            self.reset();
            return self.outputs();
        };

        let running = generator.frequency_hz >= RUNNING_BAND_HZ.0
            && generator.frequency_hz <= RUNNING_BAND_HZ.1;
        let inverter = inputs.inverter();
        let inverter_faulted = inverter.map(|inv| inv.faults != 0).unwrap_or(false);
        let ramp_pct = settings.load_ramp_pct.max(0.0);

        match self.step {
            GeneratorStep::Idle => {
                // Both preconditions come from hardware echoes, not our own
                // commands.
                if !generator.mains_parallel_cmd && !running {
                    self.step = GeneratorStep::Ready;
                    info!("generator ready for coordination");
                }
            }
            GeneratorStep::Ready => {
                if self.charging {
                    if inverter_faulted {
                        self.enter_fault();
                    } else if !running {
                        warn!("generator dropped out of band during charge");
                        self.release();
                    } else {
                        self.ramp_charge_load(inputs, ramp_pct);
                    }
                } else if let Some(floor) = settings.floor_at(inputs.now, inputs.settings.charge_mode)
                {
                    let metric = match inputs.settings.charge_mode {
                        ChargeMode::Soc => battery.soc_pct,
                        ChargeMode::Voltage => battery.bus_voltage_v,
                    };
                    let forming_ready = inverter
                        .map(|inv| inv.enabled && inv.mode == r_bess_fleet::InverterMode::Forming)
                        .unwrap_or(false);
                    if forming_ready && metric <= floor.threshold {
                        self.begin_start(floor.emergency);
                    }
                }
            }
            GeneratorStep::Starting => {
                if inverter_faulted {
                    self.enter_fault();
                } else if running {
                    self.step = GeneratorStep::Ready;
                    self.charging = true;
                    self.timeout_cycles = 0;
                    info!(emergency = self.emergency, "generator online, charge enabled");
                } else {
                    self.timeout_cycles = self.timeout_cycles.saturating_sub(1);
                    if self.timeout_cycles == 0 {
                        warn!("generator start timed out");
                        self.release();
                    }
                }
            }
            GeneratorStep::Fault => {
                let inverter_clean = inverter
                    .map(|inv| inv.enabled && inv.faults == 0)
                    .unwrap_or(false);
                if running && inverter_clean {
                    info!("inverter recovered, releasing generator fault hold");
                    self.release();
                }
            }
        }

        self.outputs()
    }

    fn begin_start(&mut self, emergency: bool) {
        self.step = GeneratorStep::Starting;
        self.timeout_cycles = START_TIMEOUT_CYCLES;
        self.max_load_pct = MAX_LOAD_FLOOR_PCT;
        self.mains_parallel = true;
        self.remote_start = true;
        self.emergency = emergency;
        info!(
            emergency,
            timeout_cycles = START_TIMEOUT_CYCLES,
            "generator start requested"
        );
    }

    fn enter_fault(&mut self) {
        self.step = GeneratorStep::Fault;
        self.mains_parallel = false;
        self.remote_start = true;
        self.max_load_pct = MAX_LOAD_CEIL_PCT;
        self.charging = false;
        warn!("inverter fault, generator carrying site load");
    }

    fn release(&mut self) {
        self.step = GeneratorStep::Idle;
        self.timeout_cycles = 0;
        self.max_load_pct = MAX_LOAD_FLOOR_PCT;
        self.remote_start = false;
        self.mains_parallel = false;
        self.charging = false;
        self.emergency = false;
    }

    /// Walks max-load toward the ceiling while the battery sits below the
    /// charge ceiling, and back toward the floor once it is reached. At the
    /// floor with the ceiling reached, the set is released.
    fn ramp_charge_load(&mut self, inputs: &DispatchInputs<'_>, ramp_pct: f64) {
        let settings = &inputs.settings.generator;
        let battery = match inputs.battery() {
            Some(battery) => battery,
            None => {
                self.release();
                return;
            }
        };
        let ceiling_met = match settings.ceiling(inputs.settings.charge_mode) {
            Some(ceiling) => match inputs.settings.charge_mode {
                ChargeMode::Soc => battery.soc_pct >= ceiling,
                ChargeMode::Voltage => battery.bus_voltage_v >= ceiling,
            },
            // No ceiling configured: charge indefinitely at full load.
            None => false,
        };
        if ceiling_met {
            self.max_load_pct = (self.max_load_pct - ramp_pct).max(MAX_LOAD_FLOOR_PCT);
            if self.max_load_pct <= MAX_LOAD_FLOOR_PCT {
                info!("battery at generator ceiling, releasing set");
                self.release();
            }
        } else {
            self.max_load_pct = (self.max_load_pct + ramp_pct).min(MAX_LOAD_CEIL_PCT);
        }
    }

    fn outputs(&self) -> GeneratorOutputs {
        GeneratorOutputs {
            remote_start: self.remote_start,
            mains_parallel: self.mains_parallel,
            max_load_pct: self.max_load_pct,
            inverter_enable_override: (self.step == GeneratorStep::Fault).then_some(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::StaleTracker;
    use crate::settings::DispatchSettings;
    use chrono::NaiveTime;
    use r_bess_common::FieldValue;
    use r_bess_fleet::{
        AcGeneratorBlock, BatteryBlock, DeviceRecord, FleetSnapshot, InverterBlock, InverterMode,
        ModuleData,
    };

    fn gen_settings() -> DispatchSettings {
        let page: r_bess_common::FieldPage = [
            ("gen_enable", FieldValue::Bool(true)),
            ("gen_day_start", FieldValue::Text("06:00".into())),
            ("gen_day_end", FieldValue::Text("22:00".into())),
            ("gen_night_start", FieldValue::Text("22:00".into())),
            ("gen_night_end", FieldValue::Text("06:00".into())),
            ("gen_floor_soc", FieldValue::Float(25.0)),
            ("gen_night_floor_soc", FieldValue::Float(10.0)),
            ("gen_ceiling_soc", FieldValue::Float(60.0)),
            ("gen_load_ramp_pct", FieldValue::Float(1.0)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        DispatchSettings::from_page(&page)
    }

    struct Rig {
        coordinator: GeneratorCoordinator,
        settings: DispatchSettings,
        tracker: StaleTracker,
        now: NaiveTime,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                coordinator: GeneratorCoordinator::default(),
                settings: gen_settings(),
                tracker: StaleTracker::default(),
                now: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            }
        }

        fn cycle(&mut self, snapshot: &FleetSnapshot) -> GeneratorOutputs {
            let inputs = DispatchInputs::new(snapshot, &self.settings, self.now, &self.tracker);
            self.coordinator.evaluate(&inputs)
        }
    }

    fn fleet(soc: f64, freq: f64, inverter: InverterBlock) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            "bat1",
            ModuleData::Battery(BatteryBlock {
                soc_pct: soc,
                ..BatteryBlock::default()
            }),
        ));
        snapshot.insert(DeviceRecord::new(
            "gen1",
            ModuleData::AcGenerator(AcGeneratorBlock {
                frequency_hz: freq,
                ..AcGeneratorBlock::default()
            }),
        ));
        snapshot.insert(DeviceRecord::new("inv1", ModuleData::Inverter(inverter)));
        snapshot
    }

    fn forming_inverter() -> InverterBlock {
        InverterBlock {
            enabled: true,
            mode: InverterMode::Forming,
            ..InverterBlock::default()
        }
    }

    #[test]
    fn becomes_ready_when_set_is_stopped_and_unparalleled() {
        let mut rig = Rig::new();
        rig.cycle(&fleet(50.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Ready);
    }

    #[test]
    fn start_requires_forming_inverter_and_floor() {
        let mut rig = Rig::new();
        rig.cycle(&fleet(50.0, 0.0, forming_inverter()));

        // Above floor: stays ready.
        let out = rig.cycle(&fleet(50.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Ready);
        assert!(!out.remote_start);

        // Below floor but grid-following: stays ready.
        let following = InverterBlock {
            enabled: true,
            ..InverterBlock::default()
        };
        rig.cycle(&fleet(20.0, 0.0, following));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Ready);

        // Below floor with a forming inverter: start.
        let out = rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Starting);
        assert!(out.remote_start && out.mains_parallel);
        assert_eq!(out.max_load_pct, 5.0);
        assert!(!rig.coordinator.emergency());
    }

    #[test]
    fn night_start_uses_emergency_floor() {
        let mut rig = Rig::new();
        rig.now = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        // SoC 20 is below the day floor but above the night floor.
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Ready);

        rig.cycle(&fleet(9.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Starting);
        assert!(rig.coordinator.emergency());
    }

    #[test]
    fn reaching_band_enables_charge_and_ramps_load() {
        let mut rig = Rig::new();
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Starting);

        rig.cycle(&fleet(20.0, 50.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Ready);
        assert!(rig.coordinator.charging());

        let out = rig.cycle(&fleet(20.0, 50.0, forming_inverter()));
        assert_eq!(out.max_load_pct, 6.0);
        let out = rig.cycle(&fleet(20.0, 50.0, forming_inverter()));
        assert_eq!(out.max_load_pct, 7.0);
    }

    #[test]
    fn ceiling_ramps_load_back_down_then_releases() {
        let mut rig = Rig::new();
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        rig.cycle(&fleet(20.0, 50.0, forming_inverter()));
        let out = rig.cycle(&fleet(20.0, 50.0, forming_inverter()));
        assert_eq!(out.max_load_pct, 6.0);

        // Ceiling reached: back toward the floor, then release.
        let out = rig.cycle(&fleet(65.0, 50.0, forming_inverter()));
        assert_eq!(out.max_load_pct, 5.0);
        let out = rig.cycle(&fleet(65.0, 50.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Idle);
        assert!(!out.remote_start && !out.mains_parallel);
    }

    #[test]
    fn start_timeout_reverts_to_idle() {
        let mut rig = Rig::new();
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Starting);

        for _ in 0..START_TIMEOUT_CYCLES {
            rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        }
        assert_eq!(rig.coordinator.step(), GeneratorStep::Idle);
    }

    #[test]
    fn inverter_fault_backfeeds_site_until_recovery() {
        let mut rig = Rig::new();
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        rig.cycle(&fleet(20.0, 0.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Starting);

        let faulted = InverterBlock {
            enabled: true,
            mode: InverterMode::Forming,
            faults: 0x0010,
            ..InverterBlock::default()
        };
        let out = rig.cycle(&fleet(20.0, 0.0, faulted.clone()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Fault);
        assert!(out.remote_start && !out.mains_parallel);
        assert_eq!(out.max_load_pct, 100.0);
        assert_eq!(out.inverter_enable_override, Some(false));

        // Still faulted: hold.
        rig.cycle(&fleet(20.0, 50.0, faulted));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Fault);

        // Generator in band, inverter re-enabled clean: release.
        let out = rig.cycle(&fleet(20.0, 50.0, forming_inverter()));
        assert_eq!(rig.coordinator.step(), GeneratorStep::Idle);
        assert!(!out.remote_start);
        assert!(out.inverter_enable_override.is_none());
    }
}
