//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed device records and fleet snapshot model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Classification of every device the site controller can talk to.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModuleKind {
    /// Grid-tied AC energy meter at the point of common coupling.
    AcMeter,
    /// DC bus meter on the battery side.
    DcMeter,
    /// Battery rack bank, including its safety contactor chain.
    Battery,
    /// Bidirectional battery inverter.
    Inverter,
    /// Backup diesel or gas generator set.
    AcGenerator,
    /// AC-coupled photovoltaic inverter.
    AcSolar,
    /// DC-coupled photovoltaic string on the battery bus.
    DcSolar,
    /// Digital input/output block (relays, feedback contacts).
    DigitalIo,
    /// Analog input/output block (4-20 mA channels and friends).
    AnalogIo,
    /// The dispatch client itself, exposed to SCADA as one more device.
    Client,
}

/// Inverter regulation mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InverterMode {
    /// Grid-following: tracks an external voltage/frequency reference.
    #[default]
    Following,
    /// Grid-forming: provides the voltage/frequency reference itself.
    Forming,
}

/// Measurements from the grid-side AC meter.
///
/// `power_kw` is positive when the site imports from the grid and negative
/// when it exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AcMeterBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Site active power at the coupling point, import positive, in kW.
    pub power_kw: f64,
    /// Cumulative imported energy in kWh.
    pub energy_import_kwh: f64,
    /// Cumulative exported energy in kWh.
    pub energy_export_kwh: f64,
    /// Line voltage in volts.
    pub voltage_v: f64,
    /// Line frequency in hertz.
    pub frequency_hz: f64,
}

/// Measurements from the DC bus meter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DcMeterBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Bus voltage in volts.
    pub voltage_v: f64,
    /// Bus current in amperes.
    pub current_a: f64,
    /// Bus power in kW.
    pub power_kw: f64,
}

/// Battery bank state, including the rack safety contactor chain.
///
/// `bus_power_kw` is positive while discharging and negative while charging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BatteryBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// State of charge in percent.
    pub soc_pct: f64,
    /// State of health in percent.
    pub soh_pct: f64,
    /// DC bus voltage in volts.
    pub bus_voltage_v: f64,
    /// DC bus current in amperes.
    pub bus_current_a: f64,
    /// DC bus power, discharge positive, in kW.
    pub bus_power_kw: f64,
    /// Maximum charge power the BMS currently allows, in kW.
    pub charge_limit_kw: f64,
    /// Maximum discharge power the BMS currently allows, in kW.
    pub discharge_limit_kw: f64,
    /// Active warning bits reported by the BMS.
    pub warnings: u16,
    /// Active alarm bits reported by the BMS.
    pub alarms: u16,
    /// Active fault bits reported by the BMS.
    pub faults: u16,
    /// Emergency-stop chain open.
    pub estop_active: bool,
    /// Rack safety contactor supply is energised.
    pub rmsc_power_on: bool,
    /// Main contactors closed and the bank reports itself operational.
    pub enabled: bool,
    /// Contactor close request written by the dispatch client.
    pub enable_cmd: bool,
}

/// Battery inverter state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InverterBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Regulation mode the unit is configured for.
    pub mode: InverterMode,
    /// Measured active power, discharge positive, in kW.
    pub active_power_kw: f64,
    /// Active warning bits.
    pub warnings: u16,
    /// Active alarm bits.
    pub alarms: u16,
    /// Active fault bits.
    pub faults: u16,
    /// Power stage enabled and switching.
    pub enabled: bool,
    /// Enable request written by the dispatch client.
    pub enable_cmd: bool,
    /// Active power setpoint written by the dispatch client, in kW.
    pub power_setpoint_kw: f64,
}

/// Backup generator set state and commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AcGeneratorBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Generator terminal frequency in hertz; zero when stopped.
    pub frequency_hz: f64,
    /// Generator active power output in kW.
    pub power_kw: f64,
    /// Engine confirmed running by the genset controller.
    pub running: bool,
    /// Remote start request written by the dispatch client.
    pub remote_start_cmd: bool,
    /// Mains-parallel (synchronise to the local bus) request.
    pub mains_parallel_cmd: bool,
    /// Load share ceiling handed to the genset governor, in percent.
    pub max_load_cmd_pct: f64,
}

/// AC-coupled photovoltaic production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AcSolarBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Instantaneous production in kW.
    pub power_kw: f64,
    /// Cumulative production in kWh.
    pub energy_kwh: f64,
}

/// DC-coupled photovoltaic string on the battery bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DcSolarBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Instantaneous production in kW.
    pub power_kw: f64,
    /// String voltage in volts.
    pub voltage_v: f64,
    /// String current in amperes.
    pub current_a: f64,
}

/// Digital IO block: relay outputs plus feedback contacts as bitmasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DigitalIoBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Input contact states.
    pub inputs: u16,
    /// Confirmed relay output states.
    pub outputs: u16,
    /// Relay output request written by the dispatch client.
    pub output_cmd: u16,
}

impl DigitalIoBlock {
    /// Whether the confirmed output state has `bit` closed.
    pub fn output_closed(&self, bit: u16) -> bool {
        self.outputs & (1 << bit) != 0
    }

    /// Request relay `bit` closed or open.
    pub fn command_output(&mut self, bit: u16, closed: bool) {
        if closed {
            self.output_cmd |= 1 << bit;
        } else {
            self.output_cmd &= !(1 << bit);
        }
    }
}

/// Analog IO block with raw engineering-unit channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalogIoBlock {
    /// Rolling liveness counter maintained by the device driver.
    pub heartbeat: u16,
    /// Input channel readings.
    pub inputs: Vec<f64>,
    /// Output channel values.
    pub outputs: Vec<f64>,
}

/// Display echo of one dispatch window, published for SCADA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WindowEcho {
    /// Window label, e.g. `tou1` or `peak2`.
    pub name: String,
    /// Whether the window is active this cycle.
    pub active: bool,
    /// Configured power limit of the window in kW.
    pub limit_kw: f64,
}

/// Telemetry block the dispatch client publishes about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientBlock {
    /// Rolling liveness counter maintained by the dispatch client.
    pub heartbeat: u16,
    /// Operator system-enable state the client is acting on.
    pub system_enabled: bool,
    /// Startup sequencer step (0 idle through 4 running).
    pub sequence_step: u16,
    /// Human-readable startup/diagnostic text.
    pub status_text: String,
    /// Power command currently applied, discharge positive, in kW.
    pub dispatch_kw: f64,
    /// Target the command is ramping toward, in kW.
    pub target_kw: f64,
    /// Name of the policy that moved the command this cycle.
    pub active_policy: String,
    /// Generator coordinator step (0 idle through 3 fault).
    pub generator_step: u16,
    /// Generator load share ceiling currently commanded, in percent.
    pub generator_load_pct: f64,
    /// Per-window activity echoes for the operator display.
    pub windows: Vec<WindowEcho>,
}

/// Typed payload of one device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ModuleData {
    /// Grid-side AC meter payload.
    AcMeter(AcMeterBlock),
    /// DC bus meter payload.
    DcMeter(DcMeterBlock),
    /// Battery bank payload.
    Battery(BatteryBlock),
    /// Battery inverter payload.
    Inverter(InverterBlock),
    /// Backup generator payload.
    AcGenerator(AcGeneratorBlock),
    /// AC solar payload.
    AcSolar(AcSolarBlock),
    /// DC solar payload.
    DcSolar(DcSolarBlock),
    /// Digital IO payload.
    DigitalIo(DigitalIoBlock),
    /// Analog IO payload.
    AnalogIo(AnalogIoBlock),
    /// Dispatch client payload.
    Client(ClientBlock),
}

impl ModuleData {
    /// Module kind of this payload.
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleData::AcMeter(_) => ModuleKind::AcMeter,
            ModuleData::DcMeter(_) => ModuleKind::DcMeter,
            ModuleData::Battery(_) => ModuleKind::Battery,
            ModuleData::Inverter(_) => ModuleKind::Inverter,
            ModuleData::AcGenerator(_) => ModuleKind::AcGenerator,
            ModuleData::AcSolar(_) => ModuleKind::AcSolar,
            ModuleData::DcSolar(_) => ModuleKind::DcSolar,
            ModuleData::DigitalIo(_) => ModuleKind::DigitalIo,
            ModuleData::AnalogIo(_) => ModuleKind::AnalogIo,
            ModuleData::Client(_) => ModuleKind::Client,
        }
    }

    /// Liveness counter carried by the payload.
    pub fn heartbeat(&self) -> u16 {
        match self {
            ModuleData::AcMeter(block) => block.heartbeat,
            ModuleData::DcMeter(block) => block.heartbeat,
            ModuleData::Battery(block) => block.heartbeat,
            ModuleData::Inverter(block) => block.heartbeat,
            ModuleData::AcGenerator(block) => block.heartbeat,
            ModuleData::AcSolar(block) => block.heartbeat,
            ModuleData::DcSolar(block) => block.heartbeat,
            ModuleData::DigitalIo(block) => block.heartbeat,
            ModuleData::AnalogIo(block) => block.heartbeat,
            ModuleData::Client(block) => block.heartbeat,
        }
    }

    /// Empty payload of the given kind.
    pub fn empty(kind: ModuleKind) -> Self {
        match kind {
            ModuleKind::AcMeter => ModuleData::AcMeter(AcMeterBlock::default()),
            ModuleKind::DcMeter => ModuleData::DcMeter(DcMeterBlock::default()),
            ModuleKind::Battery => ModuleData::Battery(BatteryBlock::default()),
            ModuleKind::Inverter => ModuleData::Inverter(InverterBlock::default()),
            ModuleKind::AcGenerator => ModuleData::AcGenerator(AcGeneratorBlock::default()),
            ModuleKind::AcSolar => ModuleData::AcSolar(AcSolarBlock::default()),
            ModuleKind::DcSolar => ModuleData::DcSolar(DcSolarBlock::default()),
            ModuleKind::DigitalIo => ModuleData::DigitalIo(DigitalIoBlock::default()),
            ModuleKind::AnalogIo => ModuleData::AnalogIo(AnalogIoBlock::default()),
            ModuleKind::Client => ModuleData::Client(ClientBlock::default()),
        }
    }
}
