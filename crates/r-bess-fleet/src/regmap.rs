//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed device records and fleet snapshot model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Legacy fixed-position register image.
//!
//! SCADA gateways in the field still poll the positional layout of the
//! previous controller generation. Nothing inside the dispatch core reads
//! these offsets; records are rendered into this image only at the wire
//! boundary. The offsets below are frozen: changing one breaks deployed
//! gateway configurations.

use crate::snapshot::DeviceRecord;
use crate::types::{InverterMode, ModuleData};

/// Registers reserved per device block.
pub const BLOCK_REGS: usize = 32;

/// Scale factor for one-decimal engineering values (kW, percent, volts).
pub const SCALE_TENTHS: f64 = 10.0;

/// Scale factor for two-decimal values (frequency).
pub const SCALE_HUNDREDTHS: f64 = 100.0;

/// Battery block register offsets.
pub mod battery_regs {
    /// Liveness counter.
    pub const HEARTBEAT: usize = 0;
    /// State of charge, tenths of a percent.
    pub const SOC: usize = 1;
    /// State of health, tenths of a percent.
    pub const SOH: usize = 2;
    /// Bus voltage, tenths of a volt.
    pub const BUS_VOLTAGE: usize = 3;
    /// Bus current, tenths of an ampere.
    pub const BUS_CURRENT: usize = 4;
    /// Bus power, tenths of a kW, discharge positive.
    pub const BUS_POWER: usize = 5;
    /// BMS charge limit, tenths of a kW.
    pub const CHARGE_LIMIT: usize = 6;
    /// BMS discharge limit, tenths of a kW.
    pub const DISCHARGE_LIMIT: usize = 7;
    /// Warning bits.
    pub const WARNINGS: usize = 8;
    /// Alarm bits.
    pub const ALARMS: usize = 9;
    /// Fault bits.
    pub const FAULTS: usize = 10;
    /// E-stop chain open flag.
    pub const ESTOP: usize = 11;
    /// Rack safety contactor supply flag.
    pub const RMSC_POWER: usize = 12;
    /// Contactors-closed flag.
    pub const ENABLED: usize = 13;
    /// Contactor close request.
    pub const ENABLE_CMD: usize = 14;
}

/// Inverter block register offsets.
pub mod inverter_regs {
    /// Liveness counter.
    pub const HEARTBEAT: usize = 0;
    /// Regulation mode, 0 following, 1 forming.
    pub const MODE: usize = 1;
    /// Active power, tenths of a kW.
    pub const ACTIVE_POWER: usize = 2;
    /// Warning bits.
    pub const WARNINGS: usize = 3;
    /// Alarm bits.
    pub const ALARMS: usize = 4;
    /// Fault bits.
    pub const FAULTS: usize = 5;
    /// Power stage enabled flag.
    pub const ENABLED: usize = 6;
    /// Enable request.
    pub const ENABLE_CMD: usize = 7;
    /// Power setpoint, tenths of a kW.
    pub const SETPOINT: usize = 8;
}

/// Generator block register offsets.
pub mod generator_regs {
    /// Liveness counter.
    pub const HEARTBEAT: usize = 0;
    /// Terminal frequency, hundredths of a hertz.
    pub const FREQUENCY: usize = 1;
    /// Active power, tenths of a kW.
    pub const POWER: usize = 2;
    /// Engine running flag.
    pub const RUNNING: usize = 3;
    /// Remote start request.
    pub const REMOTE_START: usize = 4;
    /// Mains-parallel request.
    pub const MAINS_PARALLEL: usize = 5;
    /// Load share ceiling, tenths of a percent.
    pub const MAX_LOAD: usize = 6;
}

/// AC meter block register offsets.
pub mod ac_meter_regs {
    /// Liveness counter.
    pub const HEARTBEAT: usize = 0;
    /// Site power, tenths of a kW, import positive.
    pub const POWER: usize = 1;
    /// Imported energy, tenths of a kWh.
    pub const ENERGY_IMPORT: usize = 2;
    /// Exported energy, tenths of a kWh.
    pub const ENERGY_EXPORT: usize = 3;
    /// Line voltage, tenths of a volt.
    pub const VOLTAGE: usize = 4;
    /// Line frequency, hundredths of a hertz.
    pub const FREQUENCY: usize = 5;
}

/// Client block register offsets.
pub mod client_regs {
    /// Liveness counter.
    pub const HEARTBEAT: usize = 0;
    /// System-enable state.
    pub const SYSTEM_ENABLED: usize = 1;
    /// Startup sequencer step.
    pub const SEQUENCE_STEP: usize = 2;
    /// Applied power command, tenths of a kW.
    pub const DISPATCH: usize = 3;
    /// Ramp target, tenths of a kW.
    pub const TARGET: usize = 4;
    /// Generator coordinator step.
    pub const GENERATOR_STEP: usize = 5;
    /// Generator load ceiling, tenths of a percent.
    pub const GENERATOR_LOAD: usize = 6;
}

fn tenths(value: f64) -> i32 {
    (value * SCALE_TENTHS).round() as i32
}

fn hundredths(value: f64) -> i32 {
    (value * SCALE_HUNDREDTHS).round() as i32
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

/// Render one record into its legacy register block.
pub fn encode(record: &DeviceRecord) -> [i32; BLOCK_REGS] {
    let mut regs = [0i32; BLOCK_REGS];
    match &record.data {
        ModuleData::Battery(block) => {
            regs[battery_regs::HEARTBEAT] = i32::from(block.heartbeat);
            regs[battery_regs::SOC] = tenths(block.soc_pct);
            regs[battery_regs::SOH] = tenths(block.soh_pct);
            regs[battery_regs::BUS_VOLTAGE] = tenths(block.bus_voltage_v);
            regs[battery_regs::BUS_CURRENT] = tenths(block.bus_current_a);
            regs[battery_regs::BUS_POWER] = tenths(block.bus_power_kw);
            regs[battery_regs::CHARGE_LIMIT] = tenths(block.charge_limit_kw);
            regs[battery_regs::DISCHARGE_LIMIT] = tenths(block.discharge_limit_kw);
            regs[battery_regs::WARNINGS] = i32::from(block.warnings);
            regs[battery_regs::ALARMS] = i32::from(block.alarms);
            regs[battery_regs::FAULTS] = i32::from(block.faults);
            regs[battery_regs::ESTOP] = flag(block.estop_active);
            regs[battery_regs::RMSC_POWER] = flag(block.rmsc_power_on);
            regs[battery_regs::ENABLED] = flag(block.enabled);
            regs[battery_regs::ENABLE_CMD] = flag(block.enable_cmd);
        }
        ModuleData::Inverter(block) => {
            regs[inverter_regs::HEARTBEAT] = i32::from(block.heartbeat);
            regs[inverter_regs::MODE] = match block.mode {
                InverterMode::Following => 0,
                InverterMode::Forming => 1,
            };
            regs[inverter_regs::ACTIVE_POWER] = tenths(block.active_power_kw);
            regs[inverter_regs::WARNINGS] = i32::from(block.warnings);
            regs[inverter_regs::ALARMS] = i32::from(block.alarms);
            regs[inverter_regs::FAULTS] = i32::from(block.faults);
            regs[inverter_regs::ENABLED] = flag(block.enabled);
            regs[inverter_regs::ENABLE_CMD] = flag(block.enable_cmd);
            regs[inverter_regs::SETPOINT] = tenths(block.power_setpoint_kw);
        }
        ModuleData::AcGenerator(block) => {
            regs[generator_regs::HEARTBEAT] = i32::from(block.heartbeat);
            regs[generator_regs::FREQUENCY] = hundredths(block.frequency_hz);
            regs[generator_regs::POWER] = tenths(block.power_kw);
            regs[generator_regs::RUNNING] = flag(block.running);
            regs[generator_regs::REMOTE_START] = flag(block.remote_start_cmd);
            regs[generator_regs::MAINS_PARALLEL] = flag(block.mains_parallel_cmd);
            regs[generator_regs::MAX_LOAD] = tenths(block.max_load_cmd_pct);
        }
        ModuleData::AcMeter(block) => {
            regs[ac_meter_regs::HEARTBEAT] = i32::from(block.heartbeat);
            regs[ac_meter_regs::POWER] = tenths(block.power_kw);
            regs[ac_meter_regs::ENERGY_IMPORT] = tenths(block.energy_import_kwh);
            regs[ac_meter_regs::ENERGY_EXPORT] = tenths(block.energy_export_kwh);
            regs[ac_meter_regs::VOLTAGE] = tenths(block.voltage_v);
            regs[ac_meter_regs::FREQUENCY] = hundredths(block.frequency_hz);
        }
        ModuleData::DcMeter(block) => {
            regs[0] = i32::from(block.heartbeat);
            regs[1] = tenths(block.voltage_v);
            regs[2] = tenths(block.current_a);
            regs[3] = tenths(block.power_kw);
        }
        ModuleData::AcSolar(block) => {
            regs[0] = i32::from(block.heartbeat);
            regs[1] = tenths(block.power_kw);
            regs[2] = tenths(block.energy_kwh);
        }
        ModuleData::DcSolar(block) => {
            regs[0] = i32::from(block.heartbeat);
            regs[1] = tenths(block.power_kw);
            regs[2] = tenths(block.voltage_v);
            regs[3] = tenths(block.current_a);
        }
        ModuleData::DigitalIo(block) => {
            regs[0] = i32::from(block.heartbeat);
            regs[1] = i32::from(block.inputs);
            regs[2] = i32::from(block.outputs);
            regs[3] = i32::from(block.output_cmd);
        }
        ModuleData::AnalogIo(block) => {
            regs[0] = i32::from(block.heartbeat);
            for (slot, value) in block.inputs.iter().take(8).enumerate() {
                regs[1 + slot] = tenths(*value);
            }
            for (slot, value) in block.outputs.iter().take(8).enumerate() {
                regs[9 + slot] = tenths(*value);
            }
        }
        ModuleData::Client(block) => {
            regs[client_regs::HEARTBEAT] = i32::from(block.heartbeat);
            regs[client_regs::SYSTEM_ENABLED] = flag(block.system_enabled);
            regs[client_regs::SEQUENCE_STEP] = i32::from(block.sequence_step);
            regs[client_regs::DISPATCH] = tenths(block.dispatch_kw);
            regs[client_regs::TARGET] = tenths(block.target_kw);
            regs[client_regs::GENERATOR_STEP] = i32::from(block.generator_step);
            regs[client_regs::GENERATOR_LOAD] = tenths(block.generator_load_pct);
        }
    }
    regs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AcGeneratorBlock, BatteryBlock, ClientBlock, InverterBlock};

    #[test]
    fn battery_offsets_are_pinned() {
        let record = DeviceRecord::new(
            "bat1",
            ModuleData::Battery(BatteryBlock {
                heartbeat: 7,
                soc_pct: 85.7,
                bus_power_kw: -12.5,
                estop_active: true,
                ..BatteryBlock::default()
            }),
        );
        let regs = encode(&record);
        assert_eq!(regs[battery_regs::HEARTBEAT], 7);
        assert_eq!(regs[battery_regs::SOC], 857);
        assert_eq!(regs[battery_regs::BUS_POWER], -125);
        assert_eq!(regs[battery_regs::ESTOP], 1);
        assert_eq!(regs[battery_regs::ENABLE_CMD], 0);
    }

    #[test]
    fn inverter_mode_encodes_forming_as_one() {
        let record = DeviceRecord::new(
            "inv1",
            ModuleData::Inverter(InverterBlock {
                mode: InverterMode::Forming,
                power_setpoint_kw: -4.0,
                ..InverterBlock::default()
            }),
        );
        let regs = encode(&record);
        assert_eq!(regs[inverter_regs::MODE], 1);
        assert_eq!(regs[inverter_regs::SETPOINT], -40);
    }

    #[test]
    fn generator_frequency_uses_hundredths() {
        let record = DeviceRecord::new(
            "gen1",
            ModuleData::AcGenerator(AcGeneratorBlock {
                frequency_hz: 49.97,
                max_load_cmd_pct: 5.0,
                ..AcGeneratorBlock::default()
            }),
        );
        let regs = encode(&record);
        assert_eq!(regs[generator_regs::FREQUENCY], 4997);
        assert_eq!(regs[generator_regs::MAX_LOAD], 50);
    }

    #[test]
    fn client_block_exposes_sequence_and_dispatch() {
        let record = DeviceRecord::new(
            "bess1",
            ModuleData::Client(ClientBlock {
                sequence_step: 4,
                dispatch_kw: -10.0,
                system_enabled: true,
                ..ClientBlock::default()
            }),
        );
        let regs = encode(&record);
        assert_eq!(regs[client_regs::SEQUENCE_STEP], 4);
        assert_eq!(regs[client_regs::DISPATCH], -100);
        assert_eq!(regs[client_regs::SYSTEM_ENABLED], 1);
    }
}
