//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed device records and fleet snapshot model."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Typed data model for the device fleet.
//!
//! Every module kind on site gets a named record instead of the positional
//! value arrays the previous generation of controllers exchanged. The
//! positional layout survives only in [`regmap`], which renders records into
//! the legacy register image consumed by SCADA.

#![warn(missing_docs)]

pub mod regmap;
mod snapshot;
mod types;

pub use snapshot::{DeviceRecord, FleetSnapshot};
pub use types::{
    AcGeneratorBlock, AcMeterBlock, AcSolarBlock, AnalogIoBlock, BatteryBlock, ClientBlock,
    DcMeterBlock, DcSolarBlock, DigitalIoBlock, InverterBlock, InverterMode, ModuleData,
    ModuleKind, WindowEcho,
};

/// Digital IO relay bit driving the battery rack safety contactor supply.
pub const RMSC_RELAY_BIT: u16 = 0;
