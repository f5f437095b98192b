//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated fleet module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//!
//! Simulation models for every device kind the dispatch client talks to.
//! Each model implements [`DeviceActor`](r_bess_proto::DeviceActor) and
//! speaks the same snapshot protocol as a real device driver, so the daemon
//! runs closed loop in simulation mode and the end-to-end tests drive real
//! dispatch cycles. Commands written by the client take effect one scan
//! cycle later, like the hardware they stand in for.

#![warn(missing_docs)]

pub mod battery;
pub mod fleet;
pub mod generator;
pub mod inverter;
pub mod io;
pub mod meter;
pub mod profile;
pub mod solar;

pub use battery::{SimBattery, PACK_CAPACITY_KWH, PACK_RATED_KW};
pub use fleet::build_actors;
pub use generator::{SimGenerator, GENSET_RATED_KW};
pub use inverter::{SimInverter, INVERTER_RATED_KW};
pub use io::SimIo;
pub use meter::SimMeter;
pub use profile::{device_seed, solar_curve, LoadProfile};
pub use solar::SimSolar;
