//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_bess_common::AppConfig;
use r_bess_fleet::ModuleKind;
use r_bess_proto::DeviceActor;
use tracing::{debug, warn};

use crate::{SimBattery, SimGenerator, SimInverter, SimIo, SimMeter, SimSolar};

/// Build one simulation actor per enabled non-client device in the fleet.
///
/// The client is excluded; the daemon hosts the real dispatch client in both
/// modes. Kinds without a simulation model are skipped with a warning so a
/// config typo shows up in the log instead of a silent hole in the fleet.
pub fn build_actors(config: &AppConfig) -> Vec<(String, Box<dyn DeviceActor>)> {
    let dt_s = config.scan.interval.as_secs_f64();
    let sim = &config.sim;
    let mut actors: Vec<(String, Box<dyn DeviceActor>)> = Vec::new();
    for (uid, device) in &config.fleet.devices {
        if !device.enabled || device.kind == ModuleKind::Client {
            continue;
        }
        let actor: Box<dyn DeviceActor> = match device.kind {
            ModuleKind::Battery => Box::new(SimBattery::new(uid.clone(), dt_s)),
            ModuleKind::Inverter => Box::new(SimInverter::new(uid.clone())),
            ModuleKind::AcMeter => Box::new(SimMeter::new(uid.clone(), dt_s, sim)),
            ModuleKind::AcSolar => Box::new(SimSolar::new(uid.clone(), dt_s, sim)),
            ModuleKind::AcGenerator => Box::new(SimGenerator::new(uid.clone())),
            ModuleKind::DigitalIo => Box::new(SimIo::new(uid.clone())),
            other => {
                warn!(uid = %uid, kind = %other, "no simulation model for this device kind");
                continue;
            }
        };
        debug!(uid = %uid, kind = %device.kind, "built simulation actor");
        actors.push((uid.clone(), actor));
    }
    actors
}
