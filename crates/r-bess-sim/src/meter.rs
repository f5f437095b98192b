//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::f64::consts::PI;

use r_bess_common::{FieldPage, SimConfig};
use r_bess_fleet::{AcMeterBlock, DeviceRecord, FleetSnapshot, ModuleData, ModuleKind};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

use crate::profile::{device_seed, LoadProfile};

/// Simulated grid meter at the point of common coupling.
///
/// Site power is the synthetic load minus everything produced behind the
/// meter: solar, the battery inverter, and the generator set. Import is
/// positive; the energy accumulators split by direction.
#[derive(Debug)]
pub struct SimMeter {
    uid: String,
    dt_s: f64,
    tick: u64,
    profile: LoadProfile,
    state: AcMeterBlock,
    last: FleetSnapshot,
    page: FieldPage,
    actions: ActionLog,
}

impl SimMeter {
    /// New meter with a load profile seeded from the sim config.
    pub fn new(uid: impl Into<String>, dt_s: f64, sim: &SimConfig) -> Self {
        let uid = uid.into();
        let profile = LoadProfile::new(
            sim.load_base_kw,
            sim.load_swing_kw,
            sim.noise_sigma,
            device_seed(sim.random_seed, &uid),
        );
        let state = AcMeterBlock {
            voltage_v: 400.0,
            frequency_hz: 50.0,
            ..AcMeterBlock::default()
        };
        Self {
            uid,
            dt_s,
            tick: 0,
            profile,
            state,
            last: FleetSnapshot::new(),
            page: FieldPage::new(),
            actions: ActionLog::default(),
        }
    }
}

impl DeviceActor for SimMeter {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::AcMeter,
            manufacturer: "Renra Energy".to_owned(),
            model: "simulated grid meter".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        ActorStatus {
            heartbeat: self.state.heartbeat,
            warnings: 0,
            alarms: 0,
            faults: 0,
            state_text: format!("{:+.1} kW at the coupling point", self.state.power_kw),
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        self.last = snapshot;
        self.page = page;
    }

    fn sync(&mut self) {
        let t = self.tick as f64 * self.dt_s;
        self.tick += 1;

        let load_kw = self.profile.sample(t);
        let solar_kw = self
            .last
            .ac_solar()
            .map(|solar| solar.power_kw)
            .unwrap_or(0.0);
        let inverter_kw = self
            .last
            .inverter()
            .map(|inverter| inverter.active_power_kw)
            .unwrap_or(0.0);
        let generator_kw = self
            .last
            .generator()
            .map(|generator| generator.power_kw)
            .unwrap_or(0.0);

        let power_kw = load_kw - solar_kw - inverter_kw - generator_kw;
        let energy_kwh = power_kw.abs() * self.dt_s / 3600.0;
        if power_kw >= 0.0 {
            self.state.energy_import_kwh += energy_kwh;
        } else {
            self.state.energy_export_kwh += energy_kwh;
        }
        self.state.power_kw = power_kw;
        self.state.voltage_v = 400.0 + 2.0 * (2.0 * PI * t / 60.0).sin();
        self.state.frequency_hz = 50.0 + 0.02 * (2.0 * PI * t / 45.0).cos();
        self.state.heartbeat = self.state.heartbeat.wrapping_add(1);
    }

    fn outputs(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            self.uid.clone(),
            ModuleData::AcMeter(self.state.clone()),
        ));
        snapshot
    }

    fn page(&self) -> FieldPage {
        self.page.clone()
    }

    fn set_page(&mut self, fields: FieldPage) {
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        self.actions
            .record(UserAction::now("set_page", keys.join(", ")));
        for (key, value) in fields {
            self.page.insert(key, value);
        }
    }
}
