//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{Local, NaiveTime};
use r_bess_common::{FieldPage, SimConfig};
use r_bess_fleet::{AcSolarBlock, DeviceRecord, FleetSnapshot, ModuleData, ModuleKind};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

use crate::profile::solar_curve;

fn local_time() -> NaiveTime {
    Local::now().time()
}

/// Simulated AC-coupled photovoltaic inverter.
///
/// Production follows the wall-clock day curve so it lines up with the
/// solar dispatch windows the client is configured with.
#[derive(Debug)]
pub struct SimSolar {
    uid: String,
    dt_s: f64,
    peak_kw: f64,
    state: AcSolarBlock,
    page: FieldPage,
    actions: ActionLog,
    clock: fn() -> NaiveTime,
}

impl SimSolar {
    /// New unit with the configured peak production.
    pub fn new(uid: impl Into<String>, dt_s: f64, sim: &SimConfig) -> Self {
        Self {
            uid: uid.into(),
            dt_s,
            peak_kw: sim.solar_peak_kw,
            state: AcSolarBlock::default(),
            page: FieldPage::new(),
            actions: ActionLog::default(),
            clock: local_time,
        }
    }

    /// Replace the wall-clock source; tests pin the time of day with this.
    pub fn set_clock(&mut self, clock: fn() -> NaiveTime) {
        self.clock = clock;
    }
}

impl DeviceActor for SimSolar {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::AcSolar,
            manufacturer: "Renra Energy".to_owned(),
            model: "simulated pv inverter".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        ActorStatus {
            heartbeat: self.state.heartbeat,
            warnings: 0,
            alarms: 0,
            faults: 0,
            state_text: format!("{:.1} kW", self.state.power_kw),
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, _snapshot: FleetSnapshot, page: FieldPage) {
        self.page = page;
    }

    fn sync(&mut self) {
        let now = (self.clock)();
        self.state.power_kw = solar_curve(now, self.peak_kw);
        self.state.energy_kwh += self.state.power_kw * self.dt_s / 3600.0;
        self.state.heartbeat = self.state.heartbeat.wrapping_add(1);
    }

    fn outputs(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            self.uid.clone(),
            ModuleData::AcSolar(self.state.clone()),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(peak_kw: f64) -> SimConfig {
        SimConfig {
            solar_peak_kw: peak_kw,
            ..SimConfig::default()
        }
    }

    #[test]
    fn production_follows_the_sun() {
        let mut solar = SimSolar::new("pv1", 1.0, &sim(30.0));
        solar.set_clock(|| NaiveTime::from_hms_opt(13, 0, 0).unwrap());
        solar.sync();
        assert!((solar.state.power_kw - 30.0).abs() < 1e-9);

        solar.set_clock(|| NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        solar.sync();
        assert_eq!(solar.state.power_kw, 0.0);
    }

    #[test]
    fn energy_accumulates_while_producing() {
        let mut solar = SimSolar::new("pv1", 3600.0, &sim(20.0));
        solar.set_clock(|| NaiveTime::from_hms_opt(13, 0, 0).unwrap());
        solar.sync();
        solar.sync();
        assert!((solar.state.energy_kwh - 40.0).abs() < 1e-9);
    }
}
