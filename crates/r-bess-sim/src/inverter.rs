//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_bess_common::{FieldPage, FieldValue};
use r_bess_fleet::{
    DeviceRecord, FleetSnapshot, InverterBlock, InverterMode, ModuleData, ModuleKind,
};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

/// Rated power of the simulated unit, in kW.
pub const INVERTER_RATED_KW: f64 = 120.0;

/// Simulated battery inverter.
///
/// Echoes the enable command and power setpoint one cycle behind the client.
/// The power stage needs the battery contactors closed; the page key `mode`
/// selects `forming` or `following`, and `force_faults` injects faults.
#[derive(Debug)]
pub struct SimInverter {
    uid: String,
    state: InverterBlock,
    last: FleetSnapshot,
    page: FieldPage,
    actions: ActionLog,
}

impl SimInverter {
    /// New unit, disabled, grid-following.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            state: InverterBlock::default(),
            last: FleetSnapshot::new(),
            page: FieldPage::new(),
            actions: ActionLog::default(),
        }
    }

    fn commanded(&self) -> (bool, f64) {
        match self.last.record(&self.uid).map(|record| &record.data) {
            Some(ModuleData::Inverter(block)) => (block.enable_cmd, block.power_setpoint_kw),
            _ => (false, 0.0),
        }
    }
}

impl DeviceActor for SimInverter {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::Inverter,
            manufacturer: "Renra Energy".to_owned(),
            model: "simulated battery inverter".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        ActorStatus {
            heartbeat: self.state.heartbeat,
            warnings: self.state.warnings,
            alarms: self.state.alarms,
            faults: self.state.faults,
            state_text: if self.state.enabled {
                format!("{:+.1} kW", self.state.active_power_kw)
            } else {
                "standby".to_owned()
            },
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        self.last = snapshot;
        self.page = page;
    }

    fn sync(&mut self) {
        let (enable_cmd, setpoint_kw) = self.commanded();
        let dc_ok = self
            .last
            .battery()
            .map(|battery| battery.enabled)
            .unwrap_or(true);
        let mode = match self.page.get("mode").and_then(FieldValue::as_text) {
            Some("forming") => InverterMode::Forming,
            _ => InverterMode::Following,
        };
        let forced_faults = self
            .page
            .get("force_faults")
            .and_then(FieldValue::as_i64)
            .unwrap_or(0) as u16;

        self.state.mode = mode;
        self.state.faults = forced_faults;
        self.state.enable_cmd = enable_cmd;
        self.state.power_setpoint_kw = setpoint_kw;
        self.state.enabled = enable_cmd && dc_ok && self.state.faults == 0;
        self.state.active_power_kw = if self.state.enabled {
            setpoint_kw.clamp(-INVERTER_RATED_KW, INVERTER_RATED_KW)
        } else {
            0.0
        };
        self.state.heartbeat = self.state.heartbeat.wrapping_add(1);
    }

    fn outputs(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            self.uid.clone(),
            ModuleData::Inverter(self.state.clone()),
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
