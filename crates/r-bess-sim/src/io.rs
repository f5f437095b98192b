//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated field devices speaking the actor protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_bess_common::FieldPage;
use r_bess_fleet::{DeviceRecord, DigitalIoBlock, FleetSnapshot, ModuleData, ModuleKind};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

/// Simulated digital IO block.
///
/// Relay commands switch the confirmed outputs one cycle later, and the
/// feedback contacts are wired back onto the inputs.
#[derive(Debug)]
pub struct SimIo {
    uid: String,
    state: DigitalIoBlock,
    last: FleetSnapshot,
    page: FieldPage,
    actions: ActionLog,
}

impl SimIo {
    /// New block with every relay open.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            state: DigitalIoBlock::default(),
            last: FleetSnapshot::new(),
            page: FieldPage::new(),
            actions: ActionLog::default(),
        }
    }

    fn commanded_outputs(&self) -> u16 {
        match self.last.record(&self.uid).map(|record| &record.data) {
            Some(ModuleData::DigitalIo(block)) => block.output_cmd,
            _ => 0,
        }
    }
}

impl DeviceActor for SimIo {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::DigitalIo,
            manufacturer: "Renra Energy".to_owned(),
            model: "simulated digital io".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        ActorStatus {
            heartbeat: self.state.heartbeat,
            warnings: 0,
            alarms: 0,
            faults: 0,
            state_text: format!("outputs 0x{:04x}", self.state.outputs),
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        self.last = snapshot;
        self.page = page;
    }

    fn sync(&mut self) {
        let output_cmd = self.commanded_outputs();
        self.state.output_cmd = output_cmd;
        self.state.outputs = output_cmd;
        self.state.inputs = output_cmd;
        self.state.heartbeat = self.state.heartbeat.wrapping_add(1);
    }

    fn outputs(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            self.uid.clone(),
            ModuleData::DigitalIo(self.state.clone()),
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
