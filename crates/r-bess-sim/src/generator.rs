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
use r_bess_fleet::{AcGeneratorBlock, DeviceRecord, FleetSnapshot, ModuleData, ModuleKind};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

/// Nameplate rating of the simulated set, in kW.
pub const GENSET_RATED_KW: f64 = 80.0;

/// Cycles of cranking before the engine fires.
const CRANK_CYCLES: u32 = 3;

/// Frequency slew while spinning up or down, in Hz per cycle.
const FREQ_SLEW_HZ: f64 = 10.0;

/// Load slew of the governor, in kW per cycle.
const LOAD_SLEW_KW: f64 = GENSET_RATED_KW * 0.05;

/// Simulated backup generator set.
///
/// Remote start cranks for a few cycles, then frequency slews up to 50 Hz;
/// the set only takes load once running and commanded mains-parallel, up to
/// the governor ceiling. The page key `fail_to_start` keeps the engine dead
/// so the start-timeout path can be exercised.
#[derive(Debug)]
pub struct SimGenerator {
    uid: String,
    state: AcGeneratorBlock,
    crank: u32,
    last: FleetSnapshot,
    page: FieldPage,
    actions: ActionLog,
}

impl SimGenerator {
    /// New set, stopped.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            state: AcGeneratorBlock::default(),
            crank: 0,
            last: FleetSnapshot::new(),
            page: FieldPage::new(),
            actions: ActionLog::default(),
        }
    }

    fn commanded(&self) -> (bool, bool, f64) {
        match self.last.record(&self.uid).map(|record| &record.data) {
            Some(ModuleData::AcGenerator(block)) => (
                block.remote_start_cmd,
                block.mains_parallel_cmd,
                block.max_load_cmd_pct,
            ),
            _ => (false, false, 0.0),
        }
    }
}

impl DeviceActor for SimGenerator {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::AcGenerator,
            manufacturer: "Renra Energy".to_owned(),
            model: "simulated generator set".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        let state_text = if self.state.running {
            format!("running, {:+.1} kW", self.state.power_kw)
        } else if self.state.remote_start_cmd {
            "cranking".to_owned()
        } else {
            "stopped".to_owned()
        };
        ActorStatus {
            heartbeat: self.state.heartbeat,
            warnings: 0,
            alarms: 0,
            faults: 0,
            state_text,
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        self.last = snapshot;
        self.page = page;
    }

    fn sync(&mut self) {
        let (remote_start, mains_parallel, max_load_pct) = self.commanded();
        let fail_to_start = self
            .page
            .get("fail_to_start")
            .and_then(FieldValue::as_bool)
            .unwrap_or(false);

        self.state.remote_start_cmd = remote_start;
        self.state.mains_parallel_cmd = mains_parallel;
        self.state.max_load_cmd_pct = max_load_pct;

        if remote_start && !fail_to_start {
            if self.crank < CRANK_CYCLES {
                self.crank += 1;
            } else {
                self.state.frequency_hz = (self.state.frequency_hz + FREQ_SLEW_HZ).min(50.0);
            }
        } else {
            self.crank = 0;
            self.state.frequency_hz = (self.state.frequency_hz - FREQ_SLEW_HZ).max(0.0);
        }
        self.state.running = self.state.frequency_hz >= 45.0;

        let target_kw = if self.state.running && mains_parallel {
            GENSET_RATED_KW * max_load_pct.clamp(0.0, 100.0) / 100.0
        } else {
            0.0
        };
        let diff = target_kw - self.state.power_kw;
        if diff.abs() <= LOAD_SLEW_KW {
            self.state.power_kw = target_kw;
        } else {
            self.state.power_kw += LOAD_SLEW_KW.copysign(diff);
        }
        self.state.heartbeat = self.state.heartbeat.wrapping_add(1);
    }

    fn outputs(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::new();
        snapshot.insert(DeviceRecord::new(
            self.uid.clone(),
            ModuleData::AcGenerator(self.state.clone()),
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
