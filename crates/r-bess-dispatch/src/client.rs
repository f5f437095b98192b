//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Dispatch arbitration and startup sequencing for the site battery."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//!
//! One `DispatchClient` runs per site. Each `SYNC` it re-parses its settings
//! page, folds the freshly delivered snapshot into its staleness tracker,
//! advances the startup sequencer one step, arbitrates the power command
//! while running, and lets the generator coordinator manage its own output
//! channel. The mutated snapshot is what `GET_OUTPUTS` hands back to the
//! scan loop.

use chrono::{Local, NaiveTime};
use r_bess_common::FieldPage;
use r_bess_fleet::{
    ClientBlock, DeviceRecord, FleetSnapshot, ModuleData, ModuleKind, WindowEcho, RMSC_RELAY_BIT,
};
use r_bess_proto::{ActionLog, ActorInfo, ActorStatus, DeviceActor, UserAction};

use crate::arbiter::{arbitrate, ArbiterReport};
use crate::command::PowerCommand;
use crate::generator::{GeneratorCoordinator, GeneratorOutputs};
use crate::inputs::{DispatchInputs, StaleTracker};
use crate::sequencer::{SequencerOutputs, StartupSequencer};
use crate::settings::DispatchSettings;
use crate::site::SiteRegistry;

fn local_time() -> NaiveTime {
    Local::now().time()
}

/// The dispatch client device actor.
pub struct DispatchClient {
    uid: String,
    page: FieldPage,
    working: FleetSnapshot,
    command: PowerCommand,
    sequencer: StartupSequencer,
    generator: GeneratorCoordinator,
    sites: SiteRegistry,
    stale: StaleTracker,
    actions: ActionLog,
    heartbeat: u16,
    policy_faulted: bool,
    clock: fn() -> NaiveTime,
}

impl DispatchClient {
    /// Builds a client with the built-in site policies registered.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            page: FieldPage::default(),
            working: FleetSnapshot::new(),
            command: PowerCommand::default(),
            sequencer: StartupSequencer::default(),
            generator: GeneratorCoordinator::default(),
            sites: SiteRegistry::with_builtin(),
            stale: StaleTracker::default(),
            actions: ActionLog::default(),
            heartbeat: 0,
            policy_faulted: false,
            clock: local_time,
        }
    }

    /// Overrides the wall clock. Harnesses pin dispatch windows with it.
    pub fn set_clock(&mut self, clock: fn() -> NaiveTime) {
        self.clock = clock;
    }

    /// Replaces the built-in site policy registry.
    pub fn set_site_registry(&mut self, sites: SiteRegistry) {
        self.sites = sites;
    }

    /// Current power command, in kW.
    pub fn command_kw(&self) -> f64 {
        self.command.kw()
    }

    fn run_cycle(&mut self) {
        let settings = DispatchSettings::from_page(&self.page);
        let bounds = settings.bounds();
        let now = (self.clock)();
        self.stale.observe(&self.working);

        let (seq_out, gen_out, report) = {
            let inputs = DispatchInputs::new(&self.working, &settings, now, &self.stale);
            let seq_out = self.sequencer.advance(&inputs);
            if seq_out.running {
                let report = arbitrate(&inputs, &mut self.command, &bounds, &mut self.sites);
                let gen_out = self.generator.evaluate(&inputs);
                (seq_out, gen_out, Some(report))
            } else {
                // Outside Running the command winds back to zero while the
                // sequencer releases actuators; generator charge drops at
                // once.
                self.generator.reset();
                self.command.ramp_toward(0.0, &bounds);
                (seq_out, GeneratorOutputs::default(), None)
            }
        };
        self.policy_faulted = report
            .as_ref()
            .map(|r| !r.faults.is_empty())
            .unwrap_or(false);
        let relays = self.sites.relay_requests(settings.site_id.as_deref());
        self.heartbeat = self.heartbeat.wrapping_add(1);
        self.apply_outputs(&settings, now, seq_out, gen_out, report.as_ref(), &relays);
    }

    fn apply_outputs(
        &mut self,
        settings: &DispatchSettings,
        now: NaiveTime,
        seq: SequencerOutputs,
        gen: GeneratorOutputs,
        report: Option<&ArbiterReport>,
        relays: &[(u16, bool)],
    ) {
        if let Some(io) = self.working.digital_io_mut() {
            io.command_output(RMSC_RELAY_BIT, seq.close_rmsc);
            for &(bit, closed) in relays {
                io.command_output(bit, closed);
            }
        }
        if let Some(battery) = self.working.battery_mut() {
            battery.enable_cmd = seq.battery_enable;
        }
        let setpoint_kw = self.command.kw();
        if let Some(inverter) = self.working.inverter_mut() {
            inverter.enable_cmd = gen.inverter_enable_override.unwrap_or(seq.inverter_enable);
            inverter.power_setpoint_kw = setpoint_kw;
        }
        if let Some(generator) = self.working.generator_mut() {
            generator.remote_start_cmd = gen.remote_start;
            generator.mains_parallel_cmd = gen.mains_parallel;
            generator.max_load_cmd_pct = gen.max_load_pct;
        }

        let windows = vec![
            WindowEcho {
                name: "tou".to_owned(),
                active: settings.tou.any_active(now),
                limit_kw: settings.tou.effective_limit(now).unwrap_or(0.0),
            },
            WindowEcho {
                name: "peak".to_owned(),
                active: settings.peak.any_active(now),
                limit_kw: settings.peak.effective_limit(now).unwrap_or(0.0),
            },
            WindowEcho {
                name: "solar".to_owned(),
                active: settings
                    .solar
                    .map(|w| w.is_active(now))
                    .unwrap_or(false),
                limit_kw: settings.solar.map(|w| w.limit_kw).unwrap_or(0.0),
            },
        ];

        let heartbeat = self.heartbeat;
        let sequence_step = self.sequencer.step().as_u16();
        let status_text = self.sequencer.status_text().to_owned();
        let generator_step = self.generator.step().as_u16();
        let generator_load_pct = self.generator.max_load_pct();
        if self.working.client_block_mut().is_none() {
            self.working.insert(DeviceRecord::new(
                self.uid.clone(),
                ModuleData::Client(ClientBlock::default()),
            ));
        }
        if let Some(block) = self.working.client_block_mut() {
            block.heartbeat = heartbeat;
            block.system_enabled = settings.system_enable;
            block.sequence_step = sequence_step;
            block.status_text = status_text;
            block.dispatch_kw = setpoint_kw;
            block.target_kw = report.map(|r| r.target_kw).unwrap_or(0.0);
            block.active_policy = report.map(|r| r.policy.to_owned()).unwrap_or_default();
            block.generator_step = generator_step;
            block.generator_load_pct = generator_load_pct;
            block.windows = windows;
        }
    }
}

impl DeviceActor for DispatchClient {
    fn info(&self) -> ActorInfo {
        ActorInfo {
            uid: self.uid.clone(),
            kind: ModuleKind::Client,
            manufacturer: "Renra Energy".to_owned(),
            model: "R-BESS site dispatch".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }

    fn status(&self) -> ActorStatus {
        ActorStatus {
            heartbeat: self.heartbeat,
            warnings: u16::from(self.policy_faulted),
            alarms: 0,
            faults: 0,
            state_text: self.sequencer.status_text().to_owned(),
            recent_actions: self.actions.snapshot(),
        }
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        self.working = snapshot;
        self.page = page;
    }

    fn sync(&mut self) {
        self.run_cycle();
    }

    fn outputs(&self) -> FleetSnapshot {
        self.working.clone()
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
