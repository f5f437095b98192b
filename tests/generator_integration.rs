//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Integration and validation tests for the R-BESS stack."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::NaiveTime;
use r_bess_common::{FieldPage, FieldStore, FieldValue, SimConfig};
use r_bess_dispatch::DispatchClient;
use r_bess_fleet::{DeviceRecord, FleetSnapshot, ModuleData, ModuleKind};
use r_bess_proto::{spawn_actor, ActorHandle, Response};
use r_bess_sim::{SimBattery, SimGenerator, SimInverter, SimIo, SimMeter, GENSET_RATED_KW};
use tokio::sync::broadcast;

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap()
}

fn generator_page() -> FieldPage {
    [
        ("system_enable", FieldValue::Bool(true)),
        ("ramp_rate_kw", FieldValue::Float(5.0)),
        ("max_charge_kw", FieldValue::Float(60.0)),
        ("max_discharge_kw", FieldValue::Float(80.0)),
        ("gen_enable", FieldValue::Bool(true)),
        ("gen_day_start", FieldValue::Text("00:00".into())),
        ("gen_day_end", FieldValue::Text("23:59".into())),
        ("gen_floor_soc", FieldValue::Float(25.0)),
        ("gen_ceiling_soc", FieldValue::Float(90.0)),
        ("gen_load_ramp_pct", FieldValue::Float(5.0)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

struct Rig {
    shutdown_tx: broadcast::Sender<()>,
    devices: Vec<ActorHandle>,
    client: ActorHandle,
    canonical: FleetSnapshot,
    store: FieldStore,
}

impl Rig {
    /// Fleet with a grid-forming inverter and a battery parked below the
    /// generator floor, so the coordinator asks for a start right away.
    fn new(fail_to_start: bool) -> Self {
        let store = FieldStore::in_memory();
        store.set_many("bess1", &generator_page()).unwrap();
        store
            .set("inv1", "mode", FieldValue::Text("forming".into()))
            .unwrap();
        if fail_to_start {
            store
                .set("gen1", "fail_to_start", FieldValue::Bool(true))
                .unwrap();
        }

        let sim = SimConfig {
            noise_sigma: 0.0,
            ..SimConfig::default()
        };
        let (shutdown_tx, _) = broadcast::channel(4);
        let devices = vec![
            spawn_actor(
                "bat1",
                SimBattery::new("bat1", 1.0).with_soc(20.0),
                shutdown_tx.subscribe(),
            ),
            spawn_actor("inv1", SimInverter::new("inv1"), shutdown_tx.subscribe()),
            spawn_actor(
                "meter1",
                SimMeter::new("meter1", 1.0, &sim),
                shutdown_tx.subscribe(),
            ),
            spawn_actor("gen1", SimGenerator::new("gen1"), shutdown_tx.subscribe()),
            spawn_actor("io1", SimIo::new("io1"), shutdown_tx.subscribe()),
        ];
        let mut client_actor = DispatchClient::new("bess1");
        client_actor.set_clock(noon);
        let client = spawn_actor("bess1", client_actor, shutdown_tx.subscribe());

        let mut canonical = FleetSnapshot::new();
        for (uid, kind) in [
            ("bess1", ModuleKind::Client),
            ("bat1", ModuleKind::Battery),
            ("inv1", ModuleKind::Inverter),
            ("meter1", ModuleKind::AcMeter),
            ("gen1", ModuleKind::AcGenerator),
            ("io1", ModuleKind::DigitalIo),
        ] {
            canonical.insert(DeviceRecord::new(uid, ModuleData::empty(kind)));
        }

        Rig {
            shutdown_tx,
            devices,
            client,
            canonical,
            store,
        }
    }

    async fn cycle(&mut self) -> u16 {
        self.canonical.stamp();
        for handle in &self.devices {
            handle
                .set_inputs(self.canonical.clone(), self.store.page(handle.uid()))
                .await
                .unwrap();
            assert!(matches!(handle.sync().await.unwrap(), Response::Ack));
            let outputs = handle.outputs().await.unwrap();
            let record = outputs.record(handle.uid()).unwrap().clone();
            *self.canonical.record_mut(handle.uid()).unwrap() = record;
        }
        self.client
            .set_inputs(self.canonical.clone(), self.store.page(self.client.uid()))
            .await
            .unwrap();
        assert!(matches!(self.client.sync().await.unwrap(), Response::Ack));
        self.canonical = self.client.outputs().await.unwrap();
        self.canonical.client_block().unwrap().generator_step
    }

    async fn teardown(self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.devices {
            handle.join().await;
        }
        self.client.join().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn low_battery_starts_the_generator_and_ramps_its_load() {
    let mut rig = Rig::new(false);

    let mut steps = Vec::new();
    for _ in 0..45 {
        steps.push(rig.cycle().await);
    }

    // The coordinator must pass through Starting and come back to Ready once
    // the set holds frequency, then stay there carrying charge.
    assert!(steps.contains(&2), "coordinator never issued a start");
    assert_eq!(*steps.last().unwrap(), 1, "coordinator did not settle in Ready");

    let generator = rig.canonical.generator().unwrap();
    assert!(generator.running);
    assert_eq!(generator.frequency_hz, 50.0);
    assert!(generator.remote_start_cmd);
    assert!(generator.mains_parallel_cmd);
    assert_eq!(generator.power_kw, GENSET_RATED_KW);
    assert_eq!(generator.max_load_cmd_pct, 100.0);

    let block = rig.canonical.client_block().unwrap();
    assert_eq!(block.generator_load_pct, 100.0);
    // No dispatch windows are configured, so the command itself stays parked.
    assert_eq!(block.dispatch_kw, 0.0);
    assert_eq!(block.active_policy, "decay");

    rig.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_start_times_out_and_releases_the_set() {
    let mut rig = Rig::new(true);

    let mut steps = Vec::new();
    let mut released_with_remote_off = false;
    let mut seen_starting = false;
    for _ in 0..50 {
        let step = rig.cycle().await;
        if seen_starting && step < 2 {
            let generator = rig.canonical.generator().unwrap();
            if !generator.remote_start_cmd {
                released_with_remote_off = true;
            }
        }
        seen_starting = seen_starting || step == 2;
        let generator = rig.canonical.generator().unwrap();
        assert!(!generator.running, "a failed set must never report running");
        assert_eq!(generator.frequency_hz, 0.0);
        steps.push(step);
    }

    assert!(steps.contains(&2), "coordinator never issued a start");
    assert!(
        released_with_remote_off,
        "start timeout must drop the remote start request"
    );

    rig.teardown().await;
}
