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
use r_bess_common::{AppConfig, FieldPage, FieldStore, FieldValue};
use r_bess_dispatch::DispatchClient;
use r_bess_fleet::{DeviceRecord, FleetSnapshot, ModuleData, RMSC_RELAY_BIT};
use r_bess_proto::{spawn_actor, ActorHandle, Response};
use tokio::sync::broadcast;

const SITE: &str = r#"
mode = "simulation"

[site]
name = "dispatch-e2e"

[fleet.devices.bess1]
kind = "client"

[fleet.devices.bat1]
kind = "battery"

[fleet.devices.inv1]
kind = "inverter"

[fleet.devices.meter1]
kind = "ac_meter"

[fleet.devices.pv1]
kind = "ac_solar"

[fleet.devices.gen1]
kind = "ac_generator"

[fleet.devices.io1]
kind = "digital_io"

[sim]
random_seed = 7
noise_sigma = 0.0
"#;

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap()
}

fn dispatch_page() -> FieldPage {
    [
        ("system_enable", FieldValue::Bool(true)),
        ("ramp_rate_kw", FieldValue::Float(5.0)),
        ("max_charge_kw", FieldValue::Float(60.0)),
        ("max_discharge_kw", FieldValue::Float(80.0)),
        ("max_charge_soc", FieldValue::Float(95.0)),
        ("min_discharge_soc", FieldValue::Float(15.0)),
        ("tou1_enable", FieldValue::Bool(true)),
        ("tou1_limit_kw", FieldValue::Float(30.0)),
        ("tou1_start", FieldValue::Text("00:00".into())),
        ("tou1_end", FieldValue::Text("23:59".into())),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn seed_canonical(config: &AppConfig) -> FleetSnapshot {
    let mut canonical = FleetSnapshot::new();
    for (uid, device) in &config.fleet.devices {
        canonical.insert(DeviceRecord {
            uid: uid.clone(),
            enabled: device.enabled,
            data: ModuleData::empty(device.kind),
        });
    }
    canonical
}

/// One scan cycle the way the daemon runs it: each device exchanges against
/// the canonical snapshot in fleet order, then the client rewrites the whole
/// snapshot last.
async fn run_cycle(
    devices: &[ActorHandle],
    client: &ActorHandle,
    canonical: &mut FleetSnapshot,
    store: &FieldStore,
) {
    canonical.stamp();
    for handle in devices {
        handle
            .set_inputs(canonical.clone(), store.page(handle.uid()))
            .await
            .unwrap();
        assert!(matches!(handle.sync().await.unwrap(), Response::Ack));
        let outputs = handle.outputs().await.unwrap();
        let record = outputs.record(handle.uid()).unwrap().clone();
        *canonical.record_mut(handle.uid()).unwrap() = record;
    }
    client
        .set_inputs(canonical.clone(), store.page(client.uid()))
        .await
        .unwrap();
    assert!(matches!(client.sync().await.unwrap(), Response::Ack));
    *canonical = client.outputs().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sim_fleet_starts_up_and_charges_in_the_tou_window() {
    let config: AppConfig = SITE.parse().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = FieldStore::load(dir.path().join("fields.toml"), true).unwrap();
    store.set_many("bess1", &dispatch_page()).unwrap();

    let (shutdown_tx, _) = broadcast::channel(4);
    let devices: Vec<ActorHandle> = r_bess_sim::build_actors(&config)
        .into_iter()
        .map(|(uid, actor)| spawn_actor(uid, actor, shutdown_tx.subscribe()))
        .collect();
    let mut client_actor = DispatchClient::new("bess1");
    client_actor.set_clock(noon);
    let client = spawn_actor("bess1", client_actor, shutdown_tx.subscribe());

    let mut canonical = seed_canonical(&config);

    // Startup waits on one hardware echo per stage: relay feedback, battery
    // contactor, inverter enable.
    let mut reached_running = 0;
    for cycle in 1..=15 {
        run_cycle(&devices, &client, &mut canonical, &store).await;
        if canonical.client_block().unwrap().sequence_step == 4 {
            reached_running = cycle;
            break;
        }
    }
    assert!(reached_running > 0, "fleet never reached Running");
    assert!(canonical.battery().unwrap().enabled);
    assert!(canonical.inverter().unwrap().enabled);
    assert!(canonical.digital_io().unwrap().output_closed(RMSC_RELAY_BIT));

    // The all-day TOU window claims the command, which ramps to the window
    // limit and holds there without ever discharging.
    for _ in 0..12 {
        run_cycle(&devices, &client, &mut canonical, &store).await;
        let block = canonical.client_block().unwrap();
        assert!(block.dispatch_kw <= 0.0, "TOU charge must never discharge");
        assert!(
            block.dispatch_kw >= -30.0 - 1e-9,
            "charge exceeds the window limit: {} kW",
            block.dispatch_kw
        );
    }
    let block = canonical.client_block().unwrap();
    assert_eq!(block.sequence_step, 4);
    assert_eq!(block.status_text, "running");
    assert_eq!(block.active_policy, "tou_charge");
    assert_eq!(block.dispatch_kw, -30.0);
    assert_eq!(block.target_kw, -30.0);
    assert!(block
        .windows
        .iter()
        .any(|w| w.name == "tou" && w.active && w.limit_kw == 30.0));
    assert_eq!(canonical.inverter().unwrap().power_setpoint_kw, -30.0);
    let battery = canonical.battery().unwrap();
    assert_eq!(battery.bus_power_kw, -30.0);
    assert!(battery.soc_pct > 50.0, "charging must raise state of charge");

    // Operator disable: actuators release one per cycle while the command
    // winds down, ending parked at zero with the relay open.
    store
        .set("bess1", "system_enable", FieldValue::Bool(false))
        .unwrap();
    for _ in 0..12 {
        run_cycle(&devices, &client, &mut canonical, &store).await;
    }
    let block = canonical.client_block().unwrap();
    assert_eq!(block.sequence_step, 0);
    assert_eq!(block.status_text, "disabled");
    assert_eq!(block.dispatch_kw, 0.0);
    assert!(!canonical.battery().unwrap().enabled);
    assert!(!canonical.digital_io().unwrap().output_closed(RMSC_RELAY_BIT));

    let _ = shutdown_tx.send(());
    for handle in devices {
        handle.join().await;
    }
    client.join().await;
}
