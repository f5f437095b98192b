//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-BESS daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use r_bess_common::{
    init_tracing, AppConfig, FieldStore, LoopTimingReporter, Mode, RateLimiter,
};
use r_bess_dispatch::arbiter::POLICIES;
use r_bess_dispatch::DispatchClient;
use r_bess_fleet::{regmap, DeviceRecord, FleetSnapshot, ModuleData};
use r_bess_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, DispatchMetrics, SharedRegistry,
};
use r_bess_proto::{spawn_actor, ActorHandle, ProtoError, Response};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("R-BESS ", env!("CARGO_PKG_VERSION")),
    about = "R-BESS site dispatch daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[arg(long, value_enum, help = "Override application mode")]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Production,
    Simulation,
}

impl From<CliMode> for Mode {
    fn from(value: CliMode) -> Self {
        match value {
            CliMode::Production => Mode::Production,
            CliMode::Simulation => Mode::Simulation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the site dispatch loop")]
    Run,
    #[command(about = "Print the legacy register image of the configured fleet")]
    DumpRegisters,
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!(
            "r-bessd {} ({} build)",
            env!("CARGO_PKG_VERSION"),
            build_profile()
        );
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/site.toml"));
    candidates.push(PathBuf::from("configs/example.sim.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    let load_duration = load_started.elapsed();

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());

    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    init_tracing("r-bessd", &config.logging)?;
    info!(
        config_path = %loaded.source.display(),
        mode = ?config.mode,
        site = %config.site.name,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, registry).await?,
        Commands::DumpRegisters => dump_registers(&config),
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let metrics_server = if metrics_settings.enabled {
        info!(address = %metrics_settings.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), metrics_settings.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };
    let metrics = DispatchMetrics::new(registry)?;

    let store = FieldStore::load(&config.store.path, config.store.autosave)?;

    let client_uid = config
        .client_uid()
        .context("fleet must declare a client device")?
        .to_owned();

    // Actors stop on this channel only after the scan loop has finished its
    // final cycle, so an in-flight cycle always completes.
    let (actor_shutdown_tx, _) = broadcast::channel::<()>(1);
    let (stop_tx, mut stop_rx) = broadcast::channel::<()>(1);

    let mut field_handles: Vec<ActorHandle> = Vec::new();
    if config.mode.is_simulation() {
        for (uid, actor) in r_bess_sim::build_actors(&config) {
            field_handles.push(spawn_actor(uid, actor, actor_shutdown_tx.subscribe()));
        }
    } else {
        warn!("no hardware drivers in this build; only the dispatch client will run");
    }
    let client_handle = spawn_actor(
        client_uid.clone(),
        DispatchClient::new(client_uid.clone()),
        actor_shutdown_tx.subscribe(),
    );

    // Canonical snapshot seeded from the declared fleet; device outputs are
    // merged into it every cycle and the client rewrites it wholesale.
    let mut canonical = FleetSnapshot::new();
    for (uid, device) in &config.fleet.devices {
        canonical.insert(DeviceRecord {
            uid: uid.clone(),
            enabled: device.enabled,
            data: ModuleData::empty(device.kind),
        });
    }

    tokio::spawn({
        let stop_tx = stop_tx.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; shutting down");
                let _ = stop_tx.send(());
            }
        }
    });

    info!(
        devices = canonical.len(),
        field_actors = field_handles.len(),
        interval_ms = config.scan.interval.as_millis() as u64,
        "daemon running; waiting for termination signal"
    );

    let reporter = LoopTimingReporter::new(config.scan.interval);
    let mut limiter = RateLimiter::new(config.scan.interval);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = limiter.tick() => {}
        }
        reporter.record_tick();
        let cycle_started = Instant::now();
        canonical.stamp();

        for handle in &field_handles {
            if let Err(err) = run_device_cycle(handle, &mut canonical, &store, &metrics).await {
                log_cycle_error(handle.uid(), &err);
            }
        }
        if let Err(err) = run_client_cycle(&client_handle, &mut canonical, &store, &metrics).await {
            log_cycle_error(client_handle.uid(), &err);
        }

        update_gauges(&metrics, &canonical);
        metrics.record_cycle(cycle_started.elapsed().as_secs_f64());
    }

    let _ = actor_shutdown_tx.send(());
    join_all(field_handles.into_iter().map(ActorHandle::join)).await;
    client_handle.join().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    if let Some(summary) = reporter.histogram().summary() {
        info!(
            samples = summary.samples,
            mean_ns = summary.mean_ns,
            max_ns = summary.max_ns,
            "scan loop jitter summary"
        );
    }
    Ok(())
}

/// One scan-cycle exchange with a field actor: inputs in, sync, outputs
/// merged back into the canonical snapshot. A dropped tick leaves the
/// actor's previous record in place.
async fn run_device_cycle(
    handle: &ActorHandle,
    canonical: &mut FleetSnapshot,
    store: &FieldStore,
    metrics: &DispatchMetrics,
) -> r_bess_proto::Result<()> {
    handle
        .set_inputs(canonical.clone(), store.page(handle.uid()))
        .await?;
    if let Response::Dropped = handle.sync().await? {
        metrics.inc_dropped_tick();
        return Ok(());
    }
    let outputs = handle.outputs().await?;
    if let Some(record) = outputs.record(handle.uid()) {
        if let Some(slot) = canonical.record_mut(handle.uid()) {
            *slot = record.clone();
        }
    }
    Ok(())
}

/// The client runs last and owns the whole snapshot: its outputs carry the
/// command mutations for every device, so they replace the canonical copy.
async fn run_client_cycle(
    handle: &ActorHandle,
    canonical: &mut FleetSnapshot,
    store: &FieldStore,
    metrics: &DispatchMetrics,
) -> r_bess_proto::Result<()> {
    handle
        .set_inputs(canonical.clone(), store.page(handle.uid()))
        .await?;
    if let Response::Dropped = handle.sync().await? {
        metrics.inc_dropped_tick();
        return Ok(());
    }
    *canonical = handle.outputs().await?;
    Ok(())
}

fn log_cycle_error(uid: &str, err: &ProtoError) {
    match err {
        ProtoError::ActorGone(_) => debug!(uid = %uid, "actor gone during shutdown"),
        other => error!(uid = %uid, error = %other, "actor cycle failed"),
    }
}

fn update_gauges(metrics: &DispatchMetrics, canonical: &FleetSnapshot) {
    if let Some(client) = canonical.client_block() {
        metrics.set_dispatch_kw(client.dispatch_kw);
        metrics.set_target_kw(client.target_kw);
        metrics.set_sequence_step(client.sequence_step);
        metrics.set_generator_step(client.generator_step);
        for policy in POLICIES {
            metrics.set_policy_active(policy, client.active_policy == policy);
        }
        for window in &client.windows {
            metrics.set_window_active(&window.name, window.active);
        }
    }
    if let Some(battery) = canonical.battery() {
        metrics.set_battery_soc(battery.soc_pct);
    }
}

/// Print the legacy register image of the declared fleet, block by block.
/// Commissioning uses this to cross-check SCADA register offsets.
fn dump_registers(config: &AppConfig) {
    for (index, (uid, device)) in config.fleet.devices.iter().enumerate() {
        let record = DeviceRecord {
            uid: uid.clone(),
            enabled: device.enabled,
            data: ModuleData::empty(device.kind),
        };
        let regs = regmap::encode(&record);
        let base = index * regmap::BLOCK_REGS;
        println!("{} ({}) base register {}", uid, device.kind, base);
        for (row, chunk) in regs.chunks(8).enumerate() {
            let rendered: Vec<String> = chunk.iter().map(|value| format!("{:6}", value)).collect();
            println!("  {:4}: {}", base + row * 8, rendered.join(" "));
        }
    }
}
