//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the daemon.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint. Returns `text/plain` metrics even on large registries.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "r_bessd_starts_total",
            "Total number of times the R-BESS daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_bessd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "r_bessd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Metrics recorded by the scan loop each dispatch cycle.
#[derive(Clone)]
pub struct DispatchMetrics {
    registry: SharedRegistry,
    cycles_total: IntCounter,
    cycle_duration_seconds: Histogram,
    ticks_dropped_total: IntCounter,
    dispatch_kw: Gauge,
    target_kw: Gauge,
    battery_soc_pct: Gauge,
    sequence_step: IntGauge,
    generator_step: IntGauge,
    policy_active: IntGaugeVec,
    window_active: IntGaugeVec,
}

impl DispatchMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles_total = IntCounter::with_opts(Opts::new(
            "r_bessd_cycles_total",
            "Total dispatch cycles completed",
        ))?;
        registry.register(Box::new(cycles_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "r_bessd_cycle_duration_seconds",
                "Wall time spent running one dispatch cycle across the fleet",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let ticks_dropped_total = IntCounter::with_opts(Opts::new(
            "r_bessd_ticks_dropped_total",
            "Cycle ticks dropped because an actor was still busy",
        ))?;
        registry.register(Box::new(ticks_dropped_total.clone()))?;

        let dispatch_kw = Gauge::with_opts(Opts::new(
            "r_bess_dispatch_kw",
            "Battery power command currently applied, discharge positive",
        ))?;
        registry.register(Box::new(dispatch_kw.clone()))?;

        let target_kw = Gauge::with_opts(Opts::new(
            "r_bess_target_kw",
            "Target the power command is ramping toward",
        ))?;
        registry.register(Box::new(target_kw.clone()))?;

        let battery_soc_pct = Gauge::with_opts(Opts::new(
            "r_bess_battery_soc_pct",
            "Battery state of charge in percent",
        ))?;
        registry.register(Box::new(battery_soc_pct.clone()))?;

        let sequence_step = IntGauge::with_opts(Opts::new(
            "r_bess_sequence_step",
            "Startup sequencer step, 0 idle through 4 running",
        ))?;
        registry.register(Box::new(sequence_step.clone()))?;

        let generator_step = IntGauge::with_opts(Opts::new(
            "r_bess_generator_step",
            "Generator coordinator step, 0 idle through 3 fault",
        ))?;
        registry.register(Box::new(generator_step.clone()))?;

        let policy_active = IntGaugeVec::new(
            Opts::new(
                "r_bess_policy_active",
                "Indicator (0/1) whether a dispatch policy moved the command this cycle",
            ),
            &["policy"],
        )?;
        registry.register(Box::new(policy_active.clone()))?;

        let window_active = IntGaugeVec::new(
            Opts::new(
                "r_bess_window_active",
                "Indicator (0/1) whether a dispatch window family is active",
            ),
            &["window"],
        )?;
        registry.register(Box::new(window_active.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycle_duration_seconds,
            ticks_dropped_total,
            dispatch_kw,
            target_kw,
            battery_soc_pct,
            sequence_step,
            generator_step,
            policy_active,
            window_active,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_cycle(&self, seconds: f64) {
        self.cycles_total.inc();
        self.cycle_duration_seconds.observe(seconds);
    }

    pub fn inc_dropped_tick(&self) {
        self.ticks_dropped_total.inc();
    }

    pub fn set_dispatch_kw(&self, kw: f64) {
        self.dispatch_kw.set(kw);
    }

    pub fn set_target_kw(&self, kw: f64) {
        self.target_kw.set(kw);
    }

    pub fn set_battery_soc(&self, pct: f64) {
        self.battery_soc_pct.set(pct);
    }

    pub fn set_sequence_step(&self, step: u16) {
        self.sequence_step.set(i64::from(step));
    }

    pub fn set_generator_step(&self, step: u16) {
        self.generator_step.set(i64::from(step));
    }

    pub fn set_policy_active(&self, policy: &str, active: bool) {
        let gauge = self.policy_active.with_label_values(&[policy]);
        gauge.set(if active { 1 } else { 0 });
    }

    pub fn set_window_active(&self, window: &str, active: bool) {
        let gauge = self.window_active.with_label_values(&[window]);
        gauge.set(if active { 1 } else { 0 });
    }
}

pub use prometheus;
