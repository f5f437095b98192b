//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the dispatch runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use r_bess_fleet::ModuleKind;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_mode() -> Mode {
    Mode::Production
}

fn default_site_name() -> String {
    "site".to_owned()
}

fn default_scan_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("configs/fields.toml")
}

fn default_store_autosave() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

fn default_sim_seed() -> u64 {
    0xBE55u64
}

fn default_sim_load_base_kw() -> f64 {
    40.0
}

fn default_sim_load_swing_kw() -> f64 {
    15.0
}

fn default_sim_solar_peak_kw() -> f64 {
    30.0
}

fn default_sim_noise_sigma() -> f64 {
    0.2
}

/// Primary configuration object for the R-BESS daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub fleet: FleetLayoutConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_BESS_CONFIG";

    /// Load configuration from disk, respecting the `R_BESS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Identifier of the dispatch client device declared in the fleet.
    pub fn client_uid(&self) -> Option<&str> {
        self.fleet
            .devices
            .iter()
            .find(|(_, device)| device.kind == ModuleKind::Client)
            .map(|(uid, _)| uid.as_str())
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.fleet.devices.is_empty() {
            return Err(anyhow!("configuration must declare at least one device"));
        }
        let clients = self
            .fleet
            .devices
            .values()
            .filter(|device| device.kind == ModuleKind::Client)
            .count();
        if clients != 1 {
            return Err(anyhow!(
                "fleet must declare exactly one client device, found {}",
                clients
            ));
        }
        if self.scan.interval.is_zero() {
            return Err(anyhow!("scan interval must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            site: SiteConfig::default(),
            scan: ScanConfig::default(),
            fleet: FleetLayoutConfig::default(),
            store: StoreConfig::default(),
            sim: SimConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Operating mode for the daemon.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Simulation,
}

impl Mode {
    pub fn is_simulation(&self) -> bool {
        matches!(self, Mode::Simulation)
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Mode::Production),
            "simulation" => Ok(Mode::Simulation),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

/// Identity of the installation this daemon controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: default_site_name(),
            description: None,
        }
    }
}

/// Scan loop timing.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: default_scan_interval(),
        }
    }
}

/// Declared device fleet, keyed by device uid.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetLayoutConfig {
    #[serde(default)]
    pub devices: IndexMap<String, DeviceConfig>,
}

/// One declared device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub kind: ModuleKind,
    #[serde(default = "crate::config::default_device_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

pub(crate) fn default_device_enabled() -> bool {
    true
}

/// Location of the per-device field store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_store_autosave")]
    pub autosave: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            autosave: default_store_autosave(),
        }
    }
}

/// Knobs for the simulated field layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_sim_seed")]
    pub random_seed: u64,
    #[serde(default = "default_sim_load_base_kw")]
    pub load_base_kw: f64,
    #[serde(default = "default_sim_load_swing_kw")]
    pub load_swing_kw: f64,
    #[serde(default = "default_sim_solar_peak_kw")]
    pub solar_peak_kw: f64,
    #[serde(default = "default_sim_noise_sigma")]
    pub noise_sigma: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            random_seed: default_sim_seed(),
            load_base_kw: default_sim_load_base_kw(),
            load_swing_kw: default_sim_load_swing_kw(),
            solar_peak_kw: default_sim_solar_peak_kw(),
            noise_sigma: default_sim_noise_sigma(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
