//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the dispatch runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the R-BESS dispatch workspace.
//! This crate exposes configuration loading, logging, the per-device
//! field store, and cycle timing utilities consumed across the workspace.

pub mod config;
pub mod logging;
pub mod store;
pub mod time;

pub use config::{
    AppConfig, DeviceConfig, FleetLayoutConfig, LoggingConfig, MetricsConfig, Mode, ScanConfig,
    SimConfig, SiteConfig, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use store::{FieldPage, FieldStore, FieldValue};
pub use time::{jitter_us, LoopTimingReporter, RateLimiter};
