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
//! The dispatch core owns everything the site client decides once per scan
//! cycle. [`DispatchClient`] is the device actor the daemon spawns; each
//! `SYNC` it parses its settings page, walks the startup sequencer one step,
//! arbitrates the battery power command across the policy ladder, and runs
//! the generator coordinator. All outputs land in the snapshot returned by
//! `GET_OUTPUTS`.

#![warn(missing_docs)]

pub mod arbiter;
pub mod client;
pub mod command;
pub mod generator;
pub mod inputs;
pub mod sequencer;
pub mod settings;
pub mod site;
pub mod window;

pub use arbiter::{arbitrate, ArbiterReport};
pub use client::DispatchClient;
pub use command::{CommandBounds, PowerCommand};
pub use generator::{GeneratorCoordinator, GeneratorOutputs, GeneratorStep};
pub use inputs::{DispatchInputs, StaleTracker, STALE_CYCLE_LIMIT};
pub use sequencer::{SequenceStep, SequencerOutputs, StartupSequencer, RETRY_BUDGET};
pub use settings::{ChargeMode, DispatchSettings, GeneratorSettings};
pub use site::{SitePolicy, SiteRegistry};
pub use window::{DispatchWindow, WindowFamily};

use thiserror::Error;

/// Errors surfaced by individual dispatch policies.
///
/// A policy error never aborts the scan cycle. The arbiter logs it, records
/// the policy as faulted for the cycle, and falls through to the next rung
/// of the ladder.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A measurement or derived value was NaN or infinite.
    #[error("non-finite value in {context}")]
    NonFinite {
        /// Where the value was produced.
        context: &'static str,
    },

    /// A site policy refused to run.
    #[error("site policy {policy} failed: {reason}")]
    SitePolicy {
        /// Registered policy id.
        policy: String,
        /// Human-readable cause.
        reason: String,
    },
}

/// Convenience alias for dispatch results.
pub type Result<T> = std::result::Result<T, DispatchError>;
