//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Actor protocol requests, acknowledgements, and task runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Uniform request/acknowledge protocol spoken by every device actor.
//!
//! Each actor owns its state on a dedicated tokio task. Callers talk to it
//! through an [`ActorHandle`]: requests travel over a bounded channel and each
//! carries a oneshot for the acknowledgement. Cycle ticks get a dedicated
//! single-slot lane so a tick arriving while the previous cycle still runs is
//! dropped instead of queueing up behind it.

#![warn(missing_docs)]

mod actor;
mod message;
mod status;

/// Shared result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Errors surfaced by the actor protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The actor task has exited and its mailbox is gone.
    #[error("actor '{0}' is no longer running")]
    ActorGone(String),
    /// An acknowledgement arrived with an unexpected payload for the request.
    #[error("unexpected acknowledgement for {op}: {got}")]
    UnexpectedAck {
        /// Operation that was requested.
        op: &'static str,
        /// Payload kind that came back.
        got: &'static str,
    },
}

pub use actor::{spawn_actor, ActorHandle, DeviceActor};
pub use message::{Request, RequestEnvelope, Response, ResponseEnvelope, SCHEMA_VERSION};
pub use status::{ActionLog, ActorInfo, ActorStatus, UserAction, ACTION_LOG_DEPTH};
