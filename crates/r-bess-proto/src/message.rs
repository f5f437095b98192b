//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Actor protocol requests, acknowledgements, and task runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use r_bess_common::store::FieldPage;
use r_bess_fleet::FleetSnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{ActorInfo, ActorStatus};

/// Schema version carried on every envelope.
pub const SCHEMA_VERSION: u16 = 1;

/// Operations every device actor answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum Request {
    /// Run one full dispatch cycle.
    Sync,
    /// Identity card of the actor.
    GetInfo,
    /// Heartbeat, fault bitmasks, and recent user actions.
    GetStatus,
    /// Read the actor's configuration page.
    GetPage,
    /// Write fields on the configuration page.
    SetPage {
        /// Fields to merge into the page.
        fields: FieldPage,
    },
    /// Hand the actor fresh inputs ahead of a cycle.
    SetInputs {
        /// Fleet snapshot assembled by the scan loop.
        snapshot: FleetSnapshot,
        /// The actor's current configuration page.
        page: FieldPage,
    },
    /// Collect the outputs produced by the last cycle.
    GetOutputs,
}

impl Request {
    /// Static operation name for logging and error reporting.
    pub fn op(&self) -> &'static str {
        match self {
            Request::Sync => "sync",
            Request::GetInfo => "get_info",
            Request::GetStatus => "get_status",
            Request::GetPage => "get_page",
            Request::SetPage { .. } => "set_page",
            Request::SetInputs { .. } => "set_inputs",
            Request::GetOutputs => "get_outputs",
        }
    }
}

/// Acknowledgement payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ack", content = "data", rename_all = "snake_case")]
pub enum Response {
    /// Request applied.
    Ack,
    /// A cycle tick arrived while the previous cycle was still running.
    Dropped,
    /// Identity card.
    Info(ActorInfo),
    /// Live status.
    Status(ActorStatus),
    /// Configuration page contents.
    Page {
        /// Current page fields.
        fields: FieldPage,
    },
    /// Outputs of the last completed cycle.
    Outputs {
        /// Snapshot with the actor's mutations applied.
        snapshot: FleetSnapshot,
    },
}

impl Response {
    /// Static payload name for logging and error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Ack => "ack",
            Response::Dropped => "dropped",
            Response::Info(_) => "info",
            Response::Status(_) => "status",
            Response::Page { .. } => "page",
            Response::Outputs { .. } => "outputs",
        }
    }
}

/// Envelope around a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id, echoed on the acknowledgement.
    pub id: Uuid,
    /// Schema version of the payload.
    pub schema_version: u16,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// The request itself.
    pub request: Request,
}

impl RequestEnvelope {
    /// Wrap a request in a fresh envelope.
    pub fn new(request: Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            request,
        }
    }
}

/// Envelope around an acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlation id copied from the request.
    pub id: Uuid,
    /// Schema version of the payload.
    pub schema_version: u16,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// The acknowledgement itself.
    pub response: Response,
}

impl ResponseEnvelope {
    /// Build the acknowledgement for a given request id.
    pub fn replying_to(id: Uuid, response: Response) -> Self {
        Self {
            id,
            schema_version: SCHEMA_VERSION,
            timestamp: Utc::now(),
            response,
        }
    }
}
