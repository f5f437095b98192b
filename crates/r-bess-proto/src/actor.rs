//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Actor protocol requests, acknowledgements, and task runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use r_bess_common::store::FieldPage;
use r_bess_fleet::FleetSnapshot;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::message::{Request, RequestEnvelope, Response, ResponseEnvelope};
use crate::status::{ActorInfo, ActorStatus};
use crate::{ProtoError, Result};

const CONTROL_LANE_DEPTH: usize = 16;

/// Behaviour of one device actor.
///
/// Implementations own their state; the runtime guarantees the methods are
/// only ever called from the actor's task, one request at a time, so a cycle
/// runs start to finish without interleaving.
pub trait DeviceActor: Send + 'static {
    /// Identity card for `GET_INFO`.
    fn info(&self) -> ActorInfo;
    /// Live status for `GET_STATUS`.
    fn status(&self) -> ActorStatus;
    /// Accept fresh inputs ahead of the next cycle.
    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage);
    /// Run one full cycle against the last supplied inputs.
    fn sync(&mut self);
    /// Outputs produced by the last completed cycle.
    fn outputs(&self) -> FleetSnapshot;
    /// Current configuration page.
    fn page(&self) -> FieldPage;
    /// Merge operator writes into the configuration page.
    fn set_page(&mut self, fields: FieldPage);
}

impl DeviceActor for Box<dyn DeviceActor> {
    fn info(&self) -> ActorInfo {
        (**self).info()
    }

    fn status(&self) -> ActorStatus {
        (**self).status()
    }

    fn set_inputs(&mut self, snapshot: FleetSnapshot, page: FieldPage) {
        (**self).set_inputs(snapshot, page);
    }

    fn sync(&mut self) {
        (**self).sync();
    }

    fn outputs(&self) -> FleetSnapshot {
        (**self).outputs()
    }

    fn page(&self) -> FieldPage {
        (**self).page()
    }

    fn set_page(&mut self, fields: FieldPage) {
        (**self).set_page(fields);
    }
}

struct Job {
    envelope: RequestEnvelope,
    reply: oneshot::Sender<ResponseEnvelope>,
}

/// Caller-side handle to a spawned actor.
#[derive(Debug)]
pub struct ActorHandle {
    uid: String,
    control: mpsc::Sender<Job>,
    ticks: mpsc::Sender<Job>,
    task: JoinHandle<()>,
}

/// Spawn `actor` on its own task and return the handle for it.
pub fn spawn_actor<A: DeviceActor>(
    uid: impl Into<String>,
    mut actor: A,
    mut shutdown: broadcast::Receiver<()>,
) -> ActorHandle {
    let uid = uid.into();
    let (control_tx, mut control_rx) = mpsc::channel::<Job>(CONTROL_LANE_DEPTH);
    // Single-slot tick lane: one tick may wait while a cycle runs, further
    // ticks are refused at the sender.
    let (tick_tx, mut tick_rx) = mpsc::channel::<Job>(1);

    let task_uid = uid.clone();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(uid = %task_uid, "actor shutdown signal received");
                    break;
                }
                Some(job) = control_rx.recv() => {
                    serve(&task_uid, &mut actor, job);
                }
                Some(job) = tick_rx.recv() => {
                    serve(&task_uid, &mut actor, job);
                }
                else => break,
            }
        }
        debug!(uid = %task_uid, "actor task finished");
    });

    ActorHandle {
        uid,
        control: control_tx,
        ticks: tick_tx,
        task,
    }
}

fn serve<A: DeviceActor>(uid: &str, actor: &mut A, job: Job) {
    let Job { envelope, reply } = job;
    let response = match envelope.request {
        Request::Sync => {
            actor.sync();
            Response::Ack
        }
        Request::GetInfo => Response::Info(actor.info()),
        Request::GetStatus => Response::Status(actor.status()),
        Request::GetPage => Response::Page {
            fields: actor.page(),
        },
        Request::SetPage { fields } => {
            actor.set_page(fields);
            Response::Ack
        }
        Request::SetInputs { snapshot, page } => {
            actor.set_inputs(snapshot, page);
            Response::Ack
        }
        Request::GetOutputs => Response::Outputs {
            snapshot: actor.outputs(),
        },
    };
    if reply
        .send(ResponseEnvelope::replying_to(envelope.id, response))
        .is_err()
    {
        debug!(uid = %uid, "acknowledgement receiver went away");
    }
}

impl ActorHandle {
    /// Device uid this handle talks to.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Send a request over the control lane and await its acknowledgement.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let envelope = RequestEnvelope::new(request);
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            envelope,
            reply: reply_tx,
        };
        self.control
            .send(job)
            .await
            .map_err(|_| ProtoError::ActorGone(self.uid.clone()))?;
        let reply = reply_rx
            .await
            .map_err(|_| ProtoError::ActorGone(self.uid.clone()))?;
        Ok(reply.response)
    }

    /// Submit a cycle tick.
    ///
    /// Returns [`Response::Dropped`] without blocking when the actor is still
    /// busy with the previous cycle and a tick is already waiting.
    pub async fn sync(&self) -> Result<Response> {
        let envelope = RequestEnvelope::new(Request::Sync);
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            envelope,
            reply: reply_tx,
        };
        match self.ticks.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(uid = %self.uid, "cycle still running, tick dropped");
                return Ok(Response::Dropped);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(ProtoError::ActorGone(self.uid.clone()));
            }
        }
        let reply = reply_rx
            .await
            .map_err(|_| ProtoError::ActorGone(self.uid.clone()))?;
        Ok(reply.response)
    }

    /// `GET_INFO` convenience wrapper.
    pub async fn info(&self) -> Result<ActorInfo> {
        match self.request(Request::GetInfo).await? {
            Response::Info(info) => Ok(info),
            other => Err(ProtoError::UnexpectedAck {
                op: "get_info",
                got: other.kind(),
            }),
        }
    }

    /// `GET_STATUS` convenience wrapper.
    pub async fn status(&self) -> Result<ActorStatus> {
        match self.request(Request::GetStatus).await? {
            Response::Status(status) => Ok(status),
            other => Err(ProtoError::UnexpectedAck {
                op: "get_status",
                got: other.kind(),
            }),
        }
    }

    /// `SET_INPUTS` convenience wrapper.
    pub async fn set_inputs(&self, snapshot: FleetSnapshot, page: FieldPage) -> Result<()> {
        match self.request(Request::SetInputs { snapshot, page }).await? {
            Response::Ack => Ok(()),
            other => Err(ProtoError::UnexpectedAck {
                op: "set_inputs",
                got: other.kind(),
            }),
        }
    }

    /// `GET_OUTPUTS` convenience wrapper.
    pub async fn outputs(&self) -> Result<FleetSnapshot> {
        match self.request(Request::GetOutputs).await? {
            Response::Outputs { snapshot } => Ok(snapshot),
            other => Err(ProtoError::UnexpectedAck {
                op: "get_outputs",
                got: other.kind(),
            }),
        }
    }

    /// `GET_PAGE` convenience wrapper.
    pub async fn get_page(&self) -> Result<FieldPage> {
        match self.request(Request::GetPage).await? {
            Response::Page { fields } => Ok(fields),
            other => Err(ProtoError::UnexpectedAck {
                op: "get_page",
                got: other.kind(),
            }),
        }
    }

    /// `SET_PAGE` convenience wrapper.
    pub async fn set_page(&self, fields: FieldPage) -> Result<()> {
        match self.request(Request::SetPage { fields }).await? {
            Response::Ack => Ok(()),
            other => Err(ProtoError::UnexpectedAck {
                op: "set_page",
                got: other.kind(),
            }),
        }
    }

    /// Await the actor task after shutdown has been signalled.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            warn!(uid = %self.uid, error = %err, "actor task join error");
        }
    }
}
