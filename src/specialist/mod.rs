//! Specialist workers
//!
//! A specialist is a single-purpose participant that listens in exactly one
//! room, accepts task requests addressed to it, executes one supported intent
//! and answers with exactly one task result addressed back to the
//! orchestrator.
//!
//! [`Specialist`] is the domain half (what an intent does);
//! [`SpecialistWorker`] is the protocol half shared by every role: message
//! filtering, intent validation, the execution budget and the reply.

pub mod customer_data;
pub mod issue_search;
pub mod reproduction;
pub mod ticketing;

pub use customer_data::{CustomerDataSpecialist, CustomerDirectory};
pub use issue_search::{IssueSearchSpecialist, IssueTracker};
pub use reproduction::ReproductionSpecialist;
pub use ticketing::{TicketDesk, TicketingSpecialist};

use crate::config::{HubConfig, SpecialistRegistration};
use crate::error::Result;
use crate::protocol::{self, codes, Envelope, Intent, TaskError, TaskRequest, TaskResult};
use crate::room::{OutboundMessage, RoomMessage, RoomTransport};
use crate::types::{Role, RoomId};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outcome of one intent execution
pub type TaskOutput = std::result::Result<Value, TaskError>;

/// Domain logic of one role
#[async_trait]
pub trait Specialist: Send + Sync {
    /// Role served
    fn role(&self) -> Role;

    /// Execute a supported intent. Called only with intents in
    /// `self.role().intents()`.
    async fn execute(&self, intent: Intent, request: &TaskRequest) -> TaskOutput;
}

/// Parse a request's params into the intent's typed shape, mapping failure to
/// `INVALID_PARAMS`.
pub fn params<T: DeserializeOwned>(request: &TaskRequest) -> std::result::Result<T, TaskError> {
    request.params_as().map_err(|e| {
        TaskError::new(
            codes::INVALID_PARAMS,
            format!("invalid params for {}: {}", request.intent, e),
        )
    })
}

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for a request
    Idle,
    /// Decoding a message
    Parsing,
    /// Running an intent
    Executing,
    /// Posting the result
    Responding,
}

/// Protocol wrapper around a [`Specialist`]
pub struct SpecialistWorker {
    specialist: Arc<dyn Specialist>,
    handle: String,
    room: RoomId,
    orchestrator: String,
    delay: Duration,
    budget: Duration,
    state: Mutex<WorkerState>,
}

impl SpecialistWorker {
    /// Wrap a specialist under the given registration
    pub fn new(
        specialist: Arc<dyn Specialist>,
        registration: &SpecialistRegistration,
        orchestrator: impl Into<String>,
    ) -> Self {
        Self {
            specialist,
            handle: registration.handle.clone(),
            room: registration.room.clone(),
            orchestrator: orchestrator.into(),
            delay: registration.simulated_delay(),
            budget: registration.response_budget(),
            state: Mutex::new(WorkerState::Idle),
        }
    }

    /// Wrap a specialist using its role's registration in `config`
    pub fn from_config(specialist: Arc<dyn Specialist>, config: &HubConfig) -> Result<Self> {
        let registration = config.registration(specialist.role())?;
        Ok(Self::new(specialist, registration, config.orchestrator.clone()))
    }

    /// Role served
    pub fn role(&self) -> Role {
        self.specialist.role()
    }

    /// Participant handle
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Room listened in
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }

    /// Turn one room message into at most one result.
    ///
    /// Ignores the worker's own messages, messages from anyone but the
    /// orchestrator, messages addressed to someone else and bodies that are
    /// not a task request. Leaves the worker in `Responding` when a result is
    /// returned.
    pub async fn process(&self, message: &RoomMessage) -> Option<TaskResult> {
        self.set_state(WorkerState::Parsing);

        if message.sender == self.handle
            || message.sender != self.orchestrator
            || (!message.mentions.is_empty() && !message.mentions(&self.handle))
        {
            self.set_state(WorkerState::Idle);
            return None;
        }

        let request = match protocol::decode(&message.content) {
            Ok(Envelope::TaskRequest(request)) => request,
            Ok(Envelope::TaskResult(_)) => {
                self.set_state(WorkerState::Idle);
                return None;
            }
            Err(e) => {
                debug!("{} ignoring non-protocol message: {}", self.handle, e);
                self.set_state(WorkerState::Idle);
                return None;
            }
        };

        let started_at = Utc::now();
        let role = self.role();
        let output = match request.intent().filter(|intent| role.supports(*intent)) {
            None => Err(TaskError::new(
                codes::UNSUPPORTED_INTENT,
                format!("{} does not support intent {}", role, request.intent),
            )),
            Some(intent) => {
                self.set_state(WorkerState::Executing);
                let work = async {
                    tokio::time::sleep(self.delay).await;
                    self.specialist.execute(intent, &request).await
                };
                match tokio::time::timeout(self.budget, work).await {
                    Ok(output) => output,
                    Err(_) => Err(TaskError::new(
                        codes::EXECUTION_TIMEOUT,
                        format!("{} exceeded its {}ms budget", intent, self.budget.as_millis()),
                    )),
                }
            }
        };

        self.set_state(WorkerState::Responding);
        let completed_at = Utc::now();
        Some(match output {
            Ok(result) => TaskResult::success(request.task_id, result, started_at, completed_at),
            Err(error) => TaskResult::failure(request.task_id, error, started_at, completed_at),
        })
    }

    /// Process a message and post the result, addressed to the orchestrator
    /// only. Returns whether a result was posted.
    pub async fn respond(&self, transport: &dyn RoomTransport, message: &RoomMessage) -> Result<bool> {
        let Some(result) = self.process(message).await else {
            return Ok(false);
        };

        let task_id = result.task_id.clone();
        let status = if result.is_success() { "success" } else { "error" };
        let posted = protocol::encode(&Envelope::TaskResult(result), Some(&self.orchestrator))
            .map(|body| OutboundMessage::new(self.handle.clone(), body).with_mention(self.orchestrator.clone()));
        let sent = match posted {
            Ok(outbound) => transport.send(&self.room, outbound).await,
            Err(e) => Err(e),
        };
        self.set_state(WorkerState::Idle);
        sent?;

        info!(task_id = %task_id, "{} answered ({})", self.handle, status);
        Ok(true)
    }

    /// Serve the room until `shutdown` flips to true. Requests are handled
    /// one at a time, in arrival order.
    pub async fn run(
        self: Arc<Self>,
        transport: Arc<dyn RoomTransport>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let inbox = transport.subscribe(&self.room, &self.handle).await?;
        self.listen(transport, inbox, shutdown).await;
        Ok(())
    }

    /// Subscribe now and serve the room on a background task
    pub async fn start(
        self: Arc<Self>,
        transport: Arc<dyn RoomTransport>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let inbox = transport.subscribe(&self.room, &self.handle).await?;
        Ok(tokio::spawn(self.listen(transport, inbox, shutdown)))
    }

    async fn listen(
        self: Arc<Self>,
        transport: Arc<dyn RoomTransport>,
        mut inbox: mpsc::UnboundedReceiver<RoomMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("{} listening in {}", self.handle, self.room);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = inbox.recv() => match message {
                    Some(message) => {
                        if let Err(e) = self.respond(transport.as_ref(), &message).await {
                            warn!("{} failed to answer: {}", self.handle, e);
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// Build the four demo specialists with their built-in data sets
pub fn demo_roster(config: &HubConfig) -> Result<Vec<Arc<SpecialistWorker>>> {
    let specialists: Vec<Arc<dyn Specialist>> = vec![
        Arc::new(CustomerDataSpecialist::new(CustomerDirectory::demo()?)),
        Arc::new(IssueSearchSpecialist::new(IssueTracker::demo()?)),
        Arc::new(ReproductionSpecialist::new()),
        Arc::new(TicketingSpecialist::new(TicketDesk::new("CS", 1042))),
    ];
    specialists
        .into_iter()
        .map(|specialist| SpecialistWorker::from_config(specialist, config).map(Arc::new))
        .collect()
}
