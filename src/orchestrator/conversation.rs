//! Per-conversation investigation state
//!
//! One [`Investigation`] exists per customer request. It owns the mapping
//! from minted task ids to roles, the first result recorded per role, and the
//! escalation bookkeeping. All transitions are synchronous and happen under
//! the conversation table's entry lock, so "all roles answered" and "deadline
//! elapsed" race to a single resolution.

use crate::orchestrator::branch::{BranchOutcome, Escalation};
use crate::protocol::{codes, Intent, TaskError, TaskResult};
use crate::types::{ConversationId, Role, RoomId, TaskId};
use crate::understanding::Extraction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::watch;
use tokio::time::Instant;

/// A request sent (or about to be sent) to one specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedTask {
    /// Role addressed
    pub role: Role,
    /// Correlation id
    pub task_id: TaskId,
    /// Requested operation
    pub intent: Intent,
    /// Dispatch time
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchedTask {
    /// Create a task stamped with the current time
    pub fn new(role: Role, task_id: TaskId, intent: Intent) -> Self {
        Self {
            role,
            task_id,
            intent,
            dispatched_at: Utc::now(),
        }
    }

    /// Synthesize the TIMEOUT result recorded for a role that never answered
    pub fn timeout_result(&self, message: impl Into<String>) -> TaskResult {
        TaskResult::failure(
            self.task_id.clone(),
            TaskError::new(codes::TIMEOUT, message),
            self.dispatched_at,
            Utc::now(),
        )
    }
}

/// Snapshot handed to the branch resolver once the fan-out is complete
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Conversation
    pub conversation_id: ConversationId,
    /// Where the reply goes
    pub customer_room: RoomId,
    /// Verbatim customer text
    pub user_request: String,
    /// Fields extracted from the customer text
    pub extraction: Extraction,
    /// Exactly one result per dispatched role
    pub results: BTreeMap<Role, TaskResult>,
    /// Roles whose result is a synthesized TIMEOUT
    pub timed_out: Vec<Role>,
    /// Outcome decided at resolution, once an escalation has been started
    pub outcome: Option<BranchOutcome>,
}

/// What happened to an incoming result
#[derive(Debug)]
pub enum Recorded {
    /// No open conversation owns the task id
    Orphan,
    /// A result for this role was already recorded; the first one stands
    Duplicate {
        /// Role the task belongs to
        role: Role,
    },
    /// The conversation already resolved; kept for audit only
    Late {
        /// Role the task belongs to
        role: Role,
    },
    /// Recorded; other roles are still outstanding
    Pending {
        /// Role the task belongs to
        role: Role,
        /// Roles still missing a result
        outstanding: usize,
    },
    /// Recorded; every role has answered and the branch can be resolved
    Resolved(Resolution),
    /// The escalation's result arrived
    Escalated {
        /// Investigation snapshot, with the outcome that triggered escalation
        resolution: Resolution,
        /// Ticketing result
        result: TaskResult,
    },
}

/// Final record of one investigation, published when the reply is posted
#[derive(Debug, Clone, Serialize)]
pub struct InvestigationReport {
    /// Conversation
    pub conversation_id: ConversationId,
    /// Decision taken
    pub outcome: BranchOutcome,
    /// Text posted to the customer room
    pub reply: String,
    /// Whether posting the reply succeeded
    pub reply_delivered: bool,
    /// One result per dispatched role
    pub results: BTreeMap<Role, TaskResult>,
    /// Roles that never answered in time
    pub timed_out: Vec<Role>,
    /// Ticket escalation, for new issues
    pub escalation: Option<Escalation>,
    /// Results that arrived after resolution
    pub late_results: usize,
    /// Time from dispatch to reply
    pub elapsed_ms: u64,
}

#[derive(Debug)]
struct EscalationState {
    task: DispatchedTask,
    outcome: BranchOutcome,
    result: Option<TaskResult>,
}

/// Live state of one conversation
#[derive(Debug)]
pub struct Investigation {
    id: ConversationId,
    customer_room: RoomId,
    user_request: String,
    extraction: Extraction,
    tasks: Vec<DispatchedTask>,
    results: BTreeMap<Role, TaskResult>,
    timed_out: BTreeSet<Role>,
    late: Vec<TaskResult>,
    resolved: bool,
    escalation: Option<EscalationState>,
    opened_at: Instant,
    report: watch::Sender<Option<InvestigationReport>>,
}

impl Investigation {
    /// Open an investigation over already-minted tasks
    pub fn new(
        id: ConversationId,
        customer_room: RoomId,
        user_request: impl Into<String>,
        extraction: Extraction,
        tasks: Vec<DispatchedTask>,
    ) -> (Self, watch::Receiver<Option<InvestigationReport>>) {
        let (report, rx) = watch::channel(None);
        let investigation = Self {
            id,
            customer_room,
            user_request: user_request.into(),
            extraction,
            tasks,
            results: BTreeMap::new(),
            timed_out: BTreeSet::new(),
            late: Vec::new(),
            resolved: false,
            escalation: None,
            opened_at: Instant::now(),
            report,
        };
        (investigation, rx)
    }

    /// Conversation id
    pub fn id(&self) -> ConversationId {
        self.id
    }

    /// Fan-out tasks
    pub fn tasks(&self) -> &[DispatchedTask] {
        &self.tasks
    }

    /// Every task id this conversation owns, escalation included
    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks
            .iter()
            .map(|task| &task.task_id)
            .chain(self.escalation.iter().map(|e| &e.task.task_id))
    }

    /// Results recorded so far
    pub fn results(&self) -> &BTreeMap<Role, TaskResult> {
        &self.results
    }

    /// Whether the fan-out has resolved
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Results received after resolution
    pub fn late_results(&self) -> &[TaskResult] {
        &self.late
    }

    /// Time since the investigation opened
    pub fn elapsed_ms(&self) -> u64 {
        self.opened_at.elapsed().as_millis() as u64
    }

    fn outstanding(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !self.results.contains_key(&task.role))
            .count()
    }

    fn snapshot(&self) -> Resolution {
        Resolution {
            conversation_id: self.id,
            customer_room: self.customer_room.clone(),
            user_request: self.user_request.clone(),
            extraction: self.extraction.clone(),
            results: self.results.clone(),
            timed_out: self.timed_out.iter().copied().collect(),
            outcome: self.escalation.as_ref().map(|e| e.outcome.clone()),
        }
    }

    /// Record a result, first one per role wins
    pub fn record(&mut self, result: TaskResult) -> Recorded {
        if let Some(escalation) = self.escalation.as_mut() {
            if escalation.task.task_id == result.task_id {
                if escalation.result.is_some() {
                    return Recorded::Duplicate { role: Role::Ticketing };
                }
                escalation.result = Some(result.clone());
                return Recorded::Escalated {
                    resolution: self.snapshot(),
                    result,
                };
            }
        }

        let Some(role) = self
            .tasks
            .iter()
            .find(|task| task.task_id == result.task_id)
            .map(|task| task.role)
        else {
            return Recorded::Orphan;
        };

        if self.timed_out.contains(&role) {
            self.late.push(result);
            return Recorded::Late { role };
        }
        if self.results.contains_key(&role) {
            return Recorded::Duplicate { role };
        }
        if self.resolved {
            self.late.push(result);
            return Recorded::Late { role };
        }

        self.results.insert(role, result);
        match self.outstanding() {
            0 => {
                self.resolved = true;
                Recorded::Resolved(self.snapshot())
            }
            outstanding => Recorded::Pending { role, outstanding },
        }
    }

    /// Deadline elapsed: fill every missing role with a TIMEOUT result.
    /// `None` if the investigation already resolved.
    pub fn expire(&mut self) -> Option<Resolution> {
        if self.resolved {
            return None;
        }
        for task in &self.tasks {
            if !self.results.contains_key(&task.role) {
                self.results.insert(
                    task.role,
                    task.timeout_result(format!("{} did not respond before the deadline", task.role)),
                );
                self.timed_out.insert(task.role);
            }
        }
        self.resolved = true;
        Some(self.snapshot())
    }

    /// Register the ticket escalation; its task id must be indexed before the
    /// request is sent.
    pub fn begin_escalation(&mut self, task: DispatchedTask, outcome: BranchOutcome) {
        self.escalation = Some(EscalationState {
            task,
            outcome,
            result: None,
        });
    }

    /// Escalation deadline elapsed. `None` if it already settled.
    pub fn expire_escalation(&mut self, task_id: &TaskId) -> Option<(Resolution, TaskResult)> {
        let escalation = self.escalation.as_mut()?;
        if &escalation.task.task_id != task_id || escalation.result.is_some() {
            return None;
        }
        let result = escalation
            .task
            .timeout_result("ticketing did not respond before the escalation deadline");
        escalation.result = Some(result.clone());
        Some((self.snapshot(), result))
    }

    /// Publish the final report to the conversation handle
    pub fn publish(&self, report: InvestigationReport) {
        self.report.send_replace(Some(report));
    }
}
