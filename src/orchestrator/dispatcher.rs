//! Dispatcher
//!
//! Fans a customer request out to the specialist rooms, correlates the
//! results by task id, resolves the branch once every role has answered or
//! the deadline has passed, escalates new issues to ticketing and posts the
//! reply. Transport failures and timeouts surface as per-role error results,
//! never as a stuck conversation.

use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::orchestrator::branch::{BranchOutcome, BranchResolver, Escalation};
use crate::orchestrator::conversation::{
    DispatchedTask, Investigation, InvestigationReport, Recorded, Resolution,
};
use crate::orchestrator::table::ConversationTable;
use crate::payload::{BugSearch, CustomerRecord, ReproductionReport};
use crate::protocol::{
    self, codes, CreateBugReportParams, Envelope, Intent, LookupCustomerParams,
    ReproduceIssueParams, SearchBugReportsParams, SearchIssuesParams, TaskError, TaskRequest,
    TaskResult,
};
use crate::reply::{self, ReplyComposer, ReplyContext, TemplateComposer};
use crate::room::{OutboundMessage, RoomMessage, RoomTransport};
use crate::tracing_ext::{DispatchStats, StatsSnapshot};
use crate::types::{ConversationId, Role, RoomId, TaskId};
use crate::understanding::{Extraction, HeuristicUnderstanding, TextUnderstanding};
use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const REPORT_CHANNEL_CAPACITY: usize = 64;
const TITLE_CHARS: usize = 80;

/// Caller's view of one dispatched conversation
#[derive(Debug)]
pub struct ConversationHandle {
    /// Conversation id
    pub conversation_id: ConversationId,
    /// One task per dispatched role
    pub tasks: Vec<DispatchedTask>,
    report: watch::Receiver<Option<InvestigationReport>>,
}

impl ConversationHandle {
    /// Task sent to a role
    pub fn task_for(&self, role: Role) -> Option<&DispatchedTask> {
        self.tasks.iter().find(|task| task.role == role)
    }

    /// The report, if the reply has been posted
    pub fn report(&self) -> Option<InvestigationReport> {
        self.report.borrow().clone()
    }

    /// Wait for the reply to be posted. `None` if the dispatcher went away first.
    pub async fn wait(&mut self) -> Option<InvestigationReport> {
        let report = self.report.wait_for(Option::is_some).await.ok()?;
        report.clone()
    }
}

/// Hub-side orchestration over a [`RoomTransport`]
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<HubConfig>,
    transport: Arc<dyn RoomTransport>,
    understanding: Arc<dyn TextUnderstanding>,
    composer: Arc<dyn ReplyComposer>,
    resolver: Arc<BranchResolver>,
    table: Arc<ConversationTable>,
    stats: Arc<DispatchStats>,
    reports: broadcast::Sender<InvestigationReport>,
}

impl Dispatcher {
    /// Create a dispatcher with heuristic extraction and template replies
    pub fn new(config: HubConfig, transport: Arc<dyn RoomTransport>) -> Self {
        let understanding = Arc::new(HeuristicUnderstanding::new(config.capabilities.clone()));
        let resolver = Arc::new(BranchResolver::new(config.plans.clone()));
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            config: Arc::new(config),
            transport,
            understanding,
            composer: Arc::new(TemplateComposer),
            resolver,
            table: Arc::new(ConversationTable::new()),
            stats: Arc::new(DispatchStats::new()),
            reports,
        }
    }

    /// Replace the extraction step
    pub fn with_understanding(mut self, understanding: Arc<dyn TextUnderstanding>) -> Self {
        self.understanding = understanding;
        self
    }

    /// Replace the reply composer
    pub fn with_composer(mut self, composer: Arc<dyn ReplyComposer>) -> Self {
        self.composer = composer;
        self
    }

    /// Hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Open conversations
    pub fn table(&self) -> &ConversationTable {
        &self.table
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Subscribe to every report published from now on
    pub fn reports(&self) -> broadcast::Receiver<InvestigationReport> {
        self.reports.subscribe()
    }

    fn mint_task_id(&self, taken: &BTreeSet<TaskId>) -> TaskId {
        loop {
            let task_id = TaskId::mint();
            if !taken.contains(&task_id) && !self.table.is_task_known(&task_id) {
                return task_id;
            }
        }
    }

    fn derived_steps(&self, extraction: &Extraction, text: &str) -> Vec<String> {
        if !self.config.reproduction_steps.is_empty() {
            return self.config.reproduction_steps.clone();
        }
        let report = if extraction.summary.is_empty() {
            text.trim()
        } else {
            extraction.summary.as_str()
        };
        vec![
            format!("Open {}", self.config.reproduction_url),
            format!("Follow the customer's report: {}", report),
            "Observe the page and the browser console".to_string(),
        ]
    }

    fn build_request(
        &self,
        task: &DispatchedTask,
        extraction: &Extraction,
        text: &str,
    ) -> Result<TaskRequest> {
        let task_id = task.task_id.clone();
        match task.role {
            Role::CustomerData => TaskRequest::new(
                task_id,
                task.intent,
                LookupCustomerParams {
                    email: extraction.email.clone().unwrap_or_default(),
                    capability: extraction.capability.clone(),
                },
                text,
            ),
            Role::IssueSearch => TaskRequest::new(
                task_id,
                task.intent,
                SearchBugReportsParams {
                    repo: self.config.issue_repo.clone(),
                    keywords: extraction.keyword_query(),
                    labels: self.config.issue_labels.clone(),
                    limit: 5,
                },
                text,
            ),
            Role::Reproduction => TaskRequest::new(
                task_id,
                task.intent,
                ReproduceIssueParams {
                    url: self.config.reproduction_url.clone(),
                    steps: self.derived_steps(extraction, text),
                    check_console: true,
                },
                text,
            ),
            Role::Ticketing => TaskRequest::new(
                task_id,
                task.intent,
                SearchIssuesParams {
                    query: extraction.keyword_query(),
                    limit: 5,
                },
                text,
            ),
        }
    }

    fn fan_out_intent(role: Role) -> Intent {
        match role {
            Role::CustomerData => Intent::LookupCustomer,
            Role::IssueSearch => Intent::SearchBugReports,
            Role::Reproduction => Intent::ReproduceIssue,
            Role::Ticketing => Intent::SearchIssues,
        }
    }

    async fn send_request(&self, request: &TaskRequest, role: Role) -> Result<()> {
        let registration = self.config.registration(role)?;
        let body = protocol::encode(
            &Envelope::TaskRequest(request.clone()),
            Some(&registration.handle),
        )?;
        let message = OutboundMessage::new(self.config.orchestrator.clone(), body)
            .with_mention(registration.handle.clone());
        self.transport.send(&registration.room, message).await
    }

    /// Fan a customer request out to `roles` and return immediately.
    ///
    /// Every task id is indexed before the first request is sent. A request
    /// that cannot be posted is recorded as a `SEND_FAILED` result for its role.
    #[instrument(skip(self, text, roles))]
    pub async fn dispatch(
        &self,
        customer_room: &RoomId,
        text: &str,
        roles: &BTreeSet<Role>,
    ) -> Result<ConversationHandle> {
        if roles.is_empty() {
            return Err(Error::invalid_input("at least one role must be dispatched"));
        }
        for role in roles {
            self.config.registration(*role)?;
        }

        let extraction = match self.understanding.extract(text).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Extraction failed, continuing without fields: {}", e);
                Extraction::default()
            }
        };

        let conversation_id = ConversationId::new();
        let mut taken = BTreeSet::new();
        let mut tasks = Vec::with_capacity(roles.len());
        for role in roles {
            let task_id = self.mint_task_id(&taken);
            taken.insert(task_id.clone());
            tasks.push(DispatchedTask::new(*role, task_id, Self::fan_out_intent(*role)));
        }

        let requests = tasks
            .iter()
            .map(|task| self.build_request(task, &extraction, text))
            .collect::<Result<Vec<_>>>()?;

        let (investigation, report) = Investigation::new(
            conversation_id,
            customer_room.clone(),
            text,
            extraction,
            tasks.clone(),
        );
        self.table.open(investigation)?;
        self.stats.record_conversation();
        info!(
            conversation = %conversation_id,
            roles = roles.len(),
            "Dispatching investigation"
        );

        if self.config.acknowledge_customer {
            let ack = OutboundMessage::new(self.config.orchestrator.clone(), reply::ACKNOWLEDGMENT);
            if let Err(e) = self.transport.send(customer_room, ack).await {
                warn!("Failed to acknowledge customer: {}", e);
            }
        }

        let deadline = Instant::now() + self.config.investigation_timeout();
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            this.expire(conversation_id).await;
        });

        let sends = tasks
            .iter()
            .zip(&requests)
            .map(|(task, request)| self.send_request(request, task.role));
        let outcomes = join_all(sends).await;

        for (task, outcome) in tasks.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(task_id = %task.task_id, "Failed to send {} to {}: {}", task.intent, task.role, e);
                self.stats.record_send_failure();
                let failed = TaskResult::failure(
                    task.task_id.clone(),
                    TaskError::new(codes::SEND_FAILED, e.to_string()),
                    task.dispatched_at,
                    Utc::now(),
                );
                self.on_result(failed).await;
            }
        }

        Ok(ConversationHandle {
            conversation_id,
            tasks,
            report,
        })
    }

    /// Accept one result from any specialist room
    pub async fn on_result(&self, result: TaskResult) {
        let task_id = result.task_id.clone();
        match self.table.record(result) {
            Recorded::Orphan => {
                self.stats.record_orphan();
                warn!(task_id = %task_id, "Discarding result for unknown task");
            }
            Recorded::Duplicate { role } => {
                self.stats.record_duplicate();
                warn!(task_id = %task_id, "Discarding duplicate result from {}", role);
            }
            Recorded::Late { role } => {
                self.stats.record_late();
                info!(task_id = %task_id, "Late result from {} kept for audit", role);
            }
            Recorded::Pending { role, outstanding } => {
                debug!(task_id = %task_id, "Result from {}, {} outstanding", role, outstanding);
            }
            Recorded::Resolved(resolution) => self.conclude(resolution).await,
            Recorded::Escalated { resolution, result } => {
                self.finish_escalation(resolution, result).await
            }
        }
    }

    async fn expire(&self, id: ConversationId) {
        if let Some(resolution) = self.table.expire(id) {
            self.stats.record_timeouts(resolution.timed_out.len());
            warn!(
                conversation = %id,
                "Deadline elapsed, timed out: {:?}",
                resolution.timed_out
            );
            self.conclude(resolution).await;
        }
    }

    async fn conclude(&self, resolution: Resolution) {
        let outcome = self
            .resolver
            .resolve(&resolution.results, resolution.extraction.capability.as_deref());
        info!(
            conversation = %resolution.conversation_id,
            outcome = ?outcome.kind(),
            "Investigation resolved"
        );

        let escalation = if outcome.needs_escalation() {
            match self.escalate(&resolution, &outcome).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("Escalation could not start: {}", e);
                    Some(Escalation::Failed {
                        code: codes::SEND_FAILED.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        } else {
            None
        };
        self.reply(resolution, outcome, escalation).await;
    }

    /// Register and send the `create_bug_report` request. The task id is
    /// indexed before the send so a fast reply cannot become an orphan.
    async fn escalate(&self, resolution: &Resolution, outcome: &BranchOutcome) -> Result<()> {
        let registration = self.config.registration(Role::Ticketing)?;
        let task = DispatchedTask::new(
            Role::Ticketing,
            self.mint_task_id(&BTreeSet::new()),
            Intent::CreateBugReport,
        );
        let request = TaskRequest::new(
            task.task_id.clone(),
            Intent::CreateBugReport,
            CreateBugReportParams {
                title: bug_title(&resolution.extraction),
                description: bug_description(resolution, outcome, &self.config.issue_repo),
                priority: self.config.ticket_priority,
                labels: self.config.ticket_labels.clone(),
            },
            resolution.user_request.clone(),
        )?;

        self.table
            .begin_escalation(resolution.conversation_id, task.clone(), outcome.clone())?;
        self.stats.record_escalation();
        info!(
            conversation = %resolution.conversation_id,
            task_id = %task.task_id,
            "Escalating to {}",
            registration.handle
        );

        let conversation_id = resolution.conversation_id;
        let task_id = task.task_id.clone();
        let this = self.clone();
        let timeout = self.config.escalation_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((resolution, result)) = this.table.expire_escalation(conversation_id, &task_id) {
                this.stats.record_timeouts(1);
                warn!(conversation = %conversation_id, "Escalation deadline elapsed");
                this.finish_escalation(resolution, result).await;
            }
        });

        if let Err(e) = self.send_request(&request, Role::Ticketing).await {
            warn!(task_id = %task.task_id, "Failed to send escalation: {}", e);
            self.stats.record_send_failure();
            let failed = TaskResult::failure(
                task.task_id.clone(),
                TaskError::new(codes::SEND_FAILED, e.to_string()),
                task.dispatched_at,
                Utc::now(),
            );
            if let Recorded::Escalated { resolution, result } = self.table.record(failed) {
                self.finish_escalation(resolution, result).await;
            }
        }
        Ok(())
    }

    async fn finish_escalation(&self, resolution: Resolution, result: TaskResult) {
        let escalation = Escalation::from_result(&result);
        match &escalation {
            Escalation::Filed { ticket } => info!(
                conversation = %resolution.conversation_id,
                "Filed {}",
                ticket.identifier
            ),
            Escalation::Failed { code, message } => warn!(
                conversation = %resolution.conversation_id,
                "Ticket not filed ({}): {}",
                code,
                message
            ),
        }

        let outcome = match resolution.outcome.clone() {
            Some(outcome) => outcome,
            None => self
                .resolver
                .resolve(&resolution.results, resolution.extraction.capability.as_deref()),
        };
        self.reply(resolution, outcome, Some(escalation)).await;
    }

    async fn reply(&self, resolution: Resolution, outcome: BranchOutcome, escalation: Option<Escalation>) {
        let reproduction: Option<ReproductionReport> = resolution
            .results
            .get(&Role::Reproduction)
            .and_then(TaskResult::result)
            .and_then(|value| serde_json::from_value(value.clone()).ok());

        let context = ReplyContext {
            outcome: &outcome,
            user_request: &resolution.user_request,
            extraction: &resolution.extraction,
            reproduction: reproduction.as_ref(),
            escalation: escalation.as_ref(),
        };
        let text = match self.composer.compose(&context).await {
            Ok(text) if reply::is_customer_safe(&text) => text,
            Ok(_) => {
                warn!("Composed reply failed the customer-safety check, using template");
                TemplateComposer.render(&context)
            }
            Err(e) => {
                warn!("Reply composition failed, using template: {}", e);
                TemplateComposer.render(&context)
            }
        };

        let message = OutboundMessage::new(self.config.orchestrator.clone(), text.clone());
        let reply_delivered = match self.transport.send(&resolution.customer_room, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(conversation = %resolution.conversation_id, "Failed to post reply: {}", e);
                false
            }
        };

        let Some(investigation) = self.table.close(resolution.conversation_id) else {
            return;
        };
        let report = InvestigationReport {
            conversation_id: resolution.conversation_id,
            outcome,
            reply: text,
            reply_delivered,
            results: resolution.results,
            timed_out: resolution.timed_out,
            escalation,
            late_results: investigation.late_results().len(),
            elapsed_ms: investigation.elapsed_ms(),
        };
        self.stats.record_resolved();
        investigation.publish(report.clone());
        // no subscribers is fine
        let _ = self.reports.send(report);
    }

    /// Route one room message
    pub async fn on_room_message(&self, message: RoomMessage) {
        if message.sender == self.config.orchestrator {
            return;
        }

        if message.room == self.config.customer_room {
            let roles: BTreeSet<Role> = Role::INVESTIGATION.into_iter().collect();
            if let Err(e) = self.dispatch(&message.room, &message.content, &roles).await {
                warn!("Failed to dispatch customer message: {}", e);
            }
            return;
        }

        let Some(role) = self.config.role_for_room(&message.room) else {
            debug!(room = %message.room, "Ignoring message from unmanaged room");
            return;
        };
        let expected = self
            .config
            .registration(role)
            .map(|registration| registration.handle.as_str())
            .unwrap_or_default();
        if message.sender != expected {
            debug!(room = %message.room, "Ignoring message from {}", message.sender);
            return;
        }

        match protocol::decode(&message.content) {
            Ok(Envelope::TaskResult(result)) => self.on_result(result).await,
            Ok(Envelope::TaskRequest(request)) => {
                self.stats.record_malformed();
                warn!(task_id = %request.task_id, "{} sent a task_request, ignoring", role);
            }
            Err(e) => {
                self.stats.record_malformed();
                warn!(room = %message.room, "Malformed message from {}: {}", message.sender, e);
            }
        }
    }

    /// Listen on the customer room and every specialist room until `shutdown`
    /// flips to true.
    pub async fn serve(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.start(shutdown)
            .await?
            .await
            .map_err(|e| Error::other(format!("Room listeners failed: {}", e)))
    }

    /// Subscribe to every managed room now and listen on background tasks.
    /// The returned handle completes once every listener has stopped.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let mut rooms = vec![self.config.customer_room.clone()];
        rooms.extend(self.config.specialists.values().map(|r| r.room.clone()));

        let mut listeners = Vec::with_capacity(rooms.len());
        for room in rooms {
            let mut inbox = self.transport.subscribe(&room, &self.config.orchestrator).await?;
            let mut shutdown = shutdown.clone();
            let this = self.clone();
            listeners.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        message = inbox.recv() => match message {
                            Some(message) => this.on_room_message(message).await,
                            None => break,
                        }
                    }
                }
                debug!(room = %room, "Listener stopped");
            }));
        }

        info!("{} listening on {} rooms", self.config.orchestrator, listeners.len());
        Ok(tokio::spawn(async move {
            for outcome in join_all(listeners).await {
                if let Err(e) = outcome {
                    warn!("Room listener panicked: {}", e);
                }
            }
        }))
    }
}

fn bug_title(extraction: &Extraction) -> String {
    let summary = extraction.summary.trim();
    if summary.is_empty() {
        return "Customer-reported bug".to_string();
    }
    let mut title: String = summary.chars().take(TITLE_CHARS).collect();
    if summary.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    format!("[Customer] {}", title)
}

fn describe_customer(customer: &CustomerRecord) -> String {
    format!(
        "{} <{}>, {} ({} plan, account {})",
        customer.name, customer.email, customer.company, customer.plan, customer.account_id
    )
}

/// Ticket body: customer context, the verbatim report and whatever the
/// investigation found.
fn bug_description(resolution: &Resolution, outcome: &BranchOutcome, repo: &str) -> String {
    let mut out = String::from("## Customer-reported bug\n\n");
    if let Some(customer) = outcome.customer() {
        let _ = writeln!(out, "**Customer:** {}", describe_customer(customer));
    }
    if let Some(capability) = &resolution.extraction.capability {
        let _ = writeln!(out, "**Capability:** {}", capability);
    }
    let _ = writeln!(out, "\n### Original report\n\n{}\n", resolution.user_request);

    let search = resolution.results.get(&Role::IssueSearch);
    let searched = search
        .and_then(TaskResult::result)
        .and_then(|value| serde_json::from_value::<BugSearch>(value.clone()).ok());
    out.push_str("### Known-issue search\n\n");
    match (searched, search.and_then(TaskResult::error)) {
        (Some(search), _) => {
            let _ = writeln!(out, "No matching open issues in {} (`{}`).", repo, search.search_query);
        }
        (None, Some(error)) => {
            let _ = writeln!(
                out,
                "Search unavailable ({}: {}). This may duplicate an existing issue.",
                error.code, error.message
            );
        }
        (None, None) => {
            out.push_str("Search unavailable. This may duplicate an existing issue.\n");
        }
    }

    out.push_str("\n### Reproduction\n\n");
    let reproduction = resolution.results.get(&Role::Reproduction);
    match reproduction.and_then(TaskResult::result) {
        Some(value) => match serde_json::from_value::<ReproductionReport>(value.clone()) {
            Ok(report) => {
                let _ = writeln!(
                    out,
                    "{}\n",
                    if report.reproduced { "Reproduced." } else { "Not reproduced." }
                );
                for observation in &report.observations {
                    let _ = writeln!(out, "- {}", observation);
                }
                if !report.console_errors.is_empty() {
                    out.push_str("\nConsole errors:\n");
                    for error in &report.console_errors {
                        let _ = writeln!(out, "- `{}`", error);
                    }
                }
                let _ = writeln!(out, "\nFinal state: {}", report.screenshot_description);
            }
            Err(_) => out.push_str("Unreadable reproduction report.\n"),
        },
        None => {
            let reason = reproduction
                .and_then(TaskResult::error)
                .map(|error| format!("{}: {}", error.code, error.message))
                .unwrap_or_else(|| "not requested".to_string());
            let _ = writeln!(out, "Not attempted or failed ({}).", reason);
        }
    }
    out
}
