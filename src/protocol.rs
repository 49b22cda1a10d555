//! `orchestrator/v1` task protocol
//!
//! Task requests and results travel as the textual body of chat messages,
//! optionally prefixed by `@handle` mentions. This module owns the wire
//! schema, the fixed role → intent mapping, the typed parameter shapes each
//! intent expects, and the codec used on both sides of a specialist room.

use crate::error::{Error, Result};
use crate::types::{Role, TaskId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol tag carried by every envelope
pub const PROTOCOL: &str = "orchestrator/v1";

/// Error codes carried in `TaskResult.error.code`
pub mod codes {
    /// The receiving specialist does not support the requested intent
    pub const UNSUPPORTED_INTENT: &str = "UNSUPPORTED_INTENT";
    /// Parameters did not match the intent's shape
    pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
    /// Customer lookup found no record
    pub const CUSTOMER_NOT_FOUND: &str = "CUSTOMER_NOT_FOUND";
    /// The specialist's backing operation failed
    pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";
    /// The specialist exceeded its own response budget
    pub const EXECUTION_TIMEOUT: &str = "EXECUTION_TIMEOUT";
    /// The request could not be delivered to the specialist room
    pub const SEND_FAILED: &str = "SEND_FAILED";
    /// No result arrived before the conversation deadline
    pub const TIMEOUT: &str = "TIMEOUT";
}

/// Operations the specialists support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Customer record by email
    LookupCustomer,
    /// Customers by field value
    SearchCustomers,
    /// Open bug reports matching keywords
    SearchBugReports,
    /// Reproduce a reported issue
    ReproduceIssue,
    /// File a new bug ticket
    CreateBugReport,
    /// Search existing tickets
    SearchIssues,
}

impl Intent {
    /// Wire name of the intent
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LookupCustomer => "lookup_customer",
            Intent::SearchCustomers => "search_customers",
            Intent::SearchBugReports => "search_bug_reports",
            Intent::ReproduceIssue => "reproduce_issue",
            Intent::CreateBugReport => "create_bug_report",
            Intent::SearchIssues => "search_issues",
        }
    }

    /// Parse a wire name; `None` for anything this protocol version does not define
    pub fn parse(name: &str) -> Option<Self> {
        [
            Intent::LookupCustomer,
            Intent::SearchCustomers,
            Intent::SearchBugReports,
            Intent::ReproduceIssue,
            Intent::CreateBugReport,
            Intent::SearchIssues,
        ]
        .into_iter()
        .find(|intent| intent.as_str() == name)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    /// Intents this role supports. Fixed per protocol version.
    pub fn intents(&self) -> &'static [Intent] {
        match self {
            Role::CustomerData => &[Intent::LookupCustomer, Intent::SearchCustomers],
            Role::IssueSearch => &[Intent::SearchBugReports],
            Role::Reproduction => &[Intent::ReproduceIssue],
            Role::Ticketing => &[Intent::CreateBugReport, Intent::SearchIssues],
        }
    }

    /// Whether this role supports the given intent
    pub fn supports(&self, intent: Intent) -> bool {
        self.intents().contains(&intent)
    }
}

fn default_customer_limit() -> usize {
    10
}

fn default_search_limit() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u8 {
    2
}

/// `lookup_customer` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupCustomerParams {
    /// Customer email address
    pub email: String,
    /// Capability the customer reported a problem with, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

/// `search_customers` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCustomersParams {
    /// Record field to match on (plan, status, company, ...)
    pub field: String,
    /// Case-insensitive value to look for
    pub value: String,
    /// Maximum rows returned
    #[serde(default = "default_customer_limit")]
    pub limit: usize,
}

/// `search_bug_reports` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchBugReportsParams {
    /// Repository in owner/repo form
    pub repo: String,
    /// Space-separated search terms
    pub keywords: String,
    /// Labels every match must carry
    #[serde(default)]
    pub labels: Vec<String>,
    /// Maximum matches returned
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

/// `reproduce_issue` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproduceIssueParams {
    /// Page to load
    pub url: String,
    /// Steps to walk through
    pub steps: Vec<String>,
    /// Whether to collect console errors
    #[serde(default = "default_true")]
    pub check_console: bool,
}

/// `create_bug_report` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBugReportParams {
    /// Ticket title
    pub title: String,
    /// Ticket body with customer context
    pub description: String,
    /// 1 = urgent .. 4 = low
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Ticket labels
    #[serde(default)]
    pub labels: Vec<String>,
}

/// `search_issues` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIssuesParams {
    /// Search terms
    pub query: String,
    /// Maximum matches returned
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

/// A unit of work sent to one specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Always [`PROTOCOL`]
    pub protocol: String,
    /// Correlation identifier
    pub task_id: TaskId,
    /// Intent name; kept as a string so unsupported intents survive parsing
    pub intent: String,
    /// Intent-specific parameters, validated by the receiver only
    pub params: Map<String, Value>,
    /// Verbatim customer text, echoed for context
    pub user_request: String,
    /// Send time
    pub dispatched_at: DateTime<Utc>,
}

impl TaskRequest {
    /// Build a request stamped with the current time
    pub fn new(
        task_id: TaskId,
        intent: Intent,
        params: impl Serialize,
        user_request: impl Into<String>,
    ) -> Result<Self> {
        let params = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::invalid_input(format!(
                    "params for {} must be an object, got {}",
                    intent, other
                )))
            }
        };

        Ok(Self {
            protocol: PROTOCOL.to_string(),
            task_id,
            intent: intent.as_str().to_string(),
            params,
            user_request: user_request.into(),
            dispatched_at: Utc::now(),
        })
    }

    /// The parsed intent, if this protocol version defines it
    pub fn intent(&self) -> Option<Intent> {
        Intent::parse(&self.intent)
    }

    /// Deserialize the params into an intent's typed shape
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.params.clone()))?)
    }
}

/// Error payload of a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Machine-readable code, see [`codes`]
    pub code: String,
    /// Human-readable description
    pub message: String,
}

impl TaskError {
    /// Create a task error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Success payload or error, tagged by `status` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// `status = "success"`, `result` present
    Success {
        /// Intent-specific payload
        result: Value,
    },
    /// `status = "error"`, `error` present
    Error {
        /// Failure description
        error: TaskError,
    },
}

/// The single response to one [`TaskRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Always [`PROTOCOL`]
    pub protocol: String,
    /// Task this result answers
    pub task_id: TaskId,
    /// Payload or error
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    /// When the specialist started working
    pub started_at: DateTime<Utc>,
    /// When the specialist finished
    pub completed_at: DateTime<Utc>,
    /// `completed_at - started_at` in milliseconds
    pub processing_ms: u64,
}

impl TaskResult {
    /// Build a result; `processing_ms` is derived from the two timestamps
    pub fn new(
        task_id: TaskId,
        outcome: TaskOutcome,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let processing_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            protocol: PROTOCOL.to_string(),
            task_id,
            outcome,
            started_at,
            completed_at,
            processing_ms,
        }
    }

    /// Successful result
    pub fn success(
        task_id: TaskId,
        result: Value,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::new(task_id, TaskOutcome::Success { result }, started_at, completed_at)
    }

    /// Failed result
    pub fn failure(
        task_id: TaskId,
        error: TaskError,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self::new(task_id, TaskOutcome::Error { error }, started_at, completed_at)
    }

    /// Whether the task succeeded
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Success { .. })
    }

    /// Success payload
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            TaskOutcome::Success { result } => Some(result),
            TaskOutcome::Error { .. } => None,
        }
    }

    /// Error payload
    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            TaskOutcome::Success { .. } => None,
            TaskOutcome::Error { error } => Some(error),
        }
    }

    /// Error code, if the task failed
    pub fn error_code(&self) -> Option<&str> {
        self.error().map(|e| e.code.as_str())
    }

    /// Distance between `processing_ms` and the timestamps it claims to summarize
    pub fn timing_skew_ms(&self) -> u64 {
        let actual = (self.completed_at - self.started_at).num_milliseconds();
        (self.processing_ms as i64 - actual).unsigned_abs()
    }
}

/// Anything that can appear as a protocol message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Orchestrator → specialist
    TaskRequest(TaskRequest),
    /// Specialist → orchestrator
    TaskResult(TaskResult),
}

impl Envelope {
    fn protocol(&self) -> &str {
        match self {
            Envelope::TaskRequest(request) => &request.protocol,
            Envelope::TaskResult(result) => &result.protocol,
        }
    }
}

/// Drop any leading `@handle` tokens from a message body
pub fn strip_mentions(content: &str) -> &str {
    let mut rest = content.trim_start();
    while rest.starts_with('@') {
        rest = match rest.find(char::is_whitespace) {
            Some(idx) => rest[idx..].trim_start(),
            None => "",
        };
    }
    rest
}

/// Render an envelope as a message body, addressed to `mention` if given
pub fn encode(envelope: &Envelope, mention: Option<&str>) -> Result<String> {
    let json = serde_json::to_string(envelope)?;
    Ok(match mention {
        Some(handle) => format!("@{} {}", handle, json),
        None => json,
    })
}

/// Parse a message body into an envelope.
///
/// Fails with [`Error::Protocol`] for non-JSON bodies, unknown envelope
/// types, missing fields and foreign protocol tags.
pub fn decode(content: &str) -> Result<Envelope> {
    let body = strip_mentions(content);
    if !body.starts_with('{') {
        return Err(Error::protocol("message body is not a JSON object"));
    }

    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| Error::protocol(format!("malformed envelope: {}", e)))?;

    if envelope.protocol() != PROTOCOL {
        return Err(Error::protocol(format!(
            "unexpected protocol tag {:?}",
            envelope.protocol()
        )));
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_request() -> TaskRequest {
        TaskRequest::new(
            TaskId::new("task-001"),
            Intent::LookupCustomer,
            LookupCustomerParams {
                email: "sarah@acme.com".to_string(),
                capability: None,
            },
            "CSV export is broken, sarah@acme.com",
        )
        .unwrap()
    }

    #[test]
    fn test_request_wire_shape() {
        let body = encode(&Envelope::TaskRequest(sample_request()), None).unwrap();
        let value: Value = serde_json::from_str(&body).unwrap();

        assert_eq!(value["protocol"], "orchestrator/v1");
        assert_eq!(value["type"], "task_request");
        assert_eq!(value["task_id"], "task-001");
        assert_eq!(value["intent"], "lookup_customer");
        assert_eq!(value["params"], json!({"email": "sarah@acme.com"}));
        assert!(value["dispatched_at"].is_string());
    }

    #[test]
    fn test_result_carries_result_iff_success() {
        let now = Utc::now();
        let ok = TaskResult::success(TaskId::new("t1"), json!({"found": true}), now, now);
        let ok_json = serde_json::to_value(Envelope::TaskResult(ok)).unwrap();
        assert_eq!(ok_json["status"], "success");
        assert!(ok_json.get("result").is_some());
        assert!(ok_json.get("error").is_none());

        let err = TaskResult::failure(
            TaskId::new("t2"),
            TaskError::new(codes::CUSTOMER_NOT_FOUND, "no record"),
            now,
            now,
        );
        let err_json = serde_json::to_value(Envelope::TaskResult(err)).unwrap();
        assert_eq!(err_json["status"], "error");
        assert_eq!(err_json["error"]["code"], "CUSTOMER_NOT_FOUND");
        assert!(err_json.get("result").is_none());
    }

    #[test]
    fn test_processing_ms_matches_timestamps() {
        let started = Utc::now();
        for offset in [0, 1, 999, 2_345, 15_000] {
            let completed = started + Duration::milliseconds(offset) + Duration::microseconds(700);
            let result = TaskResult::success(TaskId::mint(), json!({}), started, completed);
            assert_eq!(result.processing_ms, offset as u64);
            assert!(result.timing_skew_ms() <= 1);
        }
    }

    #[test]
    fn test_timing_survives_the_wire() {
        let started = Utc::now();
        let completed = started + Duration::milliseconds(2_001);
        let result = TaskResult::success(TaskId::mint(), json!({"matches": []}), started, completed);
        let body = encode(&Envelope::TaskResult(result), Some("SupportOrchestrator")).unwrap();

        match decode(&body).unwrap() {
            Envelope::TaskResult(decoded) => {
                assert_eq!(decoded.processing_ms, 2_001);
                assert!(decoded.timing_skew_ms() <= 1);
            }
            other => panic!("expected task_result, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("@ExcelAgent {\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_mentions("  @A @B   {}"), "{}");
        assert_eq!(strip_mentions("{}"), "{}");
        assert_eq!(strip_mentions("@OnlyAMention"), "");
    }

    #[test]
    fn test_decode_rejects_malformed_bodies() {
        assert!(matches!(decode("hello there"), Err(Error::Protocol(_))));
        assert!(matches!(decode("@ExcelAgent {not json"), Err(Error::Protocol(_))));
        assert!(matches!(
            decode(r#"{"protocol":"orchestrator/v1","type":"task_request","task_id":"t"}"#),
            Err(Error::Protocol(_))
        ));

        let mut request = sample_request();
        request.protocol = "orchestrator/v0".to_string();
        let body = encode(&Envelope::TaskRequest(request), None).unwrap();
        assert!(matches!(decode(&body), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_decode_keeps_unknown_intent_name() {
        let mut request = sample_request();
        request.intent = "delete_everything".to_string();
        let body = encode(&Envelope::TaskRequest(request), Some("ExcelAgent")).unwrap();

        match decode(&body).unwrap() {
            Envelope::TaskRequest(decoded) => {
                assert_eq!(decoded.intent, "delete_everything");
                assert_eq!(decoded.intent(), None);
            }
            other => panic!("expected task_request, got {:?}", other),
        }
    }

    #[test]
    fn test_role_intent_mapping() {
        assert!(Role::CustomerData.supports(Intent::LookupCustomer));
        assert!(Role::CustomerData.supports(Intent::SearchCustomers));
        assert!(Role::IssueSearch.supports(Intent::SearchBugReports));
        assert!(Role::Reproduction.supports(Intent::ReproduceIssue));
        assert!(Role::Ticketing.supports(Intent::CreateBugReport));
        assert!(Role::Ticketing.supports(Intent::SearchIssues));
        assert!(!Role::Reproduction.supports(Intent::CreateBugReport));
    }

    #[test]
    fn test_params_defaults() {
        let request = TaskRequest::new(
            TaskId::mint(),
            Intent::ReproduceIssue,
            json!({"url": "http://localhost:8888/mock_app.html", "steps": ["Click Export"]}),
            "",
        )
        .unwrap();
        let params: ReproduceIssueParams = request.params_as().unwrap();
        assert!(params.check_console);

        let params: CreateBugReportParams =
            serde_json::from_value(json!({"title": "t", "description": "d"})).unwrap();
        assert_eq!(params.priority, 2);
        assert!(params.labels.is_empty());
    }

    #[test]
    fn test_non_object_params_rejected() {
        let err = TaskRequest::new(TaskId::mint(), Intent::SearchIssues, json!([1, 2]), "");
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }
}
