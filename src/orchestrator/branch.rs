//! Branch resolution
//!
//! Maps the accumulated per-role results of one investigation to exactly one
//! outcome. Rules are evaluated in a fixed priority order and the first match
//! wins:
//!
//! 1. **Not-Entitled**: the customer's plan lacks the reported capability.
//! 2. **Lookup-Failed**: the customer record could not be obtained.
//! 3. **Known-Issue**: the issue search returned at least one open issue.
//! 4. **New-Issue**: anything else; escalates to the ticketing role.
//!
//! Reproduction results never influence the decision.

use crate::config::PlanConfig;
use crate::payload::{BugSearch, CustomerLookup, CustomerRecord, KnownIssue, Ticket};
use crate::protocol::{codes, TaskResult};
use crate::types::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Code used when the customer-data role was never part of the fan-out
pub const NOT_REQUESTED: &str = "NOT_REQUESTED";

/// Code used when a success result did not carry a readable payload
pub const INVALID_RESULT: &str = "INVALID_RESULT";

/// The single decision taken for an investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BranchOutcome {
    /// The capability is not part of the customer's plan
    NotEntitled {
        /// Customer record
        customer: CustomerRecord,
        /// Capability the report concerns
        capability: String,
        /// Cheapest plan including the capability
        required_plan: Option<String>,
    },
    /// The report matches issues engineering already tracks
    KnownIssue {
        /// Customer record
        customer: CustomerRecord,
        /// Matching issues, best first
        issues: Vec<KnownIssue>,
    },
    /// Nothing known matches; a ticket must be filed
    NewIssue {
        /// Customer record
        customer: CustomerRecord,
        /// The issue search failed or timed out, so the ticket may duplicate one
        search_degraded: bool,
    },
    /// The entitlement lookup failed
    LookupFailed {
        /// Error code reported for the lookup
        code: String,
        /// Error description
        message: String,
    },
}

/// Discriminant of [`BranchOutcome`], for logs and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// See [`BranchOutcome::NotEntitled`]
    NotEntitled,
    /// See [`BranchOutcome::KnownIssue`]
    KnownIssue,
    /// See [`BranchOutcome::NewIssue`]
    NewIssue,
    /// See [`BranchOutcome::LookupFailed`]
    LookupFailed,
}

impl BranchOutcome {
    /// Discriminant
    pub fn kind(&self) -> OutcomeKind {
        match self {
            BranchOutcome::NotEntitled { .. } => OutcomeKind::NotEntitled,
            BranchOutcome::KnownIssue { .. } => OutcomeKind::KnownIssue,
            BranchOutcome::NewIssue { .. } => OutcomeKind::NewIssue,
            BranchOutcome::LookupFailed { .. } => OutcomeKind::LookupFailed,
        }
    }

    /// Whether the outcome requires the ticket escalation
    pub fn needs_escalation(&self) -> bool {
        matches!(self, BranchOutcome::NewIssue { .. })
    }

    /// Customer record, when the lookup succeeded
    pub fn customer(&self) -> Option<&CustomerRecord> {
        match self {
            BranchOutcome::NotEntitled { customer, .. }
            | BranchOutcome::KnownIssue { customer, .. }
            | BranchOutcome::NewIssue { customer, .. } => Some(customer),
            BranchOutcome::LookupFailed { .. } => None,
        }
    }
}

/// How the ticket escalation ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Escalation {
    /// The ticket was created
    Filed {
        /// Created ticket
        ticket: Ticket,
    },
    /// The ticket could not be created (error, timeout or send failure)
    Failed {
        /// Error code
        code: String,
        /// Error description
        message: String,
    },
}

impl Escalation {
    /// Interpret the ticketing role's result
    pub fn from_result(result: &TaskResult) -> Self {
        match (result.result(), result.error()) {
            (Some(value), _) => match serde_json::from_value::<Ticket>(value.clone()) {
                Ok(ticket) => Escalation::Filed { ticket },
                Err(e) => Escalation::Failed {
                    code: INVALID_RESULT.to_string(),
                    message: format!("unreadable ticket: {}", e),
                },
            },
            (None, Some(error)) => Escalation::Failed {
                code: error.code.clone(),
                message: error.message.clone(),
            },
            (None, None) => Escalation::Failed {
                code: INVALID_RESULT.to_string(),
                message: "result carried neither payload nor error".to_string(),
            },
        }
    }
}

/// Pure decision function over a result set
#[derive(Debug, Clone, Default)]
pub struct BranchResolver {
    plans: Vec<PlanConfig>,
}

impl BranchResolver {
    /// Create a resolver that knows the plan catalogue (cheapest first)
    pub fn new(plans: Vec<PlanConfig>) -> Self {
        Self { plans }
    }

    /// Resolve an outcome. `capability` is the capability extracted from the
    /// customer's report, if any.
    pub fn resolve(
        &self,
        results: &BTreeMap<Role, TaskResult>,
        capability: Option<&str>,
    ) -> BranchOutcome {
        let lookup = match self.lookup(results) {
            Ok(lookup) => lookup,
            Err(failed) => return failed,
        };

        let capability = capability
            .map(str::to_string)
            .or_else(|| lookup.capability.clone());
        let entitled = lookup.entitled.unwrap_or_else(|| {
            capability
                .as_deref()
                .map_or(true, |c| lookup.customer.has_feature(c))
        });

        if !entitled {
            let capability = capability.unwrap_or_else(|| "this feature".to_string());
            let required_plan =
                PlanConfig::cheapest_including(&self.plans, &capability).map(|plan| plan.name.clone());
            return BranchOutcome::NotEntitled {
                customer: lookup.customer,
                capability,
                required_plan,
            };
        }

        match Self::search(results) {
            Some(search) if !search.matches.is_empty() => BranchOutcome::KnownIssue {
                customer: lookup.customer,
                issues: search.matches,
            },
            Some(_) => BranchOutcome::NewIssue {
                customer: lookup.customer,
                search_degraded: false,
            },
            None => BranchOutcome::NewIssue {
                customer: lookup.customer,
                search_degraded: true,
            },
        }
    }

    fn lookup(
        &self,
        results: &BTreeMap<Role, TaskResult>,
    ) -> std::result::Result<CustomerLookup, BranchOutcome> {
        let result = results.get(&Role::CustomerData).ok_or_else(|| BranchOutcome::LookupFailed {
            code: NOT_REQUESTED.to_string(),
            message: "customer data was not requested".to_string(),
        })?;

        if let Some(error) = result.error() {
            return Err(BranchOutcome::LookupFailed {
                code: error.code.clone(),
                message: error.message.clone(),
            });
        }

        let value = result.result().cloned().unwrap_or_default();
        let lookup: CustomerLookup =
            serde_json::from_value(value).map_err(|e| BranchOutcome::LookupFailed {
                code: INVALID_RESULT.to_string(),
                message: format!("unreadable customer record: {}", e),
            })?;

        if !lookup.found {
            return Err(BranchOutcome::LookupFailed {
                code: codes::CUSTOMER_NOT_FOUND.to_string(),
                message: format!("no customer record for {}", lookup.customer.email),
            });
        }
        Ok(lookup)
    }

    fn search(results: &BTreeMap<Role, TaskResult>) -> Option<BugSearch> {
        let value = results.get(&Role::IssueSearch)?.result()?.clone();
        serde_json::from_value(value).ok()
    }
}
