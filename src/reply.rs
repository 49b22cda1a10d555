//! Customer-facing replies
//!
//! The wording of the final reply is pluggable ([`ReplyComposer`]); the
//! decision it communicates is not. Whatever a composer produces is checked
//! with [`is_customer_safe`] before it is posted, and the deterministic
//! [`TemplateComposer`] text is used instead when the check fails.

use crate::error::Result;
use crate::orchestrator::branch::{BranchOutcome, Escalation};
use crate::payload::ReproductionReport;
use crate::protocol::{codes, PROTOCOL};
use crate::understanding::Extraction;
use async_trait::async_trait;

/// Posted to the customer room once a report is accepted, before the
/// specialists are asked
pub const ACKNOWLEDGMENT: &str = "Thanks for reaching out! I'm looking into this right now: checking your \
account, searching our bug tracker, and trying to reproduce the issue. I'll have an update for you shortly.";

/// Everything a composer may draw on
#[derive(Debug, Clone, Copy)]
pub struct ReplyContext<'a> {
    /// The decision to communicate
    pub outcome: &'a BranchOutcome,
    /// Verbatim customer text
    pub user_request: &'a str,
    /// Fields extracted from the customer text
    pub extraction: &'a Extraction,
    /// Reproduction findings, when the specialist answered successfully
    pub reproduction: Option<&'a ReproductionReport>,
    /// How the ticket escalation ended, for new issues
    pub escalation: Option<&'a Escalation>,
}

/// Renders the final reply text
#[async_trait]
pub trait ReplyComposer: Send + Sync {
    /// Compose the reply for one investigation
    async fn compose(&self, context: &ReplyContext<'_>) -> Result<String>;
}

/// Whether a reply may be shown to a customer: non-empty prose that does not
/// leak protocol JSON.
pub fn is_customer_safe(reply: &str) -> bool {
    let trimmed = reply.trim_start();
    !trimmed.is_empty()
        && !trimmed.starts_with('{')
        && !trimmed.starts_with('[')
        && !reply.contains(PROTOCOL)
        && !reply.contains("\"task_id\"")
}

/// Fixed wording per outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateComposer;

impl TemplateComposer {
    /// Render the reply synchronously
    pub fn render(&self, context: &ReplyContext<'_>) -> String {
        match context.outcome {
            BranchOutcome::NotEntitled {
                customer,
                capability,
                required_plan,
            } => {
                let availability = match required_plan {
                    Some(plan) => format!(
                        "{} is available on our {} plan, and your account is currently on the {} plan",
                        capability, plan, customer.plan
                    ),
                    None => format!(
                        "{} isn't included in your current {} plan",
                        capability, customer.plan
                    ),
                };
                format!(
                    "Hi {}, thanks for reaching out. I checked your account and {}. \
                     If you'd like access, I can share the details on upgrading. Just let me know!",
                    customer.first_name(),
                    availability
                )
            }
            BranchOutcome::KnownIssue { customer, issues } => {
                let mut reply = format!("Hi {}, thanks for reporting this. ", customer.first_name());
                match issues.first() {
                    Some(issue) => {
                        reply.push_str(&format!(
                            "This is a known issue our engineering team is already tracking (#{}: {}).",
                            issue.number, issue.title
                        ));
                        if let Some(note) = issue.engineer_notes.last() {
                            reply.push_str(&format!(" Latest update from engineering: {}", note));
                        }
                        if let Some(workaround) = &issue.workaround {
                            reply.push_str(&format!(" In the meantime, a workaround: {}", workaround));
                        }
                    }
                    None => reply.push_str("This is a known issue our engineering team is already tracking."),
                }
                reply.push_str(" I'll follow up as soon as the fix is live. Sorry for the trouble!");
                reply
            }
            BranchOutcome::NewIssue { customer, .. } => {
                let reproduced = context.reproduction.map_or(false, |r| r.reproduced);
                let mut reply = format!(
                    "Hi {}, thanks for reporting this. I couldn't find an existing report matching what you described",
                    customer.first_name()
                );
                if reproduced {
                    reply.push_str(", and I was able to reproduce it on our side");
                }
                match context.escalation {
                    Some(Escalation::Filed { ticket }) => reply.push_str(&format!(
                        ". I've filed it with our engineering team as {} and I'll keep you posted on progress.",
                        ticket.identifier
                    )),
                    _ => reply.push_str(
                        ". I wasn't able to file the bug report just yet, but I've noted the details \
                         and a teammate will follow up with you shortly.",
                    ),
                }
                reply
            }
            BranchOutcome::LookupFailed { code, .. } => {
                if code == codes::CUSTOMER_NOT_FOUND {
                    let who = context
                        .extraction
                        .email
                        .as_deref()
                        .map(|email| format!("the email {}", email))
                        .unwrap_or_else(|| "the details you provided".to_string());
                    format!(
                        "Thanks for reaching out! I couldn't find an account matching {}. \
                         Could you confirm the email address on your account so I can keep looking into this?",
                        who
                    )
                } else {
                    "Thanks for reaching out! I wasn't able to pull up your account details right now. \
                     Could you confirm the email address on your account so I can keep looking into this?"
                        .to_string()
                }
            }
        }
    }
}

#[async_trait]
impl ReplyComposer for TemplateComposer {
    async fn compose(&self, context: &ReplyContext<'_>) -> Result<String> {
        Ok(self.render(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{CustomerRecord, KnownIssue, Ticket};

    fn customer(plan: &str) -> CustomerRecord {
        CustomerRecord {
            email: "sarah@acme.com".into(),
            name: "Sarah Chen".into(),
            company: "Acme Corp".into(),
            plan: plan.into(),
            status: "Active".into(),
            features: vec!["Dashboard".into()],
            account_id: "ACM-2847".into(),
            signup_date: "2025-06-15".into(),
        }
    }

    fn render(outcome: &BranchOutcome, escalation: Option<&Escalation>) -> String {
        let extraction = Extraction {
            email: Some("sarah@acme.com".into()),
            ..Default::default()
        };
        TemplateComposer.render(&ReplyContext {
            outcome,
            user_request: "CSV export spins forever",
            extraction: &extraction,
            reproduction: None,
            escalation,
        })
    }

    #[test]
    fn test_not_entitled_names_plans() {
        let reply = render(
            &BranchOutcome::NotEntitled {
                customer: customer("Free"),
                capability: "CSV Export".into(),
                required_plan: Some("Pro".into()),
            },
            None,
        );
        assert!(reply.starts_with("Hi Sarah"));
        assert!(reply.contains("CSV Export is available on our Pro plan"));
        assert!(reply.contains("Free plan"));
        assert!(is_customer_safe(&reply));
    }

    #[test]
    fn test_known_issue_mentions_issue_and_workaround() {
        let issue = KnownIssue {
            number: 42,
            title: "CSV export hangs with infinite spinner".into(),
            state: "open".into(),
            labels: vec!["bug".into()],
            url: None,
            body_preview: String::new(),
            engineer_notes: vec!["Fix deploying this week.".into()],
            workaround: Some("Export fewer than 10,000 rows at a time.".into()),
        };
        let reply = render(
            &BranchOutcome::KnownIssue {
                customer: customer("Pro"),
                issues: vec![issue],
            },
            None,
        );
        assert!(reply.contains("#42"));
        assert!(reply.contains("Fix deploying this week."));
        assert!(reply.contains("10,000 rows"));
    }

    #[test]
    fn test_new_issue_reports_ticket_or_failure() {
        let outcome = BranchOutcome::NewIssue {
            customer: customer("Pro"),
            search_degraded: false,
        };
        let filed = Escalation::Filed {
            ticket: Ticket {
                id: "1".into(),
                identifier: "CS-1042".into(),
                title: "t".into(),
                url: "https://tickets.example.com/CS-1042".into(),
                state: "Backlog".into(),
                priority: 2,
                labels: vec![],
            },
        };
        assert!(render(&outcome, Some(&filed)).contains("CS-1042"));

        let failed = Escalation::Failed {
            code: codes::TIMEOUT.into(),
            message: "no answer".into(),
        };
        let reply = render(&outcome, Some(&failed));
        assert!(reply.contains("wasn't able to file"));
        assert!(!reply.contains("CS-"));
    }

    #[test]
    fn test_lookup_failed_asks_for_email() {
        let reply = render(
            &BranchOutcome::LookupFailed {
                code: codes::CUSTOMER_NOT_FOUND.into(),
                message: "no record".into(),
            },
            None,
        );
        assert!(reply.contains("sarah@acme.com"));
        assert!(reply.contains("confirm the email"));
    }

    #[test]
    fn test_customer_safety_guard() {
        assert!(is_customer_safe("Hi Sarah, all good."));
        assert!(!is_customer_safe("   "));
        assert!(!is_customer_safe("{\"type\":\"task_result\"}"));
        assert!(!is_customer_safe("Here you go: orchestrator/v1 payload"));
        assert!(!is_customer_safe("  [1, 2]"));
        assert!(is_customer_safe(ACKNOWLEDGMENT));
    }
}
