//! Result payload shapes
//!
//! What each intent puts in `TaskResult.result`. Specialists serialize these;
//! the branch resolver and reply composer read them back.

use serde::{Deserialize, Serialize};

/// One row of the customer directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRecord {
    /// Account email, unique
    pub email: String,
    /// Full name
    pub name: String,
    /// Company name
    #[serde(default)]
    pub company: String,
    /// Plan name (Free, Pro, Enterprise)
    pub plan: String,
    /// Active, Trial, Churned
    #[serde(default)]
    pub status: String,
    /// Capabilities the plan includes for this account
    #[serde(default)]
    pub features: Vec<String>,
    /// Account identifier
    #[serde(default)]
    pub account_id: String,
    /// ISO date of signup
    #[serde(default)]
    pub signup_date: String,
}

impl CustomerRecord {
    /// Whether the account includes a capability (case-insensitive)
    pub fn has_feature(&self, capability: &str) -> bool {
        self.features
            .iter()
            .any(|feature| feature.eq_ignore_ascii_case(capability))
    }

    /// First name for salutations
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("there")
    }

    /// Field names accepted by [`CustomerRecord::field`]
    pub const FIELDS: [&'static str; 8] = [
        "email",
        "name",
        "company",
        "plan",
        "status",
        "features",
        "account_id",
        "signup_date",
    ];

    /// Value of a named field, for searches
    pub fn field(&self, field: &str) -> Option<String> {
        match field {
            "email" => Some(self.email.clone()),
            "name" => Some(self.name.clone()),
            "company" => Some(self.company.clone()),
            "plan" => Some(self.plan.clone()),
            "status" => Some(self.status.clone()),
            "features" => Some(self.features.join(", ")),
            "account_id" => Some(self.account_id.clone()),
            "signup_date" => Some(self.signup_date.clone()),
            _ => None,
        }
    }
}

/// `lookup_customer` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerLookup {
    /// Always true in a success result; misses are reported as errors
    pub found: bool,
    /// The matching record
    pub customer: CustomerRecord,
    /// Capability the entitlement was checked against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Whether the capability is included, when one was supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitled: Option<bool>,
}

/// `search_customers` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSearch {
    /// Matching records
    pub matches: Vec<CustomerRecord>,
    /// Number of matches returned
    pub count: usize,
}

/// An open issue that matched a bug search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownIssue {
    /// Issue number
    pub number: u64,
    /// Issue title
    pub title: String,
    /// open / closed
    pub state: String,
    /// Issue labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Link to the issue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Start of the issue body
    #[serde(default)]
    pub body_preview: String,
    /// Engineer comments about root cause, fixes and deploys
    #[serde(default)]
    pub engineer_notes: Vec<String>,
    /// Customer-usable workaround, if one is known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workaround: Option<String>,
}

/// `search_bug_reports` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugSearch {
    /// Matching open issues, best first
    pub matches: Vec<KnownIssue>,
    /// Query as executed
    pub search_query: String,
}

/// `reproduce_issue` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproductionReport {
    /// Whether the reported behaviour was observed
    pub reproduced: bool,
    /// What was seen at each step
    pub observations: Vec<String>,
    /// Console errors, when console checking was requested
    #[serde(default)]
    pub console_errors: Vec<String>,
    /// Final page state
    pub screenshot_description: String,
}

/// A ticket in the ticketing system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Opaque ticket id
    pub id: String,
    /// Human-facing identifier, e.g. `CS-1042`
    pub identifier: String,
    /// Ticket title
    pub title: String,
    /// Link to the ticket
    pub url: String,
    /// Workflow state
    pub state: String,
    /// 1 = urgent .. 4 = low
    pub priority: u8,
    /// Ticket labels
    #[serde(default)]
    pub labels: Vec<String>,
}

/// `search_issues` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSearch {
    /// Matching tickets
    pub matches: Vec<Ticket>,
}
