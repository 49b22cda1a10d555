//! Ticketing specialist: files and searches engineering tickets

use super::{params, Specialist, TaskOutput};
use crate::payload::{Ticket, TicketSearch};
use crate::protocol::{codes, CreateBugReportParams, Intent, SearchIssuesParams, TaskError, TaskRequest};
use crate::types::Role;
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

const TICKET_BASE_URL: &str = "https://tickets.example.com";

#[derive(Debug)]
struct Filed {
    ticket: Ticket,
    description: String,
}

/// In-memory ticket store with sequential identifiers
#[derive(Debug)]
pub struct TicketDesk {
    team: String,
    next_number: Mutex<u64>,
    tickets: Mutex<Vec<Filed>>,
}

impl TicketDesk {
    /// Create a desk whose identifiers read `{team}-{first_number}` onwards
    pub fn new(team: impl Into<String>, first_number: u64) -> Self {
        Self {
            team: team.into(),
            next_number: Mutex::new(first_number),
            tickets: Mutex::new(Vec::new()),
        }
    }

    /// File a ticket
    pub fn create(&self, params: CreateBugReportParams) -> Ticket {
        let number = {
            let mut next = self.next_number.lock();
            let number = *next;
            *next += 1;
            number
        };
        let identifier = format!("{}-{}", self.team, number);
        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            url: format!("{}/{}", TICKET_BASE_URL, identifier),
            identifier,
            title: params.title,
            state: "Triage".to_string(),
            priority: params.priority,
            labels: params.labels,
        };
        self.tickets.lock().push(Filed {
            ticket: ticket.clone(),
            description: params.description,
        });
        ticket
    }

    /// Tickets whose title or description mention every query term
    pub fn search(&self, query: &str, limit: usize) -> Vec<Ticket> {
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        self.tickets
            .lock()
            .iter()
            .filter(|filed| {
                let haystack = format!("{} {}", filed.ticket.title, filed.description).to_lowercase();
                terms.iter().all(|term| haystack.contains(term.as_str()))
            })
            .take(limit)
            .map(|filed| filed.ticket.clone())
            .collect()
    }

    /// Number of filed tickets
    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    /// Whether nothing has been filed
    pub fn is_empty(&self) -> bool {
        self.tickets.lock().is_empty()
    }
}

/// Serves `create_bug_report` and `search_issues`
pub struct TicketingSpecialist {
    desk: TicketDesk,
}

impl TicketingSpecialist {
    /// Create the specialist over a desk
    pub fn new(desk: TicketDesk) -> Self {
        Self { desk }
    }

    /// The underlying desk
    pub fn desk(&self) -> &TicketDesk {
        &self.desk
    }
}

#[async_trait]
impl Specialist for TicketingSpecialist {
    fn role(&self) -> Role {
        Role::Ticketing
    }

    async fn execute(&self, intent: Intent, request: &TaskRequest) -> TaskOutput {
        let value = match intent {
            Intent::CreateBugReport => {
                let params: CreateBugReportParams = params(request)?;
                if params.title.trim().is_empty() || params.description.trim().is_empty() {
                    return Err(TaskError::new(codes::INVALID_PARAMS, "title and description are required"));
                }
                if !(1..=4).contains(&params.priority) {
                    return Err(TaskError::new(
                        codes::INVALID_PARAMS,
                        format!("priority must be 1-4, got {}", params.priority),
                    ));
                }
                serde_json::to_value(self.desk.create(params))
            }
            Intent::SearchIssues => {
                let params: SearchIssuesParams = params(request)?;
                serde_json::to_value(TicketSearch {
                    matches: self.desk.search(&params.query, params.limit),
                })
            }
            other => {
                return Err(TaskError::new(
                    codes::UNSUPPORTED_INTENT,
                    format!("ticketing does not support {}", other),
                ))
            }
        };
        value.map_err(|e| TaskError::new(codes::EXECUTION_FAILED, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;
    use serde_json::json;

    fn request(intent: Intent, params: serde_json::Value) -> TaskRequest {
        TaskRequest::new(TaskId::mint(), intent, params, "").unwrap()
    }

    #[tokio::test]
    async fn test_creates_sequential_tickets() {
        let specialist = TicketingSpecialist::new(TicketDesk::new("CS", 1042));
        let create = |title: &str| {
            request(
                Intent::CreateBugReport,
                json!({"title": title, "description": "Charts show UTC timestamps", "labels": ["bug"]}),
            )
        };

        let first = specialist
            .execute(Intent::CreateBugReport, &create("Wrong timezone"))
            .await
            .unwrap();
        let second = specialist
            .execute(Intent::CreateBugReport, &create("Another"))
            .await
            .unwrap();

        assert_eq!(first["identifier"], "CS-1042");
        assert_eq!(first["state"], "Triage");
        assert_eq!(first["priority"], 2);
        assert_eq!(second["identifier"], "CS-1043");
        assert_eq!(specialist.desk().len(), 2);
    }

    #[tokio::test]
    async fn test_search_issues() {
        let specialist = TicketingSpecialist::new(TicketDesk::new("CS", 1));
        specialist.desk().create(CreateBugReportParams {
            title: "CSV export spinner".into(),
            description: "Spinner never stops".into(),
            priority: 2,
            labels: vec![],
        });

        let found = specialist
            .execute(Intent::SearchIssues, &request(Intent::SearchIssues, json!({"query": "spinner csv"})))
            .await
            .unwrap();
        assert_eq!(found["matches"].as_array().unwrap().len(), 1);

        let none = specialist
            .execute(Intent::SearchIssues, &request(Intent::SearchIssues, json!({"query": "sso"})))
            .await
            .unwrap();
        assert!(none["matches"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_tickets() {
        let specialist = TicketingSpecialist::new(TicketDesk::new("CS", 1));
        for params in [
            json!({"title": "", "description": "d"}),
            json!({"title": "t", "description": "d", "priority": 9}),
            json!({"description": "d"}),
        ] {
            let err = specialist
                .execute(Intent::CreateBugReport, &request(Intent::CreateBugReport, params))
                .await
                .unwrap_err();
            assert_eq!(err.code, codes::INVALID_PARAMS);
        }
        assert!(specialist.desk().is_empty());
    }
}
