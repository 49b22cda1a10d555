//! Issue-search specialist: known open bugs by keyword overlap

use super::{params, Specialist, TaskOutput};
use crate::error::{Error, Result};
use crate::payload::{BugSearch, KnownIssue};
use crate::protocol::{codes, Intent, SearchBugReportsParams, TaskError, TaskRequest};
use crate::types::Role;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

const DEMO_ISSUES: &str = include_str!("../../demo_data/issues.yaml");
const PREVIEW_CHARS: usize = 200;
const NOTE_MARKERS: &[&str] = &["root cause", "fix", "pr #", "deploy", "workaround"];

#[derive(Debug, Clone, Deserialize)]
struct Comment {
    body: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TrackedIssue {
    repo: String,
    number: u64,
    title: String,
    state: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    comments: Vec<Comment>,
    #[serde(default)]
    workaround: Option<String>,
}

impl TrackedIssue {
    fn words(&self) -> HashSet<String> {
        format!("{} {}", self.title, self.body)
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    fn has_labels(&self, labels: &[String]) -> bool {
        labels
            .iter()
            .all(|wanted| self.labels.iter().any(|label| label.eq_ignore_ascii_case(wanted)))
    }

    fn engineer_notes(&self) -> Vec<String> {
        self.comments
            .iter()
            .filter(|comment| {
                let body = comment.body.to_lowercase();
                NOTE_MARKERS.iter().any(|marker| body.contains(marker))
            })
            .map(|comment| comment.body.clone())
            .collect()
    }

    fn to_known(&self) -> KnownIssue {
        let mut body_preview: String = self.body.chars().take(PREVIEW_CHARS).collect();
        if self.body.chars().count() > PREVIEW_CHARS {
            body_preview.push_str("...");
        }
        KnownIssue {
            number: self.number,
            title: self.title.clone(),
            state: self.state.clone(),
            labels: self.labels.clone(),
            url: self.url.clone(),
            body_preview,
            engineer_notes: self.engineer_notes(),
            workaround: self.workaround.clone(),
        }
    }
}

/// In-memory bug tracker
#[derive(Debug, Clone, Default)]
pub struct IssueTracker {
    issues: Vec<TrackedIssue>,
}

impl IssueTracker {
    /// Load issues from a YAML list
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let issues = serde_yaml::from_str(yaml).map_err(|e| {
            Error::specialist(
                Role::IssueSearch.as_str(),
                format!("Failed to parse issue data: {}", e),
            )
        })?;
        Ok(Self { issues })
    }

    /// The bundled demo issues
    pub fn demo() -> Result<Self> {
        Self::from_yaml(DEMO_ISSUES)
    }

    /// Open issues in `repo` carrying every label, scored by how many
    /// keywords they mention. An issue must match at least two keywords (or
    /// every keyword, when fewer than two were given).
    pub fn search(&self, params: &SearchBugReportsParams) -> BugSearch {
        let mut seen = HashSet::new();
        let keywords: Vec<String> = params
            .keywords
            .split_whitespace()
            .map(str::to_lowercase)
            .filter(|k| seen.insert(k.clone()))
            .collect();
        let search_query = format!(
            "{} repo:{} is:open{}",
            keywords.join(" "),
            params.repo,
            params
                .labels
                .iter()
                .map(|label| format!(" label:{}", label))
                .collect::<String>()
        );

        if keywords.is_empty() {
            return BugSearch {
                matches: Vec::new(),
                search_query,
            };
        }
        let threshold = keywords.len().min(2);

        let mut scored: Vec<(usize, &TrackedIssue)> = self
            .issues
            .iter()
            .filter(|issue| issue.repo.eq_ignore_ascii_case(&params.repo))
            .filter(|issue| issue.state == "open")
            .filter(|issue| issue.has_labels(&params.labels))
            .map(|issue| {
                let words = issue.words();
                let hits = keywords.iter().filter(|k| words.contains(*k)).count();
                (hits, issue)
            })
            .filter(|(hits, _)| *hits >= threshold)
            .collect();
        scored.sort_by(|(a_hits, a), (b_hits, b)| b_hits.cmp(a_hits).then(a.number.cmp(&b.number)));

        BugSearch {
            matches: scored
                .into_iter()
                .take(params.limit)
                .map(|(_, issue)| issue.to_known())
                .collect(),
            search_query,
        }
    }
}

/// Serves `search_bug_reports`
pub struct IssueSearchSpecialist {
    tracker: IssueTracker,
}

impl IssueSearchSpecialist {
    /// Create the specialist over a tracker
    pub fn new(tracker: IssueTracker) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Specialist for IssueSearchSpecialist {
    fn role(&self) -> Role {
        Role::IssueSearch
    }

    async fn execute(&self, intent: Intent, request: &TaskRequest) -> TaskOutput {
        if intent != Intent::SearchBugReports {
            return Err(TaskError::new(
                codes::UNSUPPORTED_INTENT,
                format!("issue search does not support {}", intent),
            ));
        }
        let params: SearchBugReportsParams = params(request)?;
        if !params.repo.contains('/') {
            return Err(TaskError::new(
                codes::INVALID_PARAMS,
                format!("repo must be owner/name, got {:?}", params.repo),
            ));
        }
        serde_json::to_value(self.tracker.search(&params))
            .map_err(|e| TaskError::new(codes::EXECUTION_FAILED, e.to_string()))
    }
}
