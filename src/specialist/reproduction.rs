//! Reproduction specialist
//!
//! Walks the requested steps against a simulated page. Behaviours known to be
//! broken on the demo app are reproduced when a step mentions them; anything
//! else loads cleanly.

use super::{params, Specialist, TaskOutput};
use crate::payload::ReproductionReport;
use crate::protocol::{codes, Intent, ReproduceIssueParams, TaskError, TaskRequest};
use crate::types::Role;
use async_trait::async_trait;
use url::Url;

struct KnownBehaviour {
    triggers: &'static [&'static str],
    observations: &'static [&'static str],
    console_errors: &'static [&'static str],
    final_state: &'static str,
}

const BEHAVIOURS: &[KnownBehaviour] = &[
    KnownBehaviour {
        triggers: &["export", "csv"],
        observations: &[
            "Clicked 'Export to CSV' button",
            "Spinner appeared on the button",
            "Spinner continued indefinitely and the export never completed",
        ],
        console_errors: &[
            "TimeoutError: Export query exceeded 30s limit",
            "[ExportService] Export failed: query timeout on datasets with >500 rows",
        ],
        final_state: "Dashboard page with export button showing infinite spinner",
    },
    KnownBehaviour {
        triggers: &["timezone", "timestamps"],
        observations: &[
            "Hovered over a dashboard chart data point",
            "Tooltip timestamps were rendered in UTC instead of the account timezone",
        ],
        console_errors: &[],
        final_state: "Dashboard chart tooltip showing UTC timestamps",
    },
    KnownBehaviour {
        triggers: &["sso", "okta", "saml"],
        observations: &[
            "Clicked 'Sign in with SSO'",
            "Identity provider redirected back to the sign-in page",
        ],
        console_errors: &["Warning: relay state cookie missing, restarting SSO flow"],
        final_state: "Sign-in page after an SSO redirect loop",
    },
];

/// Serves `reproduce_issue` against the simulated demo app
#[derive(Debug, Default)]
pub struct ReproductionSpecialist;

impl ReproductionSpecialist {
    /// Create the specialist
    pub fn new() -> Self {
        Self
    }

    fn reproduce(&self, params: ReproduceIssueParams) -> TaskOutput {
        let url = Url::parse(&params.url)
            .map_err(|e| TaskError::new(codes::INVALID_PARAMS, format!("invalid url {:?}: {}", params.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TaskError::new(
                codes::INVALID_PARAMS,
                format!("unsupported url scheme: {}", url.scheme()),
            ));
        }
        if params.steps.is_empty() {
            return Err(TaskError::new(codes::INVALID_PARAMS, "at least one step is required"));
        }

        let steps = params.steps.join(" ").to_lowercase();
        let words: Vec<&str> = steps
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let behaviour = BEHAVIOURS
            .iter()
            .find(|behaviour| behaviour.triggers.iter().any(|t| words.contains(t)));

        let mut observations = vec![format!("Navigated to {} successfully", url)];
        let report = match behaviour {
            Some(behaviour) => {
                observations.extend(behaviour.observations.iter().map(|o| o.to_string()));
                ReproductionReport {
                    reproduced: true,
                    observations,
                    console_errors: if params.check_console {
                        behaviour.console_errors.iter().map(|e| e.to_string()).collect()
                    } else {
                        Vec::new()
                    },
                    screenshot_description: behaviour.final_state.to_string(),
                }
            }
            None => {
                observations.extend(params.steps.iter().map(|step| format!("Performed: {}", step)));
                observations.push("No anomalies observed".to_string());
                ReproductionReport {
                    reproduced: false,
                    observations,
                    console_errors: Vec::new(),
                    screenshot_description: "Page loaded normally".to_string(),
                }
            }
        };

        serde_json::to_value(report).map_err(|e| TaskError::new(codes::EXECUTION_FAILED, e.to_string()))
    }
}

#[async_trait]
impl Specialist for ReproductionSpecialist {
    fn role(&self) -> Role {
        Role::Reproduction
    }

    async fn execute(&self, intent: Intent, request: &TaskRequest) -> TaskOutput {
        match intent {
            Intent::ReproduceIssue => self.reproduce(params(request)?),
            other => Err(TaskError::new(
                codes::UNSUPPORTED_INTENT,
                format!("reproduction does not support {}", other),
            )),
        }
    }
}
