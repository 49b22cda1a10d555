//! Hub configuration
//!
//! The topology (which room each specialist listens in, under which handle)
//! and the demo catalogues are read from a YAML file, then selectively
//! overridden from the environment so a deployment can point the same file
//! at freshly provisioned rooms.

use crate::error::{Error, Result};
use crate::types::{Role, RoomId};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Environment variables that override room assignments and the timeout
pub mod env {
    /// Customer-facing room
    pub const USER_ROOM: &str = "SUPPORT_USER_ROOM_ID";
    /// Customer-data specialist room
    pub const CUSTOMER_DATA_ROOM: &str = "SUPPORT_CUSTOMER_DATA_ROOM_ID";
    /// Issue-search specialist room
    pub const ISSUE_SEARCH_ROOM: &str = "SUPPORT_ISSUE_SEARCH_ROOM_ID";
    /// Reproduction specialist room
    pub const REPRODUCTION_ROOM: &str = "SUPPORT_REPRODUCTION_ROOM_ID";
    /// Ticketing specialist room
    pub const TICKETING_ROOM: &str = "SUPPORT_TICKETING_ROOM_ID";
    /// Per-conversation deadline in milliseconds
    pub const INVESTIGATION_TIMEOUT_MS: &str = "SUPPORT_INVESTIGATION_TIMEOUT_MS";
}

/// Static registration of one specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistRegistration {
    /// Dedicated room shared by the orchestrator and this specialist
    pub room: RoomId,
    /// Participant handle used for mentions
    pub handle: String,
    /// Upper bound on one execution
    #[serde(default = "default_response_budget_ms")]
    pub response_budget_ms: u64,
    /// Artificial delay before executing, to mimic real work
    #[serde(default)]
    pub simulated_delay_ms: u64,
}

impl SpecialistRegistration {
    /// Create a registration with the default budget and no delay
    pub fn new(room: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            room: RoomId::new(room),
            handle: handle.into(),
            response_budget_ms: default_response_budget_ms(),
            simulated_delay_ms: 0,
        }
    }

    /// Set the simulated delay
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.simulated_delay_ms = delay_ms;
        self
    }

    /// Set the response budget
    pub fn with_budget_ms(mut self, budget_ms: u64) -> Self {
        self.response_budget_ms = budget_ms;
        self
    }

    /// Response budget as a duration
    pub fn response_budget(&self) -> Duration {
        Duration::from_millis(self.response_budget_ms)
    }

    /// Simulated delay as a duration
    pub fn simulated_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_delay_ms)
    }
}

/// A pricing tier and the capabilities it includes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Plan name (Free, Pro, Enterprise)
    pub name: String,
    /// Capability names included in the plan
    pub features: Vec<String>,
}

impl PlanConfig {
    /// Whether the plan includes `capability` (case-insensitive)
    pub fn includes(&self, capability: &str) -> bool {
        self.features
            .iter()
            .any(|feature| feature.eq_ignore_ascii_case(capability))
    }

    /// First plan of a cheapest-first catalogue that includes `capability`
    pub fn cheapest_including<'a>(plans: &'a [PlanConfig], capability: &str) -> Option<&'a PlanConfig> {
        plans.iter().find(|plan| plan.includes(capability))
    }
}

/// A product capability customers may report problems with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Canonical capability name as it appears in plan feature lists
    pub name: String,
    /// Lowercase words that identify the capability in free text
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Top-level hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Orchestrator participant handle
    #[serde(default = "default_orchestrator")]
    pub orchestrator: String,
    /// Customer-facing room
    pub customer_room: RoomId,
    /// Deadline for the initial fan-out
    #[serde(default = "default_timeout_ms")]
    pub investigation_timeout_ms: u64,
    /// Deadline for the ticket escalation
    #[serde(default = "default_timeout_ms")]
    pub escalation_timeout_ms: u64,
    /// Send a short acknowledgment before investigating
    #[serde(default = "default_true")]
    pub acknowledge_customer: bool,
    /// Repository searched for known issues
    #[serde(default = "default_issue_repo")]
    pub issue_repo: String,
    /// Labels a known issue must carry
    #[serde(default = "default_issue_labels")]
    pub issue_labels: Vec<String>,
    /// Page the reproduction specialist loads
    #[serde(default = "default_reproduction_url")]
    pub reproduction_url: String,
    /// Steps the reproduction specialist walks; empty derives them from the report
    #[serde(default)]
    pub reproduction_steps: Vec<String>,
    /// Priority of escalated tickets
    #[serde(default = "default_ticket_priority")]
    pub ticket_priority: u8,
    /// Labels of escalated tickets
    #[serde(default = "default_ticket_labels")]
    pub ticket_labels: Vec<String>,
    /// Specialist registrations keyed by role
    pub specialists: BTreeMap<Role, SpecialistRegistration>,
    /// Pricing tiers, cheapest first
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
    /// Recognised capabilities
    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,
}

fn default_orchestrator() -> String {
    "SupportOrchestrator".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_response_budget_ms() -> u64 {
    20_000
}
fn default_true() -> bool {
    true
}
fn default_issue_repo() -> String {
    "acme/demo-product".to_string()
}
fn default_issue_labels() -> Vec<String> {
    vec!["bug".to_string()]
}
fn default_reproduction_url() -> String {
    "http://localhost:8888/mock_app.html".to_string()
}
fn default_ticket_priority() -> u8 {
    2
}
fn default_ticket_labels() -> Vec<String> {
    vec!["bug".to_string(), "customer-reported".to_string()]
}

impl Default for HubConfig {
    fn default() -> Self {
        let specialists = BTreeMap::from([
            (
                Role::CustomerData,
                SpecialistRegistration::new("room-customer-data", "CustomerDataAgent").with_delay_ms(1_500),
            ),
            (
                Role::IssueSearch,
                SpecialistRegistration::new("room-issue-search", "IssueSearchAgent").with_delay_ms(2_500),
            ),
            (
                Role::Reproduction,
                SpecialistRegistration::new("room-reproduction", "ReproductionAgent").with_delay_ms(6_000),
            ),
            (
                Role::Ticketing,
                SpecialistRegistration::new("room-ticketing", "TicketingAgent").with_delay_ms(3_000),
            ),
        ]);

        let plan = |name: &str, features: &[&str]| PlanConfig {
            name: name.to_string(),
            features: features.iter().map(|f| f.to_string()).collect(),
        };
        let capability = |name: &str, aliases: &[&str]| CapabilityConfig {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        };

        Self {
            orchestrator: default_orchestrator(),
            customer_room: RoomId::new("room-user-support"),
            investigation_timeout_ms: default_timeout_ms(),
            escalation_timeout_ms: default_timeout_ms(),
            acknowledge_customer: true,
            issue_repo: default_issue_repo(),
            issue_labels: default_issue_labels(),
            reproduction_url: default_reproduction_url(),
            reproduction_steps: Vec::new(),
            ticket_priority: default_ticket_priority(),
            ticket_labels: default_ticket_labels(),
            specialists,
            plans: vec![
                plan("Free", &["Dashboard"]),
                plan("Pro", &["Dashboard", "CSV Export", "API Access"]),
                plan(
                    "Enterprise",
                    &["Dashboard", "CSV Export", "API Access", "SSO", "Audit Log"],
                ),
            ],
            capabilities: vec![
                capability("CSV Export", &["csv", "export", "exports", "exporting"]),
                capability("API Access", &["api", "token", "webhook"]),
                capability("SSO", &["sso", "saml", "okta"]),
                capability("Audit Log", &["audit"]),
                capability("Dashboard", &["dashboard", "chart", "charts", "widget"]),
            ],
        }
    }
}

impl HubConfig {
    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Full load: `.env`, file (or demo defaults), environment overrides, validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env if present so local runs pick up provisioned room IDs
        let _ = dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in [`HubConfig::load`])
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(room) = get(env::USER_ROOM) {
            self.customer_room = RoomId::new(room);
        }

        for (role, key) in [
            (Role::CustomerData, env::CUSTOMER_DATA_ROOM),
            (Role::IssueSearch, env::ISSUE_SEARCH_ROOM),
            (Role::Reproduction, env::REPRODUCTION_ROOM),
            (Role::Ticketing, env::TICKETING_ROOM),
        ] {
            if let Some(room) = get(key) {
                match self.specialists.get_mut(&role) {
                    Some(registration) => registration.room = RoomId::new(room),
                    None => {
                        return Err(Error::config(format!(
                            "{} is set but no {} specialist is registered",
                            key, role
                        )))
                    }
                }
            }
        }

        if let Some(raw) = get(env::INVESTIGATION_TIMEOUT_MS) {
            self.investigation_timeout_ms = raw.trim().parse().map_err(|_| {
                Error::config(format!("{} must be milliseconds, got {:?}", env::INVESTIGATION_TIMEOUT_MS, raw))
            })?;
        }

        Ok(())
    }

    /// Check the topology is usable
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.trim().is_empty() {
            return Err(Error::config("orchestrator handle must not be empty"));
        }
        if self.investigation_timeout_ms == 0 {
            return Err(Error::config("investigation_timeout_ms must be greater than zero"));
        }
        if self.escalation_timeout_ms == 0 {
            return Err(Error::config("escalation_timeout_ms must be greater than zero"));
        }

        let missing: Vec<&str> = Role::ALL
            .iter()
            .filter(|role| !self.specialists.contains_key(role))
            .map(|role| role.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "Missing specialist registration: {}",
                missing.join(", ")
            )));
        }

        let mut rooms = HashSet::new();
        rooms.insert(&self.customer_room);
        for (role, registration) in &self.specialists {
            if !rooms.insert(&registration.room) {
                return Err(Error::config(format!(
                    "{} room {} is already used by another participant",
                    role, registration.room
                )));
            }
            if registration.handle.trim().is_empty() {
                return Err(Error::config(format!("{} handle must not be empty", role)));
            }
        }

        Ok(())
    }

    /// Registration for a role
    pub fn registration(&self, role: Role) -> Result<&SpecialistRegistration> {
        self.specialists
            .get(&role)
            .ok_or_else(|| Error::config(format!("no specialist registered for {}", role)))
    }

    /// The role that owns a room, if any
    pub fn role_for_room(&self, room: &RoomId) -> Option<Role> {
        self.specialists
            .iter()
            .find(|(_, registration)| &registration.room == room)
            .map(|(role, _)| *role)
    }

    /// Initial fan-out deadline
    pub fn investigation_timeout(&self) -> Duration {
        Duration::from_millis(self.investigation_timeout_ms)
    }

    /// Escalation deadline
    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_millis(self.escalation_timeout_ms)
    }

    /// Drop every simulated delay (tests and `--no-delay` demo runs)
    pub fn without_delays(mut self) -> Self {
        for registration in self.specialists.values_mut() {
            registration.simulated_delay_ms = 0;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const YAML: &str = r#"
orchestrator: "SupportOrchestrator"
customer_room: "room-user"
investigation_timeout_ms: 15000
specialists:
  customer_data:
    room: "room-excel"
    handle: "ExcelAgent"
    simulated_delay_ms: 1000
  issue_search:
    room: "room-github"
    handle: "GitHubSupportAgent"
  reproduction:
    room: "room-browser"
    handle: "BrowserAgent"
    response_budget_ms: 60000
  ticketing:
    room: "room-linear"
    handle: "LinearAgent"
plans:
  - name: "Free"
    features: ["Dashboard"]
  - name: "Pro"
    features: ["Dashboard", "CSV Export"]
"#;

    #[test]
    fn test_parse_yaml_config() {
        let config = HubConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.customer_room, RoomId::new("room-user"));
        assert_eq!(config.investigation_timeout(), Duration::from_secs(15));
        assert_eq!(config.escalation_timeout_ms, 30_000);
        assert!(config.acknowledge_customer);

        let browser = config.registration(Role::Reproduction).unwrap();
        assert_eq!(browser.handle, "BrowserAgent");
        assert_eq!(browser.response_budget_ms, 60_000);
        assert_eq!(config.registration(Role::CustomerData).unwrap().simulated_delay_ms, 1_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let config = HubConfig::from_file(file.path()).unwrap();
        assert_eq!(config.role_for_room(&RoomId::new("room-linear")), Some(Role::Ticketing));
        assert_eq!(config.role_for_room(&RoomId::new("room-user")), None);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = HubConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HubConfig::default();
        let vars: HashMap<&str, &str> = HashMap::from([
            (env::USER_ROOM, "room-user-001"),
            (env::CUSTOMER_DATA_ROOM, "room-excel-002"),
            (env::REPRODUCTION_ROOM, "   "),
            (env::INVESTIGATION_TIMEOUT_MS, "15000"),
        ]);
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.customer_room, RoomId::new("room-user-001"));
        assert_eq!(
            config.registration(Role::CustomerData).unwrap().room,
            RoomId::new("room-excel-002")
        );
        // blank values are ignored
        assert_eq!(
            config.registration(Role::Reproduction).unwrap().room,
            RoomId::new("room-reproduction")
        );
        assert_eq!(config.investigation_timeout_ms, 15_000);
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = HubConfig::default();
        let err = config
            .apply_overrides(|key| (key == env::INVESTIGATION_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_missing_role() {
        let mut config = HubConfig::default();
        config.specialists.remove(&Role::Ticketing);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ticketing"));
    }

    #[test]
    fn test_validate_rejects_shared_rooms() {
        let mut config = HubConfig::default();
        let user_room = config.customer_room.clone();
        config.specialists.get_mut(&Role::IssueSearch).unwrap().room = user_room;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = HubConfig {
            investigation_timeout_ms: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/support_hub.yaml");
        let config = HubConfig::from_file(path).unwrap();
        assert_eq!(config, HubConfig::default());
    }

    #[test]
    fn test_cheapest_plan_including() {
        let plans = HubConfig::default().plans;
        assert_eq!(PlanConfig::cheapest_including(&plans, "csv export").unwrap().name, "Pro");
        assert_eq!(PlanConfig::cheapest_including(&plans, "SSO").unwrap().name, "Enterprise");
        assert!(PlanConfig::cheapest_including(&plans, "Teleportation").is_none());
    }
}
