//! # Support Hub
//!
//! Hub-and-spoke customer support orchestration over chat rooms.
//!
//! A single orchestrator listens in the customer-facing room, fans each report
//! out to specialist rooms as `orchestrator/v1` task requests, correlates the
//! results by task id, and picks exactly one branch for the reply.
//!
//! ## Features
//!
//! - **Concurrent fan-out**: customer data, known-issue search and reproduction run in parallel
//! - **Deterministic correlation**: first result per role wins; duplicates, late and orphan results are counted and dropped
//! - **Bounded waits**: every conversation ends by its deadline, with missing roles recorded as `TIMEOUT`
//! - **Branch resolution**: not-entitled, lookup-failed, known-issue and new-issue, in that priority order
//! - **Escalation**: new issues are filed through the ticketing specialist before the customer hears back
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use support_hub::prelude::*;
//! use support_hub::specialist::demo_roster;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HubConfig::load(None)?;
//!     let rooms = Arc::new(InMemoryRooms::from_config(&config, "customer"));
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!
//!     for worker in demo_roster(&config)? {
//!         worker.start(rooms.clone(), shutdown.clone()).await?;
//!     }
//!     let dispatcher = Dispatcher::new(config.clone(), rooms.clone());
//!     dispatcher.start(shutdown).await?;
//!
//!     let roles: BTreeSet<Role> = Role::INVESTIGATION.into_iter().collect();
//!     let mut handle = dispatcher
//!         .dispatch(&config.customer_room, "CSV export spins forever. sarah@acme.com", &roles)
//!         .await?;
//!     if let Some(report) = handle.wait().await {
//!         println!("{}", report.reply);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod payload;
pub mod protocol;
pub mod reply;
pub mod room;
pub mod specialist;
pub mod tracing_ext;
pub mod types;
pub mod understanding;

// Re-exports for convenience
pub use config::{CapabilityConfig, HubConfig, PlanConfig, SpecialistRegistration};
pub use error::{Error, Result};
pub use orchestrator::{
    BranchOutcome, BranchResolver, ConversationHandle, Dispatcher, Escalation,
    InvestigationReport, OutcomeKind,
};
pub use protocol::{Envelope, Intent, TaskError, TaskOutcome, TaskRequest, TaskResult, PROTOCOL};
pub use reply::{ReplyComposer, ReplyContext, TemplateComposer};
pub use room::{InMemoryRooms, OutboundMessage, RoomMessage, RoomTransport};
pub use specialist::{Specialist, SpecialistWorker, WorkerState};
pub use tracing_ext::{init_tracing, DispatchStats, LogFormat, StatsSnapshot};
pub use types::{ConversationId, Role, RoomId, TaskId};
pub use understanding::{Extraction, HeuristicUnderstanding, TextUnderstanding};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::HubConfig;
    pub use crate::error::{Error, Result};
    pub use crate::orchestrator::{BranchOutcome, Dispatcher, InvestigationReport};
    pub use crate::protocol::{Intent, TaskRequest, TaskResult};
    pub use crate::room::{InMemoryRooms, RoomTransport};
    pub use crate::specialist::{Specialist, SpecialistWorker};
    pub use crate::types::*;
}
