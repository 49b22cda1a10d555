//! Orchestrator module - hub-side coordination of the specialist rooms
//!
//! # Flow
//!
//! - **Dispatch**: a customer message fans out to the investigation roles,
//!   one task per role, all sent concurrently.
//! - **Correlate**: results are matched to their conversation by task id;
//!   the first result per role wins.
//! - **Resolve**: once every role has answered (or the deadline passed) the
//!   branch resolver picks exactly one outcome.
//! - **Escalate**: new issues are filed through the ticketing role before
//!   the customer gets a reply.
//!
//! # Example
//!
//! ```rust,ignore
//! use support_hub::orchestrator::Dispatcher;
//!
//! let dispatcher = Dispatcher::new(config, rooms.clone());
//! let mut handle = dispatcher.dispatch(&room, text, &roles).await?;
//! let report = handle.wait().await;
//! ```

pub mod branch;
pub mod conversation;
pub mod dispatcher;
pub mod table;

// Re-exports
pub use branch::{BranchOutcome, BranchResolver, Escalation, OutcomeKind};
pub use conversation::{DispatchedTask, Investigation, InvestigationReport, Recorded, Resolution};
pub use dispatcher::{ConversationHandle, Dispatcher};
pub use table::ConversationTable;
