//! Conversation table
//!
//! Concurrent map of open investigations plus a task-id index so results can
//! be routed without knowing which conversation they belong to. Entry guards
//! are never held across an await point.

use crate::error::{Error, Result};
use crate::orchestrator::branch::BranchOutcome;
use crate::orchestrator::conversation::{DispatchedTask, Investigation, Recorded, Resolution};
use crate::protocol::TaskResult;
use crate::types::{ConversationId, TaskId};
use dashmap::DashMap;

/// Open investigations, keyed by conversation and by task id
#[derive(Debug, Default)]
pub struct ConversationTable {
    conversations: DashMap<ConversationId, Investigation>,
    tasks: DashMap<TaskId, ConversationId>,
}

impl ConversationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a task id is already in use by an open conversation
    pub fn is_task_known(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// Register an investigation and index its task ids.
    ///
    /// Fails without side effects if any task id collides with an open one.
    pub fn open(&self, investigation: Investigation) -> Result<()> {
        let id = investigation.id();
        let task_ids: Vec<TaskId> = investigation.task_ids().cloned().collect();

        for (n, task_id) in task_ids.iter().enumerate() {
            let claimed = match self.tasks.entry(task_id.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => false,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(id);
                    true
                }
            };
            if !claimed {
                for indexed in &task_ids[..n] {
                    self.tasks.remove(indexed);
                }
                return Err(Error::protocol(format!("task id {} is already in use", task_id)));
            }
        }

        self.conversations.insert(id, investigation);
        Ok(())
    }

    /// Route a result to its conversation
    pub fn record(&self, result: TaskResult) -> Recorded {
        let Some(id) = self.tasks.get(&result.task_id).map(|entry| *entry.value()) else {
            return Recorded::Orphan;
        };
        match self.conversations.get_mut(&id) {
            Some(mut investigation) => investigation.record(result),
            None => Recorded::Orphan,
        }
    }

    /// Apply the conversation deadline
    pub fn expire(&self, id: ConversationId) -> Option<Resolution> {
        self.conversations.get_mut(&id)?.expire()
    }

    /// Index the escalation task before its request is sent
    pub fn begin_escalation(
        &self,
        id: ConversationId,
        task: DispatchedTask,
        outcome: BranchOutcome,
    ) -> Result<()> {
        let mut investigation = self
            .conversations
            .get_mut(&id)
            .ok_or_else(|| Error::other(format!("conversation {} is not open", id)))?;

        match self.tasks.entry(task.task_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::protocol(format!("task id {} is already in use", task.task_id)))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        investigation.begin_escalation(task, outcome);
        Ok(())
    }

    /// Apply the escalation deadline
    pub fn expire_escalation(
        &self,
        id: ConversationId,
        task_id: &TaskId,
    ) -> Option<(Resolution, TaskResult)> {
        self.conversations.get_mut(&id)?.expire_escalation(task_id)
    }

    /// Remove a conversation and forget its task ids; results for them are
    /// orphans from now on.
    pub fn close(&self, id: ConversationId) -> Option<Investigation> {
        let (_, investigation) = self.conversations.remove(&id)?;
        for task_id in investigation.task_ids() {
            self.tasks.remove(task_id);
        }
        Some(investigation)
    }

    /// Run `f` against an open conversation
    pub fn inspect<R>(&self, id: ConversationId, f: impl FnOnce(&Investigation) -> R) -> Option<R> {
        self.conversations.get(&id).map(|investigation| f(&investigation))
    }

    /// Number of open conversations
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether no conversation is open
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Intent;
    use crate::types::{Role, RoomId};
    use crate::understanding::Extraction;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn open(table: &ConversationTable, ids: &[&str]) -> Result<ConversationId> {
        let roles = [Role::CustomerData, Role::IssueSearch, Role::Reproduction];
        let tasks = ids
            .iter()
            .zip(roles)
            .map(|(id, role)| DispatchedTask::new(role, TaskId::new(*id), Intent::LookupCustomer))
            .collect();
        let id = ConversationId::new();
        let (investigation, _) =
            Investigation::new(id, RoomId::new("room-user"), "help", Extraction::default(), tasks);
        table.open(investigation)?;
        Ok(id)
    }

    fn ok(task_id: &str) -> TaskResult {
        let now = Utc::now();
        TaskResult::success(TaskId::new(task_id), json!({}), now, now)
    }

    #[test]
    fn test_routes_by_task_id() {
        let table = ConversationTable::new();
        open(&table, &["a1", "a2"]).unwrap();
        open(&table, &["b1", "b2"]).unwrap();

        assert!(matches!(table.record(ok("b1")), Recorded::Pending { outstanding: 1, .. }));
        assert!(matches!(table.record(ok("a2")), Recorded::Pending { outstanding: 1, .. }));
        assert!(matches!(table.record(ok("b2")), Recorded::Resolved(_)));
        assert!(matches!(table.record(ok("zzz")), Recorded::Orphan));
    }

    #[test]
    fn test_collision_is_rejected_cleanly() {
        let table = ConversationTable::new();
        open(&table, &["t1", "t2"]).unwrap();
        assert!(open(&table, &["t3", "t2"]).is_err());
        assert!(!table.is_task_known(&TaskId::new("t3")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_closed_conversation_results_are_orphans() {
        let table = ConversationTable::new();
        let id = open(&table, &["t1", "t2"]).unwrap();
        assert!(table.close(id).is_some());
        assert!(matches!(table.record(ok("t1")), Recorded::Orphan));
        assert!(table.is_empty());
        assert!(table.close(id).is_none());
    }

    #[test]
    fn test_concurrent_duplicates_resolve_once() {
        let table = Arc::new(ConversationTable::new());
        open(&table, &["t1", "t2", "t3"]).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                std::thread::spawn(move || {
                    let id = ["t1", "t2", "t3"][i % 3];
                    matches!(table.record(ok(id)), Recorded::Resolved(_))
                })
            })
            .collect();

        let resolved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|resolved| *resolved)
            .count();
        assert_eq!(resolved, 1);
    }

    #[test]
    fn test_expire_races_with_completion() {
        let table = ConversationTable::new();
        let id = open(&table, &["t1", "t2"]).unwrap();
        table.record(ok("t1"));
        assert!(table.expire(id).is_some());
        assert!(matches!(table.record(ok("t2")), Recorded::Late { .. }));
        assert!(table.expire(id).is_none());
    }
}
