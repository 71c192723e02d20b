//! Task kinds, priorities, and owning contexts.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{EntityId, ManagerId};

/// Closed set of task kinds known to the scheduler.
///
/// Matching a task is always "same kind + same context", never a type check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    TurnOn,
    TurnOff,
    Scan,
    Connect,
    Disconnect,
    DiscoverServices,
    Bond,
    Unbond,
    Read,
    Write,
    ReadRssi,
    EnableNotify,
    DisableNotify,
    ServerDisconnect,
    /// Placeholder holding the queue for an atomic transaction.
    TxnLock,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Task priority, lowest first. The derived `Ord` is the total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Trivial,
    Low,
    Medium,
    High,
    ForExplicitBondingAndConnecting,
    ForPriorityReadsWrites,
    Critical,
}

impl TaskPriority {
    /// Priorities allowed to overtake pending work of unrelated contexts.
    pub fn is_cross_cutting(self) -> bool {
        self >= TaskPriority::ForExplicitBondingAndConnecting
    }
}

/// Who a task belongs to: the manager as a whole, or one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum TaskContext {
    Manager(ManagerId),
    Entity(EntityId),
}

impl TaskContext {
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            TaskContext::Entity(id) => Some(*id),
            TaskContext::Manager(_) => None,
        }
    }
}

impl fmt::Display for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskContext::Manager(id) => id.fmt(f),
            TaskContext::Entity(id) => id.fmt(f),
        }
    }
}

impl From<EntityId> for TaskContext {
    fn from(id: EntityId) -> Self {
        TaskContext::Entity(id)
    }
}

impl From<ManagerId> for TaskContext {
    fn from(id: ManagerId) -> Self {
        TaskContext::Manager(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn priorities_are_totally_ordered() {
        assert!(TaskPriority::Trivial < TaskPriority::Low);
        assert!(TaskPriority::High < TaskPriority::ForExplicitBondingAndConnecting);
        assert!(TaskPriority::ForPriorityReadsWrites < TaskPriority::Critical);
    }

    #[rstest]
    #[case::trivial(TaskPriority::Trivial, false)]
    #[case::high(TaskPriority::High, false)]
    #[case::connecting(TaskPriority::ForExplicitBondingAndConnecting, true)]
    #[case::critical(TaskPriority::Critical, true)]
    fn cross_cutting_threshold(#[case] priority: TaskPriority, #[case] expected: bool) {
        assert_eq!(priority.is_cross_cutting(), expected);
    }

    #[test]
    fn contexts_compare_by_identity() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert_eq!(TaskContext::from(a), TaskContext::Entity(a));
        assert_ne!(TaskContext::from(a), TaskContext::from(b));
        assert_eq!(TaskContext::from(a).entity(), Some(a));
        assert_eq!(TaskContext::from(ManagerId::generate()).entity(), None);
    }
}
