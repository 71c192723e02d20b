//! Queue lock held for the duration of an atomic transaction.

use crate::domain::{EntityId, TaskContext, TaskKind, TaskPriority, TxnId};
use crate::ports::{ArmContext, Task};

/// Placeholder task that sits in the current slot while an atomic
/// transaction runs, so nothing else reaches the radio.
///
/// Tasks owned by the same transaction interrupt it; it is requeued right
/// behind them and takes the slot back when they finish. It never completes
/// on its own: the transaction manager releases it when the transaction ends.
#[derive(Debug, Clone, Copy)]
pub struct TxnLockTask {
    entity: EntityId,
    txn: TxnId,
}

impl TxnLockTask {
    pub fn new(entity: EntityId, txn: TxnId) -> Self {
        Self { entity, txn }
    }
}

impl Task for TxnLockTask {
    fn kind(&self) -> TaskKind {
        TaskKind::TxnLock
    }

    fn context(&self) -> TaskContext {
        TaskContext::Entity(self.entity)
    }

    fn priority(&self) -> TaskPriority {
        TaskPriority::Medium
    }

    fn transaction(&self) -> Option<TxnId> {
        Some(self.txn)
    }

    fn is_interruptable_by(&self, other: &dyn Task) -> bool {
        other.kind() != TaskKind::TxnLock && other.transaction() == Some(self.txn)
    }

    fn arm(&self, _ctx: ArmContext) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::impls::RecordingAssertions;
    use crate::queue::{TaskQueue, TaskState};
    use tokio::sync::mpsc;

    struct TxnRead {
        entity: EntityId,
        txn: Option<TxnId>,
    }

    impl Task for TxnRead {
        fn kind(&self) -> TaskKind {
            TaskKind::Read
        }
        fn context(&self) -> TaskContext {
            TaskContext::Entity(self.entity)
        }
        fn priority(&self) -> TaskPriority {
            TaskPriority::ForPriorityReadsWrites
        }
        fn transaction(&self) -> Option<TxnId> {
            self.txn
        }
        fn arm(&self, _ctx: ArmContext) {}
    }

    fn queue() -> TaskQueue {
        let (tx, _rx) = mpsc::unbounded_channel();
        TaskQueue::new(tx, Arc::new(RecordingAssertions::default()))
    }

    #[test]
    fn own_transaction_task_interrupts_lock() {
        let entity = EntityId::generate();
        let txn = TxnId::generate();
        let mut q = queue();
        q.submit(Arc::new(TxnLockTask::new(entity, txn)));
        q.tick(Duration::ZERO);

        q.submit(Arc::new(TxnRead {
            entity,
            txn: Some(txn),
        }));

        let ctx = TaskContext::Entity(entity);
        assert!(q.current().is_none());
        let kinds: Vec<_> = q.pending().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![TaskKind::Read, TaskKind::TxnLock]);

        q.tick(Duration::ZERO);
        q.end_current(TaskState::Succeeded);
        q.tick(Duration::ZERO);
        assert!(q.is_current(TaskKind::TxnLock, ctx));
    }

    #[test]
    fn foreign_task_waits_behind_lock() {
        let entity = EntityId::generate();
        let mut q = queue();
        q.submit(Arc::new(TxnLockTask::new(entity, TxnId::generate())));
        q.tick(Duration::ZERO);

        q.submit(Arc::new(TxnRead { entity, txn: None }));
        q.submit(Arc::new(TxnRead {
            entity,
            txn: Some(TxnId::generate()),
        }));

        assert!(q.is_current(TaskKind::TxnLock, TaskContext::Entity(entity)));
        assert_eq!(q.len(), 2);
    }
}
