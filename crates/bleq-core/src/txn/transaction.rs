//! Transaction contract and the handle a running transaction reports through.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{EntityId, ReadWriteResult, TaskContext, TaskPriority, TxnId};

/// Which slot of the manager a transaction occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnRole {
    /// Runs right after connecting, before initialization.
    Auth,
    /// Post-connection setup; the device is initialized when it succeeds.
    Init,
    /// Firmware update.
    Ota,
    /// Ad-hoc work.
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Succeeded,
    Failed,
    Cancelled,
}

/// Application-supplied multi-step workflow.
///
/// `start` receives the handle; the transaction keeps it and calls
/// `succeed` / `fail` on it when done. Only the first call counts.
pub trait Transaction: Send + Sync {
    /// Hold the task queue for the whole run.
    fn needs_atomicity(&self) -> bool {
        false
    }

    fn start(&self, handle: TxnHandle);

    /// Elapsed time while running.
    fn update(&self, _elapsed: Duration, _handle: &TxnHandle) {}

    /// Told after a cancel ended the run.
    fn on_cancel(&self) {}
}

/// Receives the single end report of each transaction run.
pub(crate) trait TxnEndListener: Send + Sync {
    fn on_transaction_end(
        &self,
        id: TxnId,
        role: TxnRole,
        reason: EndReason,
        failure: Option<ReadWriteResult>,
    );
}

struct HandleInner {
    id: TxnId,
    role: TxnRole,
    entity: EntityId,
    atomic: bool,
    running: AtomicBool,
    ended: AtomicBool,
    listener: Weak<dyn TxnEndListener>,
}

/// Shared handle to one transaction run.
#[derive(Clone)]
pub struct TxnHandle {
    inner: Arc<HandleInner>,
}

impl TxnHandle {
    pub(crate) fn new(
        role: TxnRole,
        entity: EntityId,
        atomic: bool,
        listener: Weak<dyn TxnEndListener>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: TxnId::generate(),
                role,
                entity,
                atomic,
                running: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                listener,
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.inner.id
    }

    pub fn role(&self) -> TxnRole {
        self.inner.role
    }

    pub fn entity(&self) -> EntityId {
        self.inner.entity
    }

    /// Context for tasks this transaction submits.
    pub fn context(&self) -> TaskContext {
        TaskContext::Entity(self.inner.entity)
    }

    /// Priority for tasks this transaction submits. Atomic transactions get a
    /// cross-cutting priority so their work lands ahead of the queue lock.
    pub fn task_priority(&self) -> TaskPriority {
        if self.inner.atomic {
            TaskPriority::ForPriorityReadsWrites
        } else {
            TaskPriority::Medium
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn has_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }

    pub fn succeed(&self) -> bool {
        self.end(EndReason::Succeeded, None)
    }

    /// `failure` is the read/write that broke the run, if known.
    pub fn fail(&self, failure: Option<ReadWriteResult>) -> bool {
        self.end(EndReason::Failed, failure)
    }

    pub fn cancel(&self) -> bool {
        self.end(EndReason::Cancelled, None)
    }

    pub(crate) fn begin(&self) {
        self.inner.running.store(true, Ordering::Release);
    }

    /// Returns `false` if this run already ended.
    fn end(&self, reason: EndReason, failure: Option<ReadWriteResult>) -> bool {
        if self.inner.ended.swap(true, Ordering::AcqRel) {
            debug!(txn = %self.inner.id, ?reason, "transaction already ended");
            return false;
        }
        self.inner.running.store(false, Ordering::Release);
        debug!(txn = %self.inner.id, role = ?self.inner.role, ?reason, "transaction ended");
        if let Some(listener) = self.inner.listener.upgrade() {
            listener.on_transaction_end(self.inner.id, self.inner.role, reason, failure);
        }
        true
    }
}

impl fmt::Debug for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnHandle")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("running", &self.is_running())
            .finish()
    }
}

/// A transaction bound to its handle.
#[derive(Clone)]
pub(crate) struct TxnRunner {
    pub txn: Arc<dyn Transaction>,
    pub handle: TxnHandle,
}

impl TxnRunner {
    pub fn new(
        txn: Arc<dyn Transaction>,
        role: TxnRole,
        entity: EntityId,
        listener: Weak<dyn TxnEndListener>,
    ) -> Self {
        let atomic = txn.needs_atomicity();
        Self {
            txn,
            handle: TxnHandle::new(role, entity, atomic, listener),
        }
    }

    pub fn id(&self) -> TxnId {
        self.handle.id()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn cancel(&self) {
        if self.handle.cancel() {
            self.txn.on_cancel();
        }
    }
}
