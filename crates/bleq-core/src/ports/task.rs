//! Task port - the contract hardware-operation modules implement.
//!
//! The scheduler never looks inside a task. It only asks how the task relates
//! to other tasks (cancel / interrupt / soft-cancel / importance), arms it when
//! it becomes current, feeds it elapsed time, and tells it how it ended.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::domain::{TaskContext, TaskId, TaskKind, TaskPriority, TxnId};
use crate::queue::{TaskCompleter, TaskState};

/// One unit of asynchronous radio work.
///
/// Implementations are shared (`Arc<dyn Task>`) between the queue and whoever
/// created them, so every method takes `&self`; keep mutable bits behind
/// atomics or a mutex.
pub trait Task: Send + Sync {
    fn kind(&self) -> TaskKind;

    fn context(&self) -> TaskContext;

    fn priority(&self) -> TaskPriority;

    /// The transaction this task works for, if any.
    fn transaction(&self) -> Option<TxnId> {
        None
    }

    /// `true` if `other` arriving should end this (current) task as `Cancelled`.
    fn is_cancellable_by(&self, _other: &dyn Task) -> bool {
        false
    }

    /// `true` if `other` arriving should interrupt this (current) task and
    /// requeue it right behind `other`.
    fn is_interruptable_by(&self, _other: &dyn Task) -> bool {
        false
    }

    /// `true` if `other` arriving should flag this task to wrap up early.
    fn is_softly_cancellable_by(&self, _other: &dyn Task) -> bool {
        false
    }

    /// May this task be placed ahead of the pending `other`?
    ///
    /// Strictly higher priority is required. Ordinary priorities only overtake
    /// work of the same context; cross-cutting priorities overtake anything.
    fn is_more_important_than(&self, other: &dyn Task) -> bool {
        self.priority() > other.priority()
            && (self.context() == other.context() || self.priority().is_cross_cutting())
    }

    /// Called on submit before admission, including the resubmit that
    /// follows an explicit `interrupt`.
    fn init(&self) {}

    fn on_added_to_queue(&self, _added: AddedToQueue) {}

    /// The task became current and may start its work.
    fn arm(&self, ctx: ArmContext);

    /// Elapsed-time delivery while the task is current.
    fn update(&self, _elapsed: Duration) {}

    /// Final word from the scheduler. `Interrupted` is followed by a requeue.
    fn set_ending_state(&self, _state: TaskState) {}
}

/// Where a task landed when inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedToQueue {
    pub position: usize,
    pub queue_len: usize,
    /// Scheduler clock at insertion.
    pub at: Duration,
}

/// Everything a task receives when it becomes current.
#[derive(Clone)]
pub struct ArmContext {
    pub id: TaskId,
    pub completer: TaskCompleter,
    pub soft_cancel: CancelToken,
    /// Scheduler clock at arming.
    pub armed_at: Duration,
}

/// Cooperative cancellation flag. Set by the scheduler, polled by the task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Tracks run time of a task against the timeout its filter asked for.
#[derive(Debug, Clone, Default)]
pub struct TaskTimer {
    elapsed: Duration,
    timeout: Option<Duration>,
}

impl TaskTimer {
    /// `None` means the task never times out.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            elapsed: Duration::ZERO,
            timeout,
        }
    }

    /// Adds `elapsed`; returns `true` once the timeout is exceeded.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        self.elapsed += elapsed;
        self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.timeout.is_some_and(|t| self.elapsed > t)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
