//! Single-flight priority task queue.
//!
//! Owned by the update loop; every mutation happens on the loop. Outside code
//! talks to it through [`Command`](super::Command)s.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use super::placement::soonest_spot;
use super::{CommandSender, TaskCompleter, TaskRecord, TaskState};
use crate::domain::{TaskContext, TaskId, TaskKind, TaskPriority, TxnId};
use crate::ports::{check, AddedToQueue, ArmContext, AssertionReporter, Task};

/// A pending list plus at most one current task.
///
/// Invariants:
/// - a record lives in exactly one of `current` / `pending`, never both
/// - `pending` is kept in admission order (see [`soonest_spot`])
pub struct TaskQueue {
    pending: Vec<TaskRecord>,
    current: Option<TaskRecord>,
    time: Duration,
    update_count: u64,
    tx: CommandSender,
    assertions: Arc<dyn AssertionReporter>,
}

impl TaskQueue {
    pub fn new(tx: CommandSender, assertions: Arc<dyn AssertionReporter>) -> Self {
        Self {
            pending: Vec::new(),
            current: None,
            time: Duration::ZERO,
            update_count: 0,
            tx,
            assertions,
        }
    }

    // ========================================
    // Admission
    // ========================================

    /// Initializes and admits `task`; returns the id it was given.
    pub fn submit(&mut self, task: Arc<dyn Task>) -> TaskId {
        let id = TaskId::generate();
        self.submit_with_id(id, task);
        id
    }

    pub(crate) fn submit_with_id(&mut self, id: TaskId, task: Arc<dyn Task>) {
        task.init();
        self.admit(TaskRecord::new(id, task));
    }

    /// First match wins: cancel current, interrupt current, priority insert.
    fn admit(&mut self, record: TaskRecord) {
        let Some(current) = self.current.as_ref() else {
            let spot = soonest_spot(&self.pending, record.task.as_ref());
            self.add_at(spot, record);
            return;
        };

        if current.task.is_cancellable_by(record.task.as_ref()) {
            debug!(cancelled = %current.kind(), by = %record.kind(), "cancelling current task");
            self.end_current(TaskState::Cancelled);
            self.add_at(0, record);
        } else if current.task.is_interruptable_by(record.task.as_ref()) {
            debug!(interrupted = %current.kind(), by = %record.kind(), "interrupting current task");
            let saved = self.take_current(TaskState::Interrupted);
            self.add_at(0, record);
            if let Some(saved) = saved {
                self.add_at(1, saved);
            }
        } else {
            let spot = soonest_spot(&self.pending, record.task.as_ref());
            self.add_at(spot, record);
        }
    }

    fn add_at(&mut self, index: usize, mut record: TaskRecord) {
        let index = index.min(self.pending.len());
        record.mark_queued(self.time);
        let incoming = Arc::clone(&record.task);
        self.pending.insert(index, record);

        for (i, other) in self.pending.iter().enumerate() {
            if i != index && other.task.is_softly_cancellable_by(incoming.as_ref()) {
                other.soft_cancel.cancel();
            }
        }
        if let Some(current) = &self.current
            && current.task.is_softly_cancellable_by(incoming.as_ref())
        {
            current.soft_cancel.cancel();
        }

        incoming.on_added_to_queue(AddedToQueue {
            position: index,
            queue_len: self.pending.len(),
            at: self.time,
        });
        self.log_layout();
    }

    // ========================================
    // Ticking
    // ========================================

    /// Advances the clock, arms the head if idle, then updates the current task.
    pub fn tick(&mut self, elapsed: Duration) {
        self.time += elapsed;

        if self.current.is_none() {
            self.dequeue();
        }
        if let Some(current) = &self.current {
            current.task.update(elapsed);
        }

        self.update_count += 1;
    }

    fn dequeue(&mut self) {
        if !check(
            self.assertions.as_ref(),
            self.current.is_none(),
            "dequeue while a task is current",
        ) {
            return;
        }
        if self.pending.is_empty() {
            return;
        }

        let mut record = self.pending.remove(0);
        let arming = record.start_arming();
        let ctx = ArmContext {
            id: record.id,
            completer: TaskCompleter::new(record.id, arming, self.tx.clone()),
            soft_cancel: record.soft_cancel.clone(),
            armed_at: self.time,
        };
        let task = Arc::clone(&record.task);
        debug!(id = %record.id, kind = %record.kind(), context = %record.context(), "arming task");
        self.current = Some(record);
        task.arm(ctx);
        if let Some(current) = self.current.as_mut()
            && current.state == TaskState::Armed
        {
            current.state = TaskState::Executing;
        }
        self.log_layout();
    }

    // ========================================
    // Ending
    // ========================================

    /// Ends whatever is current with `state`.
    ///
    /// `Interrupted` puts the same instance back through admission, like
    /// [`interrupt`](Self::interrupt). Returns `false` if nothing is current
    /// or `state` is not an ending state.
    pub fn end_current(&mut self, state: TaskState) -> bool {
        if state == TaskState::Interrupted {
            return self.requeue_current();
        }
        self.take_current(state).is_some()
    }

    fn requeue_current(&mut self) -> bool {
        match self.take_current(TaskState::Interrupted) {
            Some(record) => {
                record.task.init();
                self.admit(record);
                true
            }
            None => false,
        }
    }

    fn take_current(&mut self, state: TaskState) -> Option<TaskRecord> {
        if !check(
            self.assertions.as_ref(),
            state.is_ending_state(),
            &format!("ending a task with non-ending state {state}"),
        ) {
            return None;
        }
        let mut record = self.current.take()?;
        record.state = state;
        debug!(id = %record.id, kind = %record.kind(), %state, "task ended");
        record.task.set_ending_state(state);
        self.log_layout();
        Some(record)
    }

    /// Ends the current task with `state` if it matches `kind` + `context`.
    pub fn end_current_if(&mut self, kind: TaskKind, context: TaskContext, state: TaskState) -> bool {
        if self.is_current(kind, context) {
            self.end_current(state)
        } else {
            false
        }
    }

    pub fn succeed(&mut self, kind: TaskKind, context: TaskContext) -> bool {
        self.end_current_if(kind, context, TaskState::Succeeded)
    }

    pub fn fail(&mut self, kind: TaskKind, context: TaskContext) -> bool {
        self.end_current_if(kind, context, TaskState::Failed)
    }

    /// Applies a completion reported by the task itself.
    ///
    /// Dropped unless that arming of that task is still current.
    pub fn end_task(&mut self, id: TaskId, arming: u32, state: TaskState) -> bool {
        let still_current = self
            .current
            .as_ref()
            .is_some_and(|c| c.id == id && c.armings == arming);
        if !still_current {
            trace!(%id, arming, %state, "stale task ending dropped");
            return false;
        }
        let ended = self.end_current(state);
        check(
            self.assertions.as_ref(),
            ended,
            &format!("task {id} could not end as {state}"),
        );
        ended
    }

    /// Makes a matching current task yield: ends it as `Interrupted` and
    /// resubmits the same instance.
    pub fn interrupt(&mut self, kind: TaskKind, context: TaskContext) -> bool {
        if !self.is_current(kind, context) {
            return false;
        }
        self.requeue_current()
    }

    /// Removes every matching pending task as `ClearedFromQueue`. The current
    /// task is left alone. Returns how many were removed.
    pub fn clear_queue_of(&mut self, kind: TaskKind, context: TaskContext) -> usize {
        self.clear_pending_where(kind, context, |_| true)
    }

    /// Succeeds the current task if it matches and works for `txn`.
    pub fn succeed_for_txn(&mut self, kind: TaskKind, context: TaskContext, txn: TxnId) -> bool {
        let owned = self
            .current
            .as_ref()
            .is_some_and(|c| c.matches(kind, context) && c.task.transaction() == Some(txn));
        owned && self.end_current(TaskState::Succeeded)
    }

    /// [`clear_queue_of`](Self::clear_queue_of), limited to tasks working for `txn`.
    pub fn clear_queue_of_txn(&mut self, kind: TaskKind, context: TaskContext, txn: TxnId) -> usize {
        self.clear_pending_where(kind, context, |task| task.transaction() == Some(txn))
    }

    fn clear_pending_where(
        &mut self,
        kind: TaskKind,
        context: TaskContext,
        wanted: impl Fn(&dyn Task) -> bool,
    ) -> usize {
        let mut cleared = 0;
        for i in (0..self.pending.len()).rev() {
            if self.pending[i].matches(kind, context) && wanted(self.pending[i].task.as_ref()) {
                let mut record = self.pending.remove(i);
                record.state = TaskState::ClearedFromQueue;
                record.task.set_ending_state(TaskState::ClearedFromQueue);
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(%kind, %context, cleared, "cleared from queue");
            self.log_layout();
        }
        cleared
    }

    // ========================================
    // Queries
    // ========================================

    pub fn is_current(&self, kind: TaskKind, context: TaskContext) -> bool {
        self.current.as_ref().is_some_and(|c| c.matches(kind, context))
    }

    pub fn is_queued(&self, kind: TaskKind, context: TaskContext) -> bool {
        self.pending.iter().any(|r| r.matches(kind, context))
    }

    pub fn is_current_or_queued(&self, kind: TaskKind, context: TaskContext) -> bool {
        self.is_current(kind, context) || self.is_queued(kind, context)
    }

    /// The current task if it matches, else the first matching pending one.
    pub fn get(&self, kind: TaskKind, context: TaskContext) -> Option<Arc<dyn Task>> {
        self.current
            .iter()
            .chain(self.pending.iter())
            .find(|r| r.matches(kind, context))
            .map(|r| Arc::clone(&r.task))
    }

    pub fn current(&self) -> Option<&TaskRecord> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> &[TaskRecord] {
        &self.pending
    }

    /// Number of pending tasks (the current one is not counted).
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    /// Internal clock: the sum of all elapsed times passed to `tick`.
    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.as_ref().map(TaskEntry::from),
            pending: self.pending.iter().map(TaskEntry::from).collect(),
            time: self.time,
            update_count: self.update_count,
        }
    }

    fn log_layout(&self) {
        debug!(layout = %self.snapshot(), "task queue");
    }
}

/// Point-in-time view of the queue for logs and callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub current: Option<TaskEntry>,
    pub pending: Vec<TaskEntry>,
    pub time: Duration,
    pub update_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEntry {
    pub id: TaskId,
    pub kind: TaskKind,
    pub context: TaskContext,
    pub priority: TaskPriority,
    pub state: TaskState,
}

impl From<&TaskRecord> for TaskEntry {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind(),
            context: record.context(),
            priority: record.task.priority(),
            state: record.state,
        }
    }
}

impl fmt::Display for QueueSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.current {
            Some(c) => write!(f, "{}({}) ", c.kind, c.context)?,
            None => f.write_str("no current task ")?,
        }
        if self.pending.is_empty() {
            return f.write_str("[queue empty]");
        }
        let names: Vec<String> = self
            .pending
            .iter()
            .map(|e| format!("{}({})", e.kind, e.context))
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}
