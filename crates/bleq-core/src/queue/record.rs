//! Task record: scheduler-side bookkeeping around one task instance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::TaskState;
use crate::domain::{TaskContext, TaskId, TaskKind};
use crate::ports::{CancelToken, Task};

/// One task as the queue sees it.
///
/// The task object itself is opaque; everything the scheduler decides on
/// lives here. The same record moves between the pending list and the
/// current slot, it is never in both.
#[derive(Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task: Arc<dyn Task>,
    pub state: TaskState,

    /// Soft-cancel flag handed to the task when it is armed.
    pub soft_cancel: CancelToken,

    /// How many times this instance has been armed. Completions carry the
    /// arming they belong to, so a stale completion from before an
    /// interruption cannot end the resumed run.
    pub armings: u32,

    /// Scheduler clock when the record last entered the pending list.
    pub queued_at: Duration,
}

impl TaskRecord {
    pub fn new(id: TaskId, task: Arc<dyn Task>) -> Self {
        Self {
            id,
            task,
            state: TaskState::Created,
            soft_cancel: CancelToken::new(),
            armings: 0,
            queued_at: Duration::ZERO,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind()
    }

    pub fn context(&self) -> TaskContext {
        self.task.context()
    }

    /// Same kind and same owning context.
    pub fn matches(&self, kind: TaskKind, context: TaskContext) -> bool {
        self.kind() == kind && self.context() == context
    }

    pub fn mark_queued(&mut self, at: Duration) {
        self.state = TaskState::Queued;
        self.queued_at = at;
    }

    /// Begin a new arming; returns its number.
    pub fn start_arming(&mut self) -> u32 {
        self.state = TaskState::Armed;
        self.armings += 1;
        self.armings
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("context", &self.context())
            .field("priority", &self.task.priority())
            .field("state", &self.state)
            .field("armings", &self.armings)
            .finish()
    }
}
