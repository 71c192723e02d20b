//! Task lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one task inside the scheduler.
///
/// State transitions:
/// - Created -> Queued -> Armed -> Executing -> (ending state)
/// - Queued -> ClearedFromQueue
/// - Executing -> Interrupted -> Queued (same instance, requeued)
///
/// Every ending state is final for that arming. `Interrupted` is the only
/// one after which the same task instance goes back into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built, not yet admitted.
    Created,

    /// Waiting in the pending list.
    Queued,

    /// Dequeued into the current slot, `arm` is running.
    Armed,

    /// Current and doing its work.
    Executing,

    Succeeded,

    Failed,

    /// Pre-empted permanently by a newer task.
    Cancelled,

    /// Pre-empted and requeued to resume later.
    Interrupted,

    TimedOut,

    /// Removed while still pending.
    ClearedFromQueue,

    /// Nothing to do; counts as success for callers.
    Redundant,
}

impl TaskState {
    /// Is this an ending state (the task leaves the current slot or queue)?
    pub fn is_ending_state(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded
                | TaskState::Failed
                | TaskState::Cancelled
                | TaskState::Interrupted
                | TaskState::TimedOut
                | TaskState::ClearedFromQueue
                | TaskState::Redundant
        )
    }

    /// Did the task get what it came for?
    pub fn is_success(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Redundant)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
