//! Timeout-Request filter: how long a task may run before timing out.

use std::time::Duration;

use crate::domain::{EntityId, ManagerId, TaskKind};

/// Timeout used by [`DefaultTimeoutRequestFilter`] for every task kind.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_millis(12_500);

/// Context for a timeout decision. Built right before a task runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutRequestEvent {
    pub manager: ManagerId,
    /// `None` for manager-scoped tasks.
    pub entity: Option<EntityId>,
    pub kind: TaskKind,
    /// Characteristic the task targets, if any.
    pub target: Option<String>,
    /// Descriptor the task targets, if any.
    pub descriptor: Option<String>,
}

impl TimeoutRequestEvent {
    pub fn new(manager: ManagerId, entity: Option<EntityId>, kind: TaskKind) -> Self {
        Self {
            manager,
            entity,
            kind,
            target: None,
            descriptor: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPlease {
    SetTimeoutFor(Duration),
    DoNotUseTimeout,
}

impl TimeoutPlease {
    /// The timeout, or `None` when disabled. A zero duration also disables.
    pub fn timeout(self) -> Option<Duration> {
        match self {
            TimeoutPlease::SetTimeoutFor(d) if !d.is_zero() => Some(d),
            _ => None,
        }
    }
}

/// Pure decision: may read the event, must not touch scheduler or tracker.
pub trait TimeoutRequestFilter: Send + Sync {
    fn on_event(&self, event: &TimeoutRequestEvent) -> TimeoutPlease;
}

/// Same fixed timeout for everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTimeoutRequestFilter {
    timeout: Duration,
}

impl DefaultTimeoutRequestFilter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DefaultTimeoutRequestFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}

impl TimeoutRequestFilter for DefaultTimeoutRequestFilter {
    fn on_event(&self, _event: &TimeoutRequestEvent) -> TimeoutPlease {
        TimeoutPlease::SetTimeoutFor(self.timeout)
    }
}
