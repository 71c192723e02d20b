//! Connect and disconnect tasks for client-role devices.
//!
//! Both hand the real work to the radio when armed and are ended by the
//! device once the native callback arrives, or by their timeout when it
//! never does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use super::device::Device;
use crate::domain::{EntityId, TaskContext, TaskKind, TaskPriority};
use crate::error::Result;
use crate::ports::{ArmContext, RadioBackend, Task, TaskTimer};
use crate::queue::{TaskCompleter, TaskState};

struct Armed {
    completer: TaskCompleter,
    timer: TaskTimer,
}

/// Completer and run timer of the arming in progress, if any.
#[derive(Default)]
pub(crate) struct Deadline(Mutex<Option<Armed>>);

impl Deadline {
    fn slot(&self) -> MutexGuard<'_, Option<Armed>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn arm(&self, completer: TaskCompleter, timeout: Option<Duration>) {
        *self.slot() = Some(Armed {
            completer,
            timer: TaskTimer::new(timeout),
        });
    }

    /// Advances the timer. Ends the task as timed out the first time it
    /// expires and returns `true` then.
    pub(crate) fn advance(&self, elapsed: Duration) -> Result<bool> {
        let mut slot = self.slot();
        if !slot.as_mut().is_some_and(|armed| armed.timer.advance(elapsed)) {
            return Ok(false);
        }
        match slot.take() {
            Some(armed) => armed.completer.time_out().map(|()| true),
            None => Ok(false),
        }
    }

    pub(crate) fn disarm(&self) {
        self.slot().take();
    }
}

pub struct ConnectTask {
    device: EntityId,
    owner: Weak<Device>,
    radio: Arc<dyn RadioBackend>,
    /// Explicit connects outrank reconnect attempts.
    explicit: bool,
    timeout: Option<Duration>,
    deadline: Deadline,
}

impl ConnectTask {
    pub fn new(
        owner: Weak<Device>,
        device: EntityId,
        radio: Arc<dyn RadioBackend>,
        explicit: bool,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            device,
            owner,
            radio,
            explicit,
            timeout,
            deadline: Deadline::default(),
        }
    }
}

impl Task for ConnectTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Connect
    }

    fn context(&self) -> TaskContext {
        TaskContext::Entity(self.device)
    }

    fn priority(&self) -> TaskPriority {
        if self.explicit {
            TaskPriority::ForExplicitBondingAndConnecting
        } else {
            TaskPriority::Medium
        }
    }

    /// A disconnect for the same device makes the attempt pointless.
    fn is_cancellable_by(&self, other: &dyn Task) -> bool {
        other.kind() == TaskKind::Disconnect && other.context() == self.context()
    }

    fn arm(&self, ctx: ArmContext) {
        self.deadline.arm(ctx.completer, self.timeout);
        self.radio.connect(self.device);
    }

    fn update(&self, elapsed: Duration) {
        if let Err(err) = self.deadline.advance(elapsed) {
            warn!(device = %self.device, %err, "connect timeout not delivered");
        }
    }

    fn set_ending_state(&self, state: TaskState) {
        self.deadline.disarm();
        if state == TaskState::TimedOut
            && let Some(device) = self.owner.upgrade()
        {
            debug!(device = %self.device, "connect attempt timed out");
            device.on_connect_timed_out();
        }
    }
}

pub struct DisconnectTask {
    device: EntityId,
    owner: Weak<Device>,
    radio: Arc<dyn RadioBackend>,
    explicit: bool,
    timeout: Option<Duration>,
    deadline: Deadline,
}

impl DisconnectTask {
    pub fn new(
        owner: Weak<Device>,
        device: EntityId,
        radio: Arc<dyn RadioBackend>,
        explicit: bool,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            device,
            owner,
            radio,
            explicit,
            timeout,
            deadline: Deadline::default(),
        }
    }
}

impl Task for DisconnectTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Disconnect
    }

    fn context(&self) -> TaskContext {
        TaskContext::Entity(self.device)
    }

    fn priority(&self) -> TaskPriority {
        if self.explicit {
            TaskPriority::ForExplicitBondingAndConnecting
        } else {
            TaskPriority::High
        }
    }

    fn arm(&self, ctx: ArmContext) {
        if !self.radio.is_natively_connected(self.device) {
            if let Err(err) = ctx.completer.redundant() {
                warn!(device = %self.device, %err, "disconnect ending not delivered");
            }
            return;
        }
        self.deadline.arm(ctx.completer, self.timeout);
        self.radio.disconnect(self.device);
    }

    fn update(&self, elapsed: Duration) {
        if let Err(err) = self.deadline.advance(elapsed) {
            warn!(device = %self.device, %err, "disconnect timeout not delivered");
        }
    }

    fn set_ending_state(&self, state: TaskState) {
        self.deadline.disarm();
        if state == TaskState::TimedOut
            && let Some(device) = self.owner.upgrade()
        {
            device.on_disconnect_timed_out();
        }
    }
}
