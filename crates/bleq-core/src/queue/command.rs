//! Commands marshaled onto the queue-driving context.
//!
//! Anything that wants to mutate the queue from outside the update loop
//! (hardware callbacks, transaction endings, tasks completing themselves)
//! sends one of these instead of touching the queue.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{TaskQueue, TaskState};
use crate::domain::{TaskContext, TaskId, TaskKind};
use crate::error::{BleqError, Result};
use crate::ports::{Task, Updatable};

/// Deferred work run against the queue on the loop.
pub type QueueJob = Box<dyn FnOnce(&mut TaskQueue) + Send>;

pub enum Command {
    Submit {
        id: TaskId,
        task: Arc<dyn Task>,
    },
    /// End a specific arming of a task, if it is still the current one.
    EndTask {
        id: TaskId,
        arming: u32,
        state: TaskState,
    },
    Interrupt {
        kind: TaskKind,
        context: TaskContext,
    },
    ClearQueueOf {
        kind: TaskKind,
        context: TaskContext,
    },
    Run(QueueJob),
    Register(Arc<dyn Updatable>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Submit { id, task } => write!(f, "Submit({id}, {})", task.kind()),
            Command::EndTask { id, arming, state } => write!(f, "EndTask({id}#{arming}, {state})"),
            Command::Interrupt { kind, context } => write!(f, "Interrupt({kind}, {context})"),
            Command::ClearQueueOf { kind, context } => write!(f, "ClearQueueOf({kind}, {context})"),
            Command::Run(_) => f.write_str("Run(..)"),
            Command::Register(_) => f.write_str("Register(..)"),
        }
    }
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

/// Lets an armed task report how it ended.
///
/// Endings are posted to the loop and applied only if this exact arming is
/// still current; late or duplicate reports are dropped there.
#[derive(Clone)]
pub struct TaskCompleter {
    id: TaskId,
    arming: u32,
    tx: CommandSender,
}

impl TaskCompleter {
    pub(crate) fn new(id: TaskId, arming: u32, tx: CommandSender) -> Self {
        Self { id, arming, tx }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    pub fn succeed(&self) -> Result<()> {
        self.end(TaskState::Succeeded)
    }

    pub fn fail(&self) -> Result<()> {
        self.end(TaskState::Failed)
    }

    pub fn time_out(&self) -> Result<()> {
        self.end(TaskState::TimedOut)
    }

    /// Nothing needed doing.
    pub fn redundant(&self) -> Result<()> {
        self.end(TaskState::Redundant)
    }

    pub fn end(&self, state: TaskState) -> Result<()> {
        self.tx
            .send(Command::EndTask {
                id: self.id,
                arming: self.arming,
                state,
            })
            .map_err(|_| BleqError::LoopClosed)
    }
}

impl fmt::Debug for TaskCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskCompleter({}#{})", self.id, self.arming)
    }
}
