//! UpdateLoop - the queue-driving context.
//!
//! Owns the [`TaskQueue`] outright. Everything else reaches it through a
//! [`SchedulerHandle`], which only sends [`Command`]s; the loop applies them
//! between ticks. This is what keeps "at most one current task" true without
//! callers ever taking the queue's lock.
//!
//! # Driving
//! - `drain()` / `step(elapsed)`: synchronous, for tests and embedding
//! - `spawn(rate)`: tokio task ticking at a fixed rate until shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::domain::{TaskContext, TaskId, TaskKind};
use crate::error::{BleqError, Result};
use crate::ports::{AssertionReporter, Task, Updatable};
use crate::queue::{Command, CommandReceiver, CommandSender, TaskQueue, TaskState};

pub struct UpdateLoop {
    queue: TaskQueue,
    rx: CommandReceiver,
    tx: CommandSender,
    updatables: Vec<Arc<dyn Updatable>>,
}

impl UpdateLoop {
    pub fn new(assertions: Arc<dyn AssertionReporter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            queue: TaskQueue::new(tx.clone(), assertions),
            rx,
            tx,
            updatables: Vec::new(),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn register(&mut self, updatable: Arc<dyn Updatable>) {
        self.updatables.push(updatable);
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut TaskQueue {
        &mut self.queue
    }

    /// Applies every command sent so far, including ones sent while applying.
    /// Returns how many were applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply(cmd);
            applied += 1;
        }
        applied
    }

    /// One heartbeat: commands, queue tick, updatables, then whatever they sent.
    pub fn step(&mut self, elapsed: Duration) {
        self.drain();
        self.queue.tick(elapsed);
        for updatable in &self.updatables {
            updatable.update(elapsed);
        }
        self.drain();
    }

    fn apply(&mut self, cmd: Command) {
        trace!(?cmd, "applying command");
        match cmd {
            Command::Submit { id, task } => self.queue.submit_with_id(id, task),
            Command::EndTask { id, arming, state } => {
                self.queue.end_task(id, arming, state);
            }
            Command::Interrupt { kind, context } => {
                self.queue.interrupt(kind, context);
            }
            Command::ClearQueueOf { kind, context } => {
                self.queue.clear_queue_of(kind, context);
            }
            Command::Run(job) => job(&mut self.queue),
            Command::Register(updatable) => self.updatables.push(updatable),
        }
    }

    /// Runs the loop on tokio, ticking every `rate`.
    ///
    /// Commands are applied as soon as they arrive, not only on ticks. The
    /// loop hands itself back from `shutdown_and_join`.
    pub fn spawn(mut self, rate: Duration) -> RunningLoop {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rate);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            info!(rate_ms = rate.as_millis() as u64, "update loop started");

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => continue,
                    now = ticker.tick() => {
                        let elapsed = now.saturating_duration_since(last);
                        last = now;
                        self.step(elapsed);
                    }
                    Some(cmd) = self.rx.recv() => self.apply(cmd),
                }
            }

            self.drain();
            info!(updates = self.queue.update_count(), "update loop stopped");
            self
        });

        RunningLoop { shutdown_tx, join }
    }
}

/// A spawned [`UpdateLoop`].
pub struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<UpdateLoop>,
}

impl RunningLoop {
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops ticking and returns the loop for inspection.
    pub async fn shutdown_and_join(self) -> Option<UpdateLoop> {
        self.request_shutdown();
        match self.join.await {
            Ok(update_loop) => Some(update_loop),
            Err(err) => {
                debug!(%err, "update loop task did not finish cleanly");
                None
            }
        }
    }
}

/// Clonable sender side of the loop. Safe to use from any thread.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: CommandSender,
}

impl SchedulerHandle {
    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| BleqError::LoopClosed)
    }

    /// Queues `task` for admission on the loop. The id is assigned now.
    pub fn submit(&self, task: Arc<dyn Task>) -> Result<TaskId> {
        let id = TaskId::generate();
        self.send(Command::Submit { id, task })?;
        Ok(id)
    }

    pub fn succeed(&self, kind: TaskKind, context: TaskContext) -> Result<()> {
        self.post(move |q| {
            q.end_current_if(kind, context, TaskState::Succeeded);
        })
    }

    pub fn fail(&self, kind: TaskKind, context: TaskContext) -> Result<()> {
        self.post(move |q| {
            q.end_current_if(kind, context, TaskState::Failed);
        })
    }

    pub fn interrupt(&self, kind: TaskKind, context: TaskContext) -> Result<()> {
        self.send(Command::Interrupt { kind, context })
    }

    pub fn clear_queue_of(&self, kind: TaskKind, context: TaskContext) -> Result<()> {
        self.send(Command::ClearQueueOf { kind, context })
    }

    /// Runs `job` against the queue on the loop.
    pub fn post(&self, job: impl FnOnce(&mut TaskQueue) + Send + 'static) -> Result<()> {
        self.send(Command::Run(Box::new(job)))
    }

    pub fn register(&self, updatable: Arc<dyn Updatable>) -> Result<()> {
        self.send(Command::Register(updatable))
    }

    /// Reads from the queue on the loop and hands the answer back.
    pub async fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&TaskQueue) -> R + Send + 'static,
    ) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(move |q| {
            // asker may have given up
            let _ = reply_tx.send(f(q));
        })?;
        reply_rx.await.map_err(|_| BleqError::LoopClosed)
    }
}
