//! Server-role peers: remote centrals connected to our local server.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{info, warn};

use super::tasks::Deadline;
use super::EntityEnv;
use crate::config::ResolvedConfig;
use crate::domain::{DeviceState, EntityId, Intent, StatusCode, TaskContext, TaskKind, TaskPriority};
use crate::policy::TimeoutRequestEvent;
use crate::ports::{ArmContext, RadioBackend, Task};
use crate::queue::TaskState;
use crate::tracker::{server_state_tracker, StateTracker};

pub struct Server {
    id: EntityId,
    env: EntityEnv,
    config: ResolvedConfig,
    tracker: StateTracker<DeviceState>,
    me: Weak<Server>,
}

impl Server {
    pub fn new(env: EntityEnv, config: ResolvedConfig) -> Arc<Self> {
        let id = EntityId::generate();
        Arc::new_cyclic(|me| Self {
            id,
            tracker: server_state_tracker(id, env.assertions.clone()),
            env,
            config,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn tracker(&self) -> &StateTracker<DeviceState> {
        &self.tracker
    }

    pub fn is(&self, state: DeviceState) -> bool {
        self.tracker.is(state)
    }

    pub fn on_native_connected(&self, status: StatusCode) {
        self.tracker.update(
            Intent::Unintentional,
            status,
            &[
                (DeviceState::Undiscovered, false),
                (DeviceState::Disconnected, false),
                (DeviceState::Connected, true),
            ],
        );
    }

    /// Drops the peer. Returns `false` if it was not connected.
    pub fn disconnect(&self) -> bool {
        if self.tracker.is(DeviceState::Disconnected) {
            return false;
        }
        self.tracker.update(
            Intent::Intentional,
            StatusCode::NOT_APPLICABLE,
            &[(DeviceState::Connected, false), (DeviceState::Disconnected, true)],
        );
        let event = TimeoutRequestEvent::new(self.env.manager, Some(self.id), TaskKind::ServerDisconnect);
        let task = ServerDisconnectTask::new(
            self.me.clone(),
            self.id,
            self.env.radio.clone(),
            self.config.timeout_for(&event),
        );
        if let Err(err) = self.env.scheduler.submit(Arc::new(task)) {
            warn!(server = %self.id, %err, "could not queue server disconnect");
        }
        true
    }

    pub fn on_native_disconnected(&self, status: StatusCode) {
        let context = TaskContext::Entity(self.id);
        if let Err(err) = self.env.scheduler.succeed(TaskKind::ServerDisconnect, context) {
            warn!(server = %self.id, %err, "server disconnect ending not delivered");
        }
        if !self.tracker.is(DeviceState::Disconnected) {
            info!(server = %self.id, %status, "peer disconnected");
        }
        self.tracker.update(
            Intent::Unintentional,
            status,
            &[(DeviceState::Connected, false), (DeviceState::Disconnected, true)],
        );
    }

    fn on_disconnect_timed_out(&self) {
        warn!(server = %self.id, "server disconnect timed out");
        self.tracker.update(
            Intent::Unintentional,
            StatusCode::NOT_APPLICABLE,
            &[(DeviceState::Connected, false), (DeviceState::Disconnected, true)],
        );
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("id", &self.id)
            .field("states", &self.tracker.to_string())
            .finish()
    }
}

/// Cancels the connection a peer holds to our server.
pub struct ServerDisconnectTask {
    server: Weak<Server>,
    id: EntityId,
    radio: Arc<dyn RadioBackend>,
    timeout: Option<Duration>,
    deadline: Deadline,
}

impl ServerDisconnectTask {
    pub fn new(
        server: Weak<Server>,
        id: EntityId,
        radio: Arc<dyn RadioBackend>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            server,
            id,
            radio,
            timeout,
            deadline: Deadline::default(),
        }
    }
}

impl Task for ServerDisconnectTask {
    fn kind(&self) -> TaskKind {
        TaskKind::ServerDisconnect
    }

    fn context(&self) -> TaskContext {
        TaskContext::Entity(self.id)
    }

    fn priority(&self) -> TaskPriority {
        TaskPriority::ForExplicitBondingAndConnecting
    }

    fn arm(&self, ctx: ArmContext) {
        if self.server.upgrade().is_none() {
            warn!(server = %self.id, "server already gone");
            if let Err(err) = ctx.completer.redundant() {
                warn!(server = %self.id, %err, "server disconnect ending not delivered");
            }
            return;
        }
        // the native callback will end this task
        self.deadline.arm(ctx.completer, self.timeout);
        if self.radio.is_natively_disconnecting(self.id) {
            return;
        }
        self.radio.cancel_server_connection(self.id);
    }

    fn update(&self, elapsed: Duration) {
        if let Err(err) = self.deadline.advance(elapsed) {
            warn!(server = %self.id, %err, "server disconnect timeout not delivered");
        }
    }

    fn set_ending_state(&self, state: TaskState) {
        self.deadline.disarm();
        if state == TaskState::TimedOut
            && let Some(server) = self.server.upgrade()
        {
            server.on_disconnect_timed_out();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::app::UpdateLoop;
    use crate::config::DeviceConfig;
    use crate::domain::ManagerId;
    use crate::impls::RecordingAssertions;
    use crate::policy::DefaultTimeoutRequestFilter;

    #[derive(Default)]
    struct Radio {
        disconnecting: AtomicBool,
        cancelled: Mutex<Vec<EntityId>>,
    }

    impl RadioBackend for Radio {
        fn connect(&self, _device: EntityId) {}
        fn disconnect(&self, _device: EntityId) {}
        fn is_natively_connected(&self, _entity: EntityId) -> bool {
            true
        }
        fn is_natively_disconnecting(&self, _entity: EntityId) -> bool {
            self.disconnecting.load(Ordering::SeqCst)
        }
        fn enable_notifications(&self, _device: EntityId) {}
        fn cancel_server_connection(&self, server: EntityId) {
            self.cancelled.lock().unwrap().push(server);
        }
    }

    /// Records how the task ended.
    struct Watched {
        inner: ServerDisconnectTask,
        ended: Arc<Mutex<Option<TaskState>>>,
    }

    impl Task for Watched {
        fn kind(&self) -> TaskKind {
            self.inner.kind()
        }
        fn context(&self) -> TaskContext {
            self.inner.context()
        }
        fn priority(&self) -> TaskPriority {
            self.inner.priority()
        }
        fn arm(&self, ctx: ArmContext) {
            self.inner.arm(ctx)
        }
        fn update(&self, elapsed: Duration) {
            self.inner.update(elapsed)
        }
        fn set_ending_state(&self, state: TaskState) {
            self.inner.set_ending_state(state);
            *self.ended.lock().unwrap() = Some(state);
        }
    }

    fn setup() -> (UpdateLoop, Arc<Radio>, EntityEnv) {
        let assertions = Arc::new(RecordingAssertions::default());
        let update_loop = UpdateLoop::new(assertions.clone());
        let radio = Arc::new(Radio::default());
        let env = EntityEnv {
            manager: ManagerId::generate(),
            scheduler: update_loop.handle(),
            radio: radio.clone(),
            assertions,
            intent_store: None,
        };
        (update_loop, radio, env)
    }

    fn config() -> ResolvedConfig {
        DeviceConfig::merge(&DeviceConfig::nulled(), &DeviceConfig::defaults())
    }

    #[test]
    fn starts_undiscovered_and_disconnected() {
        let (_loop, _radio, env) = setup();
        let server = Server::new(env, config());
        assert!(server.is(DeviceState::Undiscovered));
        assert!(server.is(DeviceState::Disconnected));
        assert!(!server.disconnect());
    }

    #[test]
    fn disconnect_cancels_native_connection_then_completes() {
        let (mut update_loop, radio, env) = setup();
        let server = Server::new(env, config());
        server.on_native_connected(StatusCode::SUCCESS);
        assert!(server.is(DeviceState::Connected));

        assert!(server.disconnect());
        update_loop.step(Duration::from_millis(20));
        assert_eq!(*radio.cancelled.lock().unwrap(), vec![server.id()]);
        assert!(update_loop
            .queue()
            .is_current(TaskKind::ServerDisconnect, TaskContext::Entity(server.id())));

        server.on_native_disconnected(StatusCode::SUCCESS);
        update_loop.drain();
        assert!(update_loop.queue().current().is_none());
        assert!(server.is(DeviceState::Disconnected));
    }

    #[test]
    fn gone_server_ends_redundant() {
        let (mut update_loop, radio, _env) = setup();
        let ended = Arc::new(Mutex::new(None));
        let id = EntityId::generate();
        update_loop.queue_mut().submit(Arc::new(Watched {
            inner: ServerDisconnectTask::new(Weak::new(), id, radio.clone(), None),
            ended: ended.clone(),
        }));

        update_loop.step(Duration::from_millis(20));
        update_loop.drain();

        assert_eq!(*ended.lock().unwrap(), Some(TaskState::Redundant));
        assert!(radio.cancelled.lock().unwrap().is_empty());
    }

    #[test]
    fn native_disconnect_in_flight_is_left_alone() {
        let (mut update_loop, radio, env) = setup();
        let server = Server::new(env, config());
        server.on_native_connected(StatusCode::SUCCESS);
        radio.disconnecting.store(true, Ordering::SeqCst);

        server.disconnect();
        update_loop.step(Duration::from_millis(20));

        assert!(radio.cancelled.lock().unwrap().is_empty());
        assert!(update_loop
            .queue()
            .is_current(TaskKind::ServerDisconnect, TaskContext::Entity(server.id())));
    }

    #[test]
    fn lost_callback_times_out_and_frees_the_queue() {
        let (mut update_loop, radio, env) = setup();
        let config = ResolvedConfig {
            timeout_filter: Some(Arc::new(DefaultTimeoutRequestFilter::new(Duration::from_secs(1)))),
            ..ResolvedConfig::default()
        };
        let server = Server::new(env, config);
        server.on_native_connected(StatusCode::SUCCESS);
        assert!(server.disconnect());
        update_loop.step(Duration::from_millis(500));
        assert_eq!(*radio.cancelled.lock().unwrap(), vec![server.id()]);

        for _ in 0..4 {
            update_loop.step(Duration::from_millis(500));
        }

        assert!(update_loop.queue().is_empty());
        assert!(server.is(DeviceState::Disconnected));
    }
}
