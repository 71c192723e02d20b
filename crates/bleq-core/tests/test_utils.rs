//! Scripted radio, hand-driven transactions and a harness around one device.
//!
//! Nothing here runs on its own: tests decide when the radio answers and
//! when time passes, so every scenario is deterministic.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bleq_core::config::{DeviceConfig, ResolvedConfig};
use bleq_core::domain::{
    DeviceState, EntityId, ManagerId, StatusCode, TaskContext, TaskKind, TaskPriority, TxnId,
};
use bleq_core::impls::{InMemoryIntentStore, RecordingAssertions};
use bleq_core::ports::{ArmContext, RadioBackend, Task};
use bleq_core::queue::TaskCompleter;
use bleq_core::tracker::{StateChange, StateListener};
use bleq_core::txn::{Transaction, TxnHandle};
use bleq_core::{Device, EntityEnv, UpdateLoop};

pub const TICK: Duration = Duration::from_millis(500);

// ----------------------------------------------------------------------------
// Scripted radio
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedRadio {
    links: Mutex<HashSet<EntityId>>,
    pub connects: Mutex<Vec<EntityId>>,
    pub disconnects: Mutex<Vec<EntityId>>,
    pub notifications: Mutex<Vec<EntityId>>,
}

impl ScriptedRadio {
    pub fn link_up(&self, entity: EntityId) {
        self.links.lock().unwrap().insert(entity);
    }

    pub fn link_down(&self, entity: EntityId) {
        self.links.lock().unwrap().remove(&entity);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }
}

impl RadioBackend for ScriptedRadio {
    fn connect(&self, device: EntityId) {
        self.connects.lock().unwrap().push(device);
    }

    fn disconnect(&self, device: EntityId) {
        self.disconnects.lock().unwrap().push(device);
    }

    fn is_natively_connected(&self, entity: EntityId) -> bool {
        self.links.lock().unwrap().contains(&entity)
    }

    fn is_natively_disconnecting(&self, _entity: EntityId) -> bool {
        false
    }

    fn enable_notifications(&self, device: EntityId) {
        self.notifications.lock().unwrap().push(device);
    }

    fn cancel_server_connection(&self, _server: EntityId) {}
}

// ----------------------------------------------------------------------------
// Transactions and tasks driven by the test
// ----------------------------------------------------------------------------

/// Transaction that keeps its handle and waits for the test to end it.
#[derive(Default)]
pub struct ManualTxn {
    pub atomic: bool,
    handle: Mutex<Option<TxnHandle>>,
    pub cancelled: AtomicBool,
}

impl ManualTxn {
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            ..Self::default()
        }
    }

    pub fn handle(&self) -> TxnHandle {
        self.handle
            .lock()
            .unwrap()
            .clone()
            .expect("transaction was never started")
    }

    pub fn started(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }
}

impl Transaction for ManualTxn {
    fn needs_atomicity(&self) -> bool {
        self.atomic
    }

    fn start(&self, handle: TxnHandle) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn on_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Read that stays current until the test completes it.
pub struct ManualRead {
    pub entity: EntityId,
    pub txn: Option<TxnId>,
    pub priority: TaskPriority,
    completer: Mutex<Option<TaskCompleter>>,
}

impl ManualRead {
    pub fn new(entity: EntityId, txn: Option<TxnId>, priority: TaskPriority) -> Self {
        Self {
            entity,
            txn,
            priority,
            completer: Mutex::new(None),
        }
    }

    pub fn for_txn(handle: &TxnHandle) -> Self {
        Self::new(handle.entity(), Some(handle.id()), handle.task_priority())
    }

    pub fn complete(&self) {
        let completer = self.completer.lock().unwrap().clone();
        completer
            .expect("read was never armed")
            .succeed()
            .unwrap();
    }
}

impl Task for ManualRead {
    fn kind(&self) -> TaskKind {
        TaskKind::Read
    }

    fn context(&self) -> TaskContext {
        TaskContext::Entity(self.entity)
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn transaction(&self) -> Option<TxnId> {
        self.txn
    }

    fn arm(&self, ctx: ArmContext) {
        *self.completer.lock().unwrap() = Some(ctx.completer);
    }
}

// ----------------------------------------------------------------------------
// State recording
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct StateLog(Mutex<Vec<StateChange<DeviceState>>>);

impl StateLog {
    pub fn changes(&self) -> Vec<StateChange<DeviceState>> {
        self.0.lock().unwrap().clone()
    }

    /// Was `state` ever entered?
    pub fn entered(&self, state: DeviceState) -> bool {
        self.changes().iter().any(|c| c.did_enter(state))
    }
}

impl StateListener<DeviceState> for StateLog {
    fn on_state_change(&self, change: &StateChange<DeviceState>) {
        self.0.lock().unwrap().push(*change);
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

pub struct Harness {
    pub update_loop: UpdateLoop,
    pub radio: Arc<ScriptedRadio>,
    pub store: Arc<InMemoryIntentStore>,
    pub assertions: Arc<RecordingAssertions>,
    pub env: EntityEnv,
    pub device: Arc<Device>,
    pub log: Arc<StateLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DeviceConfig::nulled())
    }

    /// `device` is layered over the stock manager defaults.
    pub fn with_config(device: DeviceConfig) -> Self {
        Self::with_layers(device, DeviceConfig::defaults())
    }

    pub fn with_layers(device: DeviceConfig, manager: DeviceConfig) -> Self {
        let assertions = Arc::new(RecordingAssertions::default());
        let update_loop = UpdateLoop::new(assertions.clone());
        let radio = Arc::new(ScriptedRadio::default());
        let store = Arc::new(InMemoryIntentStore::new());
        let env = EntityEnv {
            manager: ManagerId::generate(),
            scheduler: update_loop.handle(),
            radio: radio.clone(),
            assertions: assertions.clone(),
            intent_store: Some(store.clone()),
        };
        let config = DeviceConfig::merge(&device, &manager);
        let mut harness = Self {
            device: Self::spawn_device(&env, config),
            update_loop,
            radio,
            store,
            assertions,
            env,
            log: Arc::new(StateLog::default()),
        };
        harness.device.set_state_listener(Some(harness.log.clone()));
        harness.update_loop.drain();
        harness
    }

    pub fn spawn_device(env: &EntityEnv, config: ResolvedConfig) -> Arc<Device> {
        Device::new("AA:BB:CC:DD:EE:FF", env.clone(), config).unwrap()
    }

    pub fn step(&mut self) {
        self.update_loop.step(TICK);
    }

    pub fn context(&self) -> TaskContext {
        TaskContext::Entity(self.device.id())
    }

    /// The radio reports the link up for the pending connect.
    pub fn answer_connect(&mut self) {
        self.radio.link_up(self.device.id());
        self.device.on_native_connected(StatusCode::SUCCESS);
        self.step();
    }

    /// Explicit connect without transactions, all the way to `Initialized`.
    pub fn connect_fully(&mut self) {
        assert!(self.device.connect(None, None));
        self.step();
        self.answer_connect();
        assert!(self.device.is(DeviceState::Initialized));
    }
}
