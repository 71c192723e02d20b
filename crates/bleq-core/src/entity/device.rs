//! Client-role device: tracker, transactions and reconnection wired together.
//!
//! Native callbacks (`on_native_*`) may arrive on any thread. The device
//! never touches the task queue directly: everything goes through the
//! scheduler handle. The inner mutex guards only reconnect bookkeeping and is
//! released before the tracker, the transaction manager or the radio is
//! called.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::EntityEnv;
use super::tasks::{ConnectTask, DisconnectTask};
use crate::config::ResolvedConfig;
use crate::domain::{
    ConnectionFailure, DeviceState, DisconnectCause, EntityId, Intent, ReadWriteResult,
    StatusCode, TaskContext, TaskKind, CONNECTION_PHASE_STATES,
};
use crate::error::Result;
use crate::policy::TimeoutRequestEvent;
use crate::ports::Updatable;
use crate::reconnect::{ReconnectLoop, ReconnectPhase, ReconnectStep};
use crate::tracker::{device_state_tracker, StateListener, StateTracker};
use crate::txn::{Transaction, TransactionHost, TransactionManager, TxnHandle, TxnRole};

struct Inner {
    last_connect_intent: Intent,
    short_term: ReconnectLoop,
    long_term: ReconnectLoop,
    last_disconnect_cause: Option<DisconnectCause>,
    last_connection_failure: Option<ConnectionFailure>,
}

impl Inner {
    fn reconnect_phase(&self) -> Option<ReconnectPhase> {
        if self.short_term.is_running() {
            Some(ReconnectPhase::ShortTerm)
        } else if self.long_term.is_running() {
            Some(ReconnectPhase::LongTerm)
        } else {
            None
        }
    }

    fn stop_reconnecting(&mut self) {
        self.short_term.stop();
        self.long_term.stop();
    }
}

pub struct Device {
    id: EntityId,
    address: String,
    env: EntityEnv,
    config: ResolvedConfig,
    tracker: StateTracker<DeviceState>,
    txns: Arc<TransactionManager>,
    inner: Mutex<Inner>,
    me: Weak<Device>,
}

impl Device {
    /// Builds the device and registers it with the update loop.
    ///
    /// The initial `Disconnected` state carries the intent persisted for
    /// `address`, when disk management is on.
    pub fn new(address: impl Into<String>, env: EntityEnv, config: ResolvedConfig) -> Result<Arc<Self>> {
        let address = address.into();
        let id = EntityId::generate();
        let initial_intent = Self::load_intent(&address, &env, &config).unwrap_or(Intent::Unintentional);

        let device = Arc::new_cyclic(|me: &Weak<Device>| {
            let host: Weak<dyn TransactionHost> = me.clone();
            let inner = Inner {
                last_connect_intent: Intent::Intentional,
                short_term: ReconnectLoop::new(
                    id,
                    ReconnectPhase::ShortTerm,
                    config.reconnect_request_short_term.clone(),
                    config.reconnect_persist_short_term.clone(),
                ),
                long_term: ReconnectLoop::new(
                    id,
                    ReconnectPhase::LongTerm,
                    config.reconnect_request_long_term.clone(),
                    config.reconnect_persist_long_term.clone(),
                ),
                last_disconnect_cause: None,
                last_connection_failure: None,
            };
            Self {
                id,
                tracker: device_state_tracker(id, env.radio.clone(), initial_intent, env.assertions.clone()),
                txns: TransactionManager::new(id, host, env.scheduler.clone(), env.assertions.clone()),
                address,
                env,
                config,
                inner: Mutex::new(inner),
                me: me.clone(),
            }
        });

        device.env.scheduler.register(device.clone())?;
        debug!(device = %device.id, address = %device.address, "device created");
        Ok(device)
    }

    fn load_intent(address: &str, env: &EntityEnv, config: &ResolvedConfig) -> Option<Intent> {
        if !config.manage_last_disconnect_on_disk {
            return None;
        }
        match env.intent_store.as_ref()?.load(address) {
            Ok(stored) => stored.map(|s| s.intent),
            Err(err) => {
                warn!(%address, %err, "could not read last disconnect intent");
                None
            }
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self) -> TaskContext {
        TaskContext::Entity(self.id)
    }

    // ========================================
    // Queries
    // ========================================

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn tracker(&self) -> &StateTracker<DeviceState> {
        &self.tracker
    }

    pub fn is(&self, state: DeviceState) -> bool {
        self.tracker.is(state)
    }

    pub fn set_state_listener(&self, listener: Option<Arc<dyn StateListener<DeviceState>>>) {
        self.tracker.set_listener(listener);
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    /// Intent of the most recent disconnect, as far as the tracker knows.
    pub fn last_disconnect_intent(&self) -> Intent {
        if self.tracker.was_intentional(DeviceState::Disconnected) {
            Intent::Intentional
        } else {
            Intent::Unintentional
        }
    }

    pub fn last_disconnect_cause(&self) -> Option<DisconnectCause> {
        self.inner().last_disconnect_cause
    }

    pub fn last_connection_failure(&self) -> Option<ConnectionFailure> {
        self.inner().last_connection_failure.clone()
    }

    pub fn reconnect_phase(&self) -> Option<ReconnectPhase> {
        self.inner().reconnect_phase()
    }

    // ========================================
    // Connecting
    // ========================================

    /// Explicit connect. `auth` and `init` run once the link is up.
    ///
    /// Returns `false` while connected or connecting. A running reconnect
    /// counts as connecting since it owns the connect in flight.
    pub fn connect(
        &self,
        auth: Option<Arc<dyn Transaction>>,
        init: Option<Arc<dyn Transaction>>,
    ) -> bool {
        let busy = self.tracker.is_any(&[
            DeviceState::ConnectingOverall,
            DeviceState::Connecting,
            DeviceState::Connected,
        ]);
        let reconnecting = self.inner().reconnect_phase();
        if busy || reconnecting.is_some() {
            debug!(device = %self.id, ?reconnecting, "connect ignored, already connecting or connected");
            return false;
        }
        self.inner().last_connect_intent = Intent::Intentional;
        info!(device = %self.id, address = %self.address, "connecting");
        self.txns.on_connect(auth, init);
        self.tracker.update(
            Intent::Intentional,
            StatusCode::NOT_APPLICABLE,
            &[
                (DeviceState::Disconnected, false),
                (DeviceState::ReconnectingShortTerm, false),
                (DeviceState::ReconnectingLongTerm, false),
                (DeviceState::ConnectingOverall, true),
                (DeviceState::Connecting, true),
            ],
        );
        self.submit_connect(true);
        true
    }

    fn timeout_for(&self, kind: TaskKind) -> Option<Duration> {
        self.config
            .timeout_for(&TimeoutRequestEvent::new(self.env.manager, Some(self.id), kind))
    }

    fn submit_connect(&self, explicit: bool) {
        let task = ConnectTask::new(
            self.me.clone(),
            self.id,
            self.env.radio.clone(),
            explicit,
            self.timeout_for(TaskKind::Connect),
        );
        if let Err(err) = self.env.scheduler.submit(Arc::new(task)) {
            warn!(device = %self.id, %err, "could not queue connect");
        }
    }

    pub fn on_native_connected(&self, status: StatusCode) {
        if let Err(err) = self.env.scheduler.succeed(TaskKind::Connect, self.context()) {
            warn!(device = %self.id, %err, "connect ending not delivered");
        }
        // the link is up; any connect still waiting would only tear it down later
        if let Err(err) = self.env.scheduler.clear_queue_of(TaskKind::Connect, self.context()) {
            warn!(device = %self.id, %err, "could not clear queued connects");
        }
        let intent = {
            let mut inner = self.inner();
            inner.stop_reconnecting();
            inner.last_connect_intent
        };
        info!(device = %self.id, %status, "native link up");
        self.tracker.update(
            intent,
            status,
            &[
                (DeviceState::Disconnected, false),
                (DeviceState::ReconnectingShortTerm, false),
                (DeviceState::ReconnectingLongTerm, false),
                (DeviceState::Connecting, false),
                (DeviceState::ConnectingOverall, true),
                (DeviceState::Connected, true),
            ],
        );
        self.txns.run_auth_or_init_if_needed(status);
    }

    pub fn on_native_connect_failed(&self, failure: ConnectionFailure) {
        if let Err(err) = self.env.scheduler.fail(TaskKind::Connect, self.context()) {
            warn!(device = %self.id, %err, "connect ending not delivered");
        }
        self.handle_connect_failure(failure);
    }

    /// The connect task ran out of time. Ignored once the link is up.
    pub(crate) fn on_connect_timed_out(&self) {
        if self.tracker.is(DeviceState::Connected) || self.env.radio.is_natively_connected(self.id) {
            debug!(device = %self.id, "connect timeout ignored, link is up");
            return;
        }
        self.handle_connect_failure(ConnectionFailure::from_status(StatusCode::NOT_APPLICABLE));
    }

    fn handle_connect_failure(&self, failure: ConnectionFailure) {
        let outcome = {
            let mut inner = self.inner();
            inner.last_connection_failure = Some(failure.clone());
            match inner.reconnect_phase() {
                Some(ReconnectPhase::ShortTerm) => Some((
                    ReconnectPhase::ShortTerm,
                    inner.short_term.on_connection_failed(failure.clone()),
                )),
                Some(ReconnectPhase::LongTerm) => Some((
                    ReconnectPhase::LongTerm,
                    inner.long_term.on_connection_failed(failure.clone()),
                )),
                None => None,
            }
        };

        match outcome {
            Some((phase, step)) => {
                debug!(device = %self.id, ?phase, ?step, "reconnect attempt failed");
                self.tracker.update(
                    Intent::Unintentional,
                    failure.status,
                    &[(DeviceState::Connecting, false)],
                );
                self.act(phase, step);
            }
            None => {
                info!(device = %self.id, status = %failure.status, "connect failed");
                self.settle_disconnected(Intent::Unintentional, failure.status, None);
            }
        }
    }

    // ========================================
    // Reconnecting
    // ========================================

    fn act(&self, phase: ReconnectPhase, step: ReconnectStep) {
        match (phase, step) {
            (_, ReconnectStep::AttemptNow) => self.attempt_reconnect(),
            (ReconnectPhase::ShortTerm, ReconnectStep::GaveUp) => self.begin_long_term(),
            (ReconnectPhase::LongTerm, ReconnectStep::GaveUp) => {
                self.settle_disconnected(Intent::Unintentional, StatusCode::NOT_APPLICABLE, Some(DisconnectCause::ReconnectGaveUp));
            }
            _ => {}
        }
    }

    fn attempt_reconnect(&self) {
        self.inner().last_connect_intent = Intent::Unintentional;
        self.tracker.update(
            Intent::Unintentional,
            StatusCode::NOT_APPLICABLE,
            &[(DeviceState::Connecting, true)],
        );
        self.submit_connect(false);
    }

    fn begin_short_term(&self, status: StatusCode) {
        let step = self.inner().short_term.start(None);
        let mut pairs: Vec<(DeviceState, bool)> =
            CONNECTION_PHASE_STATES.iter().map(|&s| (s, false)).collect();
        pairs.push((DeviceState::ReconnectingShortTerm, true));
        self.tracker.update(Intent::Unintentional, status, &pairs);
        self.txns.cancel_all();
        self.persist_intent(Intent::Unintentional);
        self.act(ReconnectPhase::ShortTerm, step);
    }

    fn begin_long_term(&self) {
        let step = {
            let mut inner = self.inner();
            let failure = inner.last_connection_failure.clone();
            inner.long_term.start(failure)
        };
        if step == ReconnectStep::GaveUp {
            self.settle_disconnected(
                Intent::Unintentional,
                StatusCode::NOT_APPLICABLE,
                Some(DisconnectCause::ReconnectGaveUp),
            );
            return;
        }
        self.tracker.update(
            Intent::Unintentional,
            StatusCode::NOT_APPLICABLE,
            &[
                (DeviceState::ReconnectingShortTerm, false),
                (DeviceState::Connecting, false),
                (DeviceState::Disconnected, true),
                (DeviceState::ReconnectingLongTerm, true),
            ],
        );
        self.act(ReconnectPhase::LongTerm, step);
    }

    // ========================================
    // Disconnecting
    // ========================================

    /// Explicit disconnect. Returns `false` if there was nothing to drop.
    pub fn disconnect(&self) -> bool {
        self.disconnect_because(DisconnectCause::ExplicitDisconnect, None)
    }

    fn disconnect_because(&self, cause: DisconnectCause, failure: Option<ReadWriteResult>) -> bool {
        let reconnecting = self.inner().reconnect_phase().is_some();
        if self.tracker.is(DeviceState::Disconnected) && !reconnecting {
            return false;
        }
        let explicit = cause == DisconnectCause::ExplicitDisconnect;
        let intent = if explicit {
            Intent::Intentional
        } else {
            Intent::Unintentional
        };
        if failure.is_some() {
            self.inner().last_connection_failure = Some(ConnectionFailure {
                status: StatusCode::NOT_APPLICABLE,
                txn_failure: failure,
            });
        }
        let natively =
            self.env.radio.is_natively_connected(self.id) || self.tracker.is(DeviceState::Connecting);

        info!(device = %self.id, %cause, "disconnecting");
        self.settle_disconnected(intent, StatusCode::NOT_APPLICABLE, Some(cause));
        if natively {
            let task = DisconnectTask::new(
                self.me.clone(),
                self.id,
                self.env.radio.clone(),
                explicit,
                self.timeout_for(TaskKind::Disconnect),
            );
            if let Err(err) = self.env.scheduler.submit(Arc::new(task)) {
                warn!(device = %self.id, %err, "could not queue disconnect");
            }
        }
        true
    }

    pub fn on_native_disconnected(&self, status: StatusCode) {
        if let Err(err) = self.env.scheduler.succeed(TaskKind::Disconnect, self.context()) {
            warn!(device = %self.id, %err, "disconnect ending not delivered");
        }
        if self.inner().reconnect_phase().is_some() {
            // link dropped mid-attempt
            self.on_native_connect_failed(ConnectionFailure::from_status(status));
            return;
        }
        if self.tracker.is(DeviceState::Disconnected) {
            debug!(device = %self.id, %status, "native disconnect confirmed");
            return;
        }
        if self.tracker.is(DeviceState::Initialized) {
            info!(device = %self.id, %status, "link lost, reconnecting");
            self.begin_short_term(status);
        } else {
            info!(device = %self.id, %status, "link lost during setup");
            self.settle_disconnected(Intent::Unintentional, status, None);
        }
    }

    /// The radio never confirmed a disconnect. The queue has moved on; the
    /// device is treated as gone.
    pub(crate) fn on_disconnect_timed_out(&self) {
        warn!(device = %self.id, "disconnect timed out");
        if !self.tracker.is(DeviceState::Disconnected) {
            self.settle_disconnected(Intent::Unintentional, StatusCode::NOT_APPLICABLE, None);
        }
    }

    /// Clears every connection-phase state and settles on `Disconnected`.
    fn settle_disconnected(&self, intent: Intent, status: StatusCode, cause: Option<DisconnectCause>) {
        {
            let mut inner = self.inner();
            inner.stop_reconnecting();
            if cause.is_some() {
                inner.last_disconnect_cause = cause;
            }
        }
        let mut pairs: Vec<(DeviceState, bool)> =
            CONNECTION_PHASE_STATES.iter().map(|&s| (s, false)).collect();
        pairs.extend([
            (DeviceState::ReconnectingShortTerm, false),
            (DeviceState::ReconnectingLongTerm, false),
            (DeviceState::Disconnected, true),
        ]);
        self.tracker.update(intent, status, &pairs);
        self.txns.cancel_all();
        if let Err(err) = self.env.scheduler.clear_queue_of(TaskKind::Connect, self.context()) {
            warn!(device = %self.id, %err, "could not clear queued connects");
        }
        self.persist_intent(intent);
    }

    fn persist_intent(&self, intent: Intent) {
        if !self.config.manage_last_disconnect_on_disk {
            return;
        }
        let Some(store) = self.env.intent_store.as_ref() else {
            return;
        };
        if let Err(err) = store.save(&self.address, intent) {
            warn!(device = %self.id, address = %self.address, %err, "could not save disconnect intent");
        }
    }

    // ========================================
    // Transactions
    // ========================================

    /// Starts a firmware update. Needs a fully initialized device with no
    /// other transaction in progress.
    pub fn perform_ota(&self, txn: Arc<dyn Transaction>) -> Option<TxnHandle> {
        if !self.ready_for_transaction() || self.tracker.is(DeviceState::PerformingOta) {
            warn!(device = %self.id, "firmware update refused");
            return None;
        }
        Some(self.txns.start_ota(txn))
    }

    pub fn perform_transaction(&self, txn: Arc<dyn Transaction>) -> Option<TxnHandle> {
        if !self.ready_for_transaction() {
            warn!(device = %self.id, "transaction refused");
            return None;
        }
        Some(self.txns.perform_anonymous(txn))
    }

    fn ready_for_transaction(&self) -> bool {
        self.tracker.is(DeviceState::Initialized) && self.txns.current().is_none()
    }

    pub fn cancel_ota(&self) {
        self.txns.cancel_ota();
    }

    pub fn is_running(&self, role: TxnRole) -> bool {
        self.txns.is_running(role)
    }

    /// Routes a read/write outcome: recorded for the transaction manager,
    /// handed to `notify`, then forgotten.
    pub fn on_read_write_result(&self, result: ReadWriteResult, notify: impl FnOnce(&ReadWriteResult)) {
        self.txns.on_read_write_result(&result);
        notify(&result);
        self.txns.on_read_write_callbacks_called();
    }
}

impl TransactionHost for Device {
    fn is_connected(&self) -> bool {
        self.tracker.is(DeviceState::Connected)
    }

    fn is_any(&self, states: &[DeviceState]) -> bool {
        self.tracker.is_any(states)
    }

    fn update_state(&self, intent: Intent, status: StatusCode, pairs: &[(DeviceState, bool)]) {
        self.tracker.update(intent, status, pairs);
    }

    fn enable_notifications(&self) {
        if self.config.auto_enable_notifications {
            self.env.radio.enable_notifications(self.id);
        }
    }

    fn on_fully_initialized(&self, status: StatusCode) {
        let intent = self.inner().last_connect_intent;
        info!(device = %self.id, "fully initialized");
        self.tracker.update(
            intent,
            status,
            &[
                (DeviceState::ConnectingOverall, false),
                (DeviceState::Authenticating, false),
                (DeviceState::Initializing, false),
                (DeviceState::Authenticated, true),
                (DeviceState::Initialized, true),
            ],
        );
    }

    fn disconnect_with_reason(&self, cause: DisconnectCause, failure: Option<ReadWriteResult>) {
        self.disconnect_because(cause, failure);
    }

    fn last_connect_intent(&self) -> Intent {
        self.inner().last_connect_intent
    }
}

impl Updatable for Device {
    fn update(&self, elapsed: Duration) {
        self.txns.update(elapsed);

        let connecting = self.tracker.is(DeviceState::Connecting);
        let (short, long) = {
            let mut inner = self.inner();
            (
                inner.short_term.update(elapsed, connecting),
                inner.long_term.update(elapsed, connecting),
            )
        };
        self.act(ReconnectPhase::ShortTerm, short);
        self.act(ReconnectPhase::LongTerm, long);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("states", &self.tracker.to_string())
            .finish()
    }
}
