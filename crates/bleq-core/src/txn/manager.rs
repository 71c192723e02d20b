//! Per-entity transaction sequencing.
//!
//! Auth runs first after a connection, then Init, and the entity becomes
//! fully initialized when the last of them succeeds. A failed Auth or Init
//! disconnects with an attributed cause. Ota and anonymous transactions run
//! on demand. At most one transaction holds the "current" slot.
//!
//! Locking: the slot mutex is never held while calling out (into the host,
//! a transaction, or the scheduler). Decisions are made under the lock and
//! returned as [`Effect`]s that run after it is released. Queue-lock release
//! is posted onto the update loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::lock_task::TxnLockTask;
use super::transaction::{EndReason, Transaction, TxnEndListener, TxnHandle, TxnRole, TxnRunner};
use crate::app::SchedulerHandle;
use crate::domain::{
    DeviceState, DisconnectCause, EntityId, Intent, ReadWriteResult, StatusCode, TaskContext,
    TaskKind, TxnId,
};
use crate::ports::AssertionReporter;

/// What the manager needs from the entity it sequences.
pub trait TransactionHost: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Is any of `states` currently true?
    fn is_any(&self, states: &[DeviceState]) -> bool;

    fn update_state(&self, intent: Intent, status: StatusCode, pairs: &[(DeviceState, bool)]);

    /// Turn on whatever notifications the application configured.
    fn enable_notifications(&self);

    fn on_fully_initialized(&self, status: StatusCode);

    fn disconnect_with_reason(&self, cause: DisconnectCause, failure: Option<ReadWriteResult>);

    /// Intent of the connect that is being set up.
    fn last_connect_intent(&self) -> Intent;
}

#[derive(Default)]
struct Slots {
    auth: Option<TxnRunner>,
    init: Option<TxnRunner>,
    ota: Option<TxnRunner>,
    anon: Option<TxnRunner>,
    current: Option<(TxnId, TxnRole)>,
    /// Last failed read/write seen while authenticating or initializing.
    fail_reason: Option<ReadWriteResult>,
}

impl Slots {
    fn runners(&self) -> impl Iterator<Item = &TxnRunner> {
        [&self.auth, &self.init, &self.ota, &self.anon]
            .into_iter()
            .flatten()
    }
}

/// Side effect decided under the slot lock, run after it is released.
enum Effect {
    ReleaseQueueLock(TxnId),
    EnableNotifications,
    UpdateState(Intent, StatusCode, Vec<(DeviceState, bool)>),
    Start(TxnRunner),
    FullyInitialized(StatusCode),
    Disconnect(DisconnectCause, Option<ReadWriteResult>),
}

pub struct TransactionManager {
    entity: EntityId,
    host: Weak<dyn TransactionHost>,
    scheduler: SchedulerHandle,
    assertions: Arc<dyn AssertionReporter>,
    slots: Mutex<Slots>,
    me: Weak<TransactionManager>,
}

impl TransactionManager {
    pub fn new(
        entity: EntityId,
        host: Weak<dyn TransactionHost>,
        scheduler: SchedulerHandle,
        assertions: Arc<dyn AssertionReporter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            entity,
            host,
            scheduler,
            assertions,
            slots: Mutex::new(Slots::default()),
            me: me.clone(),
        })
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runner(&self, txn: Arc<dyn Transaction>, role: TxnRole) -> TxnRunner {
        let listener: Weak<dyn TxnEndListener> = self.me.clone();
        TxnRunner::new(txn, role, self.entity, listener)
    }

    /// The transaction in the current slot.
    pub fn current(&self) -> Option<(TxnId, TxnRole)> {
        self.slots().current
    }

    pub fn is_running(&self, role: TxnRole) -> bool {
        let slots = self.slots();
        let slot = match role {
            TxnRole::Auth => &slots.auth,
            TxnRole::Init => &slots.init,
            TxnRole::Ota => &slots.ota,
            TxnRole::Anonymous => &slots.anon,
        };
        slot.as_ref().is_some_and(TxnRunner::is_running)
    }

    pub fn last_failure(&self) -> Option<ReadWriteResult> {
        self.slots().fail_reason.clone()
    }

    // ========================================
    // Starting
    // ========================================

    /// Binds the Auth and Init transactions for the connection being set up.
    pub fn on_connect(
        &self,
        auth: Option<Arc<dyn Transaction>>,
        init: Option<Arc<dyn Transaction>>,
    ) {
        let auth = auth.map(|t| self.runner(t, TxnRole::Auth));
        let init = init.map(|t| self.runner(t, TxnRole::Init));
        let mut slots = self.slots();
        slots.auth = auth;
        slots.init = init;
    }

    /// Called once the native connection (and service discovery) is up.
    pub fn run_auth_or_init_if_needed(&self, status: StatusCode) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let intent = host.last_connect_intent();

        let effects = {
            let mut slots = self.slots();
            // every connection runs on fresh handles; a reconnect reuses the workflows
            slots.auth = slots.auth.take().map(|r| self.runner(r.txn, TxnRole::Auth));
            slots.init = slots.init.take().map(|r| self.runner(r.txn, TxnRole::Init));

            let mut effects = Vec::new();
            if let Some(auth) = slots.auth.clone() {
                effects.push(Effect::UpdateState(
                    intent,
                    StatusCode::SUCCESS,
                    vec![(DeviceState::Authenticating, true)],
                ));
                self.claim_current(&mut slots, &auth, host.as_ref(), &mut effects);
            } else if let Some(init) = slots.init.clone() {
                effects.push(Effect::EnableNotifications);
                effects.push(Effect::UpdateState(
                    intent,
                    StatusCode::SUCCESS,
                    vec![(DeviceState::Authenticated, true), (DeviceState::Initializing, true)],
                ));
                self.claim_current(&mut slots, &init, host.as_ref(), &mut effects);
            } else {
                effects.push(Effect::EnableNotifications);
                effects.push(Effect::FullyInitialized(status));
            }
            effects
        };
        self.run_effects(effects);
    }

    pub fn start_ota(&self, txn: Arc<dyn Transaction>) -> TxnHandle {
        let runner = self.runner(txn, TxnRole::Ota);
        let handle = runner.handle.clone();
        let Some(host) = self.host.upgrade() else {
            return handle;
        };
        let effects = {
            let mut slots = self.slots();
            slots.ota = Some(runner.clone());
            let mut effects = vec![Effect::UpdateState(
                Intent::Intentional,
                StatusCode::NOT_APPLICABLE,
                vec![(DeviceState::PerformingOta, true)],
            )];
            self.claim_current(&mut slots, &runner, host.as_ref(), &mut effects);
            effects
        };
        self.run_effects(effects);
        handle
    }

    pub fn perform_anonymous(&self, txn: Arc<dyn Transaction>) -> TxnHandle {
        let runner = self.runner(txn, TxnRole::Anonymous);
        let handle = runner.handle.clone();
        let Some(host) = self.host.upgrade() else {
            return handle;
        };
        let effects = {
            let mut slots = self.slots();
            slots.anon = Some(runner.clone());
            let mut effects = Vec::new();
            self.claim_current(&mut slots, &runner, host.as_ref(), &mut effects);
            effects
        };
        self.run_effects(effects);
        handle
    }

    /// Puts `runner` in the current slot and schedules its start.
    fn claim_current(
        &self,
        slots: &mut Slots,
        runner: &TxnRunner,
        host: &dyn TransactionHost,
        effects: &mut Vec<Effect>,
    ) {
        if let Some((old_id, old_role)) = slots.current
            && host.is_connected()
        {
            self.assertions.report(&format!(
                "transaction {:?} ({old_id}) still current when starting {:?}",
                old_role,
                runner.handle.role()
            ));
        }
        slots.current = Some((runner.id(), runner.handle.role()));
        effects.push(Effect::Start(runner.clone()));
    }

    /// Starts `runner` unless the slot or the connection changed since it
    /// was claimed.
    fn start_common(&self, runner: &TxnRunner) {
        let still_current = self.slots().current.is_some_and(|(id, _)| id == runner.id());
        let connected = self.host.upgrade().is_some_and(|h| h.is_connected());
        if !still_current || !connected {
            debug!(
                entity = %self.entity,
                role = ?runner.handle.role(),
                txn = %runner.id(),
                still_current,
                connected,
                "transaction start dropped"
            );
            return;
        }
        if runner.txn.needs_atomicity() {
            let lock = TxnLockTask::new(self.entity, runner.id());
            if let Err(err) = self.scheduler.submit(Arc::new(lock)) {
                warn!(entity = %self.entity, %err, "could not take queue lock");
            }
        }
        info!(entity = %self.entity, role = ?runner.handle.role(), txn = %runner.id(), "starting transaction");
        runner.handle.begin();
        runner.txn.start(runner.handle.clone());
    }

    // ========================================
    // Cancelling / ticking
    // ========================================

    pub fn cancel_ota(&self) {
        let ota = self.slots().ota.clone();
        if let Some(ota) = ota.filter(TxnRunner::is_running) {
            ota.cancel();
        }
    }

    pub fn cancel_all(&self) {
        let (running, unstarted) = {
            let mut slots = self.slots();
            let running: Vec<TxnRunner> =
                slots.runners().filter(|r| r.is_running()).cloned().collect();
            // claimed but not started yet: its start will find the slot empty
            let unstarted = slots.current.map(|(id, _)| id).filter(|id| {
                slots
                    .runners()
                    .any(|r| r.id() == *id && !r.is_running() && !r.handle.has_ended())
            });
            slots.anon = None;
            (running, unstarted)
        };
        for runner in running {
            runner.cancel();
        }

        let stale = self
            .slots()
            .current
            .take()
            .filter(|(id, _)| Some(*id) != unstarted);
        if let Some((id, role)) = stale {
            self.assertions
                .report(&format!("expected no current transaction, found {role:?} ({id})"));
            self.run_effects(vec![Effect::ReleaseQueueLock(id)]);
        }
    }

    /// Forwards elapsed time to every running transaction.
    pub fn update(&self, elapsed: Duration) {
        let running: Vec<TxnRunner> = self
            .slots()
            .runners()
            .filter(|r| r.is_running())
            .cloned()
            .collect();
        for runner in running {
            runner.txn.update(elapsed, &runner.handle);
        }
    }

    // ========================================
    // Read/write failure tracking
    // ========================================

    pub fn on_read_write_result(&self, result: &ReadWriteResult) {
        let setting_up = self
            .host
            .upgrade()
            .is_some_and(|h| h.is_any(&[DeviceState::Authenticating, DeviceState::Initializing]));
        let mut slots = self.slots();
        slots.fail_reason = None;
        if !result.success && setting_up {
            slots.fail_reason = Some(result.clone());
        }
    }

    /// Listeners have seen the last result; forget it.
    pub fn on_read_write_callbacks_called(&self) {
        self.slots().fail_reason = None;
    }

    // ========================================
    // Effects
    // ========================================

    fn run_effects(&self, effects: Vec<Effect>) {
        let host = self.host.upgrade();
        for effect in effects {
            match effect {
                Effect::ReleaseQueueLock(txn) => self.release_queue_lock(txn),
                Effect::Start(runner) => self.start_common(&runner),
                other => {
                    let Some(host) = host.as_deref() else {
                        continue;
                    };
                    match other {
                        Effect::EnableNotifications => host.enable_notifications(),
                        Effect::UpdateState(intent, status, pairs) => {
                            host.update_state(intent, status, &pairs)
                        }
                        Effect::FullyInitialized(status) => host.on_fully_initialized(status),
                        Effect::Disconnect(cause, failure) => {
                            host.disconnect_with_reason(cause, failure)
                        }
                        Effect::ReleaseQueueLock(_) | Effect::Start(_) => {}
                    }
                }
            }
        }
    }

    /// Succeeds `txn`'s lock if it is current, else removes it from the
    /// queue. Locks of other transactions are left alone.
    fn release_queue_lock(&self, txn: TxnId) {
        let context = TaskContext::Entity(self.entity);
        let posted = self.scheduler.post(move |queue| {
            if !queue.succeed_for_txn(TaskKind::TxnLock, context, txn) {
                queue.clear_queue_of_txn(TaskKind::TxnLock, context, txn);
            }
        });
        if let Err(err) = posted {
            debug!(entity = %self.entity, %err, "queue lock release dropped");
        }
    }
}

impl TxnEndListener for TransactionManager {
    fn on_transaction_end(
        &self,
        id: TxnId,
        role: TxnRole,
        reason: EndReason,
        failure: Option<ReadWriteResult>,
    ) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let mut effects = vec![Effect::ReleaseQueueLock(id)];
        {
            let mut slots = self.slots();
            if slots.current.is_some_and(|(current, _)| current == id) {
                slots.current = None;
            }

            if !host.is_connected() {
                if reason != EndReason::Cancelled {
                    self.assertions.report(&format!(
                        "{role:?} transaction ended {reason:?} while not connected"
                    ));
                }
                if role == TxnRole::Anonymous {
                    slots.anon = None;
                }
                drop(slots);
                self.run_effects(effects);
                return;
            }

            let failure = failure.or_else(|| slots.fail_reason.take());
            let is = |slot: &Option<TxnRunner>| slot.as_ref().is_some_and(|r| r.id() == id);

            if is(&slots.auth) {
                if reason == EndReason::Succeeded {
                    effects.push(Effect::EnableNotifications);
                    if let Some(init) = slots.init.clone() {
                        effects.push(Effect::UpdateState(
                            Intent::Intentional,
                            StatusCode::NOT_APPLICABLE,
                            vec![
                                (DeviceState::Authenticating, false),
                                (DeviceState::Authenticated, true),
                                (DeviceState::Initializing, true),
                            ],
                        ));
                        self.claim_current(&mut slots, &init, host.as_ref(), &mut effects);
                    } else {
                        effects.push(Effect::FullyInitialized(StatusCode::NOT_APPLICABLE));
                    }
                } else {
                    effects.push(Effect::Disconnect(DisconnectCause::AuthenticationFailed, failure));
                }
            } else if is(&slots.init) {
                if reason == EndReason::Succeeded {
                    effects.push(Effect::FullyInitialized(StatusCode::NOT_APPLICABLE));
                } else {
                    effects.push(Effect::Disconnect(DisconnectCause::InitializationFailed, failure));
                }
            } else if is(&slots.ota) {
                // outcome is reported by the handle; the connection stays up either way
                effects.push(Effect::UpdateState(
                    Intent::Unintentional,
                    StatusCode::NOT_APPLICABLE,
                    vec![(DeviceState::PerformingOta, false)],
                ));
                info!(entity = %self.entity, ?reason, "firmware update ended");
            } else if is(&slots.anon) {
                slots.anon = None;
            }
        }
        self.run_effects(effects);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::app::UpdateLoop;
    use crate::impls::RecordingAssertions;

    #[derive(Default)]
    struct Host {
        connected: AtomicBool,
        states: Mutex<Vec<Vec<(DeviceState, bool)>>>,
        setting_up: AtomicBool,
        notifications: Mutex<u32>,
        initialized: Mutex<Vec<StatusCode>>,
        disconnects: Mutex<Vec<(DisconnectCause, Option<ReadWriteResult>)>>,
        /// Drop the link and cancel everything on the next state update.
        drop_on_update: AtomicBool,
        manager: Mutex<Weak<TransactionManager>>,
    }

    impl TransactionHost for Host {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn is_any(&self, _states: &[DeviceState]) -> bool {
            self.setting_up.load(Ordering::SeqCst)
        }
        fn update_state(&self, _intent: Intent, _status: StatusCode, pairs: &[(DeviceState, bool)]) {
            self.states.lock().unwrap().push(pairs.to_vec());
            if self.drop_on_update.swap(false, Ordering::SeqCst) {
                self.connected.store(false, Ordering::SeqCst);
                let manager = self.manager.lock().unwrap().upgrade();
                if let Some(manager) = manager {
                    manager.cancel_all();
                }
            }
        }
        fn enable_notifications(&self) {
            *self.notifications.lock().unwrap() += 1;
        }
        fn on_fully_initialized(&self, status: StatusCode) {
            self.initialized.lock().unwrap().push(status);
        }
        fn disconnect_with_reason(&self, cause: DisconnectCause, failure: Option<ReadWriteResult>) {
            self.disconnects.lock().unwrap().push((cause, failure));
        }
        fn last_connect_intent(&self) -> Intent {
            Intent::Intentional
        }
    }

    /// Keeps its handle so the test decides when it ends.
    #[derive(Default)]
    struct Manual {
        atomic: bool,
        handle: Mutex<Option<TxnHandle>>,
        ticks: Mutex<Vec<Duration>>,
        cancelled: AtomicBool,
    }

    impl Manual {
        fn handle(&self) -> TxnHandle {
            self.handle.lock().unwrap().clone().unwrap()
        }
    }

    impl Transaction for Manual {
        fn needs_atomicity(&self) -> bool {
            self.atomic
        }
        fn start(&self, handle: TxnHandle) {
            *self.handle.lock().unwrap() = Some(handle);
        }
        fn update(&self, elapsed: Duration, _handle: &TxnHandle) {
            self.ticks.lock().unwrap().push(elapsed);
        }
        fn on_cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    struct Fixture {
        host: Arc<Host>,
        manager: Arc<TransactionManager>,
        update_loop: UpdateLoop,
        assertions: Arc<RecordingAssertions>,
    }

    fn fixture() -> Fixture {
        let assertions = Arc::new(RecordingAssertions::default());
        let update_loop = UpdateLoop::new(assertions.clone());
        let host = Arc::new(Host::default());
        host.connected.store(true, Ordering::SeqCst);
        let weak_host: Weak<dyn TransactionHost> = Arc::downgrade(&host) as Weak<dyn TransactionHost>;
        let manager = TransactionManager::new(
            EntityId::generate(),
            weak_host,
            update_loop.handle(),
            assertions.clone(),
        );
        *host.manager.lock().unwrap() = Arc::downgrade(&manager);
        Fixture {
            host,
            manager,
            update_loop,
            assertions,
        }
    }

    #[test]
    fn no_transactions_goes_straight_to_initialized() {
        let fx = fixture();
        fx.manager.on_connect(None, None);
        fx.manager.run_auth_or_init_if_needed(StatusCode(0));

        assert_eq!(*fx.host.notifications.lock().unwrap(), 1);
        assert_eq!(*fx.host.initialized.lock().unwrap(), vec![StatusCode(0)]);
        assert!(fx.manager.current().is_none());
    }

    #[test]
    fn auth_success_moves_to_init_atomically() {
        let fx = fixture();
        let auth = Arc::new(Manual::default());
        let init = Arc::new(Manual::default());
        fx.manager.on_connect(Some(auth.clone()), Some(init.clone()));
        fx.manager.run_auth_or_init_if_needed(StatusCode::SUCCESS);
        assert_eq!(fx.manager.current().map(|c| c.1), Some(TxnRole::Auth));

        auth.handle().succeed();

        let states = fx.host.states.lock().unwrap().clone();
        assert_eq!(states[0], vec![(DeviceState::Authenticating, true)]);
        assert_eq!(
            states[1],
            vec![
                (DeviceState::Authenticating, false),
                (DeviceState::Authenticated, true),
                (DeviceState::Initializing, true),
            ]
        );
        assert_eq!(fx.manager.current().map(|c| c.1), Some(TxnRole::Init));
        assert!(init.handle().is_running());

        init.handle().succeed();
        assert_eq!(fx.host.initialized.lock().unwrap().len(), 1);
        assert!(fx.manager.current().is_none());
        assert!(fx.assertions.messages().is_empty());
    }

    #[test]
    fn init_only_enables_notifications_before_starting() {
        let fx = fixture();
        let init = Arc::new(Manual::default());
        fx.manager.on_connect(None, Some(init.clone()));
        fx.manager.run_auth_or_init_if_needed(StatusCode::SUCCESS);

        assert_eq!(*fx.host.notifications.lock().unwrap(), 1);
        assert_eq!(
            fx.host.states.lock().unwrap()[0],
            vec![(DeviceState::Authenticated, true), (DeviceState::Initializing, true)]
        );
        assert!(init.handle().is_running());
    }

    #[test]
    fn init_failure_disconnects_with_cause_and_clears_slot() {
        let fx = fixture();
        let init = Arc::new(Manual::default());
        fx.manager.on_connect(None, Some(init.clone()));
        fx.manager.run_auth_or_init_if_needed(StatusCode::SUCCESS);

        init.handle().fail(None);

        let disconnects = fx.host.disconnects.lock().unwrap();
        assert_eq!(disconnects[0].0, DisconnectCause::InitializationFailed);
        assert!(fx.manager.current().is_none());
    }

    #[test]
    fn auth_failure_attaches_recorded_read_write_failure() {
        let fx = fixture();
        let auth = Arc::new(Manual::default());
        fx.manager.on_connect(Some(auth.clone()), None);
        fx.manager.run_auth_or_init_if_needed(StatusCode::SUCCESS);
        fx.host.setting_up.store(true, Ordering::SeqCst);
        let broken = ReadWriteResult::failure("auth-char", StatusCode(137));
        fx.manager.on_read_write_result(&broken);

        auth.handle().fail(None);

        let disconnects = fx.host.disconnects.lock().unwrap();
        assert_eq!(
            disconnects[0],
            (DisconnectCause::AuthenticationFailed, Some(broken))
        );
        assert!(fx.manager.last_failure().is_none());
    }

    #[test]
    fn read_write_failure_outside_setup_is_not_kept() {
        let fx = fixture();
        fx.manager
            .on_read_write_result(&ReadWriteResult::failure("c", StatusCode(1)));
        assert!(fx.manager.last_failure().is_none());

        fx.host.setting_up.store(true, Ordering::SeqCst);
        fx.manager
            .on_read_write_result(&ReadWriteResult::failure("c", StatusCode(1)));
        assert!(fx.manager.last_failure().is_some());
        fx.manager.on_read_write_callbacks_called();
        assert!(fx.manager.last_failure().is_none());
    }

    #[test]
    fn ota_end_clears_performing_ota_without_disconnect() {
        let fx = fixture();
        let ota = Arc::new(Manual::default());
        fx.manager.start_ota(ota.clone());
        assert!(fx.manager.is_running(TxnRole::Ota));

        ota.handle().fail(None);

        let states = fx.host.states.lock().unwrap().clone();
        assert_eq!(states[0], vec![(DeviceState::PerformingOta, true)]);
        assert_eq!(states[1], vec![(DeviceState::PerformingOta, false)]);
        assert!(fx.host.disconnects.lock().unwrap().is_empty());
    }

    #[test]
    fn cancel_while_disconnected_is_benign() {
        let fx = fixture();
        let anon = Arc::new(Manual::default());
        fx.manager.perform_anonymous(anon.clone());
        fx.host.connected.store(false, Ordering::SeqCst);

        fx.manager.cancel_all();

        assert!(anon.cancelled.load(Ordering::SeqCst));
        assert!(fx.manager.current().is_none());
        assert!(fx.assertions.messages().is_empty());
    }

    #[test]
    fn success_while_disconnected_is_reported() {
        let fx = fixture();
        let anon = Arc::new(Manual::default());
        fx.manager.perform_anonymous(anon.clone());
        fx.host.connected.store(false, Ordering::SeqCst);

        anon.handle().succeed();

        assert_eq!(fx.assertions.messages().len(), 1);
        assert!(fx.manager.current().is_none());
    }

    #[test]
    fn second_transaction_while_connected_is_reported() {
        let fx = fixture();
        fx.manager.perform_anonymous(Arc::new(Manual::default()));
        fx.manager.perform_anonymous(Arc::new(Manual::default()));
        assert_eq!(fx.assertions.messages().len(), 1);
    }

    #[test]
    fn update_reaches_every_running_transaction() {
        let fx = fixture();
        let ota = Arc::new(Manual::default());
        let anon = Arc::new(Manual::default());
        fx.manager.start_ota(ota.clone());
        fx.manager.perform_anonymous(anon.clone());

        fx.manager.update(Duration::from_millis(20));

        assert_eq!(ota.ticks.lock().unwrap().len(), 1);
        assert_eq!(anon.ticks.lock().unwrap().len(), 1);
    }

    #[test]
    fn atomic_transaction_holds_and_releases_queue_lock() {
        let mut fx = fixture();
        let anon = Arc::new(Manual {
            atomic: true,
            ..Manual::default()
        });
        fx.manager.perform_anonymous(anon.clone());
        fx.update_loop.step(Duration::from_millis(20));
        let ctx = TaskContext::Entity(anon.handle().entity());
        assert!(fx.update_loop.queue().is_current(TaskKind::TxnLock, ctx));

        anon.handle().succeed();
        fx.update_loop.drain();

        assert!(!fx.update_loop.queue().is_current_or_queued(TaskKind::TxnLock, ctx));
    }

    #[test]
    fn pending_queue_lock_is_cleared_on_end() {
        let mut fx = fixture();
        let anon = Arc::new(Manual {
            atomic: true,
            ..Manual::default()
        });
        fx.manager.perform_anonymous(anon.clone());
        anon.handle().succeed();
        fx.update_loop.drain();

        let ctx = TaskContext::Entity(anon.handle().entity());
        assert!(!fx.update_loop.queue().is_current_or_queued(TaskKind::TxnLock, ctx));
    }

    #[test]
    fn disconnect_between_claim_and_start_never_starts_auth() {
        let fx = fixture();
        let auth = Arc::new(Manual::default());
        fx.manager.on_connect(Some(auth.clone()), None);
        fx.host.drop_on_update.store(true, Ordering::SeqCst);

        fx.manager.run_auth_or_init_if_needed(StatusCode::SUCCESS);

        assert!(auth.handle.lock().unwrap().is_none());
        assert!(!fx.manager.is_running(TxnRole::Auth));
        assert!(fx.manager.current().is_none());
        assert!(fx.assertions.messages().is_empty());
    }

    #[test]
    fn start_is_skipped_once_the_link_is_down() {
        let fx = fixture();
        fx.host.connected.store(false, Ordering::SeqCst);
        let anon = Arc::new(Manual::default());

        let handle = fx.manager.perform_anonymous(anon.clone());

        assert!(!handle.is_running());
        assert!(anon.handle.lock().unwrap().is_none());
    }

    #[test]
    fn late_end_leaves_another_transactions_lock_alone() {
        let mut fx = fixture();
        let first = Arc::new(Manual {
            atomic: true,
            ..Manual::default()
        });
        let second = Arc::new(Manual {
            atomic: true,
            ..Manual::default()
        });
        fx.manager.perform_anonymous(first.clone());
        fx.manager.perform_anonymous(second.clone());
        fx.update_loop.step(Duration::from_millis(20));
        let ctx = TaskContext::Entity(first.handle().entity());

        first.handle().succeed();
        fx.update_loop.step(Duration::from_millis(20));

        let holder = fx
            .update_loop
            .queue()
            .get(TaskKind::TxnLock, ctx)
            .and_then(|task| task.transaction());
        assert_eq!(holder, Some(second.handle().id()));
    }
}
