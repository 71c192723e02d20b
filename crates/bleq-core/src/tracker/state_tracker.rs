//! Bit-vector state tracker with intent attribution.
//!
//! Mutations are atomic per call: every `(state, value)` pair of one call is
//! applied under the lock together, so callers clear the outgoing state in the
//! same call that sets the incoming one (`Connected=false, Disconnected=true`).
//! Hooks run after the lock is released.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::domain::{describe_bits, Intent, StatusCode, StateFlag};
use crate::ports::AssertionReporter;

/// One applied change, as handed to hooks and listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange<S> {
    pub old_bits: u64,
    pub new_bits: u64,
    /// Bit set where the last change to that state was intentional.
    pub intent_mask: u64,
    pub intent: Intent,
    pub status: StatusCode,
    _states: PhantomData<S>,
}

impl<S: StateFlag> StateChange<S> {
    pub fn did_enter(&self, state: S) -> bool {
        !state.is_set_in(self.old_bits) && state.is_set_in(self.new_bits)
    }

    pub fn did_exit(&self, state: S) -> bool {
        state.is_set_in(self.old_bits) && !state.is_set_in(self.new_bits)
    }

    pub fn is(&self, state: S) -> bool {
        state.is_set_in(self.new_bits)
    }
}

/// Entity-specific behavior plugged into a tracker.
pub trait TrackerHooks<S: StateFlag>: Send + Sync {
    /// Validates a state about to become true. `Err` is reported as an
    /// assertion; the state is still applied.
    fn check_append(&self, _state: S, _bits: u64) -> Result<(), String> {
        Ok(())
    }

    /// Internal handler. Runs before the application listener.
    fn on_state_change(&self, _change: &StateChange<S>) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<S: StateFlag> TrackerHooks<S> for NoHooks {}

/// Application-facing listener.
pub trait StateListener<S: StateFlag>: Send + Sync {
    fn on_state_change(&self, change: &StateChange<S>);
}

#[derive(Debug, Clone, Copy, Default)]
struct Bits {
    states: u64,
    intent_mask: u64,
}

pub struct StateTracker<S: StateFlag> {
    bits: Mutex<Bits>,
    hooks: Arc<dyn TrackerHooks<S>>,
    listener: Mutex<Option<Arc<dyn StateListener<S>>>>,
    assertions: Arc<dyn AssertionReporter>,
}

impl<S: StateFlag> StateTracker<S> {
    /// Starts with `initial` already applied; no hooks fire for it.
    pub fn new(
        initial: &[(S, bool)],
        intent: Intent,
        hooks: Arc<dyn TrackerHooks<S>>,
        assertions: Arc<dyn AssertionReporter>,
    ) -> Self {
        let mut bits = Bits::default();
        apply_pairs(&mut bits, intent, initial);
        Self {
            bits: Mutex::new(bits),
            hooks,
            listener: Mutex::new(None),
            assertions,
        }
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn StateListener<S>>>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Assigns each listed state. Other states are untouched.
    pub fn set(&self, intent: Intent, pairs: &[(S, bool)]) {
        self.update(intent, StatusCode::NOT_APPLICABLE, pairs);
    }

    /// Like [`set`](Self::set), carrying the stack status that caused it.
    ///
    /// Hooks and the listener only hear about changed state bits. A call
    /// that leaves every bit as it was still records `intent` for the listed
    /// states, silently: [`was_intentional`](Self::was_intentional) reflects
    /// it, but nothing is dispatched.
    pub fn update(&self, intent: Intent, status: StatusCode, pairs: &[(S, bool)]) {
        let (old, new) = {
            let mut bits = self.bits.lock().unwrap_or_else(PoisonError::into_inner);
            for &(state, value) in pairs {
                if value
                    && !state.is_set_in(bits.states)
                    && let Err(message) = self.hooks.check_append(state, bits.states)
                {
                    self.assertions.report(&message);
                }
            }
            let old = *bits;
            apply_pairs(&mut bits, intent, pairs);
            (old, *bits)
        };

        if old.states == new.states {
            return;
        }

        let change = StateChange {
            old_bits: old.states,
            new_bits: new.states,
            intent_mask: new.intent_mask,
            intent,
            status,
            _states: PhantomData,
        };
        debug!(
            from = %describe_bits::<S>(change.old_bits),
            to = %describe_bits::<S>(change.new_bits),
            ?intent,
            %status,
            "state change"
        );

        self.hooks.on_state_change(&change);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener.on_state_change(&change);
        }
    }

    pub fn append(&self, state: S, intent: Intent, status: StatusCode) {
        self.update(intent, status, &[(state, true)]);
    }

    pub fn remove(&self, state: S, intent: Intent, status: StatusCode) {
        self.update(intent, status, &[(state, false)]);
    }

    pub fn is(&self, state: S) -> bool {
        state.is_set_in(self.bits())
    }

    pub fn is_any(&self, states: &[S]) -> bool {
        let bits = self.bits();
        states.iter().any(|s| s.is_set_in(bits))
    }

    pub fn bits(&self) -> u64 {
        self.bits.lock().unwrap_or_else(PoisonError::into_inner).states
    }

    pub fn intent_mask(&self) -> u64 {
        self.bits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .intent_mask
    }

    /// Was the last change to `state` intentional?
    pub fn was_intentional(&self, state: S) -> bool {
        state.is_set_in(self.intent_mask())
    }
}

fn apply_pairs<S: StateFlag>(bits: &mut Bits, intent: Intent, pairs: &[(S, bool)]) {
    for &(state, value) in pairs {
        if value {
            bits.states |= state.bit();
        } else {
            bits.states &= !state.bit();
        }
        if intent == Intent::Intentional {
            bits.intent_mask |= state.bit();
        } else {
            bits.intent_mask &= !state.bit();
        }
    }
}

impl<S: StateFlag> fmt::Display for StateTracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe_bits::<S>(self.bits()))
    }
}

impl<S: StateFlag> fmt::Debug for StateTracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateTracker{self}")
    }
}
