//! Reconnection loop: repeated connection attempts paced by the filters.
//!
//! One loop per phase (short-term, long-term). The loop decides nothing about
//! radios or states; it tells its owner what to do next through
//! [`ReconnectStep`] and the owner acts on it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ConnectionFailure, EntityId};
use crate::policy::{
    PersistPlease, ReconnectPersistEvent, ReconnectPersistFilter, ReconnectRequestEvent,
    ReconnectRequestFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPhase {
    ShortTerm,
    LongTerm,
}

/// What the owner should do after feeding the loop an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    /// Not running.
    Idle,
    /// Counting down to the next attempt.
    Waiting,
    /// An attempt is in flight.
    Attempting,
    /// Start a connection attempt now.
    AttemptNow,
    /// The loop stopped on a filter's word.
    GaveUp,
}

pub struct ReconnectLoop {
    entity: EntityId,
    phase: ReconnectPhase,
    request: Option<Arc<dyn ReconnectRequestFilter>>,
    persist: Option<Arc<dyn ReconnectPersistFilter>>,
    running: bool,
    failure_count: u32,
    total_time: Duration,
    previous_delay: Duration,
    /// Time left before the next attempt; `None` while one is in flight.
    countdown: Option<Duration>,
    last_failure: Option<ConnectionFailure>,
}

impl ReconnectLoop {
    /// A missing filter stops the loop at the first decision.
    pub fn new(
        entity: EntityId,
        phase: ReconnectPhase,
        request: Option<Arc<dyn ReconnectRequestFilter>>,
        persist: Option<Arc<dyn ReconnectPersistFilter>>,
    ) -> Self {
        Self {
            entity,
            phase,
            request,
            persist,
            running: false,
            failure_count: 0,
            total_time: Duration::ZERO,
            previous_delay: Duration::ZERO,
            countdown: None,
            last_failure: None,
        }
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Resets the counters and asks for the first delay.
    pub fn start(&mut self, failure: Option<ConnectionFailure>) -> ReconnectStep {
        self.running = true;
        self.failure_count = 0;
        self.total_time = Duration::ZERO;
        self.previous_delay = Duration::ZERO;
        self.countdown = None;
        self.last_failure = failure;
        info!(entity = %self.entity, phase = ?self.phase, "reconnect loop started");
        self.schedule()
    }

    pub fn stop(&mut self) {
        if self.running {
            debug!(entity = %self.entity, phase = ?self.phase, failures = self.failure_count, "reconnect loop stopped");
        }
        self.running = false;
        self.countdown = None;
    }

    /// An attempt made on behalf of this loop failed.
    pub fn on_connection_failed(&mut self, failure: ConnectionFailure) -> ReconnectStep {
        if !self.running {
            return ReconnectStep::Idle;
        }
        self.failure_count += 1;
        self.last_failure = Some(failure);
        self.schedule()
    }

    /// Advances the clocks, consults the persist filter, and reports whether
    /// it is time for the next attempt.
    pub fn update(&mut self, elapsed: Duration, is_connecting: bool) -> ReconnectStep {
        if !self.running {
            return ReconnectStep::Idle;
        }
        self.total_time += elapsed;

        let event = ReconnectPersistEvent {
            entity: self.entity,
            failure_count: self.failure_count,
            total_time_reconnecting: self.total_time,
            previous_delay: self.previous_delay,
            connection_failure: self.last_failure.clone(),
            is_connecting,
        };
        let persist = self
            .persist
            .as_ref()
            .map_or(PersistPlease::Stop, |filter| filter.on_event(&event));
        if persist == PersistPlease::Stop {
            return self.give_up();
        }

        match self.countdown {
            None => ReconnectStep::Attempting,
            Some(left) if left <= elapsed => {
                self.countdown = None;
                ReconnectStep::AttemptNow
            }
            Some(left) => {
                self.countdown = Some(left - elapsed);
                ReconnectStep::Waiting
            }
        }
    }

    fn schedule(&mut self) -> ReconnectStep {
        let event = ReconnectRequestEvent {
            entity: self.entity,
            failure_count: self.failure_count,
            total_time_reconnecting: self.total_time,
            previous_delay: self.previous_delay,
            connection_failure: self.last_failure.clone(),
        };
        let delay = self
            .request
            .as_ref()
            .and_then(|filter| filter.on_event(&event).delay());

        match delay {
            None => self.give_up(),
            Some(delay) => {
                self.previous_delay = delay;
                if delay.is_zero() {
                    self.countdown = None;
                    ReconnectStep::AttemptNow
                } else {
                    debug!(entity = %self.entity, phase = ?self.phase, delay_ms = delay.as_millis() as u64, "next reconnect attempt scheduled");
                    self.countdown = Some(delay);
                    ReconnectStep::Waiting
                }
            }
        }
    }

    fn give_up(&mut self) -> ReconnectStep {
        info!(
            entity = %self.entity,
            phase = ?self.phase,
            failures = self.failure_count,
            total_ms = self.total_time.as_millis() as u64,
            "reconnect loop gave up"
        );
        self.running = false;
        self.countdown = None;
        ReconnectStep::GaveUp
    }
}

impl fmt::Debug for ReconnectLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectLoop")
            .field("entity", &self.entity)
            .field("phase", &self.phase)
            .field("running", &self.running)
            .field("failure_count", &self.failure_count)
            .field("total_time", &self.total_time)
            .field("countdown", &self.countdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StatusCode;
    use crate::policy::{DefaultReconnectPersistFilter, DefaultReconnectRequestFilter, ReconnectPlease};

    const TICK: Duration = Duration::from_millis(500);

    fn short_term() -> ReconnectLoop {
        ReconnectLoop::new(
            EntityId::generate(),
            ReconnectPhase::ShortTerm,
            Some(Arc::new(DefaultReconnectRequestFilter::short_term())),
            Some(Arc::new(DefaultReconnectPersistFilter::short_term())),
        )
    }

    fn failed() -> ConnectionFailure {
        ConnectionFailure::from_status(StatusCode(133))
    }

    #[test]
    fn first_attempt_is_instant() {
        let mut rl = short_term();
        assert_eq!(rl.start(None), ReconnectStep::AttemptNow);
        assert!(rl.is_running());
        assert_eq!(rl.update(TICK, true), ReconnectStep::Attempting);
    }

    #[test]
    fn failure_waits_for_rate_then_attempts() {
        let mut rl = short_term();
        rl.start(None);
        assert_eq!(rl.on_connection_failed(failed()), ReconnectStep::Waiting);
        assert_eq!(rl.failure_count(), 1);

        assert_eq!(rl.update(TICK, false), ReconnectStep::Waiting);
        assert_eq!(rl.update(TICK, false), ReconnectStep::AttemptNow);
    }

    #[test]
    fn short_term_gives_up_after_timeout_when_idle() {
        let mut rl = short_term();
        rl.start(None);
        rl.on_connection_failed(failed());

        let mut last = ReconnectStep::Waiting;
        for _ in 0..12 {
            last = rl.update(TICK, false);
            if last == ReconnectStep::GaveUp {
                break;
            }
        }
        assert_eq!(last, ReconnectStep::GaveUp);
        assert!(!rl.is_running());
        assert_eq!(rl.update(TICK, false), ReconnectStep::Idle);
    }

    #[test]
    fn attempt_in_flight_keeps_loop_alive_past_timeout() {
        let mut rl = short_term();
        rl.start(None);
        assert_eq!(
            rl.update(Duration::from_secs(30), true),
            ReconnectStep::Attempting
        );
        assert!(rl.is_running());
    }

    #[test]
    fn missing_filters_stop_immediately() {
        let mut rl = ReconnectLoop::new(EntityId::generate(), ReconnectPhase::LongTerm, None, None);
        assert_eq!(rl.start(None), ReconnectStep::GaveUp);
    }

    struct StopAfter(u32);

    impl ReconnectRequestFilter for StopAfter {
        fn on_event(&self, event: &ReconnectRequestEvent) -> ReconnectPlease {
            if event.failure_count >= self.0 {
                ReconnectPlease::StopRetrying
            } else {
                ReconnectPlease::RetryInstantly
            }
        }
    }

    #[test]
    fn request_filter_can_stop_on_failure() {
        let mut rl = ReconnectLoop::new(
            EntityId::generate(),
            ReconnectPhase::LongTerm,
            Some(Arc::new(StopAfter(2))),
            Some(Arc::new(DefaultReconnectPersistFilter::long_term())),
        );
        assert_eq!(rl.start(None), ReconnectStep::AttemptNow);
        assert_eq!(rl.on_connection_failed(failed()), ReconnectStep::AttemptNow);
        assert_eq!(rl.on_connection_failed(failed()), ReconnectStep::GaveUp);
    }

    #[test]
    fn stopped_loop_ignores_failures() {
        let mut rl = short_term();
        rl.start(None);
        rl.stop();
        assert_eq!(rl.on_connection_failed(failed()), ReconnectStep::Idle);
    }
}
