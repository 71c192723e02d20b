//! Reconnect-Request and Reconnect-Persist filters.
//!
//! Request decides *when* the next attempt happens; Persist decides whether
//! the loop keeps going at all. Both are consulted by the reconnection loop,
//! once per short-term or long-term phase.

use std::time::Duration;

use crate::domain::{ConnectionFailure, EntityId};

/// Rate between long-term reconnect attempts after the first.
pub const LONG_TERM_ATTEMPT_RATE: Duration = Duration::from_secs(3);
/// Rate between short-term reconnect attempts after the first.
pub const SHORT_TERM_ATTEMPT_RATE: Duration = Duration::from_secs(1);
/// How long the short-term phase persists. The long-term phase never times out.
pub const SHORT_TERM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectRequestEvent {
    pub entity: EntityId,
    /// Failed attempts so far in this phase. `0` on the very first request.
    pub failure_count: u32,
    pub total_time_reconnecting: Duration,
    /// Delay returned last time, `Duration::ZERO` on the first request.
    pub previous_delay: Duration,
    pub connection_failure: Option<ConnectionFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPersistEvent {
    pub entity: EntityId,
    pub failure_count: u32,
    pub total_time_reconnecting: Duration,
    pub previous_delay: Duration,
    pub connection_failure: Option<ConnectionFailure>,
    /// A connection attempt is in flight right now.
    pub is_connecting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPlease {
    RetryInstantly,
    RetryIn(Duration),
    StopRetrying,
}

impl ReconnectPlease {
    /// Delay before the next attempt, `None` to stop.
    pub fn delay(self) -> Option<Duration> {
        match self {
            ReconnectPlease::RetryInstantly => Some(Duration::ZERO),
            ReconnectPlease::RetryIn(d) => Some(d),
            ReconnectPlease::StopRetrying => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPlease {
    Persist,
    Stop,
}

impl PersistPlease {
    pub fn persist_if(condition: bool) -> Self {
        if condition {
            PersistPlease::Persist
        } else {
            PersistPlease::Stop
        }
    }
}

pub trait ReconnectRequestFilter: Send + Sync {
    fn on_event(&self, event: &ReconnectRequestEvent) -> ReconnectPlease;
}

pub trait ReconnectPersistFilter: Send + Sync {
    fn on_event(&self, event: &ReconnectPersistEvent) -> PersistPlease;
}

/// Instant first retry, then a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultReconnectRequestFilter {
    rate: Duration,
}

impl DefaultReconnectRequestFilter {
    pub fn new(rate: Duration) -> Self {
        Self { rate }
    }

    pub fn short_term() -> Self {
        Self::new(SHORT_TERM_ATTEMPT_RATE)
    }

    pub fn long_term() -> Self {
        Self::new(LONG_TERM_ATTEMPT_RATE)
    }
}

impl ReconnectRequestFilter for DefaultReconnectRequestFilter {
    fn on_event(&self, event: &ReconnectRequestEvent) -> ReconnectPlease {
        if event.failure_count == 0 {
            ReconnectPlease::RetryInstantly
        } else {
            ReconnectPlease::RetryIn(self.rate)
        }
    }
}

/// Persists while connecting, otherwise until `timeout` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultReconnectPersistFilter {
    /// `None` never times out.
    timeout: Option<Duration>,
}

impl DefaultReconnectPersistFilter {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub fn short_term() -> Self {
        Self::new(Some(SHORT_TERM_TIMEOUT))
    }

    pub fn long_term() -> Self {
        Self::new(None)
    }
}

impl ReconnectPersistFilter for DefaultReconnectPersistFilter {
    fn on_event(&self, event: &ReconnectPersistEvent) -> PersistPlease {
        // an attempt in flight always gets to finish; it is the last one if it fails
        if event.is_connecting {
            return PersistPlease::Persist;
        }
        match self.timeout {
            Some(timeout) => PersistPlease::persist_if(event.total_time_reconnecting < timeout),
            None => PersistPlease::Persist,
        }
    }
}
