//! Tracker flavor for server-role peers.

use std::sync::Arc;

use tracing::trace;

use super::{StateChange, StateTracker, TrackerHooks};
use crate::domain::{describe_bits, DeviceState, EntityId, Intent};
use crate::ports::AssertionReporter;

/// Server peers start undiscovered and disconnected.
pub const SERVER_INITIAL_STATES: &[(DeviceState, bool)] = &[
    (DeviceState::Undiscovered, true),
    (DeviceState::Disconnected, true),
];

/// Server hooks put no constraint on appends: a rogue disconnect can land
/// natively before its callback reaches the loop, so "connected without a
/// native connection" is a legal transient here.
#[derive(Debug, Clone, Copy)]
pub struct ServerHooks {
    pub server: EntityId,
}

impl TrackerHooks<DeviceState> for ServerHooks {
    fn on_state_change(&self, change: &StateChange<DeviceState>) {
        trace!(
            server = %self.server,
            to = %describe_bits::<DeviceState>(change.new_bits),
            "server state"
        );
    }
}

pub fn server_state_tracker(
    server: EntityId,
    assertions: Arc<dyn AssertionReporter>,
) -> StateTracker<DeviceState> {
    StateTracker::new(
        SERVER_INITIAL_STATES,
        Intent::Implicit,
        Arc::new(ServerHooks { server }),
        assertions,
    )
}
