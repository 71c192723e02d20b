//! Tracker flavor for client-role devices.

use std::sync::Arc;

use tracing::trace;

use super::{StateChange, StateTracker, TrackerHooks};
use crate::domain::{describe_bits, DeviceState, EntityId, Intent};
use crate::ports::{AssertionReporter, RadioBackend};

pub const DEVICE_INITIAL_STATES: &[(DeviceState, bool)] = &[
    (DeviceState::Discovered, true),
    (DeviceState::Disconnected, true),
    (DeviceState::Unbonded, true),
];

/// Rejects claims of being past `Connecting` while the stack holds no
/// native connection.
pub struct DeviceHooks {
    pub device: EntityId,
    pub radio: Arc<dyn RadioBackend>,
}

impl TrackerHooks<DeviceState> for DeviceHooks {
    fn check_append(&self, state: DeviceState, _bits: u64) -> Result<(), String> {
        if state > DeviceState::Connecting && !self.radio.is_natively_connected(self.device) {
            return Err(format!(
                "{} entering {state:?} without a native connection",
                self.device
            ));
        }
        Ok(())
    }

    fn on_state_change(&self, change: &StateChange<DeviceState>) {
        trace!(
            device = %self.device,
            to = %describe_bits::<DeviceState>(change.new_bits),
            "device state"
        );
    }
}

/// `intent` is the last disconnect's intent, usually read back from disk.
pub fn device_state_tracker(
    device: EntityId,
    radio: Arc<dyn RadioBackend>,
    intent: Intent,
    assertions: Arc<dyn AssertionReporter>,
) -> StateTracker<DeviceState> {
    StateTracker::new(
        DEVICE_INITIAL_STATES,
        intent,
        Arc::new(DeviceHooks { device, radio }),
        assertions,
    )
}
