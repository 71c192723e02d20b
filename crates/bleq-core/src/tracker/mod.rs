//! State tracking for connectable entities.

pub mod device_tracker;
pub mod server_tracker;
pub mod state_tracker;

pub use self::device_tracker::{device_state_tracker, DeviceHooks, DEVICE_INITIAL_STATES};
pub use self::server_tracker::{server_state_tracker, ServerHooks, SERVER_INITIAL_STATES};
pub use self::state_tracker::{NoHooks, StateChange, StateListener, StateTracker, TrackerHooks};
