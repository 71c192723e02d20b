//! Policy filters: injected, side-effect-free decision points.

pub mod reconnect;
pub mod timeout;

pub use self::reconnect::{
    DefaultReconnectPersistFilter, DefaultReconnectRequestFilter, PersistPlease,
    ReconnectPersistEvent, ReconnectPersistFilter, ReconnectPlease, ReconnectRequestEvent,
    ReconnectRequestFilter,
};
pub use self::timeout::{
    DefaultTimeoutRequestFilter, TimeoutPlease, TimeoutRequestEvent, TimeoutRequestFilter,
};
