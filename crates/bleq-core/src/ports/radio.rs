//! RadioBackend port - the native stack, as seen by the entities.
//!
//! Calls are fire-and-forget. Outcomes come back through the entity's
//! `on_native_*` callbacks, from whatever thread the stack uses.

use crate::domain::EntityId;

pub trait RadioBackend: Send + Sync {
    /// Starts a native connection to a client-role device.
    fn connect(&self, device: EntityId);

    /// Starts a native disconnect from a client-role device.
    fn disconnect(&self, device: EntityId);

    fn is_natively_connected(&self, entity: EntityId) -> bool;

    /// A native disconnect has been requested and not yet reported back.
    fn is_natively_disconnecting(&self, entity: EntityId) -> bool;

    /// Turns on the notifications the application configured for `device`.
    fn enable_notifications(&self, device: EntityId);

    /// Drops the connection a server-role peer holds to us.
    fn cancel_server_connection(&self, server: EntityId);
}
