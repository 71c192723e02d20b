//! Connectable entities: client-role devices and server-role peers.

pub mod device;
pub mod server;
pub mod tasks;

use std::sync::Arc;

use crate::app::SchedulerHandle;
use crate::domain::ManagerId;
use crate::ports::{AssertionReporter, DisconnectIntentStore, RadioBackend};

pub use self::device::Device;
pub use self::server::{Server, ServerDisconnectTask};
pub use self::tasks::{ConnectTask, DisconnectTask};

/// Shared collaborators every entity of one manager is built with.
#[derive(Clone)]
pub struct EntityEnv {
    pub manager: ManagerId,
    pub scheduler: SchedulerHandle,
    pub radio: Arc<dyn RadioBackend>,
    pub assertions: Arc<dyn AssertionReporter>,
    /// Where last-disconnect intents are kept, if anywhere.
    pub intent_store: Option<Arc<dyn DisconnectIntentStore>>,
}
