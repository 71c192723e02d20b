//! Domain model (ids, task kinds, intents, status codes, entity states).

pub mod ids;
pub mod intent;
pub mod state;
pub mod status;
pub mod task_kind;

pub use ids::{EntityId, ManagerId, TaskId, TxnId};
pub use intent::Intent;
pub use state::{describe_bits, DeviceState, StateFlag, CONNECTION_PHASE_STATES};
pub use status::{ConnectionFailure, DisconnectCause, ReadWriteResult, StatusCode};
pub use task_kind::{TaskContext, TaskKind, TaskPriority};
