//! Ports - the seams between the core and the outside world.
//!
//! Each trait is implemented outside the scheduling core: hardware-operation
//! modules implement [`Task`], the platform glue implements [`RadioBackend`],
//! persistence implements [`DisconnectIntentStore`].

pub mod assertions;
pub mod intent_store;
pub mod radio;
pub mod task;
pub mod updatable;

pub use self::assertions::{check, AssertionReporter};
pub use self::intent_store::{DisconnectIntentStore, StoredIntent};
pub use self::radio::RadioBackend;
pub use self::task::{AddedToQueue, ArmContext, CancelToken, Task, TaskTimer};
pub use self::updatable::Updatable;
