//! Impls - implementations of the ports that ship with the core.
//!
//! - **LogAssertions / RecordingAssertions**: invariant-violation reporters
//! - **InMemoryIntentStore**: volatile disconnect-intent store
//! - **JsonFileIntentStore**: disconnect-intent store backed by one JSON file

pub mod assertions;
pub mod inmem_intent;
pub mod json_intent;

pub use self::assertions::{LogAssertions, RecordingAssertions};
pub use self::inmem_intent::InMemoryIntentStore;
pub use self::json_intent::JsonFileIntentStore;
