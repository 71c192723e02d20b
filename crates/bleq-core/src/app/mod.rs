//! App - the queue-driving context.
//!
//! # Main components
//! - **UpdateLoop**: owns the task queue, applies commands, ticks updatables
//! - **SchedulerHandle**: clonable, thread-safe way in
//! - **RunningLoop**: a loop spawned onto tokio

pub mod update_loop;

pub use self::update_loop::{RunningLoop, SchedulerHandle, UpdateLoop};
