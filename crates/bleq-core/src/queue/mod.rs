//! Queue module: task lifecycle, placement rules, and the single-flight queue.

mod command;
mod placement;
mod record;
mod state;
mod task_queue;

pub use command::{Command, CommandReceiver, CommandSender, QueueJob, TaskCompleter};
pub use placement::soonest_spot;
pub use record::TaskRecord;
pub use state::TaskState;
pub use task_queue::{QueueSnapshot, TaskEntry, TaskQueue};
