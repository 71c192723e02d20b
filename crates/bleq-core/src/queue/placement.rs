//! Priority insertion: where a newly admitted task goes in the pending list.

use super::TaskRecord;
use crate::ports::Task;

/// Index at which `incoming` should be inserted into `pending`.
///
/// Walks back from the tail for as long as `incoming` is more important than
/// the task in front of the candidate slot. Stops at the first task it may not
/// overtake, so equal priorities keep arrival order and unrelated contexts
/// are never jumped by ordinary priorities. Returns `pending.len()` when the
/// task goes to the back.
pub fn soonest_spot(pending: &[TaskRecord], incoming: &dyn Task) -> usize {
    let mut spot = pending.len();
    while spot > 0 && incoming.is_more_important_than(pending[spot - 1].task.as_ref()) {
        spot -= 1;
    }
    spot
}
