//! AssertionReporter port - where invariant violations go.
//!
//! Violations reflect degraded callback ordering from the radio stack, not
//! corrupt memory, so they are reported and the offending operation becomes a
//! no-op. Nothing here panics.

/// Receives programming-invariant violations.
pub trait AssertionReporter: Send + Sync {
    fn report(&self, message: &str);
}

/// Reports `message` when `condition` is false. Returns `condition`.
///
/// ```ignore
/// if !check(&*reporter, queue.current.is_none(), "dequeue with a current task") {
///     return;
/// }
/// ```
pub fn check(reporter: &dyn AssertionReporter, condition: bool, message: &str) -> bool {
    if !condition {
        reporter.report(message);
    }
    condition
}
