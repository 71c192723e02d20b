use std::time::Duration;

/// Something the update loop ticks after the task queue on every step.
pub trait Updatable: Send + Sync {
    fn update(&self, elapsed: Duration);
}
