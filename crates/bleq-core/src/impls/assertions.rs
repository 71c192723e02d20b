use std::sync::{Mutex, PoisonError};

use tracing::error;

use crate::ports::AssertionReporter;

/// Logs every violation at `error` level and carries on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAssertions;

impl AssertionReporter for LogAssertions {
    fn report(&self, message: &str) {
        error!(assertion = message, "invariant violated");
    }
}

/// Keeps every violation so tests can look at them. Also logs.
#[derive(Debug, Default)]
pub struct RecordingAssertions {
    messages: Mutex<Vec<String>>,
}

impl RecordingAssertions {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AssertionReporter for RecordingAssertions {
    fn report(&self, message: &str) {
        LogAssertions.report(message);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}
