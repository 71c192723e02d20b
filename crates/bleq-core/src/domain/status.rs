//! Radio-stack status codes and failure details carried alongside outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw status code reported by the underlying stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);
    /// The change was not caused by a stack callback.
    pub const NOT_APPLICABLE: StatusCode = StatusCode(-1);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NOT_APPLICABLE => f.write_str("n/a"),
            StatusCode(code) => write!(f, "{code}"),
        }
    }
}

/// Outcome of one characteristic read or write, as reported by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadWriteResult {
    pub target: String,
    pub status: StatusCode,
    pub success: bool,
}

impl ReadWriteResult {
    pub fn success(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: StatusCode::SUCCESS,
            success: true,
        }
    }

    pub fn failure(target: impl Into<String>, status: StatusCode) -> Self {
        Self {
            target: target.into(),
            status,
            success: false,
        }
    }
}

/// Why an entity was disconnected by the core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCause {
    ExplicitDisconnect,
    AuthenticationFailed,
    InitializationFailed,
    ReconnectGaveUp,
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectCause::ExplicitDisconnect => "explicit disconnect",
            DisconnectCause::AuthenticationFailed => "authentication failed",
            DisconnectCause::InitializationFailed => "initialization failed",
            DisconnectCause::ReconnectGaveUp => "reconnect gave up",
        };
        f.write_str(s)
    }
}

/// Details of a failed connection attempt, fed to the reconnect filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFailure {
    pub status: StatusCode,
    /// Root cause when a transaction brought the connection down.
    pub txn_failure: Option<ReadWriteResult>,
}

impl ConnectionFailure {
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            txn_failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_applicable_displays_as_na() {
        assert_eq!(StatusCode::NOT_APPLICABLE.to_string(), "n/a");
        assert_eq!(StatusCode(133).to_string(), "133");
    }

    #[test]
    fn disconnect_cause_reads_naturally() {
        assert_eq!(
            DisconnectCause::InitializationFailed.to_string(),
            "initialization failed"
        );
    }
}
