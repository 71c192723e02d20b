//! Why a state change happened.

use serde::{Deserialize, Serialize};

/// Cause attribution attached to every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Explicit API call by the application.
    Intentional,
    /// Spontaneous event from the radio stack.
    Unintentional,
    /// Derived from another change.
    Implicit,
}

impl Intent {
    /// Small-integer code used by the persisted intent stores.
    pub fn to_disk_value(self) -> u8 {
        match self {
            Intent::Intentional => 0,
            Intent::Unintentional => 1,
            Intent::Implicit => 2,
        }
    }

    pub fn from_disk_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Intent::Intentional),
            1 => Some(Intent::Unintentional),
            2 => Some(Intent::Implicit),
            _ => None,
        }
    }
}
