//! Named boolean states of a connectable entity and their bit-vector form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named, ordinally-comparable boolean flag that fits in a `u64` bit-vector.
pub trait StateFlag: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every variant, in ordinal order.
    const ALL: &'static [Self];

    fn ordinal(self) -> u32;

    fn bit(self) -> u64 {
        1u64 << self.ordinal()
    }

    fn is_set_in(self, bits: u64) -> bool {
        bits & self.bit() != 0
    }
}

/// States of a client-role device (also used for server-role peers).
///
/// Order matters: anything past `Connecting` claims a live native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Undiscovered,
    Discovered,
    Advertising,
    Disconnected,
    Unbonded,
    Bonding,
    Bonded,
    ReconnectingLongTerm,
    ReconnectingShortTerm,
    ConnectingOverall,
    Connecting,
    Connected,
    DiscoveringServices,
    ServicesDiscovered,
    Authenticating,
    Authenticated,
    Initializing,
    Initialized,
    PerformingOta,
}

impl StateFlag for DeviceState {
    const ALL: &'static [Self] = &[
        DeviceState::Undiscovered,
        DeviceState::Discovered,
        DeviceState::Advertising,
        DeviceState::Disconnected,
        DeviceState::Unbonded,
        DeviceState::Bonding,
        DeviceState::Bonded,
        DeviceState::ReconnectingLongTerm,
        DeviceState::ReconnectingShortTerm,
        DeviceState::ConnectingOverall,
        DeviceState::Connecting,
        DeviceState::Connected,
        DeviceState::DiscoveringServices,
        DeviceState::ServicesDiscovered,
        DeviceState::Authenticating,
        DeviceState::Authenticated,
        DeviceState::Initializing,
        DeviceState::Initialized,
        DeviceState::PerformingOta,
    ];

    fn ordinal(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Every state that only makes sense while a connection is being set up or held.
pub const CONNECTION_PHASE_STATES: &[DeviceState] = &[
    DeviceState::ConnectingOverall,
    DeviceState::Connecting,
    DeviceState::Connected,
    DeviceState::DiscoveringServices,
    DeviceState::ServicesDiscovered,
    DeviceState::Authenticating,
    DeviceState::Authenticated,
    DeviceState::Initializing,
    DeviceState::Initialized,
    DeviceState::PerformingOta,
];

/// Renders the true flags of `bits` as `[A, B, C]`.
pub fn describe_bits<S: StateFlag>(bits: u64) -> String {
    let names: Vec<String> = S::ALL
        .iter()
        .filter(|s| s.is_set_in(bits))
        .map(|s| format!("{s:?}"))
        .collect();
    format!("[{}]", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_ordinal_order() {
        for (i, s) in DeviceState::ALL.iter().enumerate() {
            assert_eq!(s.ordinal() as usize, i);
        }
    }

    #[test]
    fn states_fit_in_a_u64() {
        assert!(DeviceState::ALL.len() <= 64);
    }

    #[test]
    fn describe_lists_true_flags() {
        let bits = DeviceState::Connected.bit() | DeviceState::Initialized.bit();
        assert_eq!(describe_bits::<DeviceState>(bits), "[Connected, Initialized]");
    }

    #[test]
    fn ordinal_follows_connection_flow() {
        assert!(DeviceState::Connected > DeviceState::Connecting);
        assert!(DeviceState::Disconnected < DeviceState::Connecting);
    }
}
