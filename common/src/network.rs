use core::fmt;

use serde::{Deserialize, Serialize};

/// NVS-style namespace holding the network bookkeeping.
pub const NETWORK_NAMESPACE: &str = "Network";
/// Key of the persisted [`NetworkState`] ordinal inside [`NETWORK_NAMESPACE`].
pub const NETWORK_STATE_KEY: &str = "NetworkState";

/// Connection state of the device on the mesh network.
///
/// The discriminants are the persisted byte ordinals, so they must never be
/// reordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NetworkState {
    NotConnected = 0,
    Connected = 1,
    NoParent = 2,
    Scanning = 3,
    Leaving = 4,
    Invalid = 5,
}

impl NetworkState {
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::NotConnected),
            1 => Some(Self::Connected),
            2 => Some(Self::NoParent),
            3 => Some(Self::Scanning),
            4 => Some(Self::Leaving),
            5 => Some(Self::Invalid),
            _ => None,
        }
    }

    /// Only these two states are meaningful after a power cycle; anything else
    /// describes a procedure that died with the previous boot.
    pub const fn is_boot_state(self) -> bool {
        matches!(self, Self::NotConnected | Self::Connected)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotConnected => "not-connected",
            Self::Connected => "connected",
            Self::NoParent => "no-parent",
            Self::Scanning => "scanning",
            Self::Leaving => "leaving",
            Self::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Commissioning mode requested from the network stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinMode {
    /// Stack start-up, restores a previous association if any.
    Initialization,
    /// Search for an open network and join it.
    NetworkSteering,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_stable() {
        assert_eq!(NetworkState::NotConnected.ordinal(), 0);
        assert_eq!(NetworkState::Connected.ordinal(), 1);
        assert_eq!(NetworkState::Invalid.ordinal(), 5);

        for ordinal in 0..=5 {
            let state = NetworkState::from_ordinal(ordinal).unwrap();
            assert_eq!(state.ordinal(), ordinal);
        }
        assert_eq!(NetworkState::from_ordinal(6), None);
        assert_eq!(NetworkState::from_ordinal(0xFF), None);
    }

    #[test]
    fn test_boot_states() {
        assert!(NetworkState::NotConnected.is_boot_state());
        assert!(NetworkState::Connected.is_boot_state());
        assert!(!NetworkState::Scanning.is_boot_state());
        assert!(!NetworkState::NoParent.is_boot_state());
        assert!(!NetworkState::Leaving.is_boot_state());
    }
}
