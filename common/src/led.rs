use core::fmt;

use serde::{Deserialize, Serialize};

/// Physical status outputs driven by the sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputId {
    Red,
    Green,
}

impl OutputId {
    pub const COUNT: usize = 2;
    pub const ALL: [OutputId; OutputId::COUNT] = [OutputId::Red, OutputId::Green];

    pub const fn index(self) -> usize {
        match self {
            OutputId::Red => 0,
            OutputId::Green => 1,
        }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputId::Red => f.write_str("red"),
            OutputId::Green => f.write_str("green"),
        }
    }
}

/// High level LED intents understood by the LED controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedPattern {
    Boot = 0,
    FactoryReset = 1,
    Identify = 2,
    Connected = 3,
    NotConnected = 4,
    NoCoordinator = 5,
    Scanning = 6,
}

impl LedPattern {
    /// Exclusive patterns override everything on their outputs and end on
    /// their own.
    pub const fn is_exclusive(self) -> bool {
        matches!(self, LedPattern::Boot | LedPattern::FactoryReset)
    }
}

/// Raw value that does not name any [`LedPattern`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidPattern(pub u8);

impl fmt::Display for InvalidPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid LED pattern value {}", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidPattern {}

impl TryFrom<u8> for LedPattern {
    type Error = InvalidPattern;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LedPattern::Boot),
            1 => Ok(LedPattern::FactoryReset),
            2 => Ok(LedPattern::Identify),
            3 => Ok(LedPattern::Connected),
            4 => Ok(LedPattern::NotConnected),
            5 => Ok(LedPattern::NoCoordinator),
            6 => Ok(LedPattern::Scanning),
            other => Err(InvalidPattern(other)),
        }
    }
}
