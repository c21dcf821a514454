use serde::{Deserialize, Serialize};

/// Period of one sequencer tick.
pub const TICK_PERIOD_MS: u32 = 10;

pub const fn ms_to_ticks(ms: u32) -> u32 {
    ms / TICK_PERIOD_MS
}

/// Length of an on or off phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseLength {
    Ticks(u32),
    /// Hold the level and stop scheduling.
    Forever,
}

impl PhaseLength {
    pub const NONE: PhaseLength = PhaseLength::Ticks(0);

    pub const fn is_zero(self) -> bool {
        matches!(self, PhaseLength::Ticks(0))
    }
}

/// How many on/off cycles run before the sequence stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    Times(u32),
    Forever,
}

/// Declarative blink pattern, all durations in ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    pub initial_off: u32,
    pub on: PhaseLength,
    pub off: PhaseLength,
    pub repeat: Repeat,
}

impl SequenceDescriptor {
    /// Solid on for five seconds after a short dark period.
    pub const BOOT: SequenceDescriptor = SequenceDescriptor {
        initial_off: ms_to_ticks(500),
        on: PhaseLength::Ticks(ms_to_ticks(5000)),
        off: PhaseLength::Ticks(ms_to_ticks(100)),
        repeat: Repeat::Times(0),
    };

    pub const IDENTIFY: SequenceDescriptor = SequenceDescriptor {
        initial_off: ms_to_ticks(250),
        on: PhaseLength::Ticks(ms_to_ticks(500)),
        off: PhaseLength::Ticks(ms_to_ticks(500)),
        repeat: Repeat::Forever,
    };

    pub const FACTORY_RESET: SequenceDescriptor = SequenceDescriptor {
        initial_off: ms_to_ticks(250),
        on: PhaseLength::Ticks(ms_to_ticks(500)),
        off: PhaseLength::Ticks(ms_to_ticks(500)),
        repeat: Repeat::Times(5),
    };

    pub const SCANNING: SequenceDescriptor = SequenceDescriptor {
        initial_off: ms_to_ticks(250),
        on: PhaseLength::Ticks(ms_to_ticks(500)),
        off: PhaseLength::Ticks(ms_to_ticks(500)),
        repeat: Repeat::Forever,
    };

    pub const ALWAYS_ON: SequenceDescriptor = SequenceDescriptor {
        initial_off: ms_to_ticks(250),
        on: PhaseLength::Forever,
        off: PhaseLength::NONE,
        repeat: Repeat::Times(0),
    };

    pub const ALWAYS_OFF: SequenceDescriptor = SequenceDescriptor {
        initial_off: ms_to_ticks(250),
        on: PhaseLength::NONE,
        off: PhaseLength::Forever,
        repeat: Repeat::Times(0),
    };

    /// Number of ticks until the sequence comes to rest, `None` when it never
    /// does or when it rests holding a level forever.
    pub fn total_ticks(&self) -> Option<u32> {
        let (on, off) = match (self.on, self.off) {
            (PhaseLength::Ticks(on), PhaseLength::Ticks(off)) => (on, off),
            _ => return None,
        };
        if off == 0 {
            return Some(self.initial_off + on);
        }
        match self.repeat {
            Repeat::Forever => None,
            // A zero repeat count still plays one full cycle.
            Repeat::Times(times) => Some(self.initial_off + times.max(1) * (on + off)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(10), 1);
        assert_eq!(ms_to_ticks(5000), 500);
        assert_eq!(ms_to_ticks(15), 1);
    }

    #[test]
    fn test_total_ticks() {
        let descriptor = SequenceDescriptor {
            initial_off: 3,
            on: PhaseLength::Ticks(2),
            off: PhaseLength::Ticks(4),
            repeat: Repeat::Times(2),
        };
        assert_eq!(descriptor.total_ticks(), Some(15));

        assert_eq!(SequenceDescriptor::BOOT.total_ticks(), Some(50 + 500 + 10));
        assert_eq!(SequenceDescriptor::FACTORY_RESET.total_ticks(), Some(25 + 5 * 100));
        assert_eq!(SequenceDescriptor::IDENTIFY.total_ticks(), None);
        assert_eq!(SequenceDescriptor::ALWAYS_ON.total_ticks(), None);
        assert_eq!(SequenceDescriptor::ALWAYS_OFF.total_ticks(), None);
    }
}
