use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod button;
pub mod config;
pub mod led;
pub mod network;
pub mod sensor;
pub mod sequencer;
pub mod sim;
pub mod store;
pub mod ui;

pub use common::{
    led::{InvalidPattern, LedPattern, OutputId},
    network::{JoinMode, NetworkState},
    sensor::{AttributeId, AttributeValue},
    sequence::{PhaseLength, Repeat, SequenceDescriptor},
};

pub mod prelude {
    pub use crate::{
        button::*, config::*, led::*, network::*, sensor::*, sequencer::*, store::*, ui::*,
    };
    pub use common::{
        led::{LedPattern, OutputId},
        network::{JoinMode, NetworkState},
        sequence::SequenceDescriptor,
    };
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate is a plain field update, so the data
/// behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
