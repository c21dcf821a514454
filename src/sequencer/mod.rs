//! Tick driven blink engine.
//!
//! Each output owns a [`SequenceRunner`] that walks a [`SequenceDescriptor`]
//! one tick at a time and asks the [`OutputSink`] to switch the output when a
//! phase ends. Nothing in here knows about LED semantics; the controller in
//! `led` decides which descriptor runs where.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{
    led::OutputId,
    sequence::{PhaseLength, Repeat, SequenceDescriptor},
};
use log::{info, trace, warn};
use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};

#[cfg(feature = "pi")]
mod gpio;
#[cfg(feature = "pi")]
pub use gpio::GpioOutput;

use crate::lock;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output {0} is not available")]
    Unavailable(OutputId),
    #[cfg(feature = "pi")]
    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Driver behind the physical outputs.
pub trait OutputSink: Send {
    fn turn_on(&mut self, output: OutputId) -> Result<(), OutputError>;
    fn turn_off(&mut self, output: OutputId) -> Result<(), OutputError>;
}

impl<T: OutputSink + ?Sized> OutputSink for Box<T> {
    fn turn_on(&mut self, output: OutputId) -> Result<(), OutputError> {
        (**self).turn_on(output)
    }

    fn turn_off(&mut self, output: OutputId) -> Result<(), OutputError> {
        (**self).turn_off(output)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Start,
    OutputOn,
    OutputOff,
}

#[derive(Clone, Debug)]
pub struct SequenceRunner {
    output: OutputId,
    state: RunState,
    descriptor: Option<SequenceDescriptor>,
    elapsed: u32,
    repeats: u32,
}

impl SequenceRunner {
    pub fn new(output: OutputId) -> Self {
        Self {
            output,
            state: RunState::Idle,
            descriptor: None,
            elapsed: 0,
            repeats: 0,
        }
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn descriptor(&self) -> Option<&SequenceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Bind a new descriptor, dropping whatever phase was in progress.
    /// Returns the level the output must be set to right away.
    pub fn bind(&mut self, descriptor: SequenceDescriptor) -> Level {
        self.descriptor = Some(descriptor);
        self.elapsed = 0;
        self.repeats = 0;

        if descriptor.initial_off == 0 && !descriptor.on.is_zero() {
            self.state = RunState::OutputOn;
            Level::On
        } else {
            self.state = RunState::Start;
            Level::Off
        }
    }

    /// Advance by one tick. Returns the level to command when a phase ends.
    pub fn advance(&mut self) -> Option<Level> {
        let descriptor = match self.descriptor {
            Some(descriptor) => descriptor,
            None => {
                self.state = RunState::Idle;
                return None;
            }
        };

        match self.state {
            RunState::Idle => None,
            RunState::Start => {
                self.elapsed += 1;
                if self.elapsed < descriptor.initial_off {
                    return None;
                }
                if !descriptor.on.is_zero() {
                    Some(self.enter(RunState::OutputOn))
                } else if !descriptor.off.is_zero() {
                    Some(self.enter(RunState::OutputOff))
                } else {
                    self.state = RunState::Idle;
                    Some(Level::Off)
                }
            }
            RunState::OutputOn => {
                let on = match descriptor.on {
                    PhaseLength::Ticks(on) => on,
                    PhaseLength::Forever => {
                        self.state = RunState::Idle;
                        return None;
                    }
                };
                self.elapsed += 1;
                if self.elapsed < on {
                    return None;
                }
                if !descriptor.off.is_zero() {
                    Some(self.enter(RunState::OutputOff))
                } else {
                    self.state = RunState::Idle;
                    Some(Level::Off)
                }
            }
            RunState::OutputOff => {
                let off = match descriptor.off {
                    PhaseLength::Ticks(off) => off,
                    PhaseLength::Forever => {
                        self.state = RunState::Idle;
                        return None;
                    }
                };
                self.elapsed += 1;
                if self.elapsed < off {
                    return None;
                }
                match descriptor.repeat {
                    Repeat::Forever => Some(self.enter(RunState::OutputOn)),
                    Repeat::Times(times) => {
                        self.repeats += 1;
                        if self.repeats >= times {
                            self.state = RunState::Idle;
                            Some(Level::Off)
                        } else {
                            Some(self.enter(RunState::OutputOn))
                        }
                    }
                }
            }
        }
    }

    fn enter(&mut self, state: RunState) -> Level {
        self.state = state;
        self.elapsed = 0;
        match state {
            RunState::OutputOn => Level::On,
            _ => Level::Off,
        }
    }
}

/// One runner per output, all sharing a single sink.
pub struct OutputSequencer<O> {
    sink: O,
    runners: [SequenceRunner; OutputId::COUNT],
}

impl<O: OutputSink> OutputSequencer<O> {
    pub fn new(sink: O) -> Self {
        Self {
            sink,
            runners: OutputId::ALL.map(SequenceRunner::new),
        }
    }

    pub fn apply(&mut self, output: OutputId, descriptor: SequenceDescriptor) {
        let level = self.runners[output.index()].bind(descriptor);
        trace!("seq: {} bound to {:?}", output, descriptor);
        command(&mut self.sink, output, level);
    }

    /// Advance every runner by one tick. Must only be called from one context.
    pub fn tick(&mut self) {
        let Self { sink, runners } = self;
        for runner in runners.iter_mut() {
            if let Some(level) = runner.advance() {
                command(sink, runner.output, level);
            }
        }
    }

    pub fn state(&self, output: OutputId) -> RunState {
        self.runners[output.index()].state
    }

    pub fn descriptor(&self, output: OutputId) -> Option<&SequenceDescriptor> {
        self.runners[output.index()].descriptor()
    }

    pub fn runner(&self, output: OutputId) -> &SequenceRunner {
        &self.runners[output.index()]
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut O {
        &mut self.sink
    }
}

// Sink failures do not roll back the runner.
fn command<O: OutputSink>(sink: &mut O, output: OutputId, level: Level) {
    let result = match level {
        Level::On => sink.turn_on(output),
        Level::Off => sink.turn_off(output),
    };
    if let Err(e) = result {
        warn!("seq: failed to turn {} {:?}: {}", output, level, e);
    }
}

pub type SharedSequencer = Arc<Mutex<OutputSequencer<Box<dyn OutputSink>>>>;

pub fn shared(sink: Box<dyn OutputSink>) -> SharedSequencer {
    Arc::new(Mutex::new(OutputSequencer::new(sink)))
}

/// Call `tick` once per `period` for as long as the task lives.
pub fn spawn_tick_driver(sequencer: SharedSequencer, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            lock(&sequencer).tick();
        }
    })
}

/// Sink that only logs, for hosts without LEDs.
#[derive(Debug, Default)]
pub struct LogOutput {
    levels: [bool; OutputId::COUNT],
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self, output: OutputId) -> bool {
        self.levels[output.index()]
    }
}

impl OutputSink for LogOutput {
    fn turn_on(&mut self, output: OutputId) -> Result<(), OutputError> {
        if !self.levels[output.index()] {
            info!("seq: {} led on", output);
        }
        self.levels[output.index()] = true;
        Ok(())
    }

    fn turn_off(&mut self, output: OutputId) -> Result<(), OutputError> {
        if self.levels[output.index()] {
            info!("seq: {} led off", output);
        }
        self.levels[output.index()] = false;
        Ok(())
    }
}
