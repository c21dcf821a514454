//! Print when each LED pattern switches its output, tick by tick.
//!
//! `sequence-preview [boot|identify|factory-reset|scanning|always-on|always-off] [ticks]`

use anyhow::{bail, Error};
use common::sequence::TICK_PERIOD_MS;
use zigbee_sensor::{
    prelude::*,
    sequencer::{OutputError, RunState},
    PhaseLength, Repeat, SequenceDescriptor,
};

const DEFAULT_TICKS: u32 = 2000;

/// Prints every command it receives alongside the tick it happened on.
struct PrintOutput {
    tick: u32,
}

impl PrintOutput {
    fn print(&self, output: OutputId, level: &str) {
        println!(
            "{:>6} tick {:>8} ms  {:<5} {}",
            self.tick,
            elapsed_ms(self.tick),
            output.to_string(),
            level
        );
    }
}

impl OutputSink for PrintOutput {
    fn turn_on(&mut self, output: OutputId) -> Result<(), OutputError> {
        self.print(output, "ON");
        Ok(())
    }

    fn turn_off(&mut self, output: OutputId) -> Result<(), OutputError> {
        self.print(output, "OFF");
        Ok(())
    }
}

fn elapsed_ms(tick: u32) -> u64 {
    u64::from(tick) * u64::from(TICK_PERIOD_MS)
}

fn descriptor(name: &str) -> Result<SequenceDescriptor, Error> {
    Ok(match name {
        "boot" => SequenceDescriptor::BOOT,
        "identify" => SequenceDescriptor::IDENTIFY,
        "factory-reset" => SequenceDescriptor::FACTORY_RESET,
        "scanning" => SequenceDescriptor::SCANNING,
        "always-on" => SequenceDescriptor::ALWAYS_ON,
        "always-off" => SequenceDescriptor::ALWAYS_OFF,
        other => bail!("unknown pattern {:?}", other),
    })
}

fn describe(descriptor: &SequenceDescriptor) -> String {
    let phase = |phase: PhaseLength| match phase {
        PhaseLength::Ticks(ticks) => format!("{} ticks", ticks),
        PhaseLength::Forever => "forever".to_string(),
    };
    let repeat = match descriptor.repeat {
        Repeat::Times(times) => format!("{} times", times),
        Repeat::Forever => "forever".to_string(),
    };
    format!(
        "initial off {} ticks, on {}, off {}, repeat {}",
        descriptor.initial_off,
        phase(descriptor.on),
        phase(descriptor.off),
        repeat
    )
}

fn main() -> Result<(), Error> {
    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "boot".to_string());
    let max_ticks = match args.next() {
        Some(ticks) => ticks.parse()?,
        None => DEFAULT_TICKS,
    };

    let descriptor = descriptor(&name)?;
    println!("{}: {}", name, describe(&descriptor));
    match descriptor.total_ticks() {
        Some(total) => println!("finishes after {} ticks", total),
        None => println!("never finishes"),
    }

    let mut sequencer = OutputSequencer::new(PrintOutput { tick: 0 });
    sequencer.apply(OutputId::Green, descriptor);

    for tick in 1..=max_ticks {
        sequencer.sink_mut().tick = tick;
        sequencer.tick();
        if sequencer.state(OutputId::Green) == RunState::Idle {
            println!("idle after {} ticks", tick);
            return Ok(());
        }
    }
    println!("still running after {} ticks", max_ticks);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_ms() {
        assert_eq!(elapsed_ms(0), 0);
        assert_eq!(elapsed_ms(550), 5500);
        assert_eq!(elapsed_ms(u32::MAX), u32::MAX as u64 * 10);
    }
}
