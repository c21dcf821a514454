use common::led::OutputId;
use log::info;
use rppal::gpio::{Gpio, OutputPin};

use super::{OutputError, OutputSink};
use crate::config::LedConfig;

/// LEDs wired straight to GPIO pins, lit when the pin is high.
pub struct GpioOutput {
    pins: [Option<OutputPin>; OutputId::COUNT],
}

impl GpioOutput {
    pub fn new(config: &LedConfig) -> Result<Self, OutputError> {
        let gpio = Gpio::new()?;
        let mut pins: [Option<OutputPin>; OutputId::COUNT] = [None, None];

        for (output, pin) in [(OutputId::Red, config.red_pin), (OutputId::Green, config.green_pin)] {
            let Some(pin) = pin else {
                info!("seq: {} led has no pin configured", output);
                continue;
            };
            let number = pin.gpio();
            info!("seq: {} led on gpio {}", output, number);

            let mut pin = gpio.get(number)?.into_output();
            pin.set_low();
            pins[output.index()] = Some(pin);
        }

        Ok(Self { pins })
    }

    fn pin(&mut self, output: OutputId) -> Result<&mut OutputPin, OutputError> {
        self.pins[output.index()]
            .as_mut()
            .ok_or(OutputError::Unavailable(output))
    }
}

impl OutputSink for GpioOutput {
    fn turn_on(&mut self, output: OutputId) -> Result<(), OutputError> {
        self.pin(output)?.set_high();
        Ok(())
    }

    fn turn_off(&mut self, output: OutputId) -> Result<(), OutputError> {
        self.pin(output)?.set_low();
        Ok(())
    }
}
