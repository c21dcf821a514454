use std::{path::Path, time::Duration};

use log::info;
use pi_pinout::{GpioPin, PhysicalPin, WiringPiPin};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::button::ActiveLevel;

pub const CONFIG_PATH: &str = "config.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0} must be greater than zero")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub led: LedConfig,
    pub ui: UiConfig,
    pub sensor: SensorConfig,
    pub store: StoreConfig,
}

/// Commissioning and reachability timing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub steering_attempts: u8,
    pub retry_delay_ms: u64,
    pub probe_period_ms: u64,
    pub probe_timeout_ms: u64,
    pub leave_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LedConfig {
    pub tick_period_ms: u64,
    /// How long Boot and FactoryReset own their outputs before the intent
    /// flags are evaluated again.
    pub exclusive_duration_ms: u64,
    pub red_pin: Option<Pin>,
    pub green_pin: Option<Pin>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub queue_capacity: usize,
    pub receive_timeout_ms: u64,
    pub button_pin: Option<Pin>,
    pub button_active_level: ActiveLevel,
    pub long_press_ms: u64,
    pub button_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub sample_period_ms: u64,
    pub inter_step_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub enum Pin {
    Physical(PhysicalPin),
    Gpio(GpioPin),
    WiringPi(WiringPiPin),
}

impl Pin {
    /// BCM GPIO number behind this pin.
    pub fn gpio(&self) -> u8 {
        let pin: GpioPin = match *self {
            Pin::Physical(pin) => pin.into(),
            Pin::Gpio(pin) => pin,
            Pin::WiringPi(pin) => pin.into(),
        };
        pin.0
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            steering_attempts: 10,
            retry_delay_ms: 1000,
            probe_period_ms: 30_000,
            probe_timeout_ms: 5000,
            leave_delay_ms: 4000,
        }
    }
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: u64::from(common::sequence::TICK_PERIOD_MS),
            exclusive_duration_ms: 5000 + 500,
            red_pin: Some(Pin::Gpio(GpioPin(18))),
            green_pin: Some(Pin::Gpio(GpioPin(19))),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8,
            receive_timeout_ms: 1000,
            button_pin: Some(Pin::Gpio(GpioPin(9))),
            button_active_level: ActiveLevel::Low,
            long_press_ms: 5000,
            button_poll_ms: 10,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 1000,
            inter_step_delay_ms: 25,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "network_state.json".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn probe_period(&self) -> Duration {
        Duration::from_millis(self.probe_period_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn leave_delay(&self) -> Duration {
        Duration::from_millis(self.leave_delay_ms)
    }
}

impl LedConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn exclusive_duration(&self) -> Duration {
        Duration::from_millis(self.exclusive_duration_ms)
    }
}

impl UiConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }

    pub fn button_poll(&self) -> Duration {
        Duration::from_millis(self.button_poll_ms)
    }
}

impl SensorConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn inter_step_delay(&self) -> Duration {
        Duration::from_millis(self.inter_step_delay_ms)
    }
}

impl Config {
    /// Load `config.ron` from the working directory, falling back to the
    /// defaults when the file does not exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(CONFIG_PATH);
        if !path.exists() {
            info!("config: {} not found, using defaults", CONFIG_PATH);
            return Ok(Config::default());
        }
        Config::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let config = std::fs::read_to_string(path)?;
        let config: Config = ron::from_str(&config)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("ui.queue_capacity", self.ui.queue_capacity as u64),
            ("ui.receive_timeout_ms", self.ui.receive_timeout_ms),
            ("ui.button_poll_ms", self.ui.button_poll_ms),
            ("led.tick_period_ms", self.led.tick_period_ms),
            ("network.probe_period_ms", self.network.probe_period_ms),
            ("sensor.sample_period_ms", self.sensor.sample_period_ms),
        ];
        match required.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Invalid(*name)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");

        // Write an example config file
        std::fs::write(
            &path,
            r#"(
    network: (
        steering_attempts: 3,
        probe_period_ms: 1000,
    ),
    led: (
        red_pin: Some(Physical(PhysicalPin(12))),
        green_pin: None,
    ),
    ui: (
        button_active_level: High,
    ),
)"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.network.steering_attempts, 3);
        assert_eq!(config.network.probe_period(), Duration::from_secs(1));
        // Untouched fields keep their defaults
        assert_eq!(config.network.leave_delay(), Duration::from_millis(4000));
        assert_eq!(
            config.led.red_pin,
            Some(Pin::Physical(pi_pinout::PhysicalPin(12)))
        );
        assert_eq!(config.led.red_pin.map(|pin| pin.gpio()), Some(18));
        assert_eq!(config.led.green_pin, None);
        assert_eq!(config.led.tick_period(), Duration::from_millis(10));
        assert_eq!(config.ui.button_active_level, ActiveLevel::High);
        assert_eq!(config.ui.queue_capacity, 8);
        assert_eq!(config.sensor, SensorConfig::default());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        std::fs::write(&path, "(network: [1, 2").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_rejects_zero_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");

        for (contents, field) in [
            ("(ui: (queue_capacity: 0))", "ui.queue_capacity"),
            ("(ui: (button_poll_ms: 0))", "ui.button_poll_ms"),
            ("(led: (tick_period_ms: 0))", "led.tick_period_ms"),
            ("(network: (probe_period_ms: 0))", "network.probe_period_ms"),
        ] {
            std::fs::write(&path, contents).unwrap();
            match Config::load_from(&path) {
                Err(ConfigError::Invalid(name)) => assert_eq!(name, field),
                other => panic!("{} accepted: {:?}", contents, other),
            }
        }

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_pin_numbering() {
        assert_eq!(Pin::Gpio(GpioPin(9)).gpio(), 9);
        assert_eq!(Pin::Physical(PhysicalPin(35)).gpio(), 19);
        assert_eq!(Pin::WiringPi(WiringPiPin(1)).gpio(), 18);
    }

    #[test]
    fn test_default_timings() {
        let config = Config::default();
        assert_eq!(config.network.steering_attempts, 10);
        assert_eq!(config.network.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.network.probe_period(), Duration::from_secs(30));
        assert_eq!(config.network.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.led.exclusive_duration(), Duration::from_millis(5500));
        assert_eq!(config.ui.receive_timeout(), Duration::from_secs(1));
    }
}
