use std::{sync::Arc, time::Duration};

use common::sensor::{
    clip_humidity, clip_temperature, AttributeId, AttributeValue, INVALID_HUMIDITY,
    INVALID_TEMPERATURE,
};
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::SensorConfig;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor did not acknowledge the measurement")]
    Measurement,
    #[error("no valid reading available")]
    NoData,
    #[error("sensor bus: {0}")]
    Bus(String),
}

#[derive(Debug, Error)]
#[error(
    "failed to set attribute {:#06x}/{:#06x} on endpoint {}: {}",
    .id.cluster, .id.attribute, .id.endpoint, .reason
)]
pub struct AttributeError {
    pub id: AttributeId,
    pub reason: String,
}

/// Temperature in 0.01 °C, humidity in 0.01 %RH.
pub trait SensorDriver: Send {
    fn start_measurement(&mut self) -> Result<(), SensorError>;
    fn last_temperature(&mut self) -> Result<i16, SensorError>;
    fn last_humidity(&mut self) -> Result<u16, SensorError>;
}

/// Where measured values are exposed to the network.
pub trait AttributeSink: Send + Sync {
    fn set_attribute(&self, id: AttributeId, value: AttributeValue) -> Result<(), AttributeError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorStep {
    Idle,
    Measure,
    ProcessTemperature,
    ProcessHumidity,
}

pub struct SensorController<D> {
    driver: D,
    sink: Arc<dyn AttributeSink>,
    step: SensorStep,
    inter_step_delay: Duration,
    sample_period: Duration,
}

impl<D: SensorDriver> SensorController<D> {
    pub fn new(config: &SensorConfig, driver: D, sink: Arc<dyn AttributeSink>) -> Self {
        Self {
            driver,
            sink,
            step: SensorStep::Idle,
            inter_step_delay: config.inter_step_delay(),
            sample_period: config.sample_period(),
        }
    }

    pub fn step(&self) -> SensorStep {
        self.step
    }

    /// Run the current step and move to the next one. Returns how long to
    /// wait before the next call.
    pub fn advance(&mut self) -> Duration {
        let (next, delay) = match self.step {
            SensorStep::Idle => (SensorStep::Measure, self.inter_step_delay),
            SensorStep::Measure => {
                if let Err(e) = self.driver.start_measurement() {
                    warn!("sensor: failed to start measurement: {}", e);
                }
                (SensorStep::ProcessTemperature, self.inter_step_delay)
            }
            SensorStep::ProcessTemperature => {
                let temperature = match self.driver.last_temperature() {
                    Ok(value) => clip_temperature(value),
                    Err(e) => {
                        warn!("sensor: failed to read temperature: {}", e);
                        INVALID_TEMPERATURE
                    }
                };
                debug!("sensor: temperature {}", temperature);
                self.publish(AttributeId::TEMPERATURE, AttributeValue::I16(temperature));
                (SensorStep::ProcessHumidity, self.inter_step_delay)
            }
            SensorStep::ProcessHumidity => {
                let humidity = match self.driver.last_humidity() {
                    Ok(value) => clip_humidity(value),
                    Err(e) => {
                        warn!("sensor: failed to read humidity: {}", e);
                        INVALID_HUMIDITY
                    }
                };
                debug!("sensor: humidity {}", humidity);
                self.publish(AttributeId::HUMIDITY, AttributeValue::U16(humidity));
                (SensorStep::Idle, self.sample_period)
            }
        };
        self.step = next;
        delay
    }

    fn publish(&self, id: AttributeId, value: AttributeValue) {
        if let Err(e) = self.sink.set_attribute(id, value) {
            warn!("sensor: {}", e);
        }
    }

    pub async fn run(mut self) {
        info!("sensor: sampling every {:?}", self.sample_period);
        loop {
            let delay = self.advance();
            tokio::time::sleep(delay).await;
        }
    }
}
