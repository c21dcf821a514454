//! Host-side stand-ins for the radio stack, the humidity sensor and the
//! attribute table, so the device logic runs without hardware.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use common::{
    network::JoinMode,
    sensor::{AttributeId, AttributeValue},
};
use log::{debug, info};

use crate::{
    lock,
    network::{NetworkSignals, NetworkStack, ProbeId, StackError},
    sensor::{AttributeError, AttributeSink, SensorDriver, SensorError},
};

/// Radio stack that answers requests after a fixed latency.
pub struct SimulatedStack {
    signals: Mutex<Option<NetworkSignals>>,
    latency: Duration,
    failures_before_join: AtomicU32,
    reachable: AtomicBool,
    steering_requests: AtomicUsize,
    resets: AtomicUsize,
}

impl SimulatedStack {
    pub fn new(latency: Duration) -> Self {
        Self {
            signals: Mutex::new(None),
            latency,
            failures_before_join: AtomicU32::new(0),
            reachable: AtomicBool::new(true),
            steering_requests: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    pub fn attach(&self, signals: NetworkSignals) {
        *lock(&self.signals) = Some(signals);
    }

    /// Make the next `count` steering attempts fail.
    pub fn fail_joins(&self, count: u32) {
        self.failures_before_join.store(count, Ordering::SeqCst);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn steering_requests(&self) -> usize {
        self.steering_requests.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Deliver an identify command from the network, as a coordinator would.
    pub fn identify(&self, on: bool) -> Result<(), StackError> {
        self.signals()?.identify(on);
        Ok(())
    }

    fn signals(&self) -> Result<NetworkSignals, StackError> {
        lock(&self.signals).clone().ok_or(StackError::NotRunning)
    }

    fn later(&self, signal: impl FnOnce(NetworkSignals) + Send + 'static) -> Result<(), StackError> {
        let signals = self.signals()?;
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            signal(signals);
        });
        Ok(())
    }
}

impl NetworkStack for SimulatedStack {
    fn request_join(&self, mode: JoinMode) -> Result<(), StackError> {
        if mode == JoinMode::Initialization {
            info!("sim: stack initialized");
            return Ok(());
        }

        self.steering_requests.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_before_join
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        self.later(move |signals| {
            if fail {
                signals.join_failed("no open network found");
            } else {
                signals.join_succeeded();
            }
        })
    }

    fn request_leave_and_reset(&self) -> Result<(), StackError> {
        info!("sim: left network, stack reset");
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn request_reachability(&self, probe: ProbeId) -> Result<(), StackError> {
        if !self.reachable.load(Ordering::SeqCst) {
            debug!("sim: probe {} lost", probe);
            return Ok(());
        }
        self.later(move |signals| signals.reachability_reply(probe))
    }
}

/// Sensor producing a slow deterministic drift around 21.5 °C / 45 %RH.
#[derive(Debug, Default)]
pub struct SimulatedSensor {
    measurements: u32,
    failing: bool,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    fn drift(&self) -> i32 {
        // Triangle wave, period 40 samples, amplitude 100
        let phase = (self.measurements % 40) as i32;
        if phase < 20 {
            phase * 10 - 100
        } else {
            300 - phase * 10
        }
    }
}

impl SensorDriver for SimulatedSensor {
    fn start_measurement(&mut self) -> Result<(), SensorError> {
        if self.failing {
            return Err(SensorError::Measurement);
        }
        self.measurements = self.measurements.wrapping_add(1);
        Ok(())
    }

    fn last_temperature(&mut self) -> Result<i16, SensorError> {
        if self.failing || self.measurements == 0 {
            return Err(SensorError::NoData);
        }
        Ok((2150 + self.drift()) as i16)
    }

    fn last_humidity(&mut self) -> Result<u16, SensorError> {
        if self.failing || self.measurements == 0 {
            return Err(SensorError::NoData);
        }
        Ok((4500 - self.drift()) as u16)
    }
}

/// In-memory attribute table, logging every update.
#[derive(Debug, Default)]
pub struct AttributeTable {
    values: Mutex<HashMap<AttributeId, AttributeValue>>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AttributeId) -> Option<AttributeValue> {
        lock(&self.values).get(&id).copied()
    }
}

impl AttributeSink for AttributeTable {
    fn set_attribute(&self, id: AttributeId, value: AttributeValue) -> Result<(), AttributeError> {
        info!(
            "sim: endpoint {} cluster {:#06x} attribute {:#06x} = {:?}",
            id.endpoint, id.cluster, id.attribute, value
        );
        lock(&self.values).insert(id, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_drift_stays_in_range() {
        let mut sensor = SimulatedSensor::new();
        assert!(sensor.last_temperature().is_err());

        for _ in 0..80 {
            sensor.start_measurement().unwrap();
            let temperature = sensor.last_temperature().unwrap();
            let humidity = sensor.last_humidity().unwrap();
            assert!((2050..=2250).contains(&temperature));
            assert!((4400..=4600).contains(&humidity));
        }

        sensor.set_failing(true);
        assert!(sensor.start_measurement().is_err());
        assert!(sensor.last_humidity().is_err());
    }

    #[test]
    fn test_attribute_table_keeps_latest() {
        let table = AttributeTable::new();
        table
            .set_attribute(AttributeId::TEMPERATURE, AttributeValue::I16(2000))
            .unwrap();
        table
            .set_attribute(AttributeId::TEMPERATURE, AttributeValue::I16(2100))
            .unwrap();
        assert_eq!(
            table.get(AttributeId::TEMPERATURE),
            Some(AttributeValue::I16(2100))
        );
        assert_eq!(table.get(AttributeId::HUMIDITY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stack_requires_attach() {
        let stack = SimulatedStack::new(Duration::from_millis(100));
        assert!(matches!(
            stack.request_join(JoinMode::NetworkSteering),
            Err(StackError::NotRunning)
        ));
        assert!(stack.request_join(JoinMode::Initialization).is_ok());
        assert!(matches!(stack.identify(true), Err(StackError::NotRunning)));
    }
}
