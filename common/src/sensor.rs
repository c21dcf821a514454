//! Data model identifiers for the measurements exposed on the network.

use serde::{Deserialize, Serialize};

/// The single application endpoint of the device.
pub const SENSOR_ENDPOINT: u8 = 1;

pub const TEMPERATURE_CLUSTER: u16 = 0x0402;
pub const HUMIDITY_CLUSTER: u16 = 0x0405;
pub const MEASURED_VALUE_ATTRIBUTE: u16 = 0x0000;

/// Temperature in 0.01 °C reported when no valid reading exists.
pub const INVALID_TEMPERATURE: i16 = i16::MIN;
/// Relative humidity in 0.01 % reported when no valid reading exists.
pub const INVALID_HUMIDITY: u16 = 0xFFFF;

pub const MIN_TEMPERATURE: i16 = -20 * 100;
pub const MAX_TEMPERATURE: i16 = 100 * 100;
pub const MIN_HUMIDITY: u16 = 0;
pub const MAX_HUMIDITY: u16 = 100 * 100;

// Attribute reporting parameters
pub const REPORT_MIN_INTERVAL_S: u16 = 10;
pub const REPORT_MAX_INTERVAL_S: u16 = 3600;
pub const REPORT_DELTA: u16 = 100;

// Basic cluster identity
pub const MANUFACTURER_NAME: &str = "V_PRIME_TECH";
pub const MODEL_IDENTIFIER: &str = "AHT10_ZIGBEE";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeId {
    pub endpoint: u8,
    pub cluster: u16,
    pub attribute: u16,
}

impl AttributeId {
    pub const TEMPERATURE: AttributeId = AttributeId {
        endpoint: SENSOR_ENDPOINT,
        cluster: TEMPERATURE_CLUSTER,
        attribute: MEASURED_VALUE_ATTRIBUTE,
    };

    pub const HUMIDITY: AttributeId = AttributeId {
        endpoint: SENSOR_ENDPOINT,
        cluster: HUMIDITY_CLUSTER,
        attribute: MEASURED_VALUE_ATTRIBUTE,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    I16(i16),
    U16(u16),
}

/// Clamp a temperature into the advertised range, keeping the invalid marker.
pub fn clip_temperature(value: i16) -> i16 {
    if value == INVALID_TEMPERATURE {
        return value;
    }
    value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
}

/// Clamp a humidity into the advertised range, keeping the invalid marker.
pub fn clip_humidity(value: u16) -> u16 {
    if value == INVALID_HUMIDITY {
        return value;
    }
    value.clamp(MIN_HUMIDITY, MAX_HUMIDITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_temperature() {
        assert_eq!(clip_temperature(2150), 2150);
        assert_eq!(clip_temperature(12000), MAX_TEMPERATURE);
        assert_eq!(clip_temperature(-4000), MIN_TEMPERATURE);
        assert_eq!(clip_temperature(INVALID_TEMPERATURE), INVALID_TEMPERATURE);
    }

    #[test]
    fn test_clip_humidity() {
        assert_eq!(clip_humidity(4500), 4500);
        assert_eq!(clip_humidity(10001), MAX_HUMIDITY);
        assert_eq!(clip_humidity(INVALID_HUMIDITY), INVALID_HUMIDITY);
    }
}
