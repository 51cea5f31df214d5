//! Device status classification.
//!
//! Maps a reading to a [`DeviceStatus`] by comparing it against fixed
//! per-sensor-type thresholds. The classifier never produces `Offline`; that
//! status is only set through the administrative path in the device registry.

use crate::model::{DeviceStatus, SensorType};

/// Batteries below this percentage put an otherwise healthy device into `Warning`.
pub const LOW_BATTERY_PERCENT: f64 = 10.0;

/// Warning and critical thresholds for one sensor type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

/// Look up the thresholds for a sensor type.
///
/// | Sensor          | Warning | Critical | Unit        |
/// |-----------------|---------|----------|-------------|
/// | seismic         | 3.0     | 5.0      | magnitude   |
/// | radiation       | 0.1     | 1.0      | µSv/h       |
/// | weather         | 50      | 80       | km/h wind   |
/// | air_quality     | 100     | 200      | AQI         |
/// | water_quality   | 8.5     | 9.0      | pH          |
/// | acoustic        | 85      | 100      | dB          |
/// | electromagnetic | 50      | 100      | field units |
///
/// Anything else falls back to 50/100.
pub fn thresholds(sensor_type: SensorType) -> Thresholds {
    let (warning, critical) = match sensor_type {
        SensorType::Seismic => (3.0, 5.0),
        SensorType::Radiation => (0.1, 1.0),
        SensorType::Weather => (50.0, 80.0),
        SensorType::AirQuality => (100.0, 200.0),
        SensorType::WaterQuality => (8.5, 9.0),
        SensorType::Acoustic => (85.0, 100.0),
        SensorType::Electromagnetic => (50.0, 100.0),
        SensorType::Other => (50.0, 100.0),
    };
    Thresholds { warning, critical }
}

/// Derive a device status from its sensor type, reading and battery level.
///
/// Comparisons are strict: a reading exactly at a threshold stays below it.
pub fn classify(sensor_type: SensorType, reading: f64, battery_level: Option<f64>) -> DeviceStatus {
    let t = thresholds(sensor_type);

    if reading > t.critical {
        DeviceStatus::Critical
    } else if reading > t.warning {
        DeviceStatus::Warning
    } else if battery_level.is_some_and(|b| b < LOW_BATTERY_PERCENT) {
        DeviceStatus::Warning
    } else {
        DeviceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seismic_boundary() {
        assert_eq!(classify(SensorType::Seismic, 5.0, None), DeviceStatus::Warning);
        assert_eq!(classify(SensorType::Seismic, 5.01, None), DeviceStatus::Critical);
        assert_eq!(classify(SensorType::Seismic, 3.0, None), DeviceStatus::Active);
        assert_eq!(classify(SensorType::Seismic, 3.1, None), DeviceStatus::Warning);
    }

    #[test]
    fn test_low_battery_warns_only_when_reading_is_normal() {
        assert_eq!(
            classify(SensorType::Weather, 10.0, Some(9.9)),
            DeviceStatus::Warning
        );
        assert_eq!(
            classify(SensorType::Weather, 10.0, Some(10.0)),
            DeviceStatus::Active
        );
        assert_eq!(
            classify(SensorType::Weather, 90.0, Some(5.0)),
            DeviceStatus::Critical
        );
    }

    #[test]
    fn test_unknown_sensor_defaults() {
        assert_eq!(classify(SensorType::Other, 50.0, None), DeviceStatus::Active);
        assert_eq!(classify(SensorType::Other, 75.0, None), DeviceStatus::Warning);
        assert_eq!(classify(SensorType::Other, 100.5, None), DeviceStatus::Critical);
    }

    #[test]
    fn test_per_type_thresholds() {
        assert_eq!(classify(SensorType::Radiation, 0.5, None), DeviceStatus::Warning);
        assert_eq!(classify(SensorType::AirQuality, 201.0, None), DeviceStatus::Critical);
        assert_eq!(classify(SensorType::WaterQuality, 7.0, None), DeviceStatus::Active);
        assert_eq!(classify(SensorType::Acoustic, 90.0, None), DeviceStatus::Warning);
        assert_eq!(
            classify(SensorType::Electromagnetic, 150.0, None),
            DeviceStatus::Critical
        );
    }

    #[test]
    fn test_classify_is_deterministic() {
        let inputs = [
            (SensorType::Seismic, 4.2, Some(50.0)),
            (SensorType::Radiation, 1.5, None),
            (SensorType::Acoustic, 10.0, Some(3.0)),
        ];
        for (sensor, reading, battery) in inputs {
            assert_eq!(
                classify(sensor, reading, battery),
                classify(sensor, reading, battery)
            );
        }
    }
}
