//! Device registry.
//!
//! The authoritative in-memory set of sensor devices. Devices are never
//! removed; status is always re-derived by the classifier when a reading
//! arrives. A reading that makes a device `critical` signals the detection
//! queue for the device's region.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::classifier::classify;
use crate::error::{OracleError, Result};
use crate::model::{DeviceStatus, Location, Reading, SensorDevice, SensorType, region_matches};
use crate::queue::DetectionQueue;

/// Shared registry of known devices.
#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, SensorDevice>>>,
    critical_signal: DetectionQueue,
}

impl DeviceRegistry {
    /// Create an empty registry that signals `critical_signal` on critical readings.
    pub fn new(critical_signal: DetectionQueue) -> Self {
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            critical_signal,
        }
    }

    /// Register a new device with status `active` and a zero reading.
    ///
    /// Fails with [`OracleError::DuplicateDevice`] if the id is taken; the
    /// existing device is left untouched.
    pub async fn register(
        &self,
        device_id: &str,
        location: Location,
        sensor_type: SensorType,
        unit: &str,
        now: DateTime<Utc>,
    ) -> Result<SensorDevice> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(device_id) {
            warn!(device_id = %device_id, "Rejected duplicate device registration");
            return Err(OracleError::DuplicateDevice(device_id.to_string()));
        }

        let device = SensorDevice {
            device_id: device_id.to_string(),
            location,
            sensor_type,
            reading: 0.0,
            unit: unit.to_string(),
            last_updated: now,
            status: DeviceStatus::Active,
            battery_level: None,
        };
        devices.insert(device_id.to_string(), device.clone());

        info!(
            device_id = %device_id,
            sensor_type = sensor_type.label(),
            region = %device.location.region,
            "Device registered"
        );
        Ok(device)
    }

    /// Record a reading, re-derive status, and signal detection if critical.
    ///
    /// Last writer wins for concurrent readings on the same device.
    pub async fn submit_reading(
        &self,
        device_id: &str,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> Result<SensorDevice> {
        let updated = {
            let mut devices = self.devices.write().await;
            let device = devices
                .get_mut(device_id)
                .ok_or_else(|| OracleError::DeviceNotFound(device_id.to_string()))?;

            if reading.battery_level.is_some() {
                device.battery_level = reading.battery_level.map(|b| b.clamp(0.0, 100.0));
            }
            device.reading = reading.value;
            device.last_updated = reading.timestamp.unwrap_or(now);
            device.status = classify(device.sensor_type, device.reading, device.battery_level);
            device.clone()
        };

        if updated.status == DeviceStatus::Critical {
            warn!(
                device_id = %updated.device_id,
                reading = updated.reading,
                unit = %updated.unit,
                region = %updated.location.region,
                "Device reading critical, scheduling detection"
            );
            self.critical_signal.signal(&updated.location.region).await;
        }

        Ok(updated)
    }

    /// Mark a device unreachable. Only an explicit administrative call does this.
    pub async fn mark_offline(&self, device_id: &str, now: DateTime<Utc>) -> Result<SensorDevice> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| OracleError::DeviceNotFound(device_id.to_string()))?;
        device.status = DeviceStatus::Offline;
        device.last_updated = now;
        info!(device_id = %device_id, "Device marked offline");
        Ok(device.clone())
    }

    /// Get a device by id.
    pub async fn get(&self, device_id: &str) -> Result<SensorDevice> {
        self.devices
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| OracleError::DeviceNotFound(device_id.to_string()))
    }

    /// List devices, optionally filtered by a case-insensitive region substring.
    pub async fn list(&self, region_filter: Option<&str>) -> Vec<SensorDevice> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| region_matches(&d.location.region, region_filter))
            .cloned()
            .collect()
    }

    /// Number of registered devices.
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}
