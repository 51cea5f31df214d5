//! Randomized data sources.
//!
//! Used when no provider credentials are configured, and by tests that need
//! plausible data without network access. Seeded constructors give
//! reproducible sequences.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ObservationSource, ProviderHandle, ReadingSource};
use crate::classifier::thresholds;
use crate::config::RegionOfInterest;
use crate::model::{
    ANOMALY_SCORE_METRIC, Coordinates, DataType, ImageryObservation, MetricValue, Reading,
    ResourceType, SensorDevice,
};
use crate::resources::{Facility, ResourceTelemetrySource, TelemetrySample};

fn rng_from(seed: Option<u64>) -> Mutex<StdRng> {
    Mutex::new(match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    })
}

/// Run `f` with the shared generator.
fn with_rng<T>(rng: &Mutex<StdRng>, f: impl FnOnce(&mut StdRng) -> T) -> T {
    let mut guard = rng.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

// ============================================================================
// Imagery
// ============================================================================

/// Generates a handful of observations scattered over the region of interest.
pub struct SimulatedImagery {
    rng: Mutex<StdRng>,
}

impl Default for SimulatedImagery {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedImagery {
    pub fn new() -> Self {
        Self { rng: rng_from(None) }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: rng_from(Some(seed)),
        }
    }
}

#[async_trait]
impl ObservationSource for SimulatedImagery {
    async fn fetch(
        &self,
        provider: &ProviderHandle,
        region: &RegionOfInterest,
        data_types: &[DataType],
    ) -> anyhow::Result<Vec<ImageryObservation>> {
        if data_types.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();

        Ok(with_rng(&self.rng, |rng| {
            let count = rng.gen_range(3..=8);
            (0..count)
                .map(|i| {
                    let data_type = data_types[rng.gen_range(0..data_types.len())];
                    let mut metrics = HashMap::new();
                    metrics.insert(
                        ANOMALY_SCORE_METRIC.to_string(),
                        MetricValue::Number(rng.gen_range(0.0..1.0)),
                    );
                    metrics.insert(
                        "cloud_cover".to_string(),
                        MetricValue::Number(rng.gen_range(0.0..0.6)),
                    );
                    if data_type == DataType::Military {
                        metrics.insert(
                            "vehicle_count".to_string(),
                            MetricValue::Number(f64::from(rng.gen_range(0u32..120))),
                        );
                    }

                    ImageryObservation {
                        id: format!("{}-{}-{}", provider.name, now.timestamp_millis(), i),
                        timestamp: now,
                        coordinates: Coordinates {
                            latitude: rng.gen_range(region.south..=region.north),
                            longitude: rng.gen_range(region.west..=region.east),
                        },
                        altitude: rng.gen_range(400_000.0..800_000.0),
                        data_type,
                        metrics,
                        confidence: rng.gen_range(60.0..95.0),
                        source: provider.name.clone(),
                    }
                })
                .collect()
        }))
    }
}

// ============================================================================
// Device readings
// ============================================================================

/// Produces a fresh reading for every device on every call.
///
/// Most readings sit below the warning threshold; roughly one in ten lands in
/// the warning band and one in twenty above critical. Batteries drain slowly.
pub struct SimulatedReadings {
    rng: Mutex<StdRng>,
}

impl Default for SimulatedReadings {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedReadings {
    pub fn new() -> Self {
        Self { rng: rng_from(None) }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: rng_from(Some(seed)),
        }
    }
}

#[async_trait]
impl ReadingSource for SimulatedReadings {
    async fn next_reading(&self, device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
        let t = thresholds(device.sensor_type);

        let reading = with_rng(&self.rng, |rng| {
            let roll: f64 = rng.r#gen();
            let value = if roll < 0.05 {
                t.critical * rng.gen_range(1.01..1.3)
            } else if roll < 0.15 {
                rng.gen_range(t.warning..t.critical)
            } else {
                t.warning * rng.gen_range(0.6..0.98)
            };
            let battery = (device.battery_level.unwrap_or(100.0) - rng.gen_range(0.0..0.5))
                .clamp(0.0, 100.0);

            Reading {
                value,
                battery_level: Some(battery),
                timestamp: Some(Utc::now()),
            }
        });

        Ok(Some(reading))
    }
}

// ============================================================================
// Resource telemetry
// ============================================================================

/// Nominal regional capacity per resource type, in that resource's units.
fn nominal_capacity(resource: ResourceType) -> f64 {
    match resource {
        ResourceType::Water => 5_000_000.0,
        ResourceType::Food => 1_200_000.0,
        ResourceType::Energy => 850_000.0,
        ResourceType::MedicalSupplies => 40_000.0,
        ResourceType::Fuel => 2_500_000.0,
    }
}

fn suppliers(resource: ResourceType) -> Vec<String> {
    let names: &[&str] = match resource {
        ResourceType::Water => &["UNICEF WASH", "Regional Water Authority"],
        ResourceType::Food => &["World Food Programme", "Local Grain Cooperative"],
        ResourceType::Energy => &["National Grid Operator", "Mobile Generator Pool"],
        ResourceType::MedicalSupplies => &["WHO Emergency Stockpile", "MSF Logistics"],
        ResourceType::Fuel => &["Strategic Fuel Reserve", "Commercial Importers"],
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// Random resource levels in the ranges a live telemetry feed would report.
pub struct SimulatedTelemetry {
    rng: Mutex<StdRng>,
}

impl Default for SimulatedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTelemetry {
    pub fn new() -> Self {
        Self { rng: rng_from(None) }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: rng_from(Some(seed)),
        }
    }
}

#[async_trait]
impl ResourceTelemetrySource for SimulatedTelemetry {
    async fn sample(&self, resource: ResourceType, _region: &str) -> anyhow::Result<TelemetrySample> {
        Ok(with_rng(&self.rng, |rng| TelemetrySample {
            current_level: rng.gen_range(0.0..100.0),
            utilization_rate: rng.gen_range(0.1..0.9),
            capacity: nominal_capacity(resource),
            suppliers: suppliers(resource),
        }))
    }

    async fn facility_stock(&self, facility: &Facility, _resource: ResourceType) -> anyhow::Result<f64> {
        Ok(with_rng(&self.rng, |rng| {
            (facility.capacity * rng.gen_range(0.1..1.0)).round()
        }))
    }
}
