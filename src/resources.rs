//! Regional resource monitoring.
//!
//! For every region on the watch-list the monitor samples each resource type
//! from a pluggable [`ResourceTelemetrySource`], classifies the trend, projects
//! days until depletion, and attaches the region's distribution points from
//! the facility directory. Metrics are replaced wholesale on every run and the
//! last computed set per watched region is kept for queries. Ad-hoc regions
//! are computed on demand and never cached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::model::{
    DistributionPoint, ResourceMetric, ResourceType, Trend, projected_days_remaining,
};

/// One telemetry reading for a resource in a region.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// Level on a 0-100 scale.
    pub current_level: f64,
    /// Fraction of capacity drawn per period (0-1).
    pub utilization_rate: f64,
    pub capacity: f64,
    pub suppliers: Vec<String>,
}

/// A facility that stocks resources for a region.
#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    pub name: String,
    pub region: String,
    pub capacity: f64,
}

impl Facility {
    pub fn new(name: &str, region: &str, capacity: f64) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            capacity,
        }
    }
}

/// Supplies resource levels and facility stock.
#[async_trait]
pub trait ResourceTelemetrySource: Send + Sync {
    async fn sample(&self, resource: ResourceType, region: &str) -> anyhow::Result<TelemetrySample>;

    async fn facility_stock(&self, facility: &Facility, resource: ResourceType) -> anyhow::Result<f64>;
}

/// Fixed list of distribution facilities, grouped by region.
#[derive(Debug, Clone)]
pub struct FacilityDirectory {
    facilities: Vec<Facility>,
}

impl Default for FacilityDirectory {
    fn default() -> Self {
        Self::new(vec![
            Facility::new("Kyiv Central Depot", "Eastern Europe", 12_000.0),
            Facility::new("Dnipro Relief Hub", "Eastern Europe", 8_000.0),
            Facility::new("Kharkiv Field Warehouse", "Eastern Europe", 5_000.0),
            Facility::new("Bamako Logistics Base", "Sahel", 6_500.0),
            Facility::new("Mopti Distribution Point", "Sahel", 3_000.0),
            Facility::new("Mogadishu Port Warehouse", "Horn of Africa", 10_000.0),
            Facility::new("Baidoa Relief Center", "Horn of Africa", 4_000.0),
            Facility::new("Aleppo Humanitarian Hub", "Levant", 7_500.0),
            Facility::new("Idlib Cross-border Depot", "Levant", 4_500.0),
        ])
    }
}

impl FacilityDirectory {
    pub fn new(facilities: Vec<Facility>) -> Self {
        Self { facilities }
    }

    /// Facilities serving `region` (exact, case-insensitive).
    pub fn for_region(&self, region: &str) -> Vec<&Facility> {
        self.facilities
            .iter()
            .filter(|f| f.region.eq_ignore_ascii_case(region))
            .collect()
    }
}

/// Build a metric from a telemetry sample.
pub fn build_metric(
    resource: ResourceType,
    region: &str,
    country: &str,
    sample: TelemetrySample,
    distribution_points: Vec<DistributionPoint>,
    now: DateTime<Utc>,
) -> ResourceMetric {
    let current_level = sample.current_level.clamp(0.0, 100.0);
    let utilization_rate = sample.utilization_rate.clamp(0.0, 1.0);

    ResourceMetric {
        resource_type: resource,
        region: region.to_string(),
        country: country.to_string(),
        current_level,
        capacity: sample.capacity,
        utilization_rate,
        trend: Trend::from_level(current_level),
        projected_days_remaining: projected_days_remaining(current_level, utilization_rate),
        suppliers: sample.suppliers,
        distribution_points,
        last_updated: now,
    }
}

/// Metrics for one region and when they were computed.
#[derive(Debug, Clone)]
struct Snapshot {
    computed_at: DateTime<Utc>,
    metrics: Vec<ResourceMetric>,
}

/// Computes and caches per-region resource metrics.
#[derive(Clone)]
pub struct ResourceMonitor {
    telemetry: Arc<dyn ResourceTelemetrySource>,
    facilities: Arc<FacilityDirectory>,
    latest: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl ResourceMonitor {
    pub fn new(telemetry: Arc<dyn ResourceTelemetrySource>, facilities: FacilityDirectory) -> Self {
        Self {
            telemetry,
            facilities: Arc::new(facilities),
            latest: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Recompute all resource metrics for a region and cache them.
    ///
    /// A telemetry failure for one resource type keeps that type's previous
    /// metric, if any; the other types are still refreshed. A facility whose
    /// stock cannot be fetched is reported with zero stock.
    pub async fn monitor(&self, region: &str, country: &str, now: DateTime<Utc>) -> Vec<ResourceMetric> {
        let key = region.to_lowercase();
        let previous = self
            .latest
            .read()
            .await
            .get(&key)
            .map(|s| s.metrics.clone())
            .unwrap_or_default();

        let metrics = self.collect(region, country, &previous, now).await;
        self.latest.write().await.insert(
            key,
            Snapshot {
                computed_at: now,
                metrics: metrics.clone(),
            },
        );
        metrics
    }

    /// Compute metrics for a region without touching the cache.
    pub async fn compute(&self, region: &str, country: &str, now: DateTime<Utc>) -> Vec<ResourceMetric> {
        self.collect(region, country, &[], now).await
    }

    async fn collect(
        &self,
        region: &str,
        country: &str,
        previous: &[ResourceMetric],
        now: DateTime<Utc>,
    ) -> Vec<ResourceMetric> {
        let facilities = self.facilities.for_region(region);

        let mut metrics = Vec::with_capacity(ResourceType::ALL.len());
        for resource in ResourceType::ALL {
            let sample = match self.telemetry.sample(resource, region).await {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(
                        region = %region,
                        resource = resource.label(),
                        error = %e,
                        "Resource telemetry failed, keeping last known metric"
                    );
                    if let Some(old) = previous.iter().find(|m| m.resource_type == resource) {
                        metrics.push(old.clone());
                    }
                    continue;
                }
            };

            let mut points = Vec::with_capacity(facilities.len());
            for facility in &facilities {
                let current_stock = match self.telemetry.facility_stock(facility, resource).await {
                    Ok(stock) => stock.max(0.0),
                    Err(e) => {
                        warn!(
                            facility = %facility.name,
                            resource = resource.label(),
                            error = %e,
                            "Facility stock unavailable"
                        );
                        0.0
                    }
                };
                points.push(DistributionPoint {
                    location: facility.name.clone(),
                    capacity: facility.capacity,
                    current_stock,
                });
            }

            let metric = build_metric(resource, region, country, sample, points, now);
            debug!(
                region = %region,
                resource = resource.label(),
                level = metric.current_level,
                trend = ?metric.trend,
                "Resource metric computed"
            );
            metrics.push(metric);
        }
        metrics
    }

    /// Last computed metrics for a region, if it has been monitored.
    pub async fn latest(&self, region: &str) -> Option<Vec<ResourceMetric>> {
        self.latest
            .read()
            .await
            .get(&region.to_lowercase())
            .map(|s| s.metrics.clone())
    }

    /// Cached metrics for a region, if computed less than `max_age` before `now`.
    pub async fn fresh(
        &self,
        region: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Option<Vec<ResourceMetric>> {
        self.latest
            .read()
            .await
            .get(&region.to_lowercase())
            .filter(|s| now - s.computed_at < max_age)
            .map(|s| s.metrics.clone())
    }
}
