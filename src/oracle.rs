//! The oracle service instance.
//!
//! [`Oracle`] owns every piece of state (device registry, alert store,
//! provider registry, resource monitor and detection queue) and exposes the
//! public operations used by the HTTP layer and the orchestrator. It is cheap
//! to clone; clones share state. Separate instances share nothing, so tests
//! can run many side by side.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::alerts::AlertStore;
use crate::config::OracleConfig;
use crate::detection::{ThreatDetector, UNKNOWN_COUNTRY, default_actions, estimate_impact};
use crate::devices::DeviceRegistry;
use crate::error::Result;
use crate::model::{
    AlertLocation, AlertType, DeviceStatus, Reading, RegisterDeviceRequest, ResourceMetric,
    SensorDevice, Severity, ThreatAlert,
};
use crate::providers::{
    GatewayReadingSource, HttpImageryClient, IotGatewayClient, ObservationSource, ProviderHealth,
    ProviderRegistry, ReadingSource, SimulatedImagery, SimulatedReadings, SimulatedTelemetry,
};
use crate::queue::{DetectionBatch, DetectionQueue};
use crate::resources::{FacilityDirectory, ResourceMonitor, ResourceTelemetrySource};

/// Provenance recorded on manually triggered alerts.
pub const MANUAL_TRIGGER_SOURCE: &str = "manual_trigger";

/// Lifetime of manually triggered alerts, in hours.
pub const EMERGENCY_ALERT_TTL_HOURS: i64 = 12;

/// Data sources an oracle is wired to.
pub struct Sources {
    pub observations: Arc<dyn ObservationSource>,
    /// `None` pulls readings from the configured IoT gateways.
    pub readings: Option<Arc<dyn ReadingSource>>,
    pub telemetry: Arc<dyn ResourceTelemetrySource>,
}

impl Sources {
    /// Randomized sources for demo and offline use.
    pub fn simulated() -> Self {
        Self {
            observations: Arc::new(SimulatedImagery::new()),
            readings: Some(Arc::new(SimulatedReadings::new())),
            telemetry: Arc::new(SimulatedTelemetry::new()),
        }
    }

    /// HTTP imagery providers and IoT gateways.
    ///
    /// Resource telemetry has no live feed yet and stays simulated.
    pub fn live() -> Self {
        Self {
            observations: Arc::new(HttpImageryClient::new()),
            readings: None,
            telemetry: Arc::new(SimulatedTelemetry::new()),
        }
    }
}

/// Outcome of refreshing device readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Shared service state and its public operations.
#[derive(Clone)]
pub struct Oracle {
    config: Arc<OracleConfig>,
    queue: DetectionQueue,
    devices: DeviceRegistry,
    alerts: AlertStore,
    providers: ProviderRegistry,
    detector: ThreatDetector,
    resources: ResourceMonitor,
    readings: Arc<dyn ReadingSource>,
}

impl Oracle {
    /// Build an oracle, choosing simulated or live sources from `config.simulate`.
    ///
    /// In simulate mode every known provider is enabled, so the simulated
    /// sources stand in for the ones without credentials.
    pub fn new(mut config: OracleConfig) -> Self {
        let sources = if config.simulate {
            config.enable_simulated_providers();
            Sources::simulated()
        } else {
            Sources::live()
        };
        Self::with_sources(config, sources)
    }

    pub fn with_sources(config: OracleConfig, sources: Sources) -> Self {
        let config = Arc::new(config);
        let queue = DetectionQueue::new(config.queue_capacity);
        let devices = DeviceRegistry::new(queue.clone());
        let alerts = AlertStore::new();
        let providers = ProviderRegistry::new(
            config.providers.clone(),
            sources.observations,
            config.provider_timeout,
        );
        let readings = sources.readings.unwrap_or_else(|| {
            Arc::new(GatewayReadingSource::new(
                providers.clone(),
                IotGatewayClient::new(),
            ))
        });
        let detector = ThreatDetector::new(
            config.clone(),
            providers.clone(),
            devices.clone(),
            alerts.clone(),
        );
        let resources = ResourceMonitor::new(sources.telemetry, FacilityDirectory::default());

        Self {
            config,
            queue,
            devices,
            alerts,
            providers,
            detector,
            resources,
            readings,
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn queue(&self) -> &DetectionQueue {
        &self.queue
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    pub async fn register_device(
        &self,
        request: RegisterDeviceRequest,
        now: DateTime<Utc>,
    ) -> Result<SensorDevice> {
        self.devices
            .register(
                &request.device_id,
                request.location,
                request.sensor_type,
                &request.unit,
                now,
            )
            .await
    }

    pub async fn submit_reading(
        &self,
        device_id: &str,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> Result<SensorDevice> {
        self.devices.submit_reading(device_id, reading, now).await
    }

    pub async fn mark_offline(&self, device_id: &str, now: DateTime<Utc>) -> Result<SensorDevice> {
        self.devices.mark_offline(device_id, now).await
    }

    pub async fn get_device(&self, device_id: &str) -> Result<SensorDevice> {
        self.devices.get(device_id).await
    }

    pub async fn list_devices(&self, region_filter: Option<&str>) -> Vec<SensorDevice> {
        self.devices.list(region_filter).await
    }

    pub async fn device_count(&self) -> usize {
        self.devices.len().await
    }

    /// Pull a fresh reading for every device that is not offline.
    ///
    /// A source failure for one device is logged and counted; the remaining
    /// devices are still refreshed.
    pub async fn refresh_devices(&self, now: DateTime<Utc>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let mut devices = self.devices.list(None).await;
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        for device in devices
            .iter()
            .filter(|d| d.status != DeviceStatus::Offline)
        {
            match self.readings.next_reading(device).await {
                Ok(Some(reading)) => {
                    match self.devices.submit_reading(&device.device_id, reading, now).await {
                        Ok(_) => summary.updated += 1,
                        Err(e) => {
                            warn!(device_id = %device.device_id, error = %e, "Refreshed reading rejected");
                            summary.failed += 1;
                        }
                    }
                }
                Ok(None) => summary.unchanged += 1,
                Err(e) => {
                    warn!(device_id = %device.device_id, error = %e, "Failed to refresh device reading");
                    summary.failed += 1;
                }
            }
        }

        debug!(
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "Device refresh finished"
        );
        summary
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    pub async fn list_active_alerts(
        &self,
        region_filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<ThreatAlert> {
        self.alerts.list_active(region_filter, now).await
    }

    pub async fn get_alert(&self, id: &str, now: DateTime<Utc>) -> Option<ThreatAlert> {
        self.alerts.get(id, now).await
    }

    /// Raise a critical alert directly, bypassing every detection rule.
    pub async fn trigger_emergency_alert(
        &self,
        alert_type: AlertType,
        location: AlertLocation,
        description: &str,
        now: DateTime<Utc>,
    ) -> String {
        let severity = Severity::Critical;
        let alert = ThreatAlert {
            id: self.alerts.next_id(alert_type, now),
            alert_type,
            severity,
            location,
            description: description.to_string(),
            confidence: 100,
            sources: vec![MANUAL_TRIGGER_SOURCE.to_string()],
            predicted_impact: estimate_impact(alert_type, severity, 1.0),
            recommended_actions: default_actions(alert_type),
            created_at: now,
            expires_at: now + Duration::hours(EMERGENCY_ALERT_TTL_HOURS),
        };
        let id = alert.id.clone();

        warn!(
            alert_id = %id,
            alert_type = alert_type.label(),
            region = %alert.location.region,
            "Emergency alert triggered"
        );
        self.alerts.upsert(alert).await;
        id
    }

    pub async fn sweep_expired_alerts(&self, now: DateTime<Utc>) -> usize {
        self.alerts.sweep_expired(now).await
    }

    // ------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------

    pub async fn detect(&self, region_filter: Option<&str>, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        self.detector.detect(region_filter, now).await
    }

    /// Run detection for exactly one region name.
    pub async fn detect_region(&self, region: &str, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        self.detector.detect_region(region, now).await
    }

    /// Run detection for one batch of signalled regions.
    ///
    /// An all-regions batch runs a single unfiltered pass.
    pub async fn process_batch(&self, batch: DetectionBatch, now: DateTime<Utc>) -> usize {
        if batch.all_regions {
            return self.detect(None, now).await.len();
        }

        let mut raised = 0;
        for region in &batch.regions {
            raised += self.detect_region(region, now).await.len();
        }
        raised
    }

    /// Run detection for everything currently signalled, without waiting.
    pub async fn process_pending_detections(&self, now: DateTime<Utc>) -> usize {
        let batch = self.queue.drain().await;
        if batch.is_empty() {
            return 0;
        }
        self.process_batch(batch, now).await
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Resource metrics for `region`.
    ///
    /// Watched regions answer from the last cycle while it is younger than
    /// the cycle interval and are recomputed otherwise. Other regions are
    /// computed on every call and not cached.
    pub async fn get_resource_status(&self, region: &str, now: DateTime<Utc>) -> Vec<ResourceMetric> {
        let Some(watch) = self.config.watch_region(region) else {
            let country = self.config.country_for(region).unwrap_or(UNKNOWN_COUNTRY);
            return self.resources.compute(region, country, now).await;
        };

        let max_age = Duration::from_std(self.config.cycle_interval).unwrap_or_else(|_| Duration::zero());
        if let Some(metrics) = self.resources.fresh(&watch.region, max_age, now).await {
            return metrics;
        }
        self.resources.monitor(&watch.region, &watch.country, now).await
    }

    /// Recompute metrics for every region on the watch-list.
    ///
    /// Returns the number of metrics produced.
    pub async fn monitor_resources(&self, now: DateTime<Utc>) -> usize {
        let mut produced = 0;
        for watch in &self.config.watch_regions {
            produced += self
                .resources
                .monitor(&watch.region, &watch.country, now)
                .await
                .len();
        }
        info!(
            regions = self.config.watch_regions.len(),
            metrics = produced,
            "Resource monitoring finished"
        );
        produced
    }

    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        self.providers.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Location, SensorType};
    use crate::providers::ProviderCategory;
    use async_trait::async_trait;

    struct NoReadings;

    #[async_trait]
    impl ReadingSource for NoReadings {
        async fn next_reading(&self, device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
            if device.device_id.starts_with("bad") {
                anyhow::bail!("gateway unreachable");
            }
            Ok(None)
        }
    }

    fn oracle() -> Oracle {
        Oracle::with_sources(
            OracleConfig::default(),
            Sources {
                observations: Arc::new(SimulatedImagery::seeded(1)),
                readings: Some(Arc::new(NoReadings)),
                telemetry: Arc::new(SimulatedTelemetry::seeded(1)),
            },
        )
    }

    fn request(id: &str, sensor_type: SensorType, region: &str) -> RegisterDeviceRequest {
        RegisterDeviceRequest {
            device_id: id.to_string(),
            location: Location {
                latitude: 10.0,
                longitude: 20.0,
                region: region.to_string(),
            },
            sensor_type,
            unit: "unit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emergency_alert_bypasses_rules() {
        let oracle = oracle();
        let now = Utc::now();
        let location = AlertLocation {
            latitude: 50.4,
            longitude: 30.5,
            region: "Eastern Europe".to_string(),
            country: "Ukraine".to_string(),
        };

        let id = oracle
            .trigger_emergency_alert(AlertType::InfrastructureFailure, location, "Dam breach", now)
            .await;

        let alert = oracle.get_alert(&id, now).await.unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.confidence, 100);
        assert_eq!(alert.sources, vec![MANUAL_TRIGGER_SOURCE.to_string()]);
        assert_eq!(alert.expires_at - alert.created_at, Duration::hours(12));
        assert!(oracle.get_alert(&id, now + Duration::hours(12)).await.is_none());
    }

    #[tokio::test]
    async fn test_critical_reading_is_queued_and_processed() {
        let oracle = oracle();
        let now = Utc::now();
        oracle
            .register_device(request("seis-1", SensorType::Seismic, "Sahel"), now)
            .await
            .unwrap();
        oracle
            .submit_reading("seis-1", Reading::value(7.0), now)
            .await
            .unwrap();

        assert!(!oracle.queue().is_empty().await);
        assert_eq!(oracle.process_pending_detections(now).await, 1);
        assert!(oracle.queue().is_empty().await);
        assert_eq!(oracle.process_pending_detections(now).await, 0);
    }

    #[tokio::test]
    async fn test_refresh_skips_offline_and_counts_failures() {
        let oracle = oracle();
        let now = Utc::now();
        for id in ["bad-1", "ok-1", "off-1"] {
            oracle
                .register_device(request(id, SensorType::Weather, "Levant"), now)
                .await
                .unwrap();
        }
        oracle.mark_offline("off-1", now).await.unwrap();

        let summary = oracle.refresh_devices(now).await;

        assert_eq!(
            summary,
            RefreshSummary {
                updated: 0,
                unchanged: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_resource_status_is_cached() {
        let oracle = oracle();
        let now = Utc::now();

        let first = oracle.get_resource_status("Sahel", now).await;
        let again = oracle
            .get_resource_status("sahel", now + Duration::minutes(1))
            .await;

        assert_eq!(first.len(), 5);
        assert_eq!(first[0].country, "Mali");
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_watched_region_recomputed_once_stale() {
        let oracle = oracle();
        let now = Utc::now();
        let first = oracle.get_resource_status("Sahel", now).await;

        let later = now + Duration::hours(1);
        let again = oracle.get_resource_status("Sahel", later).await;

        assert_eq!(first[0].last_updated, now);
        assert!(again.iter().all(|m| m.last_updated == later));
    }

    #[tokio::test]
    async fn test_unwatched_region_is_fresh_and_uncached() {
        let oracle = oracle();
        let now = Utc::now();
        let first = oracle.get_resource_status("Gaza", now).await;
        oracle.monitor_resources(now + Duration::days(3)).await;

        let later = now + Duration::days(30);
        let again = oracle.get_resource_status("Gaza", later).await;

        assert_eq!(first.len(), 5);
        assert!(again.iter().all(|m| m.last_updated == later));
        assert!(oracle.resources.latest("Gaza").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_region_gets_unknown_country() {
        let oracle = oracle();
        let metrics = oracle.get_resource_status("Atlantis", Utc::now()).await;
        assert!(metrics.iter().all(|m| m.country == UNKNOWN_COUNTRY));
    }

    #[tokio::test]
    async fn test_simulate_mode_consults_imagery_providers() {
        let oracle = Oracle::new(OracleConfig::from_lookup(|_| None));

        oracle.detect(None, Utc::now()).await;

        let health = oracle.provider_health().await;
        let imagery: Vec<&ProviderHealth> = health
            .iter()
            .filter(|h| h.category == ProviderCategory::Imagery)
            .collect();
        assert_eq!(imagery.len(), 3);
        assert!(imagery.iter().all(|h| h.enabled && h.successes == 1));
    }

    #[tokio::test]
    async fn test_signalled_region_is_matched_exactly() {
        let oracle = oracle();
        let now = Utc::now();
        for (id, region) in [("seis-1", "Sahel"), ("seis-2", "Western Sahel")] {
            oracle
                .register_device(request(id, SensorType::Seismic, region), now)
                .await
                .unwrap();
            oracle
                .submit_reading(id, Reading::value(7.0), now)
                .await
                .unwrap();
        }
        oracle.queue().drain().await;

        let batch = DetectionBatch {
            regions: vec!["sahel".to_string()],
            all_regions: false,
        };
        assert_eq!(oracle.process_batch(batch, now).await, 1);

        let alerts = oracle.list_active_alerts(None, now).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sources, vec!["seis-1".to_string()]);
    }

    #[tokio::test]
    async fn test_monitor_resources_covers_watch_list() {
        let oracle = oracle();
        assert_eq!(oracle.monitor_resources(Utc::now()).await, 4 * 5);
    }
}
