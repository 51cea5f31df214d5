//! End-to-end scenarios driving the oracle and orchestrator directly with
//! deterministic fixture sources and an explicit clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use threatwatch::config::{OracleConfig, RegionOfInterest};
use threatwatch::error::OracleError;
use threatwatch::model::{
    ANOMALY_SCORE_METRIC, AlertLocation, AlertType, Coordinates, DataType, DeviceStatus,
    ImageryObservation, Location, MetricValue, Reading, RegisterDeviceRequest, ResourceType,
    SensorDevice, SensorType, Severity,
};
use threatwatch::oracle::{Oracle, Sources};
use threatwatch::orchestrator::{CycleOutcome, Orchestrator};
use threatwatch::providers::{ObservationSource, ProviderHandle, ReadingSource, SimulatedTelemetry};
use threatwatch::resources::{Facility, ResourceTelemetrySource, TelemetrySample};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()
}

/// Imagery fixture: `sentinel_hub` is down, everyone else sees a strong anomaly.
struct FixtureImagery;

#[async_trait]
impl ObservationSource for FixtureImagery {
    async fn fetch(
        &self,
        provider: &ProviderHandle,
        region: &RegionOfInterest,
        _data_types: &[DataType],
    ) -> anyhow::Result<Vec<ImageryObservation>> {
        if provider.name == "sentinel_hub" {
            anyhow::bail!("502 Bad Gateway");
        }
        let (latitude, longitude) = region.center();
        let mut metrics = HashMap::new();
        metrics.insert(ANOMALY_SCORE_METRIC.to_string(), MetricValue::Number(0.92));
        Ok(vec![ImageryObservation {
            id: format!("{}-scene", provider.name),
            timestamp: t0(),
            coordinates: Coordinates {
                latitude,
                longitude,
            },
            altitude: 550_000.0,
            data_type: DataType::Military,
            metrics,
            confidence: 90.0,
            source: String::new(),
        }])
    }
}

struct QuietReadings;

#[async_trait]
impl ReadingSource for QuietReadings {
    async fn next_reading(&self, _device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
        Ok(None)
    }
}

/// Telemetry that is always down.
struct DeadTelemetry;

#[async_trait]
impl ResourceTelemetrySource for DeadTelemetry {
    async fn sample(&self, _resource: ResourceType, _region: &str) -> anyhow::Result<TelemetrySample> {
        anyhow::bail!("telemetry feed offline")
    }

    async fn facility_stock(&self, _facility: &Facility, _resource: ResourceType) -> anyhow::Result<f64> {
        anyhow::bail!("telemetry feed offline")
    }
}

fn oracle_with(config: OracleConfig, telemetry: Arc<dyn ResourceTelemetrySource>) -> Oracle {
    Oracle::with_sources(
        config,
        Sources {
            observations: Arc::new(FixtureImagery),
            readings: Some(Arc::new(QuietReadings)),
            telemetry,
        },
    )
}

fn quiet_oracle() -> Oracle {
    oracle_with(OracleConfig::default(), Arc::new(SimulatedTelemetry::seeded(3)))
}

fn imagery_config() -> OracleConfig {
    OracleConfig::from_lookup(|key| match key {
        "THREATWATCH_SENTINEL_HUB_API_KEY" | "THREATWATCH_PLANET_API_KEY" => {
            Some("key".to_string())
        }
        _ => None,
    })
}

fn seismic(id: &str, region: &str) -> RegisterDeviceRequest {
    RegisterDeviceRequest {
        device_id: id.to_string(),
        location: Location {
            latitude: 48.46,
            longitude: 35.04,
            region: region.to_string(),
        },
        sensor_type: SensorType::Seismic,
        unit: "magnitude".to_string(),
    }
}

#[tokio::test]
async fn test_seismic_event_end_to_end() {
    let oracle = quiet_oracle();
    let now = t0();

    assert_ok!(oracle.register_device(seismic("seis-1", "Eastern Europe"), now).await);
    let device = assert_ok!(
        oracle
            .submit_reading("seis-1", Reading::value(6.2), now)
            .await
    );
    assert_eq!(device.status, DeviceStatus::Critical);

    let alerts = oracle.detect(None, now).await;
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, AlertType::NaturalDisaster);
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.sources, vec!["seis-1".to_string()]);

    let just_before = now + Duration::hours(6) - Duration::seconds(1);
    assert_eq!(oracle.list_active_alerts(None, just_before).await.len(), 1);

    let expired = now + Duration::hours(6);
    assert!(oracle.list_active_alerts(None, expired).await.is_empty());
    assert!(oracle.get_alert(&alert.id, expired).await.is_none());
}

#[tokio::test]
async fn test_threshold_boundary_does_not_alert() {
    let oracle = quiet_oracle();
    let now = t0();
    assert_ok!(oracle.register_device(seismic("seis-1", "Sahel"), now).await);

    let device = assert_ok!(
        oracle
            .submit_reading("seis-1", Reading::value(5.0), now)
            .await
    );

    assert_eq!(device.status, DeviceStatus::Warning);
    assert!(oracle.detect(None, now).await.is_empty());
}

#[tokio::test]
async fn test_emergency_alert_bypasses_detection() {
    let oracle = quiet_oracle();
    let now = t0();
    let location = AlertLocation {
        latitude: 36.2,
        longitude: 37.1,
        region: "Levant".to_string(),
        country: "Syria".to_string(),
    };

    let id = oracle
        .trigger_emergency_alert(AlertType::InfrastructureFailure, location, "desc", now)
        .await;

    let alert = oracle.get_alert(&id, now).await.unwrap();
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.confidence, 100);
    assert_eq!(alert.sources, vec!["manual_trigger".to_string()]);
    assert_eq!(alert.expires_at, now + Duration::hours(12));
    assert!(oracle.detect(None, now).await.is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_leaves_first_device() {
    let oracle = quiet_oracle();
    let now = t0();
    assert_ok!(oracle.register_device(seismic("d1", "Sahel"), now).await);

    let mut second = seismic("d1", "Levant");
    second.sensor_type = SensorType::Radiation;
    let err = assert_err!(
        oracle
            .register_device(second, now + Duration::minutes(1))
            .await
    );

    assert!(matches!(err, OracleError::DuplicateDevice(_)));
    let device = oracle.get_device("d1").await.unwrap();
    assert_eq!(device.sensor_type, SensorType::Seismic);
    assert_eq!(device.location.region, "Sahel");
    assert_eq!(device.last_updated, now);
}

#[tokio::test]
async fn test_failing_provider_does_not_block_others() {
    let oracle = oracle_with(imagery_config(), Arc::new(SimulatedTelemetry::seeded(3)));
    let now = t0();

    let alerts = oracle.detect(None, now).await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::MilitaryMovement);
    assert_eq!(alerts[0].sources, vec!["planet".to_string()]);
    assert_eq!(alerts[0].confidence, 85);

    let health = oracle.provider_health().await;
    let sentinel = health.iter().find(|h| h.name == "sentinel_hub").unwrap();
    assert_eq!(sentinel.failures, 1);
    assert!(sentinel.last_error.as_deref().unwrap().contains("502"));
    let planet = health.iter().find(|h| h.name == "planet").unwrap();
    assert_eq!(planet.successes, 1);
}

#[tokio::test]
async fn test_cycle_survives_dead_telemetry() {
    let oracle = oracle_with(OracleConfig::default(), Arc::new(DeadTelemetry));
    let now = t0();
    assert_ok!(oracle.register_device(seismic("seis-1", "Eastern Europe"), now).await);
    assert_ok!(
        oracle
            .submit_reading("seis-1", Reading::value(7.5), now)
            .await
    );
    oracle
        .trigger_emergency_alert(
            AlertType::ResourceScarcity,
            AlertLocation {
                latitude: 2.0,
                longitude: 45.3,
                region: "Horn of Africa".to_string(),
                country: "Somalia".to_string(),
            },
            "Water trucking halted",
            now - Duration::hours(13),
        )
        .await;
    let orchestrator = Orchestrator::new(oracle.clone());

    let CycleOutcome::Completed(report) = orchestrator.run_cycle(now).await else {
        panic!("cycle should run");
    };

    assert_eq!(report.alerts_raised, 1);
    assert_eq!(report.metrics_computed, 0);
    assert_eq!(report.alerts_swept, 1);
    assert!(oracle.get_resource_status("Sahel", now).await.is_empty());
}

#[tokio::test]
async fn test_critical_reading_triggers_background_detection() {
    let config = OracleConfig {
        cycle_interval: StdDuration::from_secs(3600),
        ..OracleConfig::default()
    };
    let oracle = oracle_with(config, Arc::new(SimulatedTelemetry::seeded(3)));
    let orchestrator = Orchestrator::new(oracle.clone());
    let handles = orchestrator.start();

    // Let the immediate first tick finish on an empty registry.
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    assert!(oracle.list_active_alerts(None, Utc::now()).await.is_empty());

    let now = Utc::now();
    assert_ok!(oracle.register_device(seismic("seis-9", "Horn of Africa"), now).await);
    assert_ok!(
        oracle
            .submit_reading("seis-9", Reading::value(6.8), now)
            .await
    );

    let mut raised = Vec::new();
    for _ in 0..50 {
        raised = oracle.list_active_alerts(Some("horn"), Utc::now()).await;
        if !raised.is_empty() {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }

    orchestrator.stop();
    for handle in handles {
        assert_ok!(handle.await);
    }

    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].sources, vec!["seis-9".to_string()]);
    assert_eq!(raised[0].location.country, "Somalia");
}
