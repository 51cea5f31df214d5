//! Threat detection.
//!
//! A detection pass is two independent rule passes whose results are
//! concatenated and stored:
//!
//! 1. **Imagery pass**: observations from every enabled imagery provider are
//!    pooled for the region of interest. When their confidence-weighted
//!    anomaly score exceeds [`ANOMALY_THRESHOLD`], one `military_movement`
//!    alert is raised for the whole pass.
//! 2. **Sensor pass**: every `critical` device is matched against the
//!    [`SensorRule`] table. Each matching row yields one alert from its
//!    template.
//!
//! Every alert carries a [`PredictedImpact`] from [`estimate_impact`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::alerts::AlertStore;
use crate::classifier::thresholds;
use crate::config::OracleConfig;
use crate::devices::DeviceRegistry;
use crate::model::{
    AlertLocation, AlertType, DeviceStatus, ImageryObservation, PredictedImpact, SensorDevice,
    SensorType, Severity, ThreatAlert, region_matches,
};
use crate::providers::{ProviderCategory, ProviderRegistry};

/// Aggregate anomaly score above which imagery raises an alert.
pub const ANOMALY_THRESHOLD: f64 = 0.70;

/// Confidence assigned to imagery-derived alerts.
pub const IMAGERY_ALERT_CONFIDENCE: u8 = 85;

/// Lifetime of imagery-derived alerts, in hours.
pub const IMAGERY_ALERT_TTL_HOURS: i64 = 24;

/// Country reported when a region is not on any configured list.
pub const UNKNOWN_COUNTRY: &str = "Unknown";

// ============================================================================
// Sensor rules
// ============================================================================

/// The alert a rule emits when it fires.
#[derive(Debug, Clone)]
pub struct AlertTemplate {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub confidence: u8,
    pub ttl_hours: i64,
    /// Leading phrase of the description.
    pub headline: &'static str,
    pub recommended_actions: &'static [&'static str],
}

/// One row of the sensor rule table.
#[derive(Debug, Clone)]
pub struct SensorRule {
    pub sensor_type: SensorType,
    pub predicate: fn(f64) -> bool,
    pub template: AlertTemplate,
}

impl SensorRule {
    /// Whether this rule fires for `device`.
    pub fn matches(&self, device: &SensorDevice) -> bool {
        self.sensor_type == device.sensor_type && (self.predicate)(device.reading)
    }
}

/// The built-in sensor rule table.
pub fn default_sensor_rules() -> Vec<SensorRule> {
    vec![
        SensorRule {
            sensor_type: SensorType::Seismic,
            predicate: |reading| reading > 5.0,
            template: AlertTemplate {
                alert_type: AlertType::NaturalDisaster,
                severity: Severity::High,
                confidence: 90,
                ttl_hours: 6,
                headline: "Significant seismic activity",
                recommended_actions: &[
                    "Evacuate damaged structures in the affected area",
                    "Deploy search and rescue teams",
                    "Inspect dams, bridges and power infrastructure",
                ],
            },
        },
        SensorRule {
            sensor_type: SensorType::Radiation,
            predicate: |reading| reading > 1.0,
            template: AlertTemplate {
                alert_type: AlertType::EnvironmentalHazard,
                severity: Severity::High,
                confidence: 88,
                ttl_hours: 12,
                headline: "Radiation spike",
                recommended_actions: &[
                    "Issue shelter-in-place advisory",
                    "Dispatch radiological survey team",
                    "Prepare potassium iodide distribution",
                ],
            },
        },
        SensorRule {
            sensor_type: SensorType::Weather,
            predicate: |reading| reading > 80.0,
            template: AlertTemplate {
                alert_type: AlertType::NaturalDisaster,
                severity: Severity::Medium,
                confidence: 80,
                ttl_hours: 6,
                headline: "Severe wind conditions",
                recommended_actions: &[
                    "Secure temporary shelters",
                    "Suspend outdoor distribution activities",
                ],
            },
        },
        SensorRule {
            sensor_type: SensorType::AirQuality,
            predicate: |reading| reading > 200.0,
            template: AlertTemplate {
                alert_type: AlertType::EnvironmentalHazard,
                severity: Severity::Medium,
                confidence: 80,
                ttl_hours: 12,
                headline: "Hazardous air quality",
                recommended_actions: &[
                    "Distribute respiratory protection",
                    "Advise vulnerable groups to stay indoors",
                ],
            },
        },
        SensorRule {
            sensor_type: SensorType::WaterQuality,
            predicate: |reading| reading > 9.0,
            template: AlertTemplate {
                alert_type: AlertType::EnvironmentalHazard,
                severity: Severity::Medium,
                confidence: 75,
                ttl_hours: 24,
                headline: "Water contamination",
                recommended_actions: &[
                    "Issue boil-water notice",
                    "Truck in potable water",
                    "Sample upstream sources",
                ],
            },
        },
        SensorRule {
            sensor_type: SensorType::Acoustic,
            predicate: |reading| reading > 100.0,
            template: AlertTemplate {
                alert_type: AlertType::InfrastructureFailure,
                severity: Severity::Medium,
                confidence: 70,
                ttl_hours: 6,
                headline: "Abnormal acoustic event",
                recommended_actions: &[
                    "Dispatch structural inspection team",
                    "Cross-check with imagery of the area",
                ],
            },
        },
        SensorRule {
            sensor_type: SensorType::Electromagnetic,
            predicate: |reading| reading > 100.0,
            template: AlertTemplate {
                alert_type: AlertType::InfrastructureFailure,
                severity: Severity::Low,
                confidence: 65,
                ttl_hours: 6,
                headline: "Electromagnetic disturbance",
                recommended_actions: &["Check grid substations and communication relays"],
            },
        },
    ]
}

/// Default recommended actions for alerts raised outside the rule table.
pub fn default_actions(alert_type: AlertType) -> Vec<String> {
    let actions: &[&str] = match alert_type {
        AlertType::NaturalDisaster => &[
            "Activate emergency response teams",
            "Open evacuation shelters",
        ],
        AlertType::MilitaryMovement => &[
            "Verify with additional imagery passes",
            "Notify humanitarian corridors coordination",
            "Prepare civilian evacuation routes",
        ],
        AlertType::ResourceScarcity => &[
            "Reallocate stock from neighbouring distribution points",
            "Request emergency resupply",
        ],
        AlertType::InfrastructureFailure => &[
            "Dispatch repair crews",
            "Switch affected services to backup capacity",
        ],
        AlertType::EnvironmentalHazard => &[
            "Issue public health advisory",
            "Deploy environmental monitoring team",
        ],
    };
    actions.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Impact estimation
// ============================================================================

fn base_population(alert_type: AlertType) -> f64 {
    match alert_type {
        AlertType::NaturalDisaster => 50_000.0,
        AlertType::MilitaryMovement => 100_000.0,
        AlertType::ResourceScarcity => 200_000.0,
        AlertType::InfrastructureFailure => 20_000.0,
        AlertType::EnvironmentalHazard => 30_000.0,
    }
}

/// Estimated loss per affected person, in USD.
fn loss_per_capita(alert_type: AlertType) -> f64 {
    match alert_type {
        AlertType::NaturalDisaster => 1_500.0,
        AlertType::MilitaryMovement => 2_000.0,
        AlertType::ResourceScarcity => 400.0,
        AlertType::InfrastructureFailure => 3_000.0,
        AlertType::EnvironmentalHazard => 800.0,
    }
}

fn severity_factor(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.25,
        Severity::Medium => 0.5,
        Severity::High => 1.0,
        Severity::Critical => 2.0,
    }
}

/// Estimate the impact of an alert.
///
/// `intensity` is how far past its trigger the condition is (1.0 = exactly
/// at the trigger) and is clamped to 0.5-3.0.
pub fn estimate_impact(alert_type: AlertType, severity: Severity, intensity: f64) -> PredictedImpact {
    let intensity = if intensity.is_finite() {
        intensity.clamp(0.5, 3.0)
    } else {
        1.0
    };
    let population = (base_population(alert_type) * severity_factor(severity) * intensity).round();

    let environmental_damage_level = match alert_type {
        AlertType::NaturalDisaster | AlertType::EnvironmentalHazard => severity,
        AlertType::MilitaryMovement | AlertType::InfrastructureFailure => severity.downgrade(),
        AlertType::ResourceScarcity => Severity::Low,
    };

    PredictedImpact {
        population: population as u64,
        economic_loss: population * loss_per_capita(alert_type),
        environmental_damage_level,
    }
}

/// Confidence-weighted mean anomaly score of a set of observations.
///
/// Observations without a numeric score are ignored. Returns `None` when
/// none report one.
pub fn aggregate_anomaly_score(observations: &[ImageryObservation]) -> Option<f64> {
    let scored: Vec<(f64, f64)> = observations
        .iter()
        .filter_map(|o| o.anomaly_score().map(|s| (s, o.confidence.max(0.0))))
        .collect();
    if scored.is_empty() {
        return None;
    }

    let total_weight: f64 = scored.iter().map(|(_, w)| w).sum();
    if total_weight > 0.0 {
        Some(scored.iter().map(|(s, w)| s * w).sum::<f64>() / total_weight)
    } else {
        Some(scored.iter().map(|(s, _)| s).sum::<f64>() / scored.len() as f64)
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Which regions a detection pass covers.
#[derive(Debug, Clone, Copy)]
enum RegionScope<'a> {
    All,
    /// Case-insensitive substring, as in the list filters.
    Matching(&'a str),
    /// One region name, case-insensitive.
    Exact(&'a str),
}

impl RegionScope<'_> {
    fn includes(&self, region: &str) -> bool {
        match self {
            RegionScope::All => true,
            RegionScope::Matching(filter) => region_matches(region, Some(*filter)),
            RegionScope::Exact(name) => region.eq_ignore_ascii_case(*name),
        }
    }

    fn label(&self) -> &str {
        match self {
            RegionScope::All => "all",
            RegionScope::Matching(filter) | RegionScope::Exact(filter) => *filter,
        }
    }
}

/// Runs detection passes and stores their alerts.
#[derive(Clone)]
pub struct ThreatDetector {
    config: Arc<OracleConfig>,
    providers: ProviderRegistry,
    devices: DeviceRegistry,
    alerts: AlertStore,
    rules: Arc<Vec<SensorRule>>,
}

impl ThreatDetector {
    pub fn new(
        config: Arc<OracleConfig>,
        providers: ProviderRegistry,
        devices: DeviceRegistry,
        alerts: AlertStore,
    ) -> Self {
        Self::with_rules(config, providers, devices, alerts, default_sensor_rules())
    }

    pub fn with_rules(
        config: Arc<OracleConfig>,
        providers: ProviderRegistry,
        devices: DeviceRegistry,
        alerts: AlertStore,
        rules: Vec<SensorRule>,
    ) -> Self {
        Self {
            config,
            providers,
            devices,
            alerts,
            rules: Arc::new(rules),
        }
    }

    /// Run both rule passes, store the resulting alerts, and return them.
    ///
    /// With a region filter the sensor pass only considers devices in
    /// matching regions, and the imagery pass only runs if the region of
    /// interest matches the filter.
    pub async fn detect(&self, region_filter: Option<&str>, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        let scope = match region_filter {
            Some(filter) => RegionScope::Matching(filter),
            None => RegionScope::All,
        };
        self.run(scope, now).await
    }

    /// Like [`ThreatDetector::detect`], but only for the region named
    /// exactly `region` (case-insensitive).
    pub async fn detect_region(&self, region: &str, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        self.run(RegionScope::Exact(region), now).await
    }

    async fn run(&self, scope: RegionScope<'_>, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        let mut alerts = Vec::new();

        if scope.includes(&self.config.region_of_interest.name) {
            alerts.extend(self.imagery_pass(now).await);
        }
        alerts.extend(self.sensor_pass(scope, now).await);

        self.alerts.upsert_all(&alerts).await;

        info!(
            region = scope.label(),
            alert_count = alerts.len(),
            "Detection pass completed"
        );
        alerts
    }

    async fn imagery_pass(&self, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        let providers = self.providers.list_enabled(ProviderCategory::Imagery);
        if providers.is_empty() {
            debug!("No imagery providers enabled, skipping imagery pass");
            return Vec::new();
        }

        let roi = &self.config.region_of_interest;
        let mut observations = Vec::new();
        let mut sources = Vec::new();
        for provider in &providers {
            let fetched = self
                .providers
                .fetch_observations(provider, roi, &self.config.data_types)
                .await;
            if !fetched.is_empty() {
                sources.push(provider.name.clone());
                observations.extend(fetched);
            }
        }

        let Some(score) = aggregate_anomaly_score(&observations) else {
            return Vec::new();
        };
        debug!(
            score,
            observation_count = observations.len(),
            "Imagery anomaly score computed"
        );
        if score <= ANOMALY_THRESHOLD {
            return Vec::new();
        }

        let n = observations.len() as f64;
        let latitude = observations.iter().map(|o| o.coordinates.latitude).sum::<f64>() / n;
        let longitude = observations.iter().map(|o| o.coordinates.longitude).sum::<f64>() / n;
        let severity = Severity::Medium;
        let alert_type = AlertType::MilitaryMovement;

        vec![ThreatAlert {
            id: self.alerts.next_id(alert_type, now),
            alert_type,
            severity,
            location: AlertLocation {
                latitude,
                longitude,
                region: roi.name.clone(),
                country: roi.country.clone(),
            },
            description: format!(
                "Unusual activity in satellite imagery over {}: anomaly score {:.2} across {} observations",
                roi.name,
                score,
                observations.len()
            ),
            confidence: IMAGERY_ALERT_CONFIDENCE,
            sources,
            predicted_impact: estimate_impact(alert_type, severity, score / ANOMALY_THRESHOLD),
            recommended_actions: default_actions(alert_type),
            created_at: now,
            expires_at: now + Duration::hours(IMAGERY_ALERT_TTL_HOURS),
        }]
    }

    async fn sensor_pass(&self, scope: RegionScope<'_>, now: DateTime<Utc>) -> Vec<ThreatAlert> {
        let mut critical: Vec<SensorDevice> = self
            .devices
            .list(None)
            .await
            .into_iter()
            .filter(|d| d.status == DeviceStatus::Critical && scope.includes(&d.location.region))
            .collect();
        critical.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let mut alerts = Vec::new();
        for device in &critical {
            for rule in self.rules.iter().filter(|r| r.matches(device)) {
                alerts.push(self.sensor_alert(device, &rule.template, now));
            }
        }
        alerts
    }

    fn sensor_alert(
        &self,
        device: &SensorDevice,
        template: &AlertTemplate,
        now: DateTime<Utc>,
    ) -> ThreatAlert {
        let critical = thresholds(device.sensor_type).critical;
        let intensity = if critical > 0.0 {
            device.reading / critical
        } else {
            1.0
        };
        let region = &device.location.region;

        ThreatAlert {
            id: self.alerts.next_id(template.alert_type, now),
            alert_type: template.alert_type,
            severity: template.severity,
            location: AlertLocation {
                latitude: device.location.latitude,
                longitude: device.location.longitude,
                region: region.clone(),
                country: self
                    .config
                    .country_for(region)
                    .unwrap_or(UNKNOWN_COUNTRY)
                    .to_string(),
            },
            description: format!(
                "{} detected: {} {} reported by {} in {}",
                template.headline, device.reading, device.unit, device.device_id, region
            ),
            confidence: template.confidence,
            sources: vec![device.device_id.clone()],
            predicted_impact: estimate_impact(template.alert_type, template.severity, intensity),
            recommended_actions: template
                .recommended_actions
                .iter()
                .map(|s| s.to_string())
                .collect(),
            created_at: now,
            expires_at: now + Duration::hours(template.ttl_hours),
        }
    }
}
