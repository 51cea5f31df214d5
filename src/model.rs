//! Data models for Threatwatch.
//!
//! Every type here is serialized with camelCase field names and snake_case
//! enum values, which is the shape the dashboard layer consumes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Sensor devices
// ============================================================================

/// The physical quantity a device measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Seismic,
    Radiation,
    Weather,
    AirQuality,
    WaterQuality,
    Acoustic,
    Electromagnetic,
    /// Any sensor type this build does not know about.
    #[serde(other)]
    Other,
}

impl SensorType {
    /// Get the wire label.
    pub fn label(&self) -> &'static str {
        match self {
            SensorType::Seismic => "seismic",
            SensorType::Radiation => "radiation",
            SensorType::Weather => "weather",
            SensorType::AirQuality => "air_quality",
            SensorType::WaterQuality => "water_quality",
            SensorType::Acoustic => "acoustic",
            SensorType::Electromagnetic => "electromagnetic",
            SensorType::Other => "other",
        }
    }
}

/// Health status of a device, derived from its latest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Reading is within normal bounds.
    Active,
    /// Reading crossed the warning threshold, or the battery is low.
    Warning,
    /// Reading crossed the critical threshold.
    Critical,
    /// Marked unreachable through the administrative path.
    Offline,
}

/// Where a device is installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
}

/// A registered sensor endpoint and its last-known state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDevice {
    /// Externally assigned, unique identifier.
    pub device_id: String,
    pub location: Location,
    pub sensor_type: SensorType,
    pub reading: f64,
    pub unit: String,
    pub last_updated: DateTime<Utc>,
    pub status: DeviceStatus,
    /// Battery charge in percent (0-100), when the device reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
}

/// A single reading delivered for a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub battery_level: Option<f64>,
    /// When the reading was taken. Falls back to the server clock when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Reading {
    /// A bare reading with no battery information or timestamp.
    pub fn value(value: f64) -> Self {
        Self {
            value,
            battery_level: None,
            timestamp: None,
        }
    }
}

// ============================================================================
// Threat alerts
// ============================================================================

/// What kind of threat an alert asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NaturalDisaster,
    MilitaryMovement,
    ResourceScarcity,
    InfrastructureFailure,
    EnvironmentalHazard,
}

impl AlertType {
    /// Get the wire label, also used as the alert id prefix.
    pub fn label(&self) -> &'static str {
        match self {
            AlertType::NaturalDisaster => "natural_disaster",
            AlertType::MilitaryMovement => "military_movement",
            AlertType::ResourceScarcity => "resource_scarcity",
            AlertType::InfrastructureFailure => "infrastructure_failure",
            AlertType::EnvironmentalHazard => "environmental_hazard",
        }
    }
}

/// Alert severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One step less severe, saturating at `Low`.
    pub fn downgrade(self) -> Self {
        match self {
            Severity::Critical => Severity::High,
            Severity::High => Severity::Medium,
            Severity::Medium | Severity::Low => Severity::Low,
        }
    }
}

/// Where an alert applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub region: String,
    pub country: String,
}

/// Estimated consequences attached to every alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedImpact {
    /// People likely affected.
    pub population: u64,
    /// Estimated economic loss in USD.
    pub economic_loss: f64,
    pub environmental_damage_level: Severity,
}

/// A time-bounded assertion that a threat condition was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub location: AlertLocation,
    pub description: String,
    /// Confidence in percent (0-100).
    pub confidence: u8,
    /// Provenance: device ids or provider names, in the order consulted.
    pub sources: Vec<String>,
    pub predicted_impact: PredictedImpact,
    pub recommended_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ThreatAlert {
    /// An alert is live until `expires_at`; at that instant it is dead.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

// ============================================================================
// Resource metrics
// ============================================================================

/// Tracked resource categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Water,
    Food,
    Energy,
    MedicalSupplies,
    Fuel,
}

impl ResourceType {
    /// Every resource type, in reporting order.
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Water,
        ResourceType::Food,
        ResourceType::Energy,
        ResourceType::MedicalSupplies,
        ResourceType::Fuel,
    ];

    /// Get the wire label.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::Water => "water",
            ResourceType::Food => "food",
            ResourceType::Energy => "energy",
            ResourceType::MedicalSupplies => "medical_supplies",
            ResourceType::Fuel => "fuel",
        }
    }
}

/// Direction a resource level is heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
    Critical,
}

impl Trend {
    /// Classify a resource level on the 0-100 scale.
    ///
    /// # Breakpoints
    ///
    /// - `critical`: level < 20
    /// - `decreasing`: 20 <= level < 40
    /// - `increasing`: level > 80
    /// - `stable`: everything else, including exactly 80
    pub fn from_level(current_level: f64) -> Self {
        if current_level < 20.0 {
            Trend::Critical
        } else if current_level < 40.0 {
            Trend::Decreasing
        } else if current_level > 80.0 {
            Trend::Increasing
        } else {
            Trend::Stable
        }
    }
}

/// Days until a resource runs out at the current utilization rate.
///
/// Computed as `floor(level / (utilization * 2))`, never negative. Returns
/// `None` when nothing is being drawn down.
pub fn projected_days_remaining(current_level: f64, utilization_rate: f64) -> Option<u32> {
    if utilization_rate <= 0.0 {
        return None;
    }
    let days = (current_level / (utilization_rate * 2.0)).floor();
    Some(days.clamp(0.0, f64::from(u32::MAX)) as u32)
}

/// A facility that stocks and hands out a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionPoint {
    pub location: String,
    pub capacity: f64,
    pub current_stock: f64,
}

/// Level, trend and depletion outlook for one resource in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetric {
    pub resource_type: ResourceType,
    pub region: String,
    pub country: String,
    /// Level on a 0-100 scale.
    pub current_level: f64,
    pub capacity: f64,
    /// Fraction of capacity drawn per period (0-1).
    pub utilization_rate: f64,
    pub trend: Trend,
    pub projected_days_remaining: Option<u32>,
    pub suppliers: Vec<String>,
    pub distribution_points: Vec<DistributionPoint>,
    pub last_updated: DateTime<Utc>,
}

// ============================================================================
// Imagery observations
// ============================================================================

/// Category of an imagery observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Environmental,
    Military,
    Infrastructure,
    Agricultural,
    Humanitarian,
}

impl DataType {
    /// Get the wire label.
    pub fn label(&self) -> &'static str {
        match self {
            DataType::Environmental => "environmental",
            DataType::Military => "military",
            DataType::Infrastructure => "infrastructure",
            DataType::Agricultural => "agricultural",
            DataType::Humanitarian => "humanitarian",
        }
    }
}

/// A point on the globe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A named indicator value reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// The numeric value, if this indicator is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(_) => None,
        }
    }
}

/// Name of the metric providers use to report how unusual a scene is (0-1).
pub const ANOMALY_SCORE_METRIC: &str = "anomaly_score";

/// A single imagery data point, consumed only during one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageryObservation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub altitude: f64,
    pub data_type: DataType,
    #[serde(default)]
    pub metrics: HashMap<String, MetricValue>,
    /// Confidence in percent (0-100).
    pub confidence: f64,
    /// Provider name. Overwritten with the registry name on ingest.
    #[serde(default)]
    pub source: String,
}

impl ImageryObservation {
    /// The reported anomaly score, clamped to 0-1.
    pub fn anomaly_score(&self) -> Option<f64> {
        self.metrics
            .get(ANOMALY_SCORE_METRIC)
            .and_then(MetricValue::as_f64)
            .map(|s| s.clamp(0.0, 1.0))
    }
}

// ============================================================================
// HTTP request/response bodies
// ============================================================================

/// Request body for POST /devices.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub location: Location,
    pub sensor_type: SensorType,
    pub unit: String,
}

/// Request body for POST /devices/{id}/readings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRequest {
    pub reading: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub battery_level: Option<f64>,
}

impl From<ReadingRequest> for Reading {
    fn from(request: ReadingRequest) -> Self {
        Reading {
            value: request.reading,
            battery_level: request.battery_level,
            timestamp: request.timestamp,
        }
    }
}

/// Request body for POST /alerts/emergency.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlertRequest {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub location: AlertLocation,
    pub description: String,
}

/// Response for POST /alerts/emergency.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlertResponse {
    pub alert_id: String,
}

/// Optional region filter shared by list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct RegionQuery {
    /// Case-insensitive substring matched against the region name.
    pub region: Option<String>,
}

/// Case-insensitive substring match used by every region filter.
pub fn region_matches(region: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) => region.to_lowercase().contains(&f.to_lowercase()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_boundaries() {
        assert_eq!(Trend::from_level(19.9), Trend::Critical);
        assert_eq!(Trend::from_level(20.0), Trend::Decreasing);
        assert_eq!(Trend::from_level(39.9), Trend::Decreasing);
        assert_eq!(Trend::from_level(40.0), Trend::Stable);
        assert_eq!(Trend::from_level(80.0), Trend::Stable);
        assert_eq!(Trend::from_level(80.1), Trend::Increasing);
    }

    #[test]
    fn test_projected_days_remaining() {
        assert_eq!(projected_days_remaining(50.0, 0.5), Some(50));
        assert_eq!(projected_days_remaining(45.0, 0.4), Some(56));
        assert_eq!(projected_days_remaining(0.0, 0.9), Some(0));
        assert_eq!(projected_days_remaining(-5.0, 0.5), Some(0));
        assert_eq!(projected_days_remaining(50.0, 0.0), None);
    }

    #[test]
    fn test_alert_is_dead_at_expiry() {
        let created = Utc::now();
        let alert = ThreatAlert {
            id: "a".to_string(),
            alert_type: AlertType::NaturalDisaster,
            severity: Severity::High,
            location: AlertLocation {
                latitude: 0.0,
                longitude: 0.0,
                region: "r".to_string(),
                country: "c".to_string(),
            },
            description: String::new(),
            confidence: 90,
            sources: vec![],
            predicted_impact: PredictedImpact {
                population: 0,
                economic_loss: 0.0,
                environmental_damage_level: Severity::Low,
            },
            recommended_actions: vec![],
            created_at: created,
            expires_at: created + chrono::Duration::hours(1),
        };

        assert!(alert.is_active(created));
        assert!(!alert.is_active(alert.expires_at));
    }

    #[test]
    fn test_unknown_sensor_type_deserializes_as_other() {
        let parsed: SensorType = serde_json::from_str("\"gravimetric\"").unwrap();
        assert_eq!(parsed, SensorType::Other);

        let parsed: SensorType = serde_json::from_str("\"air_quality\"").unwrap();
        assert_eq!(parsed, SensorType::AirQuality);
    }

    #[test]
    fn test_alert_type_serializes_as_type_field() {
        let request: EmergencyAlertRequest = serde_json::from_value(serde_json::json!({
            "type": "infrastructure_failure",
            "location": {"latitude": 1.0, "longitude": 2.0, "region": "Levant", "country": "Syria"},
            "description": "bridge collapse"
        }))
        .unwrap();

        assert_eq!(request.alert_type, AlertType::InfrastructureFailure);
        assert_eq!(request.location.country, "Syria");
    }

    #[test]
    fn test_region_matches_case_insensitive_substring() {
        assert!(region_matches("Eastern Europe", Some("europe")));
        assert!(region_matches("Eastern Europe", None));
        assert!(!region_matches("Sahel", Some("europe")));
    }

    #[test]
    fn test_anomaly_score_ignores_text_metrics() {
        let mut metrics = HashMap::new();
        metrics.insert(
            ANOMALY_SCORE_METRIC.to_string(),
            MetricValue::Text("high".to_string()),
        );
        let obs = ImageryObservation {
            id: "o1".to_string(),
            timestamp: Utc::now(),
            coordinates: Coordinates {
                latitude: 0.0,
                longitude: 0.0,
            },
            altitude: 500.0,
            data_type: DataType::Military,
            metrics,
            confidence: 80.0,
            source: "planet".to_string(),
        };

        assert_eq!(obs.anomaly_score(), None);
    }
}
