//! HTTP API handlers for Threatwatch.
//!
//! Thin wrappers over [`Oracle`] and [`Orchestrator`]. Handlers take the
//! clock reading (`Utc::now()`) and pass it down; nothing below this layer
//! reads the wall clock for business decisions.
//!
//! Errors are returned as JSON `{ "error": "<message>" }`:
//!
//! | Error | Status |
//! |-------|--------|
//! | duplicate device | 409 |
//! | unknown device or alert | 404 |
//! | deadline overrun | 504 |
//! | malformed body | 400 / 422 (axum rejection) |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::error::OracleError;
use crate::model::{
    EmergencyAlertRequest, EmergencyAlertResponse, ReadingRequest, RegionQuery,
    RegisterDeviceRequest, ResourceMetric, SensorDevice, ThreatAlert,
};
use crate::oracle::Oracle;
use crate::orchestrator::{CycleOutcome, Orchestrator, StatusReport};
use crate::providers::ProviderHealth;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub oracle: Oracle,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            oracle: orchestrator.oracle().clone(),
            orchestrator,
        }
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/devices", post(register_device).get(list_devices))
        .route("/devices/:id", get(get_device))
        .route("/devices/:id/readings", post(submit_reading))
        .route("/devices/:id/offline", post(mark_offline))
        .route("/alerts", get(list_alerts))
        .route("/alerts/emergency", post(trigger_emergency))
        .route("/alerts/:id", get(get_alert))
        .route("/detect", post(run_detection))
        .route("/resources/:region", get(get_resources))
        .route("/providers", get(list_providers))
        .route("/status", get(get_status))
        .route("/cycle", post(trigger_cycle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        let status = match &err {
            OracleError::DuplicateDevice(_) => StatusCode::CONFLICT,
            OracleError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            OracleError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OracleError::Panicked { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

// ============================================================================
// Devices
// ============================================================================

/// POST /devices - Register a sensor device.
///
/// # Request Body
///
/// ```json
/// {
///     "deviceId": "seis-1",
///     "location": {"latitude": 48.5, "longitude": 35.0, "region": "Eastern Europe"},
///     "sensorType": "seismic",
///     "unit": "magnitude"
/// }
/// ```
///
/// Returns `201 Created` with the device, or `409 Conflict` if the id is taken.
#[instrument(skip(state, request), fields(device_id = %request.device_id))]
pub async fn register_device(
    State(state): State<AppState>,
    Json(request): Json<RegisterDeviceRequest>,
) -> ApiResult<(StatusCode, Json<SensorDevice>)> {
    let device = state.oracle.register_device(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(device)))
}

/// GET /devices - List devices, optionally filtered by `region`.
#[instrument(skip(state))]
pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<RegionQuery>,
) -> Json<Vec<SensorDevice>> {
    let mut devices = state.oracle.list_devices(query.region.as_deref()).await;
    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    Json(devices)
}

/// GET /devices/:id
#[instrument(skip(state))]
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<SensorDevice>> {
    Ok(Json(state.oracle.get_device(&device_id).await?))
}

/// POST /devices/:id/readings - Submit a reading.
///
/// # Request Body
///
/// ```json
/// {"reading": 6.2, "timestamp": "2026-10-19T09:30:00Z", "batteryLevel": 84.0}
/// ```
///
/// `timestamp` and `batteryLevel` are optional. The response is the device
/// with its re-derived status.
#[instrument(skip(state, request), fields(reading = request.reading))]
pub async fn submit_reading(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(request): Json<ReadingRequest>,
) -> ApiResult<Json<SensorDevice>> {
    let device = state
        .oracle
        .submit_reading(&device_id, request.into(), Utc::now())
        .await?;
    Ok(Json(device))
}

/// POST /devices/:id/offline - Administratively mark a device offline.
#[instrument(skip(state))]
pub async fn mark_offline(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<SensorDevice>> {
    Ok(Json(state.oracle.mark_offline(&device_id, Utc::now()).await?))
}

// ============================================================================
// Alerts and detection
// ============================================================================

/// GET /alerts - Active alerts, newest first, optionally filtered by `region`.
#[instrument(skip(state))]
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<RegionQuery>,
) -> Json<Vec<ThreatAlert>> {
    let alerts = state
        .oracle
        .list_active_alerts(query.region.as_deref(), Utc::now())
        .await;
    info!(alert_count = alerts.len(), "Alerts queried");
    Json(alerts)
}

/// GET /alerts/:id - One active alert. Expired alerts are not found.
#[instrument(skip(state))]
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> ApiResult<Json<ThreatAlert>> {
    state
        .oracle
        .get_alert(&alert_id, Utc::now())
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("alert not found: {alert_id}")))
}

/// POST /alerts/emergency - Raise a critical alert by hand.
///
/// # Request Body
///
/// ```json
/// {
///     "type": "infrastructure_failure",
///     "location": {"latitude": 50.4, "longitude": 30.5, "region": "Eastern Europe", "country": "Ukraine"},
///     "description": "Dam breach reported"
/// }
/// ```
///
/// Responds `201 Created` with `{"alertId": "..."}`.
#[instrument(skip(state, request), fields(alert_type = request.alert_type.label()))]
pub async fn trigger_emergency(
    State(state): State<AppState>,
    Json(request): Json<EmergencyAlertRequest>,
) -> (StatusCode, Json<EmergencyAlertResponse>) {
    let alert_id = state
        .oracle
        .trigger_emergency_alert(
            request.alert_type,
            request.location,
            &request.description,
            Utc::now(),
        )
        .await;
    (StatusCode::CREATED, Json(EmergencyAlertResponse { alert_id }))
}

/// POST /detect - Run a detection pass now and return the alerts it raised.
#[instrument(skip(state))]
pub async fn run_detection(
    State(state): State<AppState>,
    Query(query): Query<RegionQuery>,
) -> ApiResult<Json<Vec<ThreatAlert>>> {
    let limit = state.oracle.config().cycle_timeout;
    let detection = state.oracle.detect(query.region.as_deref(), Utc::now());

    match tokio::time::timeout(limit, detection).await {
        Ok(alerts) => Ok(Json(alerts)),
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "On-demand detection timed out");
            Err(OracleError::Timeout {
                operation: "detection".to_string(),
                after: limit,
            }
            .into())
        }
    }
}

// ============================================================================
// Resources, providers and scheduler
// ============================================================================

/// GET /resources/:region - Latest resource metrics for a region.
#[instrument(skip(state))]
pub async fn get_resources(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Json<Vec<ResourceMetric>> {
    Json(state.oracle.get_resource_status(&region, Utc::now()).await)
}

/// GET /providers - Configured providers with call statistics.
///
/// Credentials are never included.
#[instrument(skip(state))]
pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderHealth>> {
    Json(state.oracle.provider_health().await)
}

/// GET /status - Scheduler state and last cycle report.
#[instrument(skip(state))]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.orchestrator.status(Utc::now()).await)
}

/// POST /cycle - Run a monitoring cycle now.
///
/// Responds `{"status": "skipped"}` when a cycle is already running,
/// otherwise `{"status": "completed", ...report}`.
#[instrument(skip(state))]
pub async fn trigger_cycle(State(state): State<AppState>) -> Json<CycleOutcome> {
    let outcome = state.orchestrator.run_cycle(Utc::now()).await;
    if matches!(outcome, CycleOutcome::Skipped) {
        info!("Manual cycle skipped, one is already running");
    }
    Json(outcome)
}
