//! External data providers.
//!
//! Imagery vendors and IoT network gateways are reached through two narrow
//! seams, [`ObservationSource`] and [`ReadingSource`]. The [`ProviderRegistry`]
//! holds credentials, decides which providers are enabled, and wraps every
//! provider call in a timeout with per-provider failure isolation: a failing
//! provider is logged and counted, and the caller gets nothing back from it
//! rather than an error.
//!
//! # Sources
//!
//! - [`imagery`]: HTTP client for imagery providers
//! - [`iot`]: HTTP client for IoT gateways and the gateway-backed reading source
//! - [`simulated`]: randomized sources for offline and demo use

pub mod imagery;
pub mod iot;
pub mod simulated;

pub use imagery::HttpImageryClient;
pub use iot::{GatewayReadingSource, IotGatewayClient};
pub use simulated::{SimulatedImagery, SimulatedReadings, SimulatedTelemetry};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, RegionOfInterest};
use crate::model::{DataType, ImageryObservation, Reading, SensorDevice};

/// Kind of data a provider supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
    Imagery,
    Iot,
}

/// A configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderHandle {
    pub name: String,
    pub category: ProviderCategory,
    pub endpoint: String,
    pub api_key: String,
}

impl ProviderHandle {
    /// A provider is enabled iff it has a non-empty credential.
    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl From<ProviderConfig> for ProviderHandle {
    fn from(config: ProviderConfig) -> Self {
        Self {
            name: config.name,
            category: config.category,
            endpoint: config.endpoint,
            api_key: config.api_key,
        }
    }
}

/// Fetches imagery observations from one provider.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch(
        &self,
        provider: &ProviderHandle,
        region: &RegionOfInterest,
        data_types: &[DataType],
    ) -> anyhow::Result<Vec<ImageryObservation>>;
}

/// Produces the next reading for a device during the refresh step.
///
/// `Ok(None)` means the source has nothing new for this device.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn next_reading(&self, device: &SensorDevice) -> anyhow::Result<Option<Reading>>;
}

/// Call statistics for one provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub name: String,
    pub category: ProviderCategory,
    pub enabled: bool,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Ordered set of configured providers plus their call statistics.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Arc<Vec<ProviderHandle>>,
    observations: Arc<dyn ObservationSource>,
    call_timeout: Duration,
    health: Arc<Mutex<HashMap<String, ProviderHealth>>>,
}

impl ProviderRegistry {
    /// Create a registry over `providers`, kept in the given order.
    pub fn new(
        providers: Vec<ProviderConfig>,
        observations: Arc<dyn ObservationSource>,
        call_timeout: Duration,
    ) -> Self {
        let providers: Vec<ProviderHandle> = providers.into_iter().map(Into::into).collect();
        let health = providers
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    ProviderHealth {
                        name: p.name.clone(),
                        category: p.category,
                        enabled: p.is_enabled(),
                        successes: 0,
                        failures: 0,
                        last_error: None,
                        last_success: None,
                    },
                )
            })
            .collect();

        Self {
            providers: Arc::new(providers),
            observations,
            call_timeout,
            health: Arc::new(Mutex::new(health)),
        }
    }

    /// Enabled providers of `category`, in configured order.
    pub fn list_enabled(&self, category: ProviderCategory) -> Vec<ProviderHandle> {
        self.providers
            .iter()
            .filter(|p| p.category == category && p.is_enabled())
            .cloned()
            .collect()
    }

    /// Fetch observations from one provider.
    ///
    /// Never fails: a provider error or timeout is recorded and yields an
    /// empty list. Each observation's `source` is set to the provider name.
    pub async fn fetch_observations(
        &self,
        provider: &ProviderHandle,
        region: &RegionOfInterest,
        data_types: &[DataType],
    ) -> Vec<ImageryObservation> {
        let fetched = self
            .guarded(provider, self.observations.fetch(provider, region, data_types))
            .await
            .unwrap_or_default();

        fetched
            .into_iter()
            .map(|mut obs| {
                obs.source = provider.name.clone();
                obs
            })
            .collect()
    }

    /// Run a provider call under the registry timeout and record the outcome.
    ///
    /// Returns `None` when the call failed or timed out.
    pub async fn guarded<T, F>(&self, provider: &ProviderHandle, call: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => {
                self.record_success(&provider.name).await;
                Some(value)
            }
            Ok(Err(e)) => {
                warn!(provider = %provider.name, error = %e, "Provider call failed");
                self.record_failure(&provider.name, e.to_string()).await;
                None
            }
            Err(_) => {
                warn!(
                    provider = %provider.name,
                    timeout_secs = self.call_timeout.as_secs_f64(),
                    "Provider call timed out"
                );
                self.record_failure(
                    &provider.name,
                    format!("timed out after {:?}", self.call_timeout),
                )
                .await;
                None
            }
        }
    }

    async fn record_success(&self, name: &str) {
        let mut health = self.health.lock().await;
        if let Some(h) = health.get_mut(name) {
            h.successes += 1;
            h.last_success = Some(Utc::now());
        }
        debug!(provider = %name, "Provider call succeeded");
    }

    async fn record_failure(&self, name: &str, error: String) {
        let mut health = self.health.lock().await;
        if let Some(h) = health.get_mut(name) {
            h.failures += 1;
            h.last_error = Some(error);
        }
    }

    /// Call statistics for every configured provider, in configured order.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let health = self.health.lock().await;
        self.providers
            .iter()
            .filter_map(|p| health.get(&p.name).cloned())
            .collect()
    }
}
