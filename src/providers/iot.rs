//! IoT gateway client.
//!
//! Gateways expose the latest reading per device:
//!
//! ```text
//! GET {endpoint}/devices/{device id}/latest
//! X-Api-Key: <api key>
//! ```
//!
//! A `404` means the gateway does not know the device.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{ProviderCategory, ProviderHandle, ProviderRegistry, ReadingSource};
use crate::model::{Reading, SensorDevice};

/// Client for IoT gateway device APIs.
#[derive(Clone, Default)]
pub struct IotGatewayClient {
    client: reqwest::Client,
}

impl IotGatewayClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the latest reading a gateway holds for `device_id`.
    pub async fn latest_reading(
        &self,
        provider: &ProviderHandle,
        device_id: &str,
    ) -> anyhow::Result<Option<Reading>> {
        let url = format!(
            "{}/devices/{}/latest",
            provider.endpoint.trim_end_matches('/'),
            urlencoding::encode(device_id)
        );

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &provider.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let data = response.error_for_status()?.json::<GatewayReading>().await?;
        Ok(Some(data.into()))
    }
}

/// Latest-reading payload returned by a gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReading {
    pub value: f64,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<GatewayReading> for Reading {
    fn from(r: GatewayReading) -> Self {
        Reading {
            value: r.value,
            battery_level: r.battery_level,
            timestamp: r.timestamp,
        }
    }
}

/// Pulls device readings from the enabled IoT gateways.
///
/// Gateways are asked in configured order; the first one that knows the
/// device wins. A failing gateway is skipped.
#[derive(Clone)]
pub struct GatewayReadingSource {
    registry: ProviderRegistry,
    client: IotGatewayClient,
}

impl GatewayReadingSource {
    pub fn new(registry: ProviderRegistry, client: IotGatewayClient) -> Self {
        Self { registry, client }
    }
}

#[async_trait]
impl ReadingSource for GatewayReadingSource {
    async fn next_reading(&self, device: &SensorDevice) -> anyhow::Result<Option<Reading>> {
        let gateways = self.registry.list_enabled(ProviderCategory::Iot);
        if gateways.is_empty() {
            return Ok(None);
        }

        let mut failed = 0;
        for gateway in &gateways {
            match self
                .registry
                .guarded(gateway, self.client.latest_reading(gateway, &device.device_id))
                .await
            {
                Some(Some(reading)) => {
                    debug!(
                        device_id = %device.device_id,
                        gateway = %gateway.name,
                        value = reading.value,
                        "Pulled reading from gateway"
                    );
                    return Ok(Some(reading));
                }
                Some(None) => {}
                None => failed += 1,
            }
        }

        if failed == gateways.len() {
            anyhow::bail!("all {} IoT gateways failed", failed);
        }
        Ok(None)
    }
}
