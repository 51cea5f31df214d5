//! Imagery provider HTTP client.
//!
//! Providers expose a common observation search endpoint:
//!
//! ```text
//! GET {endpoint}/observations?region=<name>&bbox=<w,s,e,n>&types=<t1,t2>
//! Authorization: Bearer <api key>
//! ```
//!
//! and answer with `{ "observations": [ ... ] }` in the
//! [`ImageryObservation`] shape.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ObservationSource, ProviderHandle};
use crate::config::RegionOfInterest;
use crate::model::{DataType, ImageryObservation};

/// Client for querying imagery provider search APIs.
#[derive(Clone, Default)]
pub struct HttpImageryClient {
    client: reqwest::Client,
}

impl HttpImageryClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Build the search URL for a region and set of data types.
    fn search_url(
        provider: &ProviderHandle,
        region: &RegionOfInterest,
        data_types: &[DataType],
    ) -> String {
        let types = data_types
            .iter()
            .map(DataType::label)
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}/observations?region={}&bbox={}&types={}",
            provider.endpoint.trim_end_matches('/'),
            urlencoding::encode(&region.name),
            urlencoding::encode(&region.bbox()),
            urlencoding::encode(&types)
        )
    }
}

#[async_trait]
impl ObservationSource for HttpImageryClient {
    async fn fetch(
        &self,
        provider: &ProviderHandle,
        region: &RegionOfInterest,
        data_types: &[DataType],
    ) -> anyhow::Result<Vec<ImageryObservation>> {
        let url = Self::search_url(provider, region, data_types);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", provider.api_key))
            .send()
            .await?
            .error_for_status()?;
        let data = response.json::<ObservationsResponse>().await?;
        Ok(data.observations)
    }
}

/// Response from the observation search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservationsResponse {
    #[serde(default)]
    pub observations: Vec<ImageryObservation>,
}
