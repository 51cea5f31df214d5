//! Configuration loaded from the environment.
//!
//! Every setting is optional. Provider credentials come from
//! `THREATWATCH_<NAME>_API_KEY`; a provider with an empty or missing key is
//! registered but disabled.

use std::env;
use std::time::Duration;

use crate::model::DataType;
use crate::providers::ProviderCategory;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default cycle interval: every 10 minutes.
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 600;

/// Default hard limit on one cycle.
pub const DEFAULT_CYCLE_TIMEOUT_SECS: u64 = 300;

/// Default limit on one provider call.
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Credential given to keyless providers in simulate mode.
pub const SIMULATED_CREDENTIAL: &str = "simulated";

/// Providers this build knows how to talk to: (name, category, default endpoint).
const KNOWN_PROVIDERS: &[(&str, ProviderCategory, &str)] = &[
    (
        "sentinel_hub",
        ProviderCategory::Imagery,
        "https://services.sentinel-hub.com/api/v1",
    ),
    ("planet", ProviderCategory::Imagery, "https://api.planet.com/data/v1"),
    ("maxar", ProviderCategory::Imagery, "https://api.maxar.com/discovery/v1"),
    ("thingspeak", ProviderCategory::Iot, "https://api.thingspeak.com"),
    ("particle", ProviderCategory::Iot, "https://api.particle.io/v1"),
];

/// Credentials and endpoint for one external data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub category: ProviderCategory,
    pub endpoint: String,
    pub api_key: String,
}

/// Bounding box scanned by the imagery pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOfInterest {
    pub name: String,
    pub country: String,
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl RegionOfInterest {
    /// Center of the bounding box as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        ((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    /// Bounding box in `west,south,east,north` order.
    pub fn bbox(&self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl Default for RegionOfInterest {
    fn default() -> Self {
        Self {
            name: "Eastern Europe".to_string(),
            country: "Ukraine".to_string(),
            north: 52.4,
            south: 44.4,
            east: 40.2,
            west: 22.1,
        }
    }
}

/// A region on the resource watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRegion {
    pub region: String,
    pub country: String,
}

impl WatchRegion {
    pub fn new(region: &str, country: &str) -> Self {
        Self {
            region: region.to_string(),
            country: country.to_string(),
        }
    }
}

/// Default resource watch-list.
pub fn default_watch_regions() -> Vec<WatchRegion> {
    vec![
        WatchRegion::new("Eastern Europe", "Ukraine"),
        WatchRegion::new("Sahel", "Mali"),
        WatchRegion::new("Horn of Africa", "Somalia"),
        WatchRegion::new("Levant", "Syria"),
    ]
}

/// Top-level oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub port: u16,
    pub cycle_interval: Duration,
    pub cycle_timeout: Duration,
    pub provider_timeout: Duration,
    /// Use simulated sources instead of HTTP clients.
    pub simulate: bool,
    pub queue_capacity: usize,
    /// Providers in priority order.
    pub providers: Vec<ProviderConfig>,
    pub region_of_interest: RegionOfInterest,
    pub data_types: Vec<DataType>,
    pub watch_regions: Vec<WatchRegion>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_SECS),
            cycle_timeout: Duration::from_secs(DEFAULT_CYCLE_TIMEOUT_SECS),
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            simulate: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            providers: Vec::new(),
            region_of_interest: RegionOfInterest::default(),
            data_types: vec![
                DataType::Military,
                DataType::Infrastructure,
                DataType::Environmental,
            ],
            watch_regions: default_watch_regions(),
        }
    }
}

impl OracleConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(default))
        };

        let providers: Vec<ProviderConfig> = KNOWN_PROVIDERS
            .iter()
            .map(|(name, category, default_url)| {
                let prefix = format!("THREATWATCH_{}", name.to_uppercase());
                ProviderConfig {
                    name: name.to_string(),
                    category: *category,
                    endpoint: lookup(&format!("{prefix}_URL"))
                        .unwrap_or_else(|| default_url.to_string()),
                    api_key: lookup(&format!("{prefix}_API_KEY"))
                        .map(|k| k.trim().to_string())
                        .unwrap_or_default(),
                }
            })
            .collect();

        let any_key = providers.iter().any(|p| !p.api_key.is_empty());
        let simulate = lookup("THREATWATCH_SIMULATE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(!any_key);

        Self {
            port: lookup("THREATWATCH_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            cycle_interval: secs("THREATWATCH_CYCLE_INTERVAL_SECS", DEFAULT_CYCLE_INTERVAL_SECS),
            cycle_timeout: secs("THREATWATCH_CYCLE_TIMEOUT_SECS", DEFAULT_CYCLE_TIMEOUT_SECS),
            provider_timeout: secs(
                "THREATWATCH_PROVIDER_TIMEOUT_SECS",
                DEFAULT_PROVIDER_TIMEOUT_SECS,
            ),
            simulate,
            queue_capacity: lookup("THREATWATCH_QUEUE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.queue_capacity),
            providers,
            ..defaults
        }
    }

    /// Enable every keyless provider with [`SIMULATED_CREDENTIAL`], so that
    /// simulated sources answer in its place. Configured keys are kept.
    pub fn enable_simulated_providers(&mut self) {
        for provider in &mut self.providers {
            if provider.api_key.trim().is_empty() {
                provider.api_key = SIMULATED_CREDENTIAL.to_string();
            }
        }
    }

    /// Watch-list entry for a region name (exact, case-insensitive).
    pub fn watch_region(&self, region: &str) -> Option<&WatchRegion> {
        self.watch_regions
            .iter()
            .find(|w| w.region.eq_ignore_ascii_case(region))
    }

    /// Country for a region name, from the watch-list or region of interest.
    pub fn country_for(&self, region: &str) -> Option<&str> {
        self.watch_region(region)
            .map(|w| w.country.as_str())
            .or_else(|| {
                self.region_of_interest
                    .name
                    .eq_ignore_ascii_case(region)
                    .then_some(self.region_of_interest.country.as_str())
            })
    }
}
