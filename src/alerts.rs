//! Alert store.
//!
//! Keyed collection of threat alerts. Upserts replace by id. Queries never
//! return an alert whose `expires_at` has passed, whether or not the expiry
//! sweep has physically removed it yet.
//!
//! # Alert ids
//!
//! Ids are `<type>-<created millis>-<sequence>`. The sequence is per store and
//! only guarantees that two alerts created in the same millisecond get
//! distinct ids. Re-detecting the same condition therefore creates a new
//! alert rather than refreshing the old one.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::model::{AlertType, ThreatAlert, region_matches};

/// Shared store of threat alerts.
#[derive(Clone)]
pub struct AlertStore {
    alerts: Arc<RwLock<HashMap<String, ThreatAlert>>>,
    sequence: Arc<AtomicU64>,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertStore {
    pub fn new() -> Self {
        Self {
            alerts: Arc::new(RwLock::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Allocate an id for a new alert of `alert_type` created at `created_at`.
    pub fn next_id(&self, alert_type: AlertType, created_at: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{}",
            alert_type.label(),
            created_at.timestamp_millis(),
            seq
        )
    }

    /// Insert an alert, replacing any alert with the same id.
    pub async fn upsert(&self, alert: ThreatAlert) {
        debug!(
            alert_id = %alert.id,
            alert_type = alert.alert_type.label(),
            severity = ?alert.severity,
            "Alert stored"
        );
        self.alerts.write().await.insert(alert.id.clone(), alert);
    }

    /// Insert several alerts under one lock.
    pub async fn upsert_all(&self, alerts: &[ThreatAlert]) {
        let mut store = self.alerts.write().await;
        for alert in alerts {
            store.insert(alert.id.clone(), alert.clone());
        }
    }

    /// Get a live alert by id.
    pub async fn get(&self, id: &str, now: DateTime<Utc>) -> Option<ThreatAlert> {
        self.alerts
            .read()
            .await
            .get(id)
            .filter(|a| a.is_active(now))
            .cloned()
    }

    /// All live alerts, newest first, optionally filtered by region.
    pub async fn list_active(
        &self,
        region_filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<ThreatAlert> {
        let mut active: Vec<ThreatAlert> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.is_active(now))
            .filter(|a| region_matches(&a.location.region, region_filter))
            .cloned()
            .collect();

        active.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.severity.cmp(&a.severity))
        });
        active
    }

    /// Physically remove every alert with `expires_at <= now`.
    ///
    /// Returns the number of alerts removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut alerts = self.alerts.write().await;
        let before = alerts.len();
        alerts.retain(|_, a| a.is_active(now));
        let removed = before - alerts.len();
        if removed > 0 {
            info!(removed, remaining = alerts.len(), "Expired alerts swept");
        }
        removed
    }

    /// Number of stored alerts, expired or not.
    pub async fn len(&self) -> usize {
        self.alerts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.alerts.read().await.is_empty()
    }
}
