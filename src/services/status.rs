//! Host-side view of the weather fetcher's health.
//!
//! The fetcher publishes `WeatherEvent`s; `run_status_listener` folds them
//! into a `WeatherStatus` shared with the HTTP layer (`Arc<RwLock<>>`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use utoipa::ToSchema;

use crate::services::weather::WeatherEvent;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WeatherStatus {
    /// False once the provider rejected the key, until a new key is set
    pub api_key_valid: bool,
    pub provider_reachable: bool,
    pub credential_invalidated_at: Option<DateTime<Utc>>,
    pub reachability_changed_at: Option<DateTime<Utc>>,
    /// Trip weather batches completed since startup
    pub batches_completed: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub last_batch_points: usize,
    pub last_batch_placeholders: usize,
}

impl WeatherStatus {
    pub fn new() -> Self {
        Self {
            api_key_valid: true,
            provider_reachable: true,
            credential_invalidated_at: None,
            reachability_changed_at: None,
            batches_completed: 0,
            last_batch_at: None,
            last_batch_points: 0,
            last_batch_placeholders: 0,
        }
    }

    pub fn apply(&mut self, event: &WeatherEvent, at: DateTime<Utc>) {
        match event {
            WeatherEvent::CredentialInvalidated => {
                self.api_key_valid = false;
                self.credential_invalidated_at = Some(at);
            }
            WeatherEvent::ReachabilityChanged { reachable } => {
                self.provider_reachable = *reachable;
                self.reachability_changed_at = Some(at);
            }
        }
    }

    /// A new key gets the benefit of the doubt.
    pub fn credential_replaced(&mut self) {
        self.api_key_valid = true;
        self.credential_invalidated_at = None;
    }

    pub fn record_batch(&mut self, points: usize, placeholders: usize, at: DateTime<Utc>) {
        self.batches_completed += 1;
        self.last_batch_at = Some(at);
        self.last_batch_points = points;
        self.last_batch_placeholders = placeholders;
    }
}

pub type SharedWeatherStatus = Arc<RwLock<WeatherStatus>>;

/// Apply events to `status` until the sender side is dropped.
pub async fn run_status_listener(
    mut events: broadcast::Receiver<WeatherEvent>,
    status: SharedWeatherStatus,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                tracing::debug!("Weather event: {:?}", event);
                status.write().await.apply(&event, Utc::now());
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("Status listener missed {} weather events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::info!("Weather status listener stopped");
}
