pub mod gpx;
pub mod health;
pub mod settings;
pub mod trips;
pub mod weather;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::services::credentials::CredentialStore;
use crate::services::status::SharedWeatherStatus;
use crate::services::trips::{RainRule, TripStore};
use crate::services::weather::WeatherService;

/// Shared application state for all endpoints.
#[derive(Clone)]
pub struct AppState {
    pub trips: Arc<dyn TripStore>,
    pub weather: Arc<WeatherService>,
    pub credentials: Arc<dyn CredentialStore>,
    pub status: SharedWeatherStatus,
    pub rain_rule: Arc<RwLock<RainRule>>,
    pub default_spacing_km: f64,
}
