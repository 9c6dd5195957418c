// Route Weather API v0.1
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::AppState;
use services::credentials::{CredentialStore, InMemoryCredentialStore};
use services::geocode::OpenWeatherGeocoder;
use services::openweather::OpenWeatherClient;
use services::status::{SharedWeatherStatus, WeatherStatus};
use services::trips::{InMemoryTripStore, RainRule};
use services::weather::WeatherService;

/// Route Weather API OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Route Weather API",
        version = "0.1.0",
        description = "Weather along a planned ride. Imports GPX tracks, reduces them to \
            evenly spaced route points, estimates when each point is passed between a \
            start and arrival time, and fetches the hourly forecast for every point \
            from OpenWeather.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Routes", description = "GPX parsing and resampling"),
        (name = "Trips", description = "Timed trips and their weather"),
        (name = "Weather", description = "Weather fetcher status and cache"),
        (name = "Settings", description = "API key and rain rule"),
    ),
    paths(
        routes::health::health_check,
        routes::gpx::parse_route,
        routes::gpx::resample_route,
        routes::trips::create_trip,
        routes::trips::list_trips,
        routes::trips::get_trip,
        routes::trips::delete_trip,
        routes::trips::retime_trip,
        routes::trips::replace_trip_route,
        routes::trips::set_rain_focus,
        routes::trips::fetch_trip_weather,
        routes::trips::clear_trip_weather,
        routes::weather::get_point_weather,
        routes::weather::get_weather_status,
        routes::weather::clear_weather_cache,
        routes::settings::get_settings,
        routes::settings::set_api_key,
        routes::settings::set_rain_rule,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::gpx::ResampleRequest,
            services::gpx::RawSample,
            services::resample::ResampleResult,
            services::timing::RoutePoint,
            services::forecast::WeatherSnapshot,
            routes::trips::CreateTripRequest,
            routes::trips::RetimeRequest,
            routes::trips::ReplaceRouteRequest,
            routes::trips::RainFocusRequest,
            routes::trips::TripPoint,
            routes::trips::TripResponse,
            routes::trips::TripListItem,
            services::trips::WeatherAssessment,
            services::trips::RainRule,
            services::trips::RainRuleType,
            services::status::WeatherStatus,
            services::weather::WeatherEvent,
            routes::weather::WeatherStatusResponse,
            routes::settings::SettingsResponse,
            routes::settings::ApiKeyRequest,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown requested");
    cancel.cancel();
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "route_weather_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    if config.openweather_api_key.is_none() {
        tracing::warn!("OPENWEATHER_API_KEY not set; weather fetches are disabled until a key is configured");
    }

    let credentials: Arc<dyn CredentialStore> =
        Arc::new(InMemoryCredentialStore::new(config.openweather_api_key.clone()));
    let geocoder = OpenWeatherGeocoder::new(
        &config.geocoding_base_url,
        credentials.clone(),
        config.request_timeout,
        config.geocode_cache_max_entries,
        config.geocode_cache_ttl,
    );
    let client = OpenWeatherClient::new(
        &config.openweather_base_url,
        config.units,
        &config.language,
        config.request_timeout,
    );
    let weather = Arc::new(WeatherService::new(
        client,
        credentials.clone(),
        Arc::new(geocoder),
        config.fetch_policy(),
    ));

    // Background tasks: reachability probe and event listener
    let cancel = CancellationToken::new();
    let status: SharedWeatherStatus = Arc::new(RwLock::new(WeatherStatus::new()));
    tokio::spawn(services::status::run_status_listener(
        weather.subscribe(),
        status.clone(),
    ));
    let monitor = weather.spawn_reachability_monitor(config.reachability_interval, cancel.clone());

    let app_state = AppState {
        trips: Arc::new(InMemoryTripStore::new()),
        weather,
        credentials,
        status,
        rain_rule: Arc::new(RwLock::new(RainRule::default())),
        default_spacing_km: config.default_spacing_km,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/routes/parse", post(routes::gpx::parse_route))
        .route("/api/v1/routes/resample", post(routes::gpx::resample_route))
        .route(
            "/api/v1/trips",
            get(routes::trips::list_trips).post(routes::trips::create_trip),
        )
        .route(
            "/api/v1/trips/:id",
            get(routes::trips::get_trip).delete(routes::trips::delete_trip),
        )
        .route("/api/v1/trips/:id/timing", put(routes::trips::retime_trip))
        .route(
            "/api/v1/trips/:id/route",
            put(routes::trips::replace_trip_route),
        )
        .route(
            "/api/v1/trips/:id/rain-focus",
            put(routes::trips::set_rain_focus),
        )
        .route(
            "/api/v1/trips/:id/weather",
            post(routes::trips::fetch_trip_weather).delete(routes::trips::clear_trip_weather),
        )
        .route(
            "/api/v1/weather/point",
            get(routes::weather::get_point_weather),
        )
        .route(
            "/api/v1/weather/status",
            get(routes::weather::get_weather_status),
        )
        .route(
            "/api/v1/weather/cache",
            delete(routes::weather::clear_weather_cache),
        )
        .route("/api/v1/settings", get(routes::settings::get_settings))
        .route(
            "/api/v1/settings/api-key",
            put(routes::settings::set_api_key),
        )
        .route(
            "/api/v1/settings/rain-rule",
            put(routes::settings::set_rain_rule),
        )
        .with_state(app_state);

    let app = Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .expect("Server terminated unexpectedly");

    if let Err(e) = monitor.await {
        tracing::error!("Reachability monitor panicked: {}", e);
    }
}
