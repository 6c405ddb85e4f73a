use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::{Json, Response},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

use crate::{
    config::Config,
    error::ApiError,
    utils::{parse_search_query, parse_weather_query, RateLimiter, SuccessResponse},
    weather::{
        service::WeatherService,
        types::{City, WeatherData},
    },
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub weather_service: Arc<WeatherService>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl AppState {
    pub fn new(config: Config, weather_service: WeatherService) -> anyhow::Result<Self> {
        let window = config.rate_limit_window_delta()?;
        let rate_limiter = RateLimiter::new(config.rate_limit_max, window);

        Ok(Self {
            config: Arc::new(config),
            weather_service: Arc::new(weather_service),
            rate_limiter: Arc::new(Mutex::new(rate_limiter)),
        })
    }
}

// Raw query strings; validation happens in the handlers so failures use our envelope.
#[derive(Debug, Deserialize)]
pub struct WeatherQuery {
    pub lat: Option<String>,
    pub lon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CityQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

// Route handlers
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_weather_data(
    State(state): State<AppState>,
    Query(params): Query<WeatherQuery>,
) -> Result<Json<SuccessResponse<WeatherData>>, Response> {
    let app_env = state.config.app_env;
    let (lat, lon) = parse_weather_query(params.lat.as_deref(), params.lon.as_deref())
        .map_err(|e| e.into_response_with(app_env))?;

    match state.weather_service.get_weather_data(lat, lon).await {
        Ok(data) => Ok(Json(SuccessResponse::new(data))),
        Err(e) => {
            tracing::error!("Weather data request failed for ({}, {}): {}", lat, lon, e);
            Err(e.into_response_with(app_env))
        }
    }
}

pub async fn search_cities(
    State(state): State<AppState>,
    Query(params): Query<CityQuery>,
) -> Result<Json<SuccessResponse<Arc<Vec<City>>>>, Response> {
    let app_env = state.config.app_env;
    let query = parse_search_query(params.q.as_deref()).map_err(|e| e.into_response_with(app_env))?;

    match state.weather_service.search_cities(&query).await {
        Ok(cities) => Ok(Json(SuccessResponse::new(cities))),
        Err(e) => {
            tracing::error!("City search failed for '{}': {}", query, e);
            Err(e.into_response_with(app_env))
        }
    }
}

async fn not_found(State(state): State<AppState>, request: Request) -> Response {
    ApiError::new(404, format!("Route {} not found", request.uri().path()))
        .into_response_with(state.config.app_env)
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let allowed = state.rate_limiter.lock().check_rate_limit(&client);
    if !allowed {
        tracing::warn!("Rate limit exceeded for {}", client);
        return ApiError::new(429, "Too many requests, please try again later.")
            .into_response_with(state.config.app_env);
    }

    next.run(request).await
}

/// CORS policy from `CORS_ORIGINS`: `*` allows any origin, otherwise a comma-separated list.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let base = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86_400));

    if config.cors_origins.trim() == "*" {
        return base.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    base.allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    let weather = Router::new()
        .route("/data", get(get_weather_data))
        .route("/cities", get(search_cities));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/weather", weather)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .with_state(state)
}
