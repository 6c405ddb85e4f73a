use super::types::*;
use crate::config::Config;
use crate::error::{ApiError, INVALID_RESPONSE};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Provider calls the weather service depends on.
pub trait WeatherApi: Send + Sync + 'static {
    fn current_weather(
        &self,
        lat: f64,
        lon: f64,
    ) -> impl Future<Output = Result<CurrentWeatherResponse, ApiError>> + Send;

    fn forecast(
        &self,
        lat: f64,
        lon: f64,
    ) -> impl Future<Output = Result<ForecastResponse, ApiError>> + Send;

    fn air_pollution(
        &self,
        lat: f64,
        lon: f64,
    ) -> impl Future<Output = Result<AirPollutionResponse, ApiError>> + Send;

    fn find_cities(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<FindResponse, ApiError>> + Send;
}

pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenWeatherClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("WeatherProxy/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.openweather_base_url.trim_end_matches('/').to_string(),
            api_key: config.openweather_api_key.clone(),
            max_retries: config.upstream_max_retries,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = match Url::parse(&format!("{}{}", self.base_url, path)) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(
                    base_url = %self.base_url,
                    path,
                    error = %e,
                    "API request setup failed"
                );
                return Err(ApiError::request_setup());
            }
        };

        let mut query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        query.push(("appid", self.api_key.as_str()));

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(1000);

        loop {
            tracing::info!(
                method = "GET",
                url = %url,
                params = %describe_params(params),
                "API Request"
            );

            let response = match self.client.get(url.clone()).query(&query).send().await {
                Ok(response) => response,
                Err(e) => return Err(classify_send_error(&url, e)),
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<T>().await.map_err(|e| {
                    if e.is_decode() {
                        tracing::error!(method = "GET", url = %url, error = %e, "Invalid API response body");
                        ApiError::internal(INVALID_RESPONSE)
                    } else {
                        classify_send_error(&url, e)
                    }
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS && retry_count < self.max_retries {
                tracing::warn!(
                    "Rate limited by OpenWeather API, retrying in {}ms",
                    delay.as_millis()
                );

                sleep(delay).await;
                delay = delay.mul_f32(2.0 + fastrand::f32() * 0.5); // Exponential backoff with jitter
                retry_count += 1;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let message = provider_message(&body);
            tracing::error!(
                method = "GET",
                url = %url,
                status = status.as_u16(),
                message = message.as_deref().unwrap_or(""),
                "API Error"
            );
            return Err(ApiError::upstream(status.as_u16(), message));
        }
    }
}

impl WeatherApi for OpenWeatherClient {
    async fn current_weather(&self, lat: f64, lon: f64) -> Result<CurrentWeatherResponse, ApiError> {
        self.get_json(
            "/weather",
            &[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("units", "metric".to_string()),
            ],
        )
        .await
    }

    async fn forecast(&self, lat: f64, lon: f64) -> Result<ForecastResponse, ApiError> {
        self.get_json(
            "/forecast",
            &[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("units", "metric".to_string()),
            ],
        )
        .await
    }

    async fn air_pollution(&self, lat: f64, lon: f64) -> Result<AirPollutionResponse, ApiError> {
        self.get_json(
            "/air_pollution",
            &[("lat", lat.to_string()), ("lon", lon.to_string())],
        )
        .await
    }

    async fn find_cities(&self, query: &str) -> Result<FindResponse, ApiError> {
        self.get_json(
            "/find",
            &[
                ("q", query.to_string()),
                ("type", "like".to_string()),
                ("sort", "population".to_string()),
                ("cnt", "5".to_string()),
            ],
        )
        .await
    }
}

/// Maps a transport-level failure onto the setup or no-response kind.
fn classify_send_error(url: &Url, error: reqwest::Error) -> ApiError {
    if error.is_builder() {
        tracing::error!(method = "GET", url = %url, error = %error, "API request setup failed");
        ApiError::request_setup()
    } else {
        tracing::error!(
            method = "GET",
            url = %url,
            timeout = error.is_timeout(),
            error = %error,
            "No response received"
        );
        ApiError::no_response()
    }
}

/// Extracts the provider's `message` field from an error body, if any.
fn provider_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("message")? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn describe_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
