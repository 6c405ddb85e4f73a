//! Aggregation over the upstream client, with every provider call memoised in
//! the shared [`WeatherCache`].

use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

use super::openweather::{OpenWeatherClient, WeatherApi};
use super::types::*;
use super::{cache_key, Cacheable, WeatherCache};
use crate::error::ApiError;

pub struct WeatherService<A = OpenWeatherClient> {
    api: A,
    cache: WeatherCache,
}

impl<A: WeatherApi> WeatherService<A> {
    pub fn new(api: A, cache: WeatherCache) -> Self {
        Self { api, cache }
    }

    pub fn cache(&self) -> &WeatherCache {
        &self.cache
    }

    pub async fn get_current_weather(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<Arc<CurrentWeatherResponse>, ApiError> {
        let api = &self.api;
        self.cached("weather", coordinates(lat, lon), move || async move {
            api.current_weather(lat, lon).await.map(Arc::new)
        })
        .await
    }

    pub async fn get_forecast(&self, lat: f64, lon: f64) -> Result<Arc<ForecastResponse>, ApiError> {
        let api = &self.api;
        self.cached("forecast", coordinates(lat, lon), move || async move {
            api.forecast(lat, lon).await.map(Arc::new)
        })
        .await
    }

    pub async fn get_air_pollution(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<Arc<AirPollutionResponse>, ApiError> {
        let api = &self.api;
        self.cached("air_pollution", coordinates(lat, lon), move || async move {
            api.air_pollution(lat, lon).await.map(Arc::new)
        })
        .await
    }

    /// Fetches the three sub-records concurrently. The first failure fails the
    /// whole call and the other fetches are dropped.
    pub async fn get_weather_data(&self, lat: f64, lon: f64) -> Result<WeatherData, ApiError> {
        let (current_weather, forecast, air_pollution) = tokio::try_join!(
            self.get_current_weather(lat, lon),
            self.get_forecast(lat, lon),
            self.get_air_pollution(lat, lon),
        )?;

        Ok(WeatherData {
            current_weather,
            forecast,
            air_pollution,
        })
    }

    /// Looks up cities matching `query`, caching the projected list.
    pub async fn search_cities(&self, query: &str) -> Result<Arc<Vec<City>>, ApiError> {
        let api = &self.api;
        self.cached("find", json!({ "q": query }), move || async move {
            let found = api.find_cities(query).await?;
            let cities: Vec<City> = found.list.into_iter().map(City::from).collect();
            Ok::<_, ApiError>(Arc::new(cities))
        })
        .await
    }

    async fn cached<T, F, Fut>(&self, endpoint: &'static str, params: Value, fetch: F) -> Result<T, ApiError>
    where
        T: Cacheable,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let key = cache_key(endpoint, &params);

        if let Some(hit) = self.cache.get(&key).await.and_then(T::from_cached) {
            tracing::debug!(endpoint, key = %key, "Cache hit");
            return Ok(hit);
        }

        tracing::debug!(endpoint, key = %key, "Cache miss");
        let fetch = &fetch;
        let value = self
            .cache
            .get_or_try_insert_with(&key, move || async move { fetch().await.map(T::into_cached) })
            .await?;

        T::from_cached(value).ok_or_else(|| {
            tracing::error!(endpoint, key = %key, "Cached value has unexpected type");
            ApiError::internal("Cache entry type mismatch")
        })
    }
}

fn coordinates(lat: f64, lon: f64) -> Value {
    json!({ "lat": lat, "lon": lon })
}
