pub mod openweather;
pub mod service;
pub mod types;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use types::*;

use crate::cache::TtlCache;

/// Everything the weather service keeps in its cache.
#[derive(Clone, Debug)]
pub enum CachedValue {
    CurrentWeather(Arc<CurrentWeatherResponse>),
    Forecast(Arc<ForecastResponse>),
    AirPollution(Arc<AirPollutionResponse>),
    Cities(Arc<Vec<City>>),
}

pub type WeatherCache = TtlCache<CachedValue>;

pub fn init_cache(ttl: Duration, max_entries: u64) -> WeatherCache {
    TtlCache::new(ttl, max_entries)
}

/// Conversion between a service result and its cache slot.
pub trait Cacheable: Sized {
    fn into_cached(self) -> CachedValue;
    fn from_cached(value: CachedValue) -> Option<Self>;
}

macro_rules! cacheable {
    ($variant:ident, $ty:ty) => {
        impl Cacheable for $ty {
            fn into_cached(self) -> CachedValue {
                CachedValue::$variant(self)
            }

            fn from_cached(value: CachedValue) -> Option<Self> {
                match value {
                    CachedValue::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(CurrentWeather, Arc<CurrentWeatherResponse>);
cacheable!(Forecast, Arc<ForecastResponse>);
cacheable!(AirPollution, Arc<AirPollutionResponse>);
cacheable!(Cities, Arc<Vec<City>>);

/// Builds the cache key for a provider call: `<endpoint>:<params as JSON>`.
///
/// Coordinates are used exactly as given, so `1.0` and `1.0000001` never share
/// an entry.
pub fn cache_key(endpoint: &str, params: &Value) -> String {
    format!("{}:{}", endpoint, params)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::{json, Value};

    pub fn current_weather(lat: f64, lon: f64) -> Value {
        json!({
            "coord": { "lat": lat, "lon": lon },
            "weather": [{ "id": 800, "main": "Clear", "description": "clear sky", "icon": "01d" }],
            "base": "stations",
            "main": {
                "temp": 21.4, "feels_like": 20.9, "temp_min": 19.8, "temp_max": 22.6,
                "pressure": 1016, "humidity": 52
            },
            "visibility": 10000,
            "wind": { "speed": 3.6, "deg": 250 },
            "clouds": { "all": 0 },
            "dt": 1729330000,
            "sys": { "type": 2, "id": 2019646, "country": "GB", "sunrise": 1729319000, "sunset": 1729356000 },
            "timezone": 3600,
            "id": 2643743,
            "name": "London",
            "cod": 200
        })
    }

    pub fn forecast(lat: f64, lon: f64) -> Value {
        json!({
            "cod": "200",
            "message": 0,
            "cnt": 1,
            "list": [{
                "dt": 1729339200,
                "main": {
                    "temp": 18.2, "feels_like": 17.6, "temp_min": 17.9, "temp_max": 18.2,
                    "pressure": 1017, "sea_level": 1017, "grnd_level": 1013,
                    "humidity": 61, "temp_kf": 0.3
                },
                "weather": [{ "id": 500, "main": "Rain", "description": "light rain", "icon": "10d" }],
                "clouds": { "all": 75 },
                "wind": { "speed": 4.1, "deg": 230, "gust": 7.9 },
                "visibility": 10000,
                "pop": 0.32,
                "rain": { "3h": 0.41 },
                "sys": { "pod": "d" },
                "dt_txt": "2024-10-19 12:00:00"
            }],
            "city": {
                "id": 2643743,
                "name": "London",
                "coord": { "lat": lat, "lon": lon },
                "country": "GB",
                "population": 1000000,
                "timezone": 3600,
                "sunrise": 1729319000,
                "sunset": 1729356000
            }
        })
    }

    pub fn air_pollution(lat: f64, lon: f64) -> Value {
        json!({
            "coord": { "lat": lat, "lon": lon },
            "list": [{
                "dt": 1729330000,
                "main": { "aqi": 2 },
                "components": {
                    "co": 230.31, "no": 0.12, "no2": 12.85, "o3": 48.64,
                    "so2": 1.89, "pm2_5": 5.72, "pm10": 8.11, "nh3": 0.51
                }
            }]
        })
    }

    pub fn find() -> Value {
        json!({
            "message": "like",
            "cod": "200",
            "count": 2,
            "list": [
                {
                    "id": 2643743,
                    "name": "London",
                    "coord": { "lat": 51.5085, "lon": -0.1257 },
                    "main": { "temp": 287.3 },
                    "sys": { "country": "GB" }
                },
                {
                    "id": 6058560,
                    "name": "London",
                    "coord": { "lat": 42.9834, "lon": -81.233 },
                    "main": { "temp": 280.1 },
                    "sys": { "country": "CA" }
                }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("weather", &json!({ "lat": 1.0, "lon": 2.0 }));
        let b = cache_key("weather", &json!({ "lat": 1.0, "lon": 2.0 }));
        assert_eq!(a, b);
        assert!(a.starts_with("weather:"));
    }

    #[test]
    fn test_cache_key_separates_params_and_endpoints() {
        let base = cache_key("weather", &json!({ "lat": 1.0, "lon": 2.0 }));
        assert_ne!(base, cache_key("weather", &json!({ "lat": 1.0, "lon": 3.0 })));
        assert_ne!(base, cache_key("forecast", &json!({ "lat": 1.0, "lon": 2.0 })));
        assert_ne!(
            cache_key("weather", &json!({ "lat": 0.1 + 0.2, "lon": 2.0 })),
            cache_key("weather", &json!({ "lat": 0.3, "lon": 2.0 }))
        );
    }

    #[test]
    fn test_fixtures_decode_into_provider_types() {
        let current: CurrentWeatherResponse =
            serde_json::from_value(fixtures::current_weather(51.5, -0.12)).unwrap();
        assert_eq!(current.name, "London");
        assert_eq!(current.sys.country, "GB");

        let forecast: ForecastResponse =
            serde_json::from_value(fixtures::forecast(51.5, -0.12)).unwrap();
        assert_eq!(forecast.list.len(), 1);
        assert_eq!(forecast.list[0].rain.as_ref().unwrap().three_hours, Some(0.41));

        let air: AirPollutionResponse =
            serde_json::from_value(fixtures::air_pollution(51.5, -0.12)).unwrap();
        assert_eq!(air.list[0].main.aqi, 2);
    }

    #[test]
    fn test_city_projection_copies_fields() {
        let raw: FindResponse = serde_json::from_value(fixtures::find()).unwrap();
        let cities: Vec<City> = raw.list.into_iter().map(City::from).collect();
        assert_eq!(
            cities[1],
            City {
                name: "London".to_string(),
                country: "CA".to_string(),
                lat: 42.9834,
                lon: -81.233,
            }
        );
    }

    #[test]
    fn test_weather_data_serialises_in_camel_case() {
        let data = WeatherData {
            current_weather: Arc::new(
                serde_json::from_value(fixtures::current_weather(1.0, 2.0)).unwrap(),
            ),
            forecast: Arc::new(serde_json::from_value(fixtures::forecast(1.0, 2.0)).unwrap()),
            air_pollution: Arc::new(
                serde_json::from_value(fixtures::air_pollution(1.0, 2.0)).unwrap(),
            ),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert!(json.get("currentWeather").is_some());
        assert!(json.get("forecast").is_some());
        assert!(json.get("airPollution").is_some());
    }

    #[test]
    fn test_cached_value_round_trips_only_its_variant() {
        let cities: Arc<Vec<City>> = Arc::new(vec![]);
        let cached = cities.into_cached();
        assert!(<Arc<Vec<City>>>::from_cached(cached.clone()).is_some());
        assert!(<Arc<ForecastResponse>>::from_cached(cached).is_none());
    }
}
