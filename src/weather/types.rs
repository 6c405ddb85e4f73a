use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub id: i64,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainWeatherData {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: f64,
    pub humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sea_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grnd_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_kf: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
    pub deg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gust: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clouds {
    pub all: f64,
}

/// Precipitation volume for the last hour and/or three hours (rain or snow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precipitation {
    #[serde(rename = "1h", skip_serializing_if = "Option::is_none")]
    pub one_hour: Option<f64>,
    #[serde(rename = "3h", skip_serializing_if = "Option::is_none")]
    pub three_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sys {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub country: String,
    pub sunrise: i64,
    pub sunset: i64,
}

/// Payload of the provider's `/weather` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWeatherResponse {
    pub coord: Coordinates,
    pub weather: Vec<WeatherCondition>,
    pub base: String,
    pub main: MainWeatherData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<i64>,
    pub wind: Wind,
    pub clouds: Clouds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain: Option<Precipitation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snow: Option<Precipitation>,
    pub dt: i64,
    pub sys: Sys,
    pub timezone: i64,
    pub id: i64,
    pub name: String,
    pub cod: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartOfDay {
    pub pod: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastItem {
    pub dt: i64,
    pub main: MainWeatherData,
    pub weather: Vec<WeatherCondition>,
    pub clouds: Clouds,
    pub wind: Wind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<i64>,
    pub pop: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rain: Option<Precipitation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snow: Option<Precipitation>,
    pub sys: PartOfDay,
    pub dt_txt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastCity {
    pub id: i64,
    pub name: String,
    pub coord: Coordinates,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<i64>,
    pub timezone: i64,
    pub sunrise: i64,
    pub sunset: i64,
}

/// Payload of the provider's `/forecast` endpoint (5 days, 3-hour steps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub cod: String,
    pub message: f64,
    pub cnt: i64,
    pub list: Vec<ForecastItem>,
    pub city: ForecastCity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirQualityIndex {
    pub aqi: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirComponents {
    pub co: f64,
    pub no: f64,
    pub no2: f64,
    pub o3: f64,
    pub so2: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    pub nh3: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirPollutionData {
    pub dt: i64,
    pub main: AirQualityIndex,
    pub components: AirComponents,
}

/// Payload of the provider's `/air_pollution` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirPollutionResponse {
    pub coord: Coordinates,
    pub list: Vec<AirPollutionData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FoundCitySys {
    pub country: String,
}

/// A raw city record as returned by `/find`.
#[derive(Debug, Clone, Deserialize)]
pub struct FoundCity {
    pub name: String,
    pub coord: Coordinates,
    pub sys: FoundCitySys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindResponse {
    #[serde(default)]
    pub list: Vec<FoundCity>,
}

/// Compact city representation served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<FoundCity> for City {
    fn from(found: FoundCity) -> Self {
        Self {
            name: found.name,
            country: found.sys.country,
            lat: found.coord.lat,
            lon: found.coord.lon,
        }
    }
}

/// Current conditions, forecast and air quality for one coordinate pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    pub current_weather: Arc<CurrentWeatherResponse>,
    pub forecast: Arc<ForecastResponse>,
    pub air_pollution: Arc<AirPollutionResponse>,
}
