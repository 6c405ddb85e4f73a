//! Weather aggregation proxy: fetches current conditions, forecast and air
//! quality from OpenWeather, memoises each call in a time-bounded cache and
//! serves the combined record over HTTP.

pub mod cache;
pub mod config;
pub mod error;
pub mod routes;
pub mod utils;
pub mod weather;
