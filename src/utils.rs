use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::ApiError;

pub const MAX_QUERY_LENGTH: usize = 100;

/// A single rejected query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

fn validation_error(errors: Vec<FieldError>) -> ApiError {
    ApiError::validation("Validation error", json!(errors))
}

/// Validate latitude and longitude coordinates
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), String> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(format!("Invalid latitude: {}. Must be between -90 and 90", lat));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(format!("Invalid longitude: {}. Must be between -180 and 180", lon));
    }
    Ok(())
}

fn parse_coordinate(name: &str, raw: Option<&str>) -> Result<f64, FieldError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FieldError::new(name, "Required"))?;

    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| FieldError::new(name, format!("Expected a number, received '{}'", raw)))
}

/// Parses the `lat`/`lon` query parameters of a weather request.
pub fn parse_weather_query(lat: Option<&str>, lon: Option<&str>) -> Result<(f64, f64), ApiError> {
    let (lat, lon) = match (parse_coordinate("lat", lat), parse_coordinate("lon", lon)) {
        (Ok(lat), Ok(lon)) => (lat, lon),
        (lat, lon) => {
            let errors = [lat.err(), lon.err()].into_iter().flatten().collect();
            return Err(validation_error(errors));
        }
    };

    validate_coordinates(lat, lon).map_err(|message| {
        let path = if (-90.0..=90.0).contains(&lat) { "lon" } else { "lat" };
        validation_error(vec![FieldError::new(path, message)])
    })?;

    Ok((lat, lon))
}

/// Checks the `q` parameter of a city search: 1 to 100 characters.
pub fn parse_search_query(q: Option<&str>) -> Result<String, ApiError> {
    let q = q.ok_or_else(|| validation_error(vec![FieldError::new("q", "Required")]))?;

    let length = q.chars().count();
    if length == 0 {
        return Err(validation_error(vec![FieldError::new(
            "q",
            "String must contain at least 1 character(s)",
        )]));
    }
    if length > MAX_QUERY_LENGTH {
        return Err(validation_error(vec![FieldError::new(
            "q",
            format!("String must contain at most {} character(s)", MAX_QUERY_LENGTH),
        )]));
    }

    Ok(q.to_string())
}

/// Sliding-window request counter keyed by client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    requests: HashMap<String, Vec<DateTime<Utc>>>,
    max_requests: usize,
    window_duration: chrono::Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_duration: chrono::Duration) -> Self {
        Self {
            requests: HashMap::new(),
            max_requests,
            window_duration,
        }
    }

    pub fn check_rate_limit(&mut self, key: &str) -> bool {
        let now = Utc::now();
        let cutoff = now
            .checked_sub_signed(self.window_duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        // Clean old requests
        let requests = self.requests.entry(key.to_string()).or_default();
        requests.retain(|&timestamp| timestamp > cutoff);

        // Check if under limit
        if requests.len() < self.max_requests {
            requests.push(now);
            true
        } else {
            false
        }
    }

    pub fn cleanup_old_entries(&mut self) {
        let now = Utc::now();
        let cutoff = now
            .checked_sub_signed(self.window_duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.requests.retain(|_, timestamps| {
            timestamps.retain(|&timestamp| timestamp > cutoff);
            !timestamps.is_empty()
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

/// Error response envelope
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

/// Success response envelope
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
    pub message: String,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            message: "Success".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorKind;

    #[test]
    fn test_validate_coordinates() {
        assert!(validate_coordinates(0.0, 0.0).is_ok());
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
        assert!(validate_coordinates(91.0, 0.0).is_err());
        assert!(validate_coordinates(0.0, 181.0).is_err());
    }

    #[test]
    fn test_parse_weather_query_accepts_floats() {
        assert_eq!(
            parse_weather_query(Some("40.712776"), Some("-74.005974")).unwrap(),
            (40.712776, -74.005974)
        );
    }

    #[test]
    fn test_parse_weather_query_reports_every_bad_field() {
        let err = parse_weather_query(None, Some("abc")).unwrap_err();
        assert_eq!(err.status_code, 400);
        assert_eq!(err.kind, ApiErrorKind::Validation);
        assert_eq!(err.message, "Validation error");

        let details = err.details.unwrap();
        assert_eq!(details[0]["path"], "lat");
        assert_eq!(details[0]["message"], "Required");
        assert_eq!(details[1]["path"], "lon");
    }

    #[test]
    fn test_parse_weather_query_rejects_out_of_range_and_nan() {
        let err = parse_weather_query(Some("10"), Some("200")).unwrap_err();
        assert_eq!(err.details.unwrap()[0]["path"], "lon");

        assert!(parse_weather_query(Some("NaN"), Some("0")).is_err());
        assert!(parse_weather_query(Some("inf"), Some("0")).is_err());
    }

    #[test]
    fn test_parse_search_query_bounds() {
        assert_eq!(parse_search_query(Some("Paris")).unwrap(), "Paris");
        assert!(parse_search_query(None).is_err());
        assert!(parse_search_query(Some("")).is_err());
        assert!(parse_search_query(Some(&"a".repeat(100))).is_ok());
        assert!(parse_search_query(Some(&"a".repeat(101))).is_err());
        // Length is counted in characters, not bytes.
        assert!(parse_search_query(Some(&"é".repeat(100))).is_ok());
    }

    #[test]
    fn test_rate_limiter() {
        let mut limiter = RateLimiter::new(2, chrono::Duration::seconds(60));

        assert!(limiter.check_rate_limit("user1"));
        assert!(limiter.check_rate_limit("user1"));
        assert!(!limiter.check_rate_limit("user1")); // Should be rate limited

        assert!(limiter.check_rate_limit("user2")); // Different user, should work
    }

    #[test]
    fn test_rate_limiter_cleanup_drops_idle_clients() {
        let mut limiter = RateLimiter::new(5, chrono::Duration::zero());
        limiter.check_rate_limit("idle");
        limiter.cleanup_old_entries();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_rate_limiter_survives_oversized_window() {
        let mut limiter = RateLimiter::new(1, chrono::Duration::MAX);
        assert!(limiter.check_rate_limit("user1"));
        assert!(!limiter.check_rate_limit("user1"));
        limiter.cleanup_old_entries();
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_success_envelope_shape() {
        let json = serde_json::to_value(SuccessResponse::new(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": [1, 2], "message": "Success" }));
    }
}
