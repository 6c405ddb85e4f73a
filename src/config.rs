use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_development(self) -> bool {
        self == AppEnv::Development
    }
}

impl FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(AppEnv::Development),
            "production" => Ok(AppEnv::Production),
            other => Err(anyhow::anyhow!(
                "APP_ENV must be 'development' or 'production', got '{}'",
                other
            )),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub app_env: AppEnv,
    pub openweather_api_key: String,
    pub openweather_base_url: String,
    pub cache_ttl_ms: u64,
    pub cache_max_entries: u64,
    pub request_timeout_ms: u64,
    pub upstream_max_retries: u32,
    pub cors_origins: String,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Config {
            port: parse_var("PORT", 5000)?,
            app_env: env::var("APP_ENV")
                .unwrap_or_else(|_| "development".to_string())
                .parse()?,
            openweather_api_key: env::var("OPENWEATHER_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENWEATHER_API_KEY not set"))?,
            openweather_base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| "https://api.openweathermap.org/data/2.5".to_string()),
            cache_ttl_ms: parse_var("CACHE_TTL", 1_800_000)?,
            cache_max_entries: parse_var("CACHE_MAX_ENTRIES", 10_000)?,
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", 10_000)?,
            upstream_max_retries: parse_var("UPSTREAM_MAX_RETRIES", 0)?,
            cors_origins: env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            rate_limit_window_ms: parse_var("RATE_LIMIT_WINDOW_MS", 900_000)?,
            rate_limit_max: parse_var("RATE_LIMIT_MAX", 100)?,
        };

        config.rate_limit_window_delta()?;
        Ok(config)
    }

    /// Configuration pointing at `base_url` with defaults for everything else.
    pub fn with_base_url(api_key: &str, base_url: &str) -> Self {
        Config {
            port: 5000,
            app_env: AppEnv::Development,
            openweather_api_key: api_key.to_string(),
            openweather_base_url: base_url.to_string(),
            cache_ttl_ms: 1_800_000,
            cache_max_entries: 10_000,
            request_timeout_ms: 10_000,
            upstream_max_retries: 0,
            cors_origins: "*".to_string(),
            rate_limit_window_ms: 900_000,
            rate_limit_max: 100,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// The rate-limit window as a signed duration that can be subtracted from
    /// the current time without overflowing.
    pub fn rate_limit_window_delta(&self) -> anyhow::Result<chrono::Duration> {
        i64::try_from(self.rate_limit_window_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .filter(|window| chrono::Utc::now().checked_sub_signed(*window).is_some())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "RATE_LIMIT_WINDOW_MS is out of range: {}",
                    self.rate_limit_window_ms
                )
            })
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid ({}): {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}
