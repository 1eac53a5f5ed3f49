use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};

pub const CONF_CACHE_MAX_AGE: &str = "cache_max_age";
pub const CONF_CACHE_MAX_SIZE_MB: &str = "cache_max_size_mb";

pub const CONF_SEARXNG_ENABLED: &str = "searxng_enabled";
pub const CONF_SEARXNG_URL: &str = "searxng_url";
pub const CONF_SEARXNG_NUM_RESULTS: &str = "searxng_num_results";

pub const CONF_BRAVE_ENABLED: &str = "brave_search_enabled";
pub const CONF_BRAVE_API_KEY: &str = "brave_api_key";
pub const CONF_BRAVE_NUM_RESULTS: &str = "brave_num_results";
pub const CONF_BRAVE_COUNTRY_CODE: &str = "brave_country_code";
pub const CONF_BRAVE_LATITUDE: &str = "brave_latitude";
pub const CONF_BRAVE_LONGITUDE: &str = "brave_longitude";
pub const CONF_BRAVE_TIMEZONE: &str = "brave_timezone";
pub const CONF_BRAVE_POST_CODE: &str = "brave_post_code";

pub const CONF_GOOGLE_PLACES_ENABLED: &str = "google_places_enabled";
pub const CONF_GOOGLE_PLACES_API_KEY: &str = "google_places_api_key";
pub const CONF_GOOGLE_PLACES_NUM_RESULTS: &str = "google_places_num_results";
pub const CONF_GOOGLE_PLACES_LATITUDE: &str = "google_places_latitude";
pub const CONF_GOOGLE_PLACES_LONGITUDE: &str = "google_places_longitude";
pub const CONF_GOOGLE_PLACES_RADIUS: &str = "google_places_radius";
pub const CONF_GOOGLE_PLACES_RANKING: &str = "google_places_rank_preference";

pub const CONF_WIKIPEDIA_ENABLED: &str = "wikipedia_enabled";
pub const CONF_WIKIPEDIA_NUM_RESULTS: &str = "wikipedia_num_results";

pub const CONF_WEATHER_ENABLED: &str = "weather_enabled";
pub const CONF_DAILY_WEATHER_ENTITY: &str = "weather_daily_entity";
pub const CONF_HOURLY_WEATHER_ENTITY: &str = "weather_hourly_entity";

pub const CONF_HOME_ASSISTANT_URL: &str = "home_assistant_url";
pub const CONF_HOME_ASSISTANT_TOKEN: &str = "home_assistant_token";

pub const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 60 * 60;
pub const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 10;

/// Every setting the tools read. Each one can be overridden through an
/// environment variable named after the upper-cased key.
pub const KNOWN_KEYS: &[&str] = &[
    CONF_CACHE_MAX_AGE,
    CONF_CACHE_MAX_SIZE_MB,
    CONF_SEARXNG_ENABLED,
    CONF_SEARXNG_URL,
    CONF_SEARXNG_NUM_RESULTS,
    CONF_BRAVE_ENABLED,
    CONF_BRAVE_API_KEY,
    CONF_BRAVE_NUM_RESULTS,
    CONF_BRAVE_COUNTRY_CODE,
    CONF_BRAVE_LATITUDE,
    CONF_BRAVE_LONGITUDE,
    CONF_BRAVE_TIMEZONE,
    CONF_BRAVE_POST_CODE,
    CONF_GOOGLE_PLACES_ENABLED,
    CONF_GOOGLE_PLACES_API_KEY,
    CONF_GOOGLE_PLACES_NUM_RESULTS,
    CONF_GOOGLE_PLACES_LATITUDE,
    CONF_GOOGLE_PLACES_LONGITUDE,
    CONF_GOOGLE_PLACES_RADIUS,
    CONF_GOOGLE_PLACES_RANKING,
    CONF_WIKIPEDIA_ENABLED,
    CONF_WIKIPEDIA_NUM_RESULTS,
    CONF_WEATHER_ENABLED,
    CONF_DAILY_WEATHER_ENTITY,
    CONF_HOURLY_WEATHER_ENTITY,
    CONF_HOME_ASSISTANT_URL,
    CONF_HOME_ASSISTANT_TOKEN,
];

/// Flat, read-only settings mapping shared by every tool.
///
/// Values are kept as JSON scalars. Accessors are lenient about spelling:
/// numbers and booleans may also be given as strings, and an empty string
/// counts as unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    values: Map<String, Value>,
}

impl Config {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            other => Err(anyhow!("configuration must be a JSON object, got {}", other)),
        }
    }

    /// Reads a JSON object from `path`. A missing file yields an empty config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No configuration file at {}", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        Self::from_value(value)
    }

    /// Applies overrides for known keys, later values winning.
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in overrides {
            if let Some(known) = KNOWN_KEYS.iter().find(|known| **known == key) {
                self.values.insert(known.to_string(), Value::String(value));
            }
        }
        self
    }

    /// Collects `(key, value)` overrides from environment variables named
    /// after the upper-cased keys, e.g. `SEARXNG_URL`.
    pub fn env_overrides() -> Vec<(String, String)> {
        KNOWN_KEYS
            .iter()
            .filter_map(|key| {
                std::env::var(key.to_uppercase())
                    .ok()
                    .map(|value| (key.to_string(), value))
            })
            .collect()
    }

    pub fn string(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
            Some(Value::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ),
            _ => false,
        }
    }

    /// Entity identifiers are unset when missing, empty or the literal `None`.
    pub fn entity(&self, key: &str) -> Option<String> {
        self.string(key).filter(|entity| entity != "None")
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.u64_or(CONF_CACHE_MAX_AGE, DEFAULT_CACHE_MAX_AGE_SECS))
    }

    /// Size of the cache's storage map in bytes.
    pub fn cache_max_size(&self) -> usize {
        let megabytes = self
            .u64_or(CONF_CACHE_MAX_SIZE_MB, DEFAULT_CACHE_MAX_SIZE_MB)
            .max(1);
        (megabytes as usize).saturating_mul(1024 * 1024)
    }
}
