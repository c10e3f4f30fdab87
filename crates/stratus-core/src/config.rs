//! Environment-driven configuration.
//!
//! Each component loads its own struct, so a missing variable only takes down
//! the component that needs it. Every `from_env` has a `from_lookup`
//! counterpart that reads from an arbitrary source (tests pass a map).

use std::str::FromStr;
use std::time::Duration;

use crate::app::retry::RetryPolicy;

/// Invalid or missing configuration. Fatal for the affected component.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<String, ConfigError> {
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(var)),
    }
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|v| !v.trim().is_empty())
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value,
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, var) {
        Some(value) => parse(var, value),
        None => Ok(default),
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

// ---------------------------------------------------------------------------
// Analytics store
// ---------------------------------------------------------------------------

/// Connection settings for the analytics database.
///
/// | Variable              | Required |
/// |-----------------------|----------|
/// | `CLICKHOUSE_HOST`     | yes      |
/// | `CLICKHOUSE_PORT`     | yes      |
/// | `CLICKHOUSE_USER`     | yes      |
/// | `CLICKHOUSE_PASSWORD` | yes      |
/// | `CLICKHOUSE_DB`       | yes      |
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl AnalyticsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: required(&lookup, "CLICKHOUSE_HOST")?,
            port: parse("CLICKHOUSE_PORT", required(&lookup, "CLICKHOUSE_PORT")?)?,
            user: required(&lookup, "CLICKHOUSE_USER")?,
            password: required(&lookup, "CLICKHOUSE_PASSWORD")?,
            database: required(&lookup, "CLICKHOUSE_DB")?,
        })
    }

    /// Base URL of the HTTP interface.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// | Variable       | Required |
/// |----------------|----------|
/// | `RABBITMQ_URL` | yes      |
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            url: required(&lookup, "RABBITMQ_URL")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Weather API
// ---------------------------------------------------------------------------

const DEFAULT_WEATHER_URL: &str = "https://pro.openweathermap.org/data/2.5/weather";
const DEFAULT_GEOCODING_URL: &str = "http://api.openweathermap.org/geo/1.0/direct";

/// | Variable            | Required | Default                    |
/// |---------------------|----------|----------------------------|
/// | `API_WEATHER_KEY`   | yes      |                            |
/// | `WEATHER_API_URL`   | no       | OpenWeather current weather |
/// | `GEOCODING_API_URL` | no       | OpenWeather direct geocoding |
#[derive(Debug, Clone)]
pub struct WeatherApiConfig {
    pub api_key: String,
    pub weather_url: String,
    pub geocoding_url: String,
}

impl WeatherApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required(&lookup, "API_WEATHER_KEY")?,
            weather_url: optional(&lookup, "WEATHER_API_URL")
                .unwrap_or_else(|| DEFAULT_WEATHER_URL.to_string()),
            geocoding_url: optional(&lookup, "GEOCODING_API_URL")
                .unwrap_or_else(|| DEFAULT_GEOCODING_URL.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// SMTP
// ---------------------------------------------------------------------------

const DEFAULT_FROM_ADDRESS: &str = "noreply@stratus.local";

/// | Variable        | Required | Default                 |
/// |-----------------|----------|-------------------------|
/// | `SMTP_HOST`     | yes      |                         |
/// | `SMTP_PORT`     | yes      |                         |
/// | `SMTP_USER`     | no       |                         |
/// | `SMTP_PASSWORD` | no       |                         |
/// | `SMTP_FROM`     | no       | `noreply@stratus.local` |
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: required(&lookup, "SMTP_HOST")?,
            port: parse("SMTP_PORT", required(&lookup, "SMTP_PORT")?)?,
            user: optional(&lookup, "SMTP_USER"),
            password: optional(&lookup, "SMTP_PASSWORD"),
            from_address: optional(&lookup, "SMTP_FROM")
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// | Variable                   | Default |
/// |----------------------------|---------|
/// | `INGEST_INTERVAL_SECS`     | `30`    |
/// | `INGEST_FETCH_CONCURRENCY` | `8`     |
/// | `TRACKED_CITIES`           | empty   |
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub fetch_concurrency: usize,
    /// Cities registered at startup, comma separated in the environment.
    pub seed_cities: Vec<String>,
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let interval_secs: u64 = parse_or(&lookup, "INGEST_INTERVAL_SECS", 30)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "INGEST_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let seed_cities = optional(&lookup, "TRACKED_CITIES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            fetch_concurrency: parse_or(&lookup, "INGEST_FETCH_CONCURRENCY", 8usize)?.max(1),
            seed_cities,
        })
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// | Variable               | Default |
/// |------------------------|---------|
/// | `MAILER_WORKERS`       | `3`     |
/// | `MAILER_PREFETCH`      | `5`     |
/// | `MAILER_DEADLINE_SECS` | `15`    |
/// | `MAILER_GRACE_MS`      | `500`   |
/// | `MAILER_RETRY_BASE_MS` | `0`     |
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub prefetch: u16,
    pub deadline: Duration,
    pub grace: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            prefetch: 5,
            deadline: Duration::from_secs(15),
            grace: Duration::from_millis(500),
            retry: RetryPolicy::immediate(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let retry_base_ms: u64 = parse_or(&lookup, "MAILER_RETRY_BASE_MS", 0)?;

        Ok(Self {
            workers: parse_or(&lookup, "MAILER_WORKERS", defaults.workers)?.max(1),
            prefetch: parse_or(&lookup, "MAILER_PREFETCH", defaults.prefetch)?.max(1),
            deadline: Duration::from_secs(parse_or(
                &lookup,
                "MAILER_DEADLINE_SECS",
                defaults.deadline.as_secs(),
            )?),
            grace: Duration::from_millis(parse_or(&lookup, "MAILER_GRACE_MS", 500u64)?),
            retry: if retry_base_ms == 0 {
                RetryPolicy::immediate()
            } else {
                RetryPolicy::backoff(Duration::from_millis(retry_base_ms))
            },
        })
    }
}
