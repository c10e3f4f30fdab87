//! WeatherApi / Geocoder ports - the third-party weather service.
//!
//! Both are plain request/response collaborators; no retry or caching
//! happens behind them.

use async_trait::async_trait;

use crate::domain::{TrackedEntity, WeatherSample};

/// Failure talking to the weather or geocoding API.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("non-200 response from API: {0}")]
    Status(u16),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("no results for city {0}")]
    NotFound(String),
}

/// Fetches the current observation for one entity.
#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn current(&self, entity: &TrackedEntity) -> Result<WeatherSample, FetchError>;
}

/// Resolves a city name to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<TrackedEntity, FetchError>;
}
