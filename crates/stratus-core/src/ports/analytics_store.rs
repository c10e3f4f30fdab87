//! AnalyticsStore port - append-only の分析 DB（ClickHouse または InMemory）
//!
//! Holds two tables:
//! - `weather_metrics`: samples, partitioned by month, ordered by timestamp
//! - `cities`: tracked entities keyed by name

use async_trait::async_trait;

use crate::domain::{TrackedEntity, WeatherSample};

/// Failure reading from or writing to the analytics store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("analytics store unreachable: {0}")]
    Unavailable(String),

    #[error("query rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),
}

/// AnalyticsStore persists entities and samples.
///
/// # Contract
/// - `insert_*` is one bulk write: every row lands or none does
/// - rows are only ever appended
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Create both tables if absent. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Read every persisted entity (used once at startup).
    async fn load_entities(&self) -> Result<Vec<TrackedEntity>, StoreError>;

    async fn insert_entities(&self, entities: &[TrackedEntity]) -> Result<(), StoreError>;

    async fn insert_samples(&self, samples: &[WeatherSample]) -> Result<(), StoreError>;
}
