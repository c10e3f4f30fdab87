//! In-memory analytics store for tests and local runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{TrackedEntity, WeatherSample};
use crate::ports::{AnalyticsStore, StoreError};

#[derive(Default)]
struct StoreState {
    entities: Vec<TrackedEntity>,
    samples: Vec<WeatherSample>,
    /// Row count of every successful sample insert, in order.
    sample_batches: Vec<usize>,
    /// Row count of every successful entity insert, in order.
    entity_batches: Vec<usize>,
}

/// Keeps both tables in memory. Each `insert_*` call is one batch.
#[derive(Clone, Default)]
pub struct InMemoryAnalyticsStore {
    state: Arc<Mutex<StoreState>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryAnalyticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `entities` already persisted.
    pub fn with_entities(entities: Vec<TrackedEntity>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                entities,
                ..StoreState::default()
            })),
            fail_writes: Arc::default(),
        }
    }

    /// Make every following insert fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn entities(&self) -> Vec<TrackedEntity> {
        self.state.lock().await.entities.clone()
    }

    pub async fn samples(&self) -> Vec<WeatherSample> {
        self.state.lock().await.samples.clone()
    }

    pub async fn sample_batches(&self) -> Vec<usize> {
        self.state.lock().await.sample_batches.clone()
    }

    pub async fn entity_batches(&self) -> Vec<usize> {
        self.state.lock().await.entity_batches.clone()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalyticsStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_entities(&self) -> Result<Vec<TrackedEntity>, StoreError> {
        Ok(self.entities().await)
    }

    async fn insert_entities(&self, entities: &[TrackedEntity]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        state.entities.extend_from_slice(entities);
        state.entity_batches.push(entities.len());
        Ok(())
    }

    async fn insert_samples(&self, samples: &[WeatherSample]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        state.samples.extend_from_slice(samples);
        state.sample_batches.push(samples.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(name: &str) -> WeatherSample {
        WeatherSample {
            timestamp: Utc::now(),
            entity_name: name.to_string(),
            temperature: 10.0,
            apparent_temperature: 9.0,
            pressure: 1000,
            wind_speed: 1.0,
            wind_direction_deg: 0,
        }
    }

    #[tokio::test]
    async fn each_insert_is_one_batch() {
        let store = InMemoryAnalyticsStore::new();
        store.insert_samples(&[sample("a"), sample("b")]).await.unwrap();
        store.insert_samples(&[sample("c")]).await.unwrap();

        assert_eq!(store.sample_batches().await, vec![2, 1]);
        assert_eq!(store.samples().await.len(), 3);
    }

    #[tokio::test]
    async fn failed_writes_leave_no_rows() {
        let store = InMemoryAnalyticsStore::new();
        store.set_fail_writes(true);

        let err = store
            .insert_entities(&[TrackedEntity::new("Oslo", 59.9, 10.7)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.entities().await.is_empty());
        assert!(store.entity_batches().await.is_empty());
    }
}
