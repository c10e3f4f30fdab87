//! City registry: the in-memory mirror of the persisted `cities` table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::domain::TrackedEntity;
use crate::error::RegistrationError;
use crate::ports::{AnalyticsStore, Geocoder, StoreError};

/// Tracked cities keyed by name.
///
/// Reads take a shared lock. Registrations are serialized among themselves so
/// that "is it known? resolve, persist, merge" runs as one step; a reader sees
/// either none or all of a registration's new entities.
pub struct CityRegistry {
    entities: RwLock<HashMap<String, TrackedEntity>>,
    registering: Mutex<()>,
    geocoder: Arc<dyn Geocoder>,
    store: Arc<dyn AnalyticsStore>,
}

impl CityRegistry {
    pub fn new(geocoder: Arc<dyn Geocoder>, store: Arc<dyn AnalyticsStore>) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            registering: Mutex::new(()),
            geocoder,
            store,
        }
    }

    /// Fill the mapping from the store. Returns how many entities were added.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let persisted = self.store.load_entities().await?;
        let mut entities = self.entities.write().await;
        let before = entities.len();
        for entity in persisted {
            entities.entry(entity.name.clone()).or_insert(entity);
        }
        let added = entities.len() - before;
        tracing::info!(added, total = entities.len(), "city registry loaded");
        Ok(added)
    }

    /// Register `names`, returning the entities that were newly added.
    ///
    /// Known names are skipped. Unknown names are geocoded, persisted in one
    /// bulk write, and only then merged. Any lookup or write failure aborts the
    /// whole call with nothing persisted and nothing merged.
    pub async fn register<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<TrackedEntity>, RegistrationError> {
        let _guard = self.registering.lock().await;

        let unknown: Vec<&str> = {
            let entities = self.entities.read().await;
            let mut seen = HashSet::new();
            names
                .iter()
                .map(|name| name.as_ref())
                .filter(|name| !entities.contains_key(*name))
                .filter(|name| seen.insert(*name))
                .collect()
        };

        if unknown.is_empty() {
            tracing::debug!(requested = names.len(), "all cities already tracked");
            return Ok(Vec::new());
        }

        let mut resolved = Vec::with_capacity(unknown.len());
        for name in unknown {
            let entity = self.geocoder.resolve(name).await.map_err(|source| {
                tracing::warn!(name, error = %source, "city lookup failed");
                RegistrationError::Lookup {
                    name: name.to_string(),
                    source,
                }
            })?;
            resolved.push(entity);
        }

        if let Err(e) = self.store.insert_entities(&resolved).await {
            tracing::error!(count = resolved.len(), error = %e, "persisting cities failed");
            return Err(e.into());
        }

        let mut entities = self.entities.write().await;
        for entity in &resolved {
            entities.insert(entity.name.clone(), entity.clone());
        }
        tracing::info!(
            added = resolved.len(),
            total = entities.len(),
            "cities registered"
        );
        Ok(resolved)
    }

    /// All tracked entities, ordered by name.
    pub async fn snapshot(&self) -> Vec<TrackedEntity> {
        let mut all: Vec<TrackedEntity> = self.entities.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn get(&self, name: &str) -> Option<TrackedEntity> {
        self.entities.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entities.read().await.contains_key(name)
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{Behavior, InMemoryAnalyticsStore, ScriptedGeocoder};

    fn geocoder() -> ScriptedGeocoder {
        ScriptedGeocoder::new()
            .with_place("Oslo", 59.9, 10.7)
            .with_place("Lima", -12.0, -77.0)
            .with_place("Pune", 18.5, 73.8)
    }

    fn registry(geocoder: &ScriptedGeocoder, store: &InMemoryAnalyticsStore) -> CityRegistry {
        CityRegistry::new(Arc::new(geocoder.clone()), Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn load_mirrors_persisted_entities() {
        let store = InMemoryAnalyticsStore::with_entities(vec![
            TrackedEntity::new("Oslo", 59.9, 10.7),
            TrackedEntity::new("Lima", -12.0, -77.0),
        ]);
        let registry = registry(&geocoder(), &store);

        assert_eq!(registry.load().await.unwrap(), 2);
        assert_eq!(registry.len().await, 2);
        assert!(registry.contains("Lima").await);
        let lima = registry.get("Lima").await.unwrap();
        assert_eq!((lima.latitude, lima.longitude), (-12.0, -77.0));
        assert!(registry.get("Pune").await.is_none());
    }

    #[tokio::test]
    async fn known_names_are_not_resolved_again() {
        let store =
            InMemoryAnalyticsStore::with_entities(vec![TrackedEntity::new("Oslo", 59.9, 10.7)]);
        let geocoder = geocoder();
        let registry = registry(&geocoder, &store);
        registry.load().await.unwrap();

        let added = registry.register(&["Oslo", "Lima"]).await.unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "Lima");
        assert_eq!(geocoder.calls_for("Oslo"), 0);
        assert_eq!(store.entity_batches().await, vec![1]);
    }

    #[tokio::test]
    async fn all_known_skips_the_write() {
        let store = InMemoryAnalyticsStore::new();
        let registry = registry(&geocoder(), &store);
        registry.register(&["Oslo"]).await.unwrap();

        let added = registry.register(&["Oslo"]).await.unwrap();

        assert!(added.is_empty());
        assert_eq!(store.entity_batches().await, vec![1]);
    }

    #[tokio::test]
    async fn duplicate_names_are_resolved_once() {
        let store = InMemoryAnalyticsStore::new();
        let geocoder = geocoder();
        let registry = registry(&geocoder, &store);

        let added = registry.register(&["Pune", "Pune"]).await.unwrap();

        assert_eq!(added.len(), 1);
        assert_eq!(geocoder.calls_for("Pune"), 1);
        assert_eq!(store.entities().await.len(), 1);
    }

    #[tokio::test]
    async fn lookup_failure_aborts_everything() {
        let store = InMemoryAnalyticsStore::new();
        let geocoder = geocoder();
        geocoder.script("Lima", [Behavior::Fail]);
        let registry = registry(&geocoder, &store);

        let err = registry.register(&["Oslo", "Lima"]).await.unwrap_err();

        assert!(matches!(
            err,
            RegistrationError::Lookup { ref name, .. } if name == "Lima"
        ));
        assert!(registry.is_empty().await);
        assert!(store.entities().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_place_aborts_everything() {
        let store = InMemoryAnalyticsStore::new();
        let registry = registry(&geocoder(), &store);

        assert!(registry.register(&["Oslo", "Atlantis"]).await.is_err());
        assert!(registry.is_empty().await);
        assert!(store.entity_batches().await.is_empty());
    }

    #[tokio::test]
    async fn store_failure_leaves_mapping_untouched() {
        let store = InMemoryAnalyticsStore::new();
        store.set_fail_writes(true);
        let registry = registry(&geocoder(), &store);

        let err = registry.register(&["Oslo"]).await.unwrap_err();

        assert!(matches!(err, RegistrationError::Store(_)));
        assert!(!registry.contains("Oslo").await);
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_name() {
        let registry = registry(&geocoder(), &InMemoryAnalyticsStore::new());
        registry.register(&["Pune", "Lima", "Oslo"]).await.unwrap();

        let names: Vec<_> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["Lima", "Oslo", "Pune"]);
    }
}
