//! Tracked entity: a city whose weather is sampled on every tick.

use serde::{Deserialize, Serialize};

/// A city registered for sampling.
///
/// Immutable once stored. The name is the unique key in both the persisted
/// `cities` table and the in-memory registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub name: String,
    pub latitude: f32,
    pub longitude: f32,
}

impl TrackedEntity {
    pub fn new(name: impl Into<String>, latitude: f32, longitude: f32) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }
}
