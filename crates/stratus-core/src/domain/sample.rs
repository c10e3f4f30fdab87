//! Weather sample: one observation of one entity, appended per tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `weather_metrics`.
///
/// `entity_name` is a denormalized reference to [`TrackedEntity::name`]; no
/// foreign key is enforced by the analytics store.
///
/// [`TrackedEntity::name`]: super::TrackedEntity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub timestamp: DateTime<Utc>,
    pub entity_name: String,
    pub temperature: f32,
    pub apparent_temperature: f32,
    pub pressure: i16,
    pub wind_speed: f32,
    pub wind_direction_deg: i16,
}
