//! Domain model: tracked cities, weather samples, notification tasks.

pub mod entity;
pub mod ids;
pub mod sample;
pub mod task;

pub use entity::TrackedEntity;
pub use ids::MessageId;
pub use sample::WeatherSample;
pub use task::NotificationTask;
