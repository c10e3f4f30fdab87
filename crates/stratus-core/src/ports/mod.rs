//! Ports - collaborator interfaces.
//!
//! Each trait hides one external system (broker, analytics database, weather
//! API, SMTP relay) so the pipeline can run against in-memory doubles.

pub mod analytics_store;
pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod mailer;
pub mod weather_api;

pub use self::analytics_store::{AnalyticsStore, StoreError};
pub use self::broker::{
    Broker, Consumer, Delivery, EMAIL_EXCHANGE, EMAIL_QUEUE, EMAIL_ROUTING_KEY, OutboundMessage,
    QueueError, Topology,
};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::mailer::{MailError, Mailer};
pub use self::weather_api::{FetchError, Geocoder, WeatherApi};
