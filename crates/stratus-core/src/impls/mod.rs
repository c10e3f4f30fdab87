//! Impls - port implementations.
//!
//! # Production
//! - **AmqpBroker**: RabbitMQ via `lapin`
//! - **ClickHouseStore**: ClickHouse HTTP interface via `reqwest`
//! - **OpenWeatherClient**: weather + geocoding via `reqwest`
//! - **SmtpMailer**: SMTP via `lettre`
//!
//! # Development / tests
//! - **InMemoryBroker**, **InMemoryAnalyticsStore**
//! - **ScriptedWeatherApi**, **ScriptedGeocoder**, **RecordingMailer**: doubles
//!   whose per-name behaviour is set up front

pub mod amqp;
pub mod clickhouse;
pub mod inmem_broker;
pub mod inmem_store;
pub mod openweather;
pub mod scripted;
pub mod smtp;

pub use self::amqp::AmqpBroker;
pub use self::clickhouse::ClickHouseStore;
pub use self::inmem_broker::InMemoryBroker;
pub use self::inmem_store::InMemoryAnalyticsStore;
pub use self::openweather::OpenWeatherClient;
pub use self::scripted::{Behavior, RecordingMailer, ScriptedGeocoder, ScriptedWeatherApi};
pub use self::smtp::SmtpMailer;
