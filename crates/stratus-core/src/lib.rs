//! stratus-core
//!
//! Building blocks for the stratus weather pipeline.
//!
//! # Modules
//! - **domain**: tracked cities, weather samples, notification tasks
//! - **ports**: collaborator traits (broker, analytics store, weather API, mailer, clock)
//! - **impls**: RabbitMQ / ClickHouse / OpenWeather / SMTP adapters and in-memory doubles
//! - **app**: registry, batch ingestion, scheduler, publisher, worker pool, shutdown
//! - **config**: environment-driven configuration per component
//! - **error**: component error types
//! - **observability**: tracing setup and queue counters

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
