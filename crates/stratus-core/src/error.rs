//! Errors raised by the pipeline components.
//!
//! Port-level failures (`FetchError`, `StoreError`, `QueueError`, `MailError`)
//! live next to their traits; the enums here wrap them with the component
//! that saw them.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::ports::{FetchError, MailError, QueueError, StoreError};

/// A batch ingestion run failed. Nothing was written.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetching weather for {entity} failed: {source}")]
    Fetch {
        entity: String,
        #[source]
        source: FetchError,
    },

    #[error("writing samples failed: {0}")]
    Store(#[from] StoreError),
}

/// A registration call failed. Nothing was persisted or merged.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("resolving {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("persisting entities failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("encoding task failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One delivery attempt failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Mail(#[from] MailError),

    #[error("delivery task aborted: {0}")]
    Aborted(String),
}

impl DeliveryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeliveryError::Timeout(_))
    }
}

/// Top-level error for the binaries.
#[derive(Debug, Error)]
pub enum StratusError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("broker: {0}")]
    Queue(#[from] QueueError),

    #[error("analytics store: {0}")]
    Store(#[from] StoreError),

    #[error("weather api: {0}")]
    Fetch(#[from] FetchError),

    #[error("mailer: {0}")]
    Mail(#[from] MailError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("{0}")]
    Other(String),
}
