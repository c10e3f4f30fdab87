//! App - pipeline components built on the ports.
//!
//! # Ingestion side
//! - **CityRegistry**: tracked cities, loaded at startup and extended by registration
//! - **BatchWriter**: one all-or-nothing ingestion run
//! - **IngestionScheduler**: fixed-interval, non-overlapping runs
//!
//! # Notification side
//! - **TaskPublisher**: tasks onto the durable queue
//! - **DeliveryExecutor**: one send raced against a deadline
//! - **WorkerPool**: consumers that ack on success and requeue on failure
//! - **ShutdownCoordinator**: signal-driven drain with a grace period

pub mod executor;
pub mod ingestion;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod worker_pool;

pub use self::executor::DeliveryExecutor;
pub use self::ingestion::BatchWriter;
pub use self::publisher::TaskPublisher;
pub use self::registry::CityRegistry;
pub use self::retry::RetryPolicy;
pub use self::scheduler::{IngestionScheduler, SchedulerHandle};
pub use self::shutdown::{DrainOutcome, ShutdownCoordinator, shutdown_signal};
pub use self::worker_pool::WorkerPool;
