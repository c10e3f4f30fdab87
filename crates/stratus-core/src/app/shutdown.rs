//! Shutdown coordinator: stop intake on a signal, then give workers a grace
//! window.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::app::worker_pool::WorkerPool;
use crate::ports::Broker;

/// Resolves on SIGINT (Ctrl-C) or, on unix, SIGTERM.
///
/// If a handler cannot be installed that branch never resolves; the other
/// one still works.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every worker exited within the grace period.
    Drained,
    /// The grace period ran out first.
    GraceExpired,
}

pub struct ShutdownCoordinator {
    broker: Arc<dyn Broker>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(broker: Arc<dyn Broker>, grace: Duration) -> Self {
        Self { broker, grace }
    }

    /// Wait for `signal`, then drain `pool`.
    pub async fn run_until<F>(&self, signal: F, pool: WorkerPool) -> DrainOutcome
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.drain(pool).await
    }

    /// Stop intake and wait up to the grace period for workers to exit.
    ///
    /// Closing the consumer channel and the connection hands every unsettled
    /// delivery back to the broker, so work cut short here is redelivered.
    pub async fn drain(&self, pool: WorkerPool) -> DrainOutcome {
        pool.request_shutdown();

        if let Err(e) = pool.consumer().close().await {
            tracing::warn!(error = %e, "closing consumer channel failed");
        }
        if let Err(e) = self.broker.close().await {
            tracing::warn!(error = %e, "closing broker connection failed");
        }

        match tokio::time::timeout(self.grace, pool.join()).await {
            Ok(()) => {
                tracing::info!("all workers stopped");
                DrainOutcome::Drained
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    "grace period expired"
                );
                DrainOutcome::GraceExpired
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::executor::DeliveryExecutor;
    use crate::config::WorkerPoolConfig;
    use crate::domain::NotificationTask;
    use crate::impls::{Behavior, InMemoryBroker, RecordingMailer};
    use crate::ports::{EMAIL_QUEUE, OutboundMessage, Topology};

    async fn pool(broker: &InMemoryBroker, mailer: &RecordingMailer) -> WorkerPool {
        let executor = Arc::new(DeliveryExecutor::new(Arc::new(mailer.clone())));
        WorkerPool::start(broker, executor, &WorkerPoolConfig::default())
            .await
            .unwrap()
    }

    fn coordinator(broker: &InMemoryBroker) -> ShutdownCoordinator {
        ShutdownCoordinator::new(Arc::new(broker.clone()), Duration::from_millis(500))
    }

    async fn publish(broker: &InMemoryBroker, recipient: &str) {
        let topology = Topology::email();
        let body = NotificationTask::new(recipient, "Hi", "body")
            .to_bytes()
            .unwrap();
        broker
            .publish(OutboundMessage {
                message_id: ulid::Ulid::new().into(),
                exchange: topology.exchange,
                routing_key: topology.routing_key,
                content_type: "application/json",
                body,
                persistent: true,
                timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn idle_pool_drains_immediately() {
        let broker = InMemoryBroker::new();
        let pool = pool(&broker, &RecordingMailer::new()).await;
        let coordinator = coordinator(&broker);

        let outcome = coordinator.run_until(async {}, pool).await;

        assert_eq!(outcome, DrainOutcome::Drained);
        assert!(broker.is_closed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_delivery_returns_to_the_queue() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        mailer.set_default(Behavior::Delay(Duration::from_secs(10)));
        let pool = pool(&broker, &mailer).await;

        publish(&broker, "slow@example.com").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.counts(EMAIL_QUEUE).await.unacked, 1);

        let outcome = coordinator(&broker).drain(pool).await;

        assert_eq!(outcome, DrainOutcome::GraceExpired);
        let counts = broker.counts(EMAIL_QUEUE).await;
        assert_eq!(counts.unacked, 0);
        assert_eq!(counts.ready, 1);
        assert_eq!(counts.acked, 0);
    }
}
