use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::executor::DeliveryExecutor;
use crate::app::retry::RetryPolicy;
use crate::config::WorkerPoolConfig;
use crate::domain::NotificationTask;
use crate::ports::{Broker, Consumer, Delivery, QueueError, Topology};

/// What every worker needs besides the consumer and executor.
#[derive(Debug, Clone)]
struct WorkerSettings {
    deadline: Duration,
    retry: RetryPolicy,
}

/// Worker pool handle.
/// - 全ワーカーが 1 本の consuming channel を共有する
/// - `request_shutdown()` で受付停止（実行中の delivery はキャンセルしない）
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    consumer: Arc<dyn Consumer>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Declare the email topology, open a consumer with the configured
    /// prefetch, and spawn the workers.
    pub async fn start(
        broker: &dyn Broker,
        executor: Arc<DeliveryExecutor>,
        config: &WorkerPoolConfig,
    ) -> Result<Self, QueueError> {
        let topology = Topology::email();
        broker.declare(&topology).await?;
        let consumer = broker.consume(&topology.queue, config.prefetch).await?;
        Ok(Self::spawn(consumer, executor, config))
    }

    /// Spawn `config.workers` workers on an existing consumer.
    pub fn spawn(
        consumer: Arc<dyn Consumer>,
        executor: Arc<DeliveryExecutor>,
        config: &WorkerPoolConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = Arc::new(WorkerSettings {
            deadline: config.deadline,
            retry: config.retry.clone(),
        });

        let mut joins = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let consumer = Arc::clone(&consumer);
            let executor = Arc::clone(&executor);
            let settings = Arc::clone(&settings);
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, consumer, executor, settings, &mut rx).await;
            }));
        }
        tracing::info!(workers = config.workers, "worker pool started");

        Self {
            shutdown_tx,
            consumer,
            joins,
        }
    }

    /// The consuming channel the workers pull from.
    pub fn consumer(&self) -> Arc<dyn Consumer> {
        Arc::clone(&self.consumer)
    }

    /// Stop taking new deliveries.
    pub fn request_shutdown(&self) {
        // receiver が全部 drop 済みでもよい
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}

async fn worker_loop(
    worker_id: usize,
    consumer: Arc<dyn Consumer>,
    executor: Arc<DeliveryExecutor>,
    settings: Arc<WorkerSettings>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // next_delivery は無期限に待つことがあるので select で shutdown と競合させる
        let delivery = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            delivery = consumer.next_delivery() => delivery,
        };

        let Some(delivery) = delivery else {
            tracing::info!(worker_id, "consumer channel closed");
            break;
        };

        handle_delivery(worker_id, delivery, &executor, &settings).await;
    }
    tracing::debug!(worker_id, "worker stopped");
}

async fn handle_delivery(
    worker_id: usize,
    delivery: Box<dyn Delivery>,
    executor: &DeliveryExecutor,
    settings: &WorkerSettings,
) {
    let delivery_count = delivery.delivery_count();

    let task = match NotificationTask::from_bytes(delivery.body()) {
        Ok(task) => task,
        Err(e) => {
            // パースできない body は retry しても直らない
            tracing::warn!(worker_id, error = %e, "malformed task payload, acking");
            if let Err(e) = delivery.ack().await {
                tracing::error!(worker_id, error = %e, "ack failed");
            }
            return;
        }
    };
    let recipient = task.recipient.clone();

    match executor.deliver(task, settings.deadline).await {
        Ok(()) => {
            if let Err(e) = delivery.ack().await {
                tracing::error!(worker_id, to = %recipient, error = %e, "ack failed");
            }
        }
        Err(err) => {
            let delay = settings.retry.next_delay(delivery_count);
            tracing::warn!(
                worker_id,
                to = %recipient,
                delivery_count,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "delivery failed, requeueing"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = delivery.nack(true).await {
                tracing::error!(worker_id, to = %recipient, error = %e, "nack failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::impls::{Behavior, InMemoryBroker, RecordingMailer};
    use crate::observability::QueueCounts;
    use crate::ports::{EMAIL_EXCHANGE, EMAIL_QUEUE, EMAIL_ROUTING_KEY, OutboundMessage};
    use chrono::Utc;
    use ulid::Ulid;

    fn raw_message(body: Vec<u8>) -> OutboundMessage {
        OutboundMessage {
            message_id: MessageId::from(Ulid::new()),
            exchange: EMAIL_EXCHANGE.into(),
            routing_key: EMAIL_ROUTING_KEY.into(),
            content_type: "application/json",
            body,
            persistent: true,
            timestamp: Utc::now(),
        }
    }

    async fn publish_task(broker: &InMemoryBroker, recipient: &str) {
        let task = NotificationTask::new(recipient, "Hi", "body");
        broker
            .publish(raw_message(task.to_bytes().unwrap()))
            .await
            .unwrap();
    }

    async fn wait_for(broker: &InMemoryBroker, done: impl Fn(&QueueCounts) -> bool) -> QueueCounts {
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                let counts = broker.counts(EMAIL_QUEUE).await;
                if done(&counts) {
                    return counts;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue never reached the expected state")
    }

    async fn start(
        broker: &InMemoryBroker,
        mailer: &RecordingMailer,
        config: WorkerPoolConfig,
    ) -> WorkerPool {
        let executor = Arc::new(DeliveryExecutor::new(Arc::new(mailer.clone())));
        WorkerPool::start(broker, executor, &config).await.unwrap()
    }

    #[tokio::test]
    async fn success_is_acked_once() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        let pool = start(&broker, &mailer, WorkerPoolConfig::default()).await;

        publish_task(&broker, "a@example.com").await;
        let counts = wait_for(&broker, |c| c.acked == 1).await;
        pool.shutdown_and_join().await;

        assert_eq!(counts.requeued, 0);
        assert_eq!(mailer.attempts(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_acked_without_sending() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        let pool = start(&broker, &mailer, WorkerPoolConfig::default()).await;

        broker.publish(raw_message(b"{not json".to_vec())).await.unwrap();
        let counts = wait_for(&broker, |c| c.acked == 1).await;
        pool.shutdown_and_join().await;

        assert_eq!(counts.requeued, 0);
        assert_eq!(mailer.attempts(), 0);
    }

    #[tokio::test]
    async fn failure_is_requeued_and_retried() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        mailer.script("a@example.com", [Behavior::Fail]);
        let pool = start(&broker, &mailer, WorkerPoolConfig::default()).await;

        publish_task(&broker, "a@example.com").await;
        let counts = wait_for(&broker, |c| c.acked == 1).await;
        pool.shutdown_and_join().await;

        assert_eq!(counts.requeued, 1);
        assert_eq!(mailer.attempts_for("a@example.com"), 2);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_requeued() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        let slow = Behavior::Delay(Duration::from_secs(20));
        mailer.script("slow@example.com", [slow]);
        let pool = start(&broker, &mailer, WorkerPoolConfig::default()).await;

        publish_task(&broker, "slow@example.com").await;
        let counts = wait_for(&broker, |c| c.acked == 1).await;
        pool.shutdown_and_join().await;

        assert_eq!(counts.requeued, 1);
        assert_eq!(mailer.attempts_for("slow@example.com"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_the_requeue() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        mailer.script("a@example.com", [Behavior::Fail]);
        let config = WorkerPoolConfig {
            retry: RetryPolicy::backoff(Duration::from_secs(5)),
            ..WorkerPoolConfig::default()
        };
        let pool = start(&broker, &mailer, config).await;

        publish_task(&broker, "a@example.com").await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        let counts = broker.counts(EMAIL_QUEUE).await;
        assert_eq!(counts.requeued, 0);
        assert_eq!(counts.unacked, 1);

        wait_for(&broker, |c| c.acked == 1).await;
        pool.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn workers_exit_when_consumer_closes() {
        let broker = InMemoryBroker::new();
        let mailer = RecordingMailer::new();
        let pool = start(&broker, &mailer, WorkerPoolConfig::default()).await;

        pool.consumer().close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool.join())
            .await
            .expect("workers did not exit");
    }
}
