//! Task publisher: hands notification tasks to the broker.

use std::sync::Arc;

use crate::domain::{MessageId, NotificationTask};
use crate::error::PublishError;
use crate::ports::{Broker, Clock, IdGenerator, OutboundMessage, QueueError, Topology};

const JSON: &str = "application/json";

/// Publishes onto the email topology. No retry: a failure goes straight back
/// to the caller.
pub struct TaskPublisher {
    broker: Option<Arc<dyn Broker>>,
    topology: Topology,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskPublisher {
    pub fn new(broker: Arc<dyn Broker>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            broker: Some(broker),
            topology: Topology::email(),
            clock,
            ids,
        }
    }

    /// A publisher with no broker channel. Every publish fails with
    /// [`QueueError::NotConnected`].
    pub fn detached(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            broker: None,
            topology: Topology::email(),
            clock,
            ids,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_some()
    }

    pub async fn publish(&self, task: &NotificationTask) -> Result<MessageId, PublishError> {
        let Some(broker) = &self.broker else {
            tracing::warn!(to = %task.recipient, "publish attempted without a broker channel");
            return Err(QueueError::NotConnected.into());
        };

        let message = OutboundMessage {
            message_id: self.ids.generate_message_id(),
            exchange: self.topology.exchange.clone(),
            routing_key: self.topology.routing_key.clone(),
            content_type: JSON,
            body: task.to_bytes()?,
            persistent: true,
            timestamp: self.clock.now(),
        };
        let message_id = message.message_id;

        broker.publish(message).await.inspect_err(|e| {
            tracing::error!(to = %task.recipient, error = %e, "publishing task failed");
        })?;
        tracing::info!(%message_id, to = %task.recipient, "task published");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBroker;
    use crate::ports::{EMAIL_EXCHANGE, EMAIL_QUEUE, EMAIL_ROUTING_KEY, FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap())
    }

    fn publisher(broker: &InMemoryBroker) -> TaskPublisher {
        TaskPublisher::new(
            Arc::new(broker.clone()),
            Arc::new(clock()),
            Arc::new(UlidGenerator::new(clock())),
        )
    }

    #[tokio::test]
    async fn publishes_persistent_json_on_email_route() {
        let broker = InMemoryBroker::new();
        broker.declare(&Topology::email()).await.unwrap();
        let task =
            NotificationTask::new("a@example.com", "Hi", "<p>hi</p>").with_kind("welcome");

        let id = publisher(&broker).publish(&task).await.unwrap();

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        let message = &published[0];
        assert_eq!(message.message_id, id);
        assert_eq!(message.exchange, EMAIL_EXCHANGE);
        assert_eq!(message.routing_key, EMAIL_ROUTING_KEY);
        assert_eq!(message.content_type, "application/json");
        assert!(message.persistent);
        assert_eq!(message.timestamp, clock().now());
        assert_eq!(NotificationTask::from_bytes(&message.body).unwrap(), task);
        assert_eq!(broker.counts(EMAIL_QUEUE).await.ready, 1);
    }

    #[tokio::test]
    async fn detached_publisher_reports_not_connected() {
        let publisher = TaskPublisher::detached(
            Arc::new(clock()),
            Arc::new(UlidGenerator::new(clock())),
        );
        let task = NotificationTask::new("a@example.com", "Hi", "body");

        let err = publisher.publish(&task).await.unwrap_err();
        assert!(matches!(err, PublishError::Queue(QueueError::NotConnected)));
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn undeclared_topology_is_surfaced() {
        let broker = InMemoryBroker::new();
        let task = NotificationTask::new("a@example.com", "Hi", "body");

        let err = publisher(&broker).publish(&task).await.unwrap_err();
        let unroutable = matches!(err, PublishError::Queue(QueueError::Unroutable(_)));
        assert!(unroutable, "unexpected error: {err}");
    }
}
