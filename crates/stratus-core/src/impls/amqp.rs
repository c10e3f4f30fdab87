//! RabbitMQ broker over AMQP 0-9-1, via `lapin`.
//!
//! One connection per process. Publishing shares a single channel; each
//! [`Broker::consume`] call opens its own channel with its own prefetch limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::Mutex;

use crate::ports::{Broker, Consumer, Delivery, OutboundMessage, QueueError, Topology};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT: u8 = 2;

/// Header quorum queues set on redelivered messages.
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

const REPLY_SUCCESS: u16 = 200;

impl From<lapin::Error> for QueueError {
    fn from(e: lapin::Error) -> Self {
        match e {
            lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
                QueueError::ChannelClosed
            }
            other => QueueError::Broker(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

pub struct AmqpBroker {
    connection: Connection,
    publish_channel: Channel,
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let publish_channel = connection.create_channel().await?;
        tracing::info!("connected to broker");
        Ok(Self {
            connection,
            publish_channel,
        })
    }

    /// Dial up to `attempts` times, sleeping `delay` between failures.
    /// The broker usually comes up after the services that depend on it.
    pub async fn connect_with_retry(
        url: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self, QueueError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::connect(url).await {
                Ok(broker) => return Ok(broker),
                Err(e) if attempt < attempts => {
                    tracing::warn!(attempt, attempts, error = %e, "broker not reachable, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts, error = %e, "giving up on broker");
                    return Err(e);
                }
            }
        }
    }
}

fn properties_for(message: &OutboundMessage) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(message.content_type))
        .with_message_id(ShortString::from(message.message_id.to_string()))
        .with_timestamp(message.timestamp.timestamp().max(0) as u64);
    if message.persistent {
        props = props.with_delivery_mode(PERSISTENT);
    }
    props
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare(&self, topology: &Topology) -> Result<(), QueueError> {
        let channel = &self.publish_channel;
        channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                &topology.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::debug!(
            exchange = %topology.exchange,
            queue = %topology.queue,
            routing_key = %topology.routing_key,
            "topology declared"
        );
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), QueueError> {
        if !self.publish_channel.status().connected() {
            return Err(QueueError::NotConnected);
        }
        let props = properties_for(&message);
        self.publish_channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                props,
            )
            .await?
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Arc<dyn Consumer>, QueueError> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        let stream = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        tracing::info!(queue, prefetch, "consumer started");
        Ok(Arc::new(AmqpConsumer {
            channel,
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.publish_channel.status().connected() {
            self.publish_channel.close(REPLY_SUCCESS, "shutdown").await?;
        }
        if self.connection.status().connected() {
            self.connection.close(REPLY_SUCCESS, "shutdown").await?;
        }
        tracing::info!("broker connection closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

struct AmqpConsumer {
    channel: Channel,
    stream: Mutex<lapin::Consumer>,
    closed: AtomicBool,
}

#[async_trait]
impl Consumer for AmqpConsumer {
    async fn next_delivery(&self) -> Option<Box<dyn Delivery>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let next = self.stream.lock().await.next().await;
            match next {
                Some(Ok(delivery)) => return Some(Box::new(AmqpDelivery { inner: delivery })),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "consumer stream error");
                    if !self.channel.status().connected() {
                        return None;
                    }
                }
                None => return None,
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "shutdown").await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

struct AmqpDelivery {
    inner: lapin::message::Delivery,
}

fn header_count(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongUInt(n) => Some(*n),
        AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
        _ => None,
    }
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    fn redelivered(&self) -> bool {
        self.inner.redelivered
    }

    fn delivery_count(&self) -> u32 {
        // The header counts previous deliveries.
        let from_header = self
            .inner
            .properties
            .headers()
            .as_ref()
            .and_then(|h| {
                h.inner()
                    .iter()
                    .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)
                    .and_then(|(_, value)| header_count(value))
            });
        match from_header {
            Some(previous) => previous.saturating_add(1),
            None if self.inner.redelivered => 2,
            None => 1,
        }
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.inner.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        self.inner
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn message(persistent: bool) -> OutboundMessage {
        OutboundMessage {
            message_id: MessageId::from(Ulid::nil()),
            exchange: "email_exchange".into(),
            routing_key: "send_email".into(),
            content_type: "application/json",
            body: b"{}".to_vec(),
            persistent,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn persistent_messages_get_delivery_mode_two() {
        let props = properties_for(&message(true));
        assert_eq!(props.delivery_mode(), &Some(PERSISTENT));
        assert_eq!(
            props.content_type().as_ref().map(|c| c.as_str()),
            Some("application/json")
        );
        assert_eq!(props.timestamp(), &Some(1_704_067_200));
    }

    #[test]
    fn transient_messages_leave_delivery_mode_unset() {
        let props = properties_for(&message(false));
        assert_eq!(props.delivery_mode(), &None);
    }

    #[test]
    fn header_count_accepts_integer_variants() {
        assert_eq!(header_count(&AMQPValue::LongLongInt(3)), Some(3));
        assert_eq!(header_count(&AMQPValue::LongInt(-1)), None);
        assert_eq!(header_count(&AMQPValue::Boolean(true)), None);
    }
}
