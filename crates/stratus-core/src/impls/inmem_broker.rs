//! In-memory broker with ack/nack semantics.
//!
//! Behaves like a single durable broker node for tests and local runs:
//! - direct exchanges route by exact routing key
//! - a consumer never holds more than `prefetch` unsettled deliveries
//! - closing a consumer (or the broker) puts its unsettled deliveries back at
//!   the head of their queue, flagged as redelivered

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::observability::QueueCounts;
use crate::ports::{Broker, Consumer, Delivery, OutboundMessage, QueueError, Topology};

/// A message sitting in a queue.
#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    /// Deliveries so far. Incremented each time the message is handed out.
    delivery_count: u32,
}

/// A delivered, not yet settled message.
struct Unacked {
    queue: String,
    consumer_id: u64,
    message: StoredMessage,
}

struct BrokerState {
    /// exchange -> routing key -> queue
    bindings: HashMap<String, HashMap<String, String>>,

    queues: HashMap<String, VecDeque<StoredMessage>>,

    /// delivery tag -> in-flight message
    unacked: HashMap<u64, Unacked>,

    counts: HashMap<String, QueueCounts>,

    /// Every message accepted by `publish`, in order.
    published: Vec<OutboundMessage>,

    closed_consumers: HashSet<u64>,
    closed: bool,

    next_tag: u64,
    next_consumer_id: u64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            queues: HashMap::new(),
            unacked: HashMap::new(),
            counts: HashMap::new(),
            published: Vec::new(),
            closed_consumers: HashSet::new(),
            closed: false,
            next_tag: 1,
            next_consumer_id: 1,
        }
    }

    fn in_flight(&self, consumer_id: u64) -> usize {
        self.unacked
            .values()
            .filter(|u| u.consumer_id == consumer_id)
            .count()
    }

    fn counts_mut(&mut self, queue: &str) -> &mut QueueCounts {
        self.counts.entry(queue.to_string()).or_default()
    }

    /// Put every unsettled delivery matching `filter` back at the head of
    /// its queue, keeping the original delivery order.
    fn return_unacked(&mut self, filter: impl Fn(&Unacked) -> bool) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| filter(u))
            .map(|(tag, _)| *tag)
            .collect();
        // Highest tag first so push_front leaves the lowest tag at the head.
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                let counts = self.counts_mut(&unacked.queue);
                counts.unacked -= 1;
                counts.ready += 1;
                counts.requeued += 1;
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(unacked.message);
            }
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-memory implementation of [`Broker`].
///
/// Cloning is cheap; clones share the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Counters for one queue.
    pub async fn counts(&self, queue: &str) -> QueueCounts {
        let state = self.shared.state.lock().await;
        state.counts.get(queue).cloned().unwrap_or_default()
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.state.lock().await.closed
    }

    /// Every message accepted by `publish` so far.
    pub async fn published(&self) -> Vec<OutboundMessage> {
        let state = self.shared.state.lock().await;
        state.published.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare(&self, topology: &Topology) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(QueueError::ChannelClosed);
        }

        state.queues.entry(topology.queue.clone()).or_default();
        state.counts_mut(&topology.queue);
        state
            .bindings
            .entry(topology.exchange.clone())
            .or_default()
            .insert(topology.routing_key.clone(), topology.queue.clone());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), QueueError> {
        {
            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(QueueError::ChannelClosed);
            }

            let Some(routes) = state.bindings.get(&message.exchange) else {
                return Err(QueueError::Unroutable(message.exchange.clone()));
            };
            let Some(queue) = routes.get(&message.routing_key).cloned() else {
                return Err(QueueError::Unroutable(format!(
                    "{}/{}",
                    message.exchange, message.routing_key
                )));
            };

            let stored = StoredMessage {
                body: message.body.clone(),
                delivery_count: 0,
            };
            state
                .queues
                .entry(queue.clone())
                .or_default()
                .push_back(stored);
            state.counts_mut(&queue).ready += 1;
            state.published.push(message);
        } // ここでロック解放

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Arc<dyn Consumer>, QueueError> {
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return Err(QueueError::ChannelClosed);
        }
        if !state.queues.contains_key(queue) {
            return Err(QueueError::Broker(format!("queue '{queue}' not declared")));
        }

        let id = state.next_consumer_id;
        state.next_consumer_id += 1;

        Ok(Arc::new(InMemoryConsumer {
            id,
            queue: queue.to_string(),
            prefetch: usize::from(prefetch.max(1)),
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        {
            let mut state = self.shared.state.lock().await;
            state.closed = true;
            state.return_unacked(|_| true);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

/// Consuming channel on one queue.
struct InMemoryConsumer {
    id: u64,
    queue: String,
    prefetch: usize,
    shared: Arc<Shared>,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn next_delivery(&self) -> Option<Box<dyn Delivery>> {
        loop {
            // Register interest before inspecting state so a publish or settle
            // between the check and the await still wakes us.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if state.closed || state.closed_consumers.contains(&self.id) {
                    return None;
                }

                if state.in_flight(self.id) < self.prefetch
                    && let Some(mut message) = state
                        .queues
                        .get_mut(&self.queue)
                        .and_then(|q| q.pop_front())
                {
                    message.delivery_count += 1;
                    let tag = state.next_tag;
                    state.next_tag += 1;

                    let counts = state.counts_mut(&self.queue);
                    counts.ready -= 1;
                    counts.unacked += 1;

                    let delivery = InMemoryDelivery {
                        tag,
                        body: message.body.clone(),
                        delivery_count: message.delivery_count,
                        consumer_id: self.id,
                        shared: Arc::clone(&self.shared),
                    };
                    state.unacked.insert(
                        tag,
                        Unacked {
                            queue: self.queue.clone(),
                            consumer_id: self.id,
                            message,
                        },
                    );
                    return Some(Box::new(delivery));
                }
            }

            notified.await;
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        {
            let mut state = self.shared.state.lock().await;
            state.closed_consumers.insert(self.id);
            let id = self.id;
            state.return_unacked(|u| u.consumer_id == id);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

/// Delivery handed out by [`InMemoryConsumer`].
struct InMemoryDelivery {
    tag: u64,
    body: Vec<u8>,
    delivery_count: u32,
    consumer_id: u64,
    shared: Arc<Shared>,
}

impl InMemoryDelivery {
    /// Take this delivery's in-flight entry, failing if its channel is gone.
    fn take_unacked(&self, state: &mut BrokerState) -> Result<Unacked, QueueError> {
        if state.closed || state.closed_consumers.contains(&self.consumer_id) {
            return Err(QueueError::ChannelClosed);
        }
        let tag = self.tag;
        state
            .unacked
            .remove(&tag)
            .ok_or_else(|| QueueError::Broker(format!("unknown delivery tag {tag}")))
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        {
            let mut state = self.shared.state.lock().await;
            let unacked = self.take_unacked(&mut state)?;
            let counts = state.counts_mut(&unacked.queue);
            counts.unacked -= 1;
            counts.acked += 1;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        {
            let mut state = self.shared.state.lock().await;
            let unacked = self.take_unacked(&mut state)?;
            let counts = state.counts_mut(&unacked.queue);
            counts.unacked -= 1;
            if requeue {
                counts.ready += 1;
                counts.requeued += 1;
                state
                    .queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(unacked.message);
            } else {
                counts.rejected += 1;
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
