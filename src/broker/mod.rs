//! In-process broker implementing the exchange/queue/binding model behind
//! the `Connection`/`Channel` transport traits.
//!
//! Registries are concurrent maps; per-queue state sits behind a mutex that
//! is never held across an await point. Deliveries flow over unbounded tokio
//! channels whose closure is the consumer's terminal signal.

mod exchange;
mod queue;

pub use self::exchange::ExchangeKind;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;
use uuid::Uuid;

use crate::core::error::BrokerError;
use crate::core::message::{Delivery, Envelope};
use crate::core::queue::{QueueHandle, QueueOptions};
use crate::core::transport::{Channel, Connection};

use self::exchange::Exchange;
use self::queue::QueueState;

/// The broker itself: exchange and queue registries shared by every
/// connection it hands out.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

pub(crate) struct BrokerInner {
    exchanges: DashMap<String, Arc<Exchange>>,
    queues: DashMap<String, Arc<QueueState>>,
    next_connection_id: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                exchanges: DashMap::new(),
                queues: DashMap::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    /// Creates the exchange if it does not exist yet. Re-declaring an
    /// existing exchange keeps its original kind.
    pub fn declare_exchange(&self, name: impl Into<String>, kind: ExchangeKind) {
        let name = name.into();
        self.inner
            .exchanges
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Exchange::new(name, kind)));
    }

    pub fn connect(&self) -> MemoryConnection {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        MemoryConnection {
            inner: Arc::new(ConnectionInner {
                id,
                broker: self.inner.clone(),
                channels: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of messages sitting in `queue`, not counting unacknowledged
    /// in-flight deliveries. `None` if the queue does not exist.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner.queues.get(queue).map(|q| q.depth())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerInner {
    fn declare_queue(
        &self,
        connection_id: u64,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueHandle, BrokerError> {
        let owner = options.exclusive.then_some(connection_id);
        let queue = self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new(name, options.clone(), owner)))
            .value()
            .clone();

        if queue.options != options {
            return Err(BrokerError::PreconditionFailed(name.to_string()));
        }
        if queue.options.exclusive && queue.owner != Some(connection_id) {
            return Err(BrokerError::AccessRefused(name.to_string()));
        }
        Ok(queue.handle())
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        if !self.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let exchange = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
            .value()
            .clone();
        exchange.bind(queue, routing_key);
        Ok(())
    }

    fn route(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError> {
        let exchange = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
            .value()
            .clone();
        for name in exchange.matching_queues(routing_key) {
            // Bindings can outlive their queue; a missing queue just means
            // the message has nowhere to go.
            if let Some(queue) = self.queues.get(&name).map(|q| q.value().clone()) {
                queue.enqueue(routing_key, envelope.clone(), false);
                queue.pump();
            }
        }
        Ok(())
    }

    fn dead_letter(&self, exchange: &str, routing_key: &str, envelope: Envelope) {
        if self.route(exchange, routing_key, envelope).is_err() {
            debug!(
                target: "perilmq::broker",
                exchange,
                routing_key,
                "dead-letter exchange not declared; message dropped"
            );
        }
    }

    fn remove_queue(&self, name: &str) {
        self.queues.remove(name);
    }
}

/// One client connection. Cheap to clone; used only to open channels and to
/// tear everything down at once.
#[derive(Clone)]
pub struct MemoryConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    broker: Arc<BrokerInner>,
    channels: Mutex<Vec<Arc<ChannelState>>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Closes every channel opened on this connection (requeueing their
    /// unacknowledged messages) and removes its exclusive queues. Delivery
    /// streams fed by those channels end, which is how subscriptions learn
    /// they are done.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let channels: Vec<Arc<ChannelState>> = self.inner.channels.lock().drain(..).collect();
        for channel in channels {
            channel.close();
        }
        let owned: Vec<String> = self
            .inner
            .broker
            .queues
            .iter()
            .filter(|entry| entry.value().owner == Some(self.inner.id))
            .map(|entry| entry.key().clone())
            .collect();
        for name in owned {
            self.inner.broker.remove_queue(&name);
        }
    }

    /// Number of channels currently open on this connection.
    pub fn open_channels(&self) -> usize {
        self.inner.channels.lock().len()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> Result<MemoryChannel, BrokerError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }
        let state = Arc::new(ChannelState {
            connection_id: self.inner.id,
            connection: Arc::downgrade(&self.inner),
            broker: self.inner.broker.clone(),
            prefetch: AtomicU16::new(0),
            next_delivery_tag: AtomicU64::new(1),
            unacked: Mutex::new(HashMap::new()),
            consumers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.inner.channels.lock().push(state.clone());
        Ok(MemoryChannel { state })
    }
}

/// A channel handle. Dropping it closes the channel, requeueing anything
/// still unacknowledged.
pub struct MemoryChannel {
    state: Arc<ChannelState>,
}

pub(crate) struct ChannelState {
    connection_id: u64,
    connection: Weak<ConnectionInner>,
    broker: Arc<BrokerInner>,
    prefetch: AtomicU16,
    next_delivery_tag: AtomicU64,
    unacked: Mutex<HashMap<u64, UnackedEntry>>,
    consumers: Mutex<Vec<ConsumerBinding>>,
    closed: AtomicBool,
}

struct ConsumerBinding {
    queue: String,
    tag: String,
}

pub(crate) struct UnackedEntry {
    pub(crate) queue: Arc<QueueState>,
    pub(crate) routing_key: String,
    pub(crate) envelope: Envelope,
    pub(crate) redelivered: bool,
}

impl ChannelState {
    /// Claims one prefetch slot and records the entry under a fresh delivery
    /// tag, all under a single lock, so concurrent queue pumps feeding the
    /// same channel cannot overshoot the budget. `None` when the channel is
    /// already at its limit.
    pub(crate) fn reserve_unacked(&self, entry: UnackedEntry) -> Option<u64> {
        let mut unacked = self.unacked.lock();
        let prefetch = self.prefetch.load(Ordering::Relaxed);
        if prefetch != 0 && unacked.len() >= prefetch as usize {
            return None;
        }
        let tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed);
        unacked.insert(tag, entry);
        Some(tag)
    }

    pub(crate) fn forget_unacked(&self, tag: u64) -> Option<UnackedEntry> {
        self.unacked.lock().remove(&tag)
    }

    /// Re-pumps every queue this channel consumes from. Called after a slot
    /// is freed, since the queue that delivered the settled message is not
    /// necessarily the one waiting on channel capacity.
    fn pump_consumer_queues(&self) {
        let queues: Vec<String> = self
            .consumers
            .lock()
            .iter()
            .map(|binding| binding.queue.clone())
            .collect();
        for name in queues {
            if let Some(queue) = self.broker.queues.get(&name).map(|q| q.value().clone()) {
                queue.pump();
            }
        }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BrokerError::ChannelClosed)
        } else {
            Ok(())
        }
    }

    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Everything unacknowledged goes back to its queue before the
        // consumers disappear, so surviving consumers can pick it up.
        let unacked: Vec<UnackedEntry> =
            self.unacked.lock().drain().map(|(_, entry)| entry).collect();
        let mut touched: Vec<Arc<QueueState>> = Vec::new();
        for entry in unacked {
            entry.queue.requeue_front(entry.routing_key, entry.envelope);
            touched.push(entry.queue);
        }
        let consumers: Vec<ConsumerBinding> = self.consumers.lock().drain(..).collect();
        for binding in consumers {
            if let Some(queue) = self.broker.queues.get(&binding.queue).map(|q| q.value().clone())
            {
                queue.remove_consumer(&binding.tag);
                if queue.should_auto_delete() {
                    self.broker.remove_queue(&binding.queue);
                } else {
                    touched.push(queue);
                }
            }
        }
        for queue in touched {
            queue.pump();
        }
        // Deregister from the owning connection so a long-lived connection
        // does not accumulate dead channel state.
        if let Some(conn) = self.connection.upgrade() {
            conn.channels.lock().retain(|ch| !Arc::ptr_eq(ch, self));
        }
    }
}

impl MemoryChannel {
    pub fn close(&self) {
        self.state.close();
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.state.close();
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("connection_id", &self.state.connection_id)
            .field("closed", &self.state.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueHandle, BrokerError> {
        self.state.ensure_open()?;
        self.state
            .broker
            .declare_queue(self.state.connection_id, name, options)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.state.ensure_open()?;
        self.state.broker.bind_queue(queue, exchange, routing_key)
    }

    async fn set_prefetch(&self, limit: u16) -> Result<(), BrokerError> {
        self.state.ensure_open()?;
        self.state.prefetch.store(limit, Ordering::Relaxed);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError> {
        self.state.ensure_open()?;
        self.state.broker.route(exchange, routing_key, envelope)
    }

    async fn consume(&self, queue: &str) -> Result<UnboundedReceiver<Delivery>, BrokerError> {
        self.state.ensure_open()?;
        let queue_state = self
            .state
            .broker
            .queues
            .get(queue)
            .map(|q| q.value().clone())
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;
        if queue_state.options.exclusive && queue_state.owner != Some(self.state.connection_id) {
            return Err(BrokerError::AccessRefused(queue.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let tag = Uuid::new_v4().to_string();
        queue_state.add_consumer(tag.clone(), sender, self.state.clone());
        self.state.consumers.lock().push(ConsumerBinding {
            queue: queue.to_string(),
            tag,
        });
        queue_state.pump();
        Ok(receiver)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.state.ensure_open()?;
        let entry = self
            .state
            .forget_unacked(delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        entry.queue.pump();
        self.state.pump_consumer_queues();
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.state.ensure_open()?;
        let entry = self
            .state
            .forget_unacked(delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        if requeue {
            entry.queue.requeue_front(entry.routing_key, entry.envelope);
        } else if let Some(dlx) = entry.queue.options.dead_letter_exchange.clone() {
            self.state
                .broker
                .dead_letter(&dlx, &entry.routing_key, entry.envelope);
        }
        entry.queue.pump();
        self.state.pump_consumer_queues();
        Ok(())
    }
}
