use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::error::BrokerError;
use crate::core::message::{Delivery, Envelope};
use crate::core::queue::{QueueHandle, QueueOptions};

/// An established connection to a broker. The typed layer only ever uses it
/// to open channels; retry and reconnect policy belong to the caller.
#[async_trait]
pub trait Connection: Send + Sync {
    type Channel: Channel;

    async fn open_channel(&self) -> Result<Self::Channel, BrokerError>;
}

/// The capability surface the typed layer needs from a broker channel.
///
/// A channel is owned by exactly one queue's operations; it is never shared
/// across unrelated queues. Delivery tags handed out by `consume` are scoped
/// to this channel and must receive exactly one `ack` or `nack` call each.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Declares a queue idempotently. Re-declaring with equal options
    /// succeeds and reports the existing queue; different options fail with
    /// `BrokerError::PreconditionFailed`.
    async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueHandle, BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Bounds the number of unacknowledged deliveries the broker will have
    /// in flight to this channel's consumers. Zero means unlimited.
    async fn set_prefetch(&self, limit: u16) -> Result<(), BrokerError>;

    /// Fire-and-forget publish: the broker is not required to fail the call
    /// if no queue is currently bound.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: Envelope,
    ) -> Result<(), BrokerError>;

    /// Starts a manual-acknowledgment consumer on `queue`. The returned
    /// stream closes when this channel or its connection closes; that is the
    /// only terminal signal a subscription gets.
    async fn consume(&self, queue: &str) -> Result<UnboundedReceiver<Delivery>, BrokerError>;

    /// Removes a delivered message from the queue.
    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    /// Rejects a delivered message: requeued for redelivery when `requeue`
    /// is true, otherwise dropped or dead-lettered per queue configuration.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}
