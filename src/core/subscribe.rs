use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::CONFIG;
use crate::core::codec::Codec;
use crate::core::error::SubscribeError;
use crate::core::queue::{declare_and_bind, DurabilityClass};
use crate::core::transport::{Channel, Connection};

/// What a handler tells the transport about one delivered message. Produced
/// exactly once per delivery; the loop maps it to exactly one broker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Fully processed; remove the message from the queue.
    Ack,
    /// Transient failure; return the message to the queue for redelivery.
    NackRequeue,
    /// Permanent failure or malformed message; drop it, dead-lettering if
    /// the queue is configured for that.
    NackDiscard,
}

/// A running subscription: one queue, one codec, one handler, one delivery
/// task. It lives until its delivery stream closes (channel or connection
/// teardown); there is no other unsubscribe operation.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits until the delivery stream has closed and the loop has drained.
    pub async fn closed(self) {
        let _ = self.handle.await;
    }
}

/// Declares and binds `queue_name`, applies the configured prefetch limit,
/// and spawns a delivery loop that decodes each message with `codec`, feeds
/// it to `handler`, and acks or nacks per the returned [`AckDecision`].
///
/// The handler runs synchronously on the loop's task: it gates this queue's
/// progress and must not block indefinitely, while other subscriptions run
/// on their own tasks and are unaffected. A message that fails to decode is
/// dead-lettered (`NackDiscard`) and logged; it never reaches the handler
/// and never tears the subscription down.
pub async fn subscribe<C, D, T, F>(
    conn: &C,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durability: DurabilityClass,
    codec: D,
    mut handler: F,
) -> Result<Subscription, SubscribeError>
where
    C: Connection,
    D: Codec,
    T: DeserializeOwned + Send + 'static,
    F: FnMut(T) -> AckDecision + Send + 'static,
{
    let (channel, queue) = declare_and_bind(conn, exchange, queue_name, routing_key, durability)
        .await
        .map_err(SubscribeError::DeclareAndBind)?;

    channel
        .set_prefetch(CONFIG.subscriber.prefetch)
        .await
        .map_err(SubscribeError::Qos)?;

    let mut deliveries = channel
        .consume(queue.name())
        .await
        .map_err(SubscribeError::Consume)?;

    let queue_name = queue.name().to_string();
    let loop_queue = queue_name.clone();

    let handle = tokio::spawn(async move {
        while let Some(delivery) = deliveries.recv().await {
            let decision = match codec.decode::<T>(&delivery.envelope.body) {
                Ok(value) => handler(value),
                Err(err) => {
                    warn!(
                        target: "perilmq::subscribe",
                        queue = %loop_queue,
                        routing_key = %delivery.routing_key,
                        error = %err,
                        "dead-lettering undecodable message"
                    );
                    AckDecision::NackDiscard
                }
            };
            let outcome = match decision {
                AckDecision::Ack => channel.ack(delivery.delivery_tag).await,
                AckDecision::NackRequeue => channel.nack(delivery.delivery_tag, true).await,
                AckDecision::NackDiscard => channel.nack(delivery.delivery_tag, false).await,
            };
            if let Err(err) = outcome {
                // Per-message failures never abort the loop; stream closure
                // is the only terminal condition.
                error!(
                    target: "perilmq::subscribe",
                    queue = %loop_queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %err,
                    "acknowledgment failed"
                );
            }
        }
        debug!(target: "perilmq::subscribe", queue = %loop_queue, "delivery stream closed");
    });

    Ok(Subscription {
        queue: queue_name,
        handle,
    })
}
