use crate::config::CONFIG;
use crate::core::error::BrokerError;
use crate::core::transport::Connection;

/// How long a queue lives and who may touch it. Chosen once at declaration
/// time and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityClass {
    /// Survives a broker restart, is never auto-deleted, and is shared
    /// across connections.
    Durable,
    /// Does not survive a restart, is auto-deleted when the last consumer
    /// disconnects, and is exclusive to the declaring connection.
    Transient,
}

impl DurabilityClass {
    /// Expands the class into the three independent boolean facets the
    /// broker actually understands, plus the dead-letter argument.
    pub fn queue_options(self, dead_letter_exchange: impl Into<String>) -> QueueOptions {
        let dead_letter_exchange = Some(dead_letter_exchange.into());
        match self {
            DurabilityClass::Durable => QueueOptions {
                durable: true,
                auto_delete: false,
                exclusive: false,
                dead_letter_exchange,
            },
            DurabilityClass::Transient => QueueOptions {
                durable: false,
                auto_delete: true,
                exclusive: true,
                dead_letter_exchange,
            },
        }
    }
}

/// Declaration parameters for a queue. Equality of options is the
/// idempotence criterion: re-declaring with equal options is a no-op,
/// re-declaring with different options is a `BrokerError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
    pub dead_letter_exchange: Option<String>,
}

/// What the broker reports back about a declared queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    name: String,
    message_count: usize,
    consumer_count: usize,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>, message_count: usize, consumer_count: usize) -> Self {
        Self {
            name: name.into(),
            message_count,
            consumer_count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn consumer_count(&self) -> usize {
        self.consumer_count
    }
}

/// Declares `queue_name` with the given durability class and binds it to
/// `exchange` under `routing_key`.
///
/// Opens a fresh channel scoped to this queue so that one queue's errors
/// cannot close another's channel. The queue is declared with the configured
/// dead-letter exchange argument, so a `NackDiscard` re-routes the message
/// instead of destroying it silently.
pub async fn declare_and_bind<C: Connection>(
    conn: &C,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    durability: DurabilityClass,
) -> Result<(C::Channel, QueueHandle), BrokerError> {
    use crate::core::transport::Channel as _;

    let channel = conn.open_channel().await?;
    let options = durability.queue_options(CONFIG.queues.dead_letter_exchange.clone());
    let queue = channel.declare_queue(queue_name, options).await?;
    channel.bind_queue(queue_name, exchange, routing_key).await?;
    Ok((channel, queue))
}
