use thiserror::Error;

/// The broker rejected an operation. Never retried internally; surfaced to
/// the caller of the failing operation.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),
    #[error("unknown queue '{0}'")]
    UnknownQueue(String),
    #[error("queue '{0}' already declared with different parameters")]
    PreconditionFailed(String),
    #[error("queue '{0}' is exclusive to another connection")]
    AccessRefused(String),
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),
    #[error("channel is closed")]
    ChannelClosed,
    #[error("connection is closed")]
    ConnectionClosed,
}

/// A value could not be serialized. Aborts a single publish call before any
/// broker contact.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary encoding failed: {0}")]
    Binary(#[from] bincode::Error),
}

/// Bytes could not be deserialized into the expected type. During delivery
/// this resolves to a dead-lettering nack, never a crashed subscription.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("json decoding failed: {0}")]
    Json(serde_json::Error),
    #[error("binary decoding failed: {0}")]
    Binary(bincode::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Subscription setup failed before any message loop started. Each variant
/// names the setup step that failed.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("could not declare and bind queue: {0}")]
    DeclareAndBind(#[source] BrokerError),
    #[error("could not apply prefetch limit: {0}")]
    Qos(#[source] BrokerError),
    #[error("could not start consuming: {0}")]
    Consume(#[source] BrokerError),
}
