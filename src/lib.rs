//! PerilMQ – a typed publish/subscribe layer over an exchange/queue/binding
//! message broker.
//!
//! This crate exports
//!  * `core`   – codecs, queue declaration, typed publish/subscribe
//!  * `broker` – an in-process broker implementing the transport traits
//!  * `config` – TOML-driven runtime configuration
//!
//! Producers and consumers exchange strongly-typed values without
//! hand-writing serialization, queue declaration, or acknowledgment
//! bookkeeping at each call site. The broker is reached through the
//! `Connection`/`Channel` capability traits, so the same typed layer runs
//! against the bundled in-memory broker or any other transport that
//! implements them.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod broker;
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use crate::broker::{ExchangeKind, MemoryBroker, MemoryChannel, MemoryConnection};
pub use crate::config::{load_config, Config, ConfigError, CONFIG};
pub use crate::core::codec::{BinaryCodec, Codec, JsonCodec};
pub use crate::core::error::{
    BrokerError, DecodeError, EncodeError, PublishError, SubscribeError,
};
pub use crate::core::message::{Delivery, Envelope};
pub use crate::core::publish::publish;
pub use crate::core::queue::{declare_and_bind, DurabilityClass, QueueHandle, QueueOptions};
pub use crate::core::subscribe::{subscribe, AckDecision, Subscription};
pub use crate::core::transport::{Channel, Connection};
