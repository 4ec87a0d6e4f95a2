use serde::Serialize;
use tracing::debug;

use crate::core::codec::Codec;
use crate::core::error::PublishError;
use crate::core::message::Envelope;
use crate::core::transport::Channel;

/// Encodes `value` with `codec` and emits it to `exchange` under
/// `routing_key`.
///
/// Stateless beyond the channel handle it is given. An unencodable value is
/// returned as `PublishError::Encode` without contacting the broker. Publish
/// is at-most-once from this layer's perspective: no confirmation tracking,
/// and the broker routes to zero or more bound queues as it sees fit.
pub async fn publish<Ch, D, T>(
    channel: &Ch,
    exchange: &str,
    routing_key: &str,
    value: &T,
    codec: &D,
) -> Result<(), PublishError>
where
    Ch: Channel,
    D: Codec,
    T: Serialize,
{
    let body = codec.encode(value)?;
    debug!(
        target: "perilmq::publish",
        exchange,
        routing_key,
        content_type = codec.content_type(),
        bytes = body.len(),
        "publishing message"
    );
    let envelope = Envelope::new(codec.content_type(), body);
    channel.publish(exchange, routing_key, envelope).await?;
    Ok(())
}
