use bytes::Bytes;

/// What a publisher hands to the broker: a content-type tag identifying the
/// codec that produced the body, plus the opaque payload itself.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub content_type: String,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// One message as handed to a consumer. The delivery tag is scoped to the
/// receiving channel and must be acked or nacked exactly once.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub routing_key: String,
    pub envelope: Envelope,
}
