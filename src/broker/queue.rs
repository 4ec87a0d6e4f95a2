use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::message::{Delivery, Envelope};
use crate::core::queue::{QueueHandle, QueueOptions};

use super::{ChannelState, UnackedEntry};

/// Broker-side state for one queue: a FIFO of pending messages plus the
/// consumers currently attached to it.
pub(crate) struct QueueState {
    pub(crate) name: String,
    pub(crate) options: QueueOptions,
    /// Connection id that declared the queue, set only for exclusive queues.
    pub(crate) owner: Option<u64>,
    inner: Mutex<QueueInner>,
}

struct QueueInner {
    pending: VecDeque<QueuedMessage>,
    consumers: Vec<Consumer>,
    /// Round-robin cursor across consumers.
    next_consumer: usize,
}

struct QueuedMessage {
    routing_key: String,
    envelope: Envelope,
    redelivered: bool,
}

struct Consumer {
    tag: String,
    sender: UnboundedSender<Delivery>,
    channel: Arc<ChannelState>,
}

impl QueueState {
    pub(crate) fn new(name: &str, options: QueueOptions, owner: Option<u64>) -> Self {
        Self {
            name: name.to_string(),
            options,
            owner,
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                consumers: Vec::new(),
                next_consumer: 0,
            }),
        }
    }

    pub(crate) fn handle(&self) -> QueueHandle {
        let inner = self.inner.lock();
        QueueHandle::new(self.name.clone(), inner.pending.len(), inner.consumers.len())
    }

    pub(crate) fn depth(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub(crate) fn enqueue(&self, routing_key: &str, envelope: Envelope, redelivered: bool) {
        self.inner.lock().pending.push_back(QueuedMessage {
            routing_key: routing_key.to_string(),
            envelope,
            redelivered,
        });
    }

    /// Puts a rejected or orphaned message back at the head of the queue,
    /// flagged as redelivered.
    pub(crate) fn requeue_front(&self, routing_key: String, envelope: Envelope) {
        self.inner.lock().pending.push_front(QueuedMessage {
            routing_key,
            envelope,
            redelivered: true,
        });
    }

    pub(crate) fn add_consumer(
        &self,
        tag: String,
        sender: UnboundedSender<Delivery>,
        channel: Arc<ChannelState>,
    ) {
        self.inner.lock().consumers.push(Consumer {
            tag,
            sender,
            channel,
        });
    }

    pub(crate) fn remove_consumer(&self, tag: &str) {
        self.inner.lock().consumers.retain(|c| c.tag != tag);
    }

    pub(crate) fn should_auto_delete(&self) -> bool {
        self.options.auto_delete && self.inner.lock().consumers.is_empty()
    }

    /// Moves pending messages to consumers, round-robin, honoring each
    /// channel's prefetch budget. Called after every enqueue, ack, nack, and
    /// consumer change; sending is non-blocking so the queue lock is only
    /// held for bookkeeping.
    pub(crate) fn pump(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        'next_message: while !inner.pending.is_empty() {
            let count = inner.consumers.len();
            if count == 0 {
                return;
            }
            for offset in 0..count {
                let idx = (inner.next_consumer + offset) % count;
                if inner.consumers[idx].sender.is_closed() {
                    inner.consumers.remove(idx);
                    continue 'next_message;
                }
                let Some(message) = inner.pending.pop_front() else {
                    return;
                };
                // The prefetch check and the unacked insert are one atomic
                // reservation on the channel, so two queues pumping into the
                // same channel cannot both claim the last slot.
                let reserved = inner.consumers[idx].channel.reserve_unacked(UnackedEntry {
                    queue: self.clone(),
                    routing_key: message.routing_key.clone(),
                    envelope: message.envelope.clone(),
                    redelivered: message.redelivered,
                });
                let Some(tag) = reserved else {
                    // Channel at its prefetch limit; offer the message to the
                    // next consumer instead.
                    inner.pending.push_front(message);
                    continue;
                };
                let delivery = Delivery {
                    delivery_tag: tag,
                    redelivered: message.redelivered,
                    routing_key: message.routing_key,
                    envelope: message.envelope,
                };
                if inner.consumers[idx].sender.send(delivery).is_ok() {
                    inner.next_consumer = (idx + 1) % count;
                } else {
                    // Consumer vanished between the liveness check and the
                    // send: restore the message and drop the consumer.
                    if let Some(entry) = inner.consumers[idx].channel.forget_unacked(tag) {
                        inner.pending.push_front(QueuedMessage {
                            routing_key: entry.routing_key,
                            envelope: entry.envelope,
                            redelivered: entry.redelivered,
                        });
                    }
                    inner.consumers.remove(idx);
                }
                continue 'next_message;
            }
            // Every consumer is at its prefetch limit.
            return;
        }
    }
}
