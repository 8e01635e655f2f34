use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tally_event::{CONTENT_TYPE, Event};

use crate::{Delivery, DeliveryError, DeliverySource};

/// How a message of a [`MemoryQueue`] was settled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Settlement {
    /// The message was acknowledged.
    Acked,
    /// The message was rejected without requeue and is gone.
    Dropped,
    /// The message was rejected with requeue and is pending again.
    Requeued,
}

#[derive(Clone, Debug)]
struct MemoryMessage {
    tag: u64,
    content_type: Option<String>,
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<MemoryMessage>,
    settlements: Vec<(u64, Settlement)>,
    next_tag: u64,
    disconnected: bool,
}

/// An in-process broker queue for tests.
///
/// Messages rejected with requeue are appended to the end of the queue, like a broker would
/// redeliver them. Clones share the same queue.
#[derive(Clone, Debug, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a raw message and returns its delivery tag.
    pub fn publish(&self, content_type: Option<&str>, payload: impl Into<Vec<u8>>) -> u64 {
        let mut state = self.state.lock();
        let tag = state.next_tag;
        state.next_tag += 1;
        state.pending.push_back(MemoryMessage {
            tag,
            content_type: content_type.map(str::to_owned),
            payload: payload.into(),
            redelivered: false,
        });
        tag
    }

    /// Enqueues an event in its JSON wire format.
    pub fn publish_event(&self, event: &Event) -> u64 {
        let payload = event.to_json().unwrap_or_default();
        self.publish(Some(CONTENT_TYPE), payload)
    }

    /// Takes the next pending message.
    pub fn pop(&self) -> Option<MemoryDelivery> {
        let message = self.state.lock().pending.pop_front()?;
        Some(MemoryDelivery {
            message,
            queue: self.clone(),
        })
    }

    /// Returns the number of messages waiting for delivery.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns all settlements in the order they happened.
    pub fn settlements(&self) -> Vec<(u64, Settlement)> {
        self.state.lock().settlements.clone()
    }

    /// Returns the most recent settlement of the message with the given tag.
    pub fn settlement(&self, tag: u64) -> Option<Settlement> {
        self.state
            .lock()
            .settlements
            .iter()
            .rev()
            .find(|(t, _)| *t == tag)
            .map(|(_, s)| *s)
    }

    /// Makes all subsequent settlements fail, as if the broker connection was lost.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    fn settle(&self, mut message: MemoryMessage, settlement: Settlement) -> Result<(), DeliveryError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(DeliveryError::new("broker disconnected"));
        }

        state.settlements.push((message.tag, settlement));
        if settlement == Settlement::Requeued {
            message.redelivered = true;
            state.pending.push_back(message);
        }

        Ok(())
    }
}

impl DeliverySource for MemoryQueue {
    type Delivery = MemoryDelivery;

    async fn recv(&mut self) -> Result<Option<Self::Delivery>, DeliveryError> {
        Ok(self.pop())
    }
}

/// A delivery taken from a [`MemoryQueue`].
#[derive(Debug)]
pub struct MemoryDelivery {
    message: MemoryMessage,
    queue: MemoryQueue,
}

impl MemoryDelivery {
    /// Returns the delivery tag assigned when the message was published.
    pub fn tag(&self) -> u64 {
        self.message.tag
    }

    /// Returns `true` if this message was requeued before.
    pub fn redelivered(&self) -> bool {
        self.message.redelivered
    }
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn content_type(&self) -> Option<&str> {
        self.message.content_type.as_deref()
    }

    async fn ack(self) -> Result<(), DeliveryError> {
        self.queue.settle(self.message, Settlement::Acked)
    }

    async fn reject(self, requeue: bool) -> Result<(), DeliveryError> {
        let settlement = match requeue {
            true => Settlement::Requeued,
            false => Settlement::Dropped,
        };
        self.queue.settle(self.message, settlement)
    }
}
