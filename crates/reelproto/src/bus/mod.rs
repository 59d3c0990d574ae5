//! Publish/subscribe transport.
//!
//! Delivery is at-least-once when asked for, never exactly-once. Subscribers
//! drain an mpsc receiver in their own loop, so a slow consumer never blocks
//! the transport. Retained messages behave like MQTT: the newest retained
//! payload of a topic is handed to every new subscriber, and a retained
//! publish with an empty payload clears it.

mod memory;
mod zmq;

pub use memory::MemoryBus;
pub use zmq::{ZmqBus, ZmqRole, ZmqTiming};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::Topic;

/// Per-subscription buffer before messages are dropped.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishOptions {
    pub qos: Qos,
    pub retain: bool,
}

impl PublishOptions {
    pub fn reliable() -> Self {
        Self {
            qos: Qos::AtLeastOnce,
            retain: false,
        }
    }

    pub fn retained() -> Self {
        Self {
            qos: Qos::AtLeastOnce,
            retain: true,
        }
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: Topic,
    pub payload: String,
    /// True when this copy came from the retained store rather than a live publish.
    pub retained: bool,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: Topic, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Receiving end of a subscription.
pub type Subscription = mpsc::Receiver<BusMessage>;

#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(
        &self,
        topic: Topic,
        payload: &str,
        options: PublishOptions,
    ) -> Result<(), BusError>;

    /// Subscribe to a set of topics. Retained payloads for them arrive first.
    async fn subscribe(&self, topics: &[Topic]) -> Result<Subscription, BusError>;
}

/// Local fan-out shared by both transports.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    entries: Vec<(Vec<Topic>, mpsc::Sender<BusMessage>)>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, topics: &[Topic]) -> (mpsc::Sender<BusMessage>, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.entries.push((topics.to_vec(), tx.clone()));
        (tx, rx)
    }

    pub(crate) fn deliver(&mut self, message: &BusMessage) {
        self.entries.retain(|(_, tx)| !tx.is_closed());
        for (topics, tx) in &self.entries {
            if !topics.contains(&message.topic) {
                continue;
            }
            if let Err(e) = tx.try_send(message.clone()) {
                tracing::warn!(topic = %message.topic, "dropping message for slow subscriber: {}", e);
            }
        }
    }
}
