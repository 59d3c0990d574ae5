//! In-process broker. Backs single-host setups and every protocol test.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Bus, BusError, BusMessage, PublishOptions, Subscribers, Subscription};
use crate::Topic;

#[derive(Debug, Default)]
struct BrokerState {
    subscribers: Subscribers,
    retained: HashMap<Topic, String>,
    history: Vec<BusMessage>,
    fail_all: bool,
    fail_next: u32,
    drop_next: HashMap<Topic, u32>,
}

/// Broker living in the current process. Clones share the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail until switched off.
    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.fail_all = failing;
    }

    /// Fail the next `n` publishes on any topic.
    pub async fn fail_next_publishes(&self, n: u32) {
        self.state.lock().await.fail_next = n;
    }

    /// Accept but silently lose the next `n` publishes on `topic`.
    pub async fn drop_next(&self, topic: Topic, n: u32) {
        self.state.lock().await.drop_next.insert(topic, n);
    }

    /// Every accepted publish on `topic`, oldest first.
    pub async fn published(&self, topic: Topic) -> Vec<BusMessage> {
        self.state
            .lock()
            .await
            .history
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn retained(&self, topic: Topic) -> Option<String> {
        self.state.lock().await.retained.get(&topic).cloned()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(
        &self,
        topic: Topic,
        payload: &str,
        options: PublishOptions,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock().await;

        if state.fail_all || state.fail_next > 0 {
            state.fail_next = state.fail_next.saturating_sub(1);
            return Err(BusError::Publish {
                topic,
                reason: "injected failure".to_string(),
            });
        }

        let message = BusMessage {
            topic,
            payload: payload.to_string(),
            retained: false,
        };
        state.history.push(message.clone());

        if options.retain {
            if payload.is_empty() {
                state.retained.remove(&topic);
            } else {
                state.retained.insert(topic, payload.to_string());
            }
        }

        if let Some(remaining) = state.drop_next.get_mut(&topic) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(%topic, "dropping message in transit");
                return Ok(());
            }
        }

        state.subscribers.deliver(&message);
        Ok(())
    }

    async fn subscribe(&self, topics: &[Topic]) -> Result<Subscription, BusError> {
        let mut state = self.state.lock().await;
        let (tx, rx) = state.subscribers.add(topics);

        for topic in topics {
            if let Some(payload) = state.retained.get(topic) {
                let _ = tx.try_send(BusMessage {
                    topic: *topic,
                    payload: payload.clone(),
                    retained: true,
                });
            }
        }

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_only_subscribed_topics() {
        let bus = MemoryBus::new();
        let mut acks = bus.subscribe(&[Topic::Ack]).await.unwrap();

        bus.publish(Topic::Heartbeat, "n1", PublishOptions::default())
            .await
            .unwrap();
        bus.publish(Topic::Ack, "n1:c:success", PublishOptions::reliable())
            .await
            .unwrap();

        let msg = acks.recv().await.unwrap();
        assert_eq!(msg.topic, Topic::Ack);
        assert!(acks.try_recv().is_err());
    }

    #[tokio::test]
    async fn retained_reaches_late_subscriber_until_cleared() {
        let bus = MemoryBus::new();
        bus.publish(Topic::Command, "1,10.0,c", PublishOptions::retained())
            .await
            .unwrap();

        let mut late = bus.subscribe(&[Topic::Command]).await.unwrap();
        let msg = late.recv().await.unwrap();
        assert!(msg.retained);
        assert_eq!(msg.payload, "1,10.0,c");

        bus.publish(Topic::Command, "", PublishOptions::retained())
            .await
            .unwrap();
        assert_eq!(bus.retained(Topic::Command).await, None);

        let mut later = bus.subscribe(&[Topic::Command]).await.unwrap();
        assert!(later.try_recv().is_err());
    }

    #[tokio::test]
    async fn injected_faults() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(&[Topic::Command]).await.unwrap();

        bus.fail_next_publishes(1).await;
        assert!(bus
            .publish(Topic::Command, "x", PublishOptions::reliable())
            .await
            .is_err());

        bus.drop_next(Topic::Command, 1).await;
        bus.publish(Topic::Command, "lost", PublishOptions::reliable())
            .await
            .unwrap();
        bus.publish(Topic::Command, "kept", PublishOptions::reliable())
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().payload, "kept");
        assert_eq!(bus.published(Topic::Command).await.len(), 2);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = MemoryBus::new();
        let sub = bus.subscribe(&[Topic::Heartbeat]).await.unwrap();
        drop(sub);
        bus.publish(Topic::Heartbeat, "n1", PublishOptions::default())
            .await
            .unwrap();
    }
}
