//! Liveness tracking of playback nodes from their heartbeats.
//!
//! A node is active while its last heartbeat is younger than the heartbeat
//! timeout. The sweeper only reclaims memory; counting already ignores
//! expired entries.

use reelproto::NodeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub heartbeats: u64,
}

#[derive(Debug)]
pub struct MembershipTracker {
    nodes: RwLock<HashMap<NodeId, NodeInfo>>,
    heartbeat_timeout: Duration,
}

impl MembershipTracker {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            heartbeat_timeout,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Record a heartbeat. Returns true the first time a node is seen (or after it expired).
    pub async fn record_heartbeat(&self, node_id: &NodeId) -> bool {
        let now = Instant::now();
        let mut nodes = self.nodes.write().await;

        if let Some(existing) = nodes.get_mut(node_id) {
            let was_expired = now.duration_since(existing.last_seen) > self.heartbeat_timeout;
            existing.last_seen = now;
            existing.heartbeats += 1;
            if was_expired {
                info!(node.id = %node_id, "Node is back");
            }
            return was_expired;
        }

        info!(node.id = %node_id, "Node joined");
        nodes.insert(
            node_id.clone(),
            NodeInfo {
                node_id: node_id.clone(),
                first_seen: now,
                last_seen: now,
                heartbeats: 1,
            },
        );
        true
    }

    fn is_active(&self, info: &NodeInfo, now: Instant) -> bool {
        now.duration_since(info.last_seen) <= self.heartbeat_timeout
    }

    /// Nodes with a fresh heartbeat.
    pub async fn active_count(&self) -> usize {
        let now = Instant::now();
        self.nodes
            .read()
            .await
            .values()
            .filter(|info| self.is_active(info, now))
            .count()
    }

    pub async fn active_nodes(&self) -> Vec<NodeId> {
        let now = Instant::now();
        let mut active: Vec<NodeId> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|info| self.is_active(info, now))
            .map(|info| info.node_id.clone())
            .collect();
        active.sort();
        active
    }

    /// Drop nodes whose heartbeat expired. Returns the removed ids.
    pub async fn sweep_expired(&self) -> Vec<NodeId> {
        let now = Instant::now();
        let mut nodes = self.nodes.write().await;
        let expired: Vec<NodeId> = nodes
            .values()
            .filter(|info| !self.is_active(info, now))
            .map(|info| info.node_id.clone())
            .collect();

        for node_id in &expired {
            nodes.remove(node_id);
            info!(node.id = %node_id, "Node expired");
        }
        expired
    }

    /// Summary for the health endpoint.
    pub async fn summary(&self) -> serde_json::Value {
        let now = Instant::now();
        let nodes = self.nodes.read().await;
        let mut list: Vec<_> = nodes
            .values()
            .map(|info| {
                serde_json::json!({
                    "node_id": info.node_id.as_str(),
                    "active": self.is_active(info, now),
                    "last_seen_secs": now.duration_since(info.last_seen).as_secs_f64(),
                    "heartbeats": info.heartbeats,
                })
            })
            .collect();
        list.sort_by(|a, b| a["node_id"].as_str().cmp(&b["node_id"].as_str()));

        serde_json::json!({
            "known": nodes.len(),
            "active": nodes.values().filter(|info| self.is_active(info, now)).count(),
            "nodes": list,
        })
    }

    /// Periodically sweep expired nodes until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = self.sweep_expired().await;
                        if !removed.is_empty() {
                            debug!(count = removed.len(), "Membership sweep");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}
