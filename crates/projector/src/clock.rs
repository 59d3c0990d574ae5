//! Coordinator clock estimate.
//!
//! One request/response exchange sets a fixed offset between the local wall
//! clock and the coordinator's. The offset is never refreshed afterwards, so
//! a long-running node drifts by whatever its oscillator drifts.

use reelproto::{epoch_seconds, Bus, NodeId, PublishOptions, TimeSyncRequest, TimeSyncResponse, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ClockError;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockOffset {
    /// coordinator time minus local time, in seconds
    offset: Option<f64>,
}

/// When to start relative to now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartPlan {
    pub wait: Duration,
    /// How far past the scheduled instant we already are.
    pub lateness: Duration,
    /// Planned against the local clock because sync never completed.
    pub degraded: bool,
}

impl ClockOffset {
    pub fn unsynced() -> Self {
        Self { offset: None }
    }

    pub fn from_sample(coordinator_time: f64, local_now: f64) -> Self {
        Self {
            offset: Some(coordinator_time - local_now),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.offset.is_some()
    }

    pub fn seconds(&self) -> Result<f64, ClockError> {
        self.offset.ok_or(ClockError::SyncNeverCompleted)
    }

    /// Convert a coordinator timestamp to the local clock.
    pub fn to_local(&self, coordinator_time: f64) -> f64 {
        coordinator_time - self.offset.unwrap_or(0.0)
    }

    pub fn plan_start(&self, scheduled_start_at: f64, local_now: f64) -> StartPlan {
        let delta = self.to_local(scheduled_start_at) - local_now;
        let (wait, lateness) = if delta > 0.0 {
            (Duration::from_secs_f64(delta), Duration::ZERO)
        } else {
            (Duration::ZERO, Duration::from_secs_f64(-delta))
        };
        StartPlan {
            wait,
            lateness,
            degraded: !self.is_synced(),
        }
    }
}

pub type SharedClock = Arc<RwLock<ClockOffset>>;

/// Polls the coordinator for its time until one answer arrives.
pub struct ClockSync {
    bus: Arc<dyn Bus>,
    node_id: NodeId,
    clock: SharedClock,
    interval: Duration,
}

impl ClockSync {
    pub fn new(bus: Arc<dyn Bus>, node_id: NodeId, clock: SharedClock, interval: Duration) -> Self {
        Self {
            bus,
            node_id,
            clock,
            interval,
        }
    }

    pub async fn run(self, mut responses: mpsc::Receiver<TimeSyncResponse>, shutdown: CancellationToken) {
        let request = TimeSyncRequest {
            node_id: self.node_id.clone(),
        }
        .encode();

        loop {
            if let Err(e) = self
                .bus
                .publish(Topic::TimeSyncRequest, &request, PublishOptions::default())
                .await
            {
                debug!(node.id = %self.node_id, "Time sync request failed: {}", e);
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => continue,
                response = responses.recv() => {
                    let Some(response) = response else { return };
                    let offset = ClockOffset::from_sample(response.coordinator_time, epoch_seconds());
                    *self.clock.write().await = offset;
                    info!(
                        node.id = %self.node_id,
                        clock.offset = offset.seconds().unwrap_or_default(),
                        "⏱️ Clock synced with coordinator"
                    );
                    return;
                }
            }
        }
    }
}
