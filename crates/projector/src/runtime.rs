//! Node runtime: heartbeats, clock sync, the loop driver and command routing.

use reelconf::TimingConfig;
use reelproto::{
    Bus, BusError, BusMessage, CommandId, Heartbeat, NodeId, PlayCommand, PublishOptions,
    TimeSyncResponse, Topic,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{ClockSync, SharedClock};
use crate::controller::PlaybackController;
use crate::loop_driver::{LoopDriver, LoopSettings};

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub heartbeat_interval: Duration,
    pub sync_interval: Duration,
    /// How long an executed command id is remembered.
    pub dedupe_window: Duration,
    pub looping: LoopSettings,
}

impl NodeSettings {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            heartbeat_interval: timing.heartbeat_interval(),
            sync_interval: timing.sync_interval(),
            dedupe_window: Duration::from_secs(60),
            looping: LoopSettings::default(),
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self::from_timing(&TimingConfig::default())
    }
}

/// Command ids seen recently. Each command arrives several times.
#[derive(Debug)]
struct RecentCommands {
    window: Duration,
    seen: HashMap<CommandId, Instant>,
}

impl RecentCommands {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// True the first time `id` shows up inside the window.
    fn first_sighting(&mut self, id: &CommandId) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.seen.retain(|_, at| now.duration_since(*at) <= window);
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.clone(), now);
        true
    }
}

pub struct NodeRuntime {
    node_id: NodeId,
    bus: Arc<dyn Bus>,
    controller: Arc<PlaybackController>,
    clock: SharedClock,
    settings: NodeSettings,
}

impl NodeRuntime {
    pub fn new(
        bus: Arc<dyn Bus>,
        controller: Arc<PlaybackController>,
        clock: SharedClock,
        settings: NodeSettings,
    ) -> Self {
        Self {
            node_id: controller.node_id().clone(),
            bus,
            controller,
            clock,
            settings,
        }
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    /// Run until `shutdown` fires, then stop both engines.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BusError> {
        let mut inbound = self
            .bus
            .subscribe(&[Topic::Command, Topic::TimeSyncResponse])
            .await?;

        let tasks = shutdown.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.bus.clone(),
            self.node_id.clone(),
            self.settings.heartbeat_interval,
            tasks.clone(),
        ));

        let (sync_tx, sync_rx) = mpsc::channel(4);
        let sync = tokio::spawn(
            ClockSync::new(
                self.bus.clone(),
                self.node_id.clone(),
                self.clock.clone(),
                self.settings.sync_interval,
            )
            .run(sync_rx, tasks.clone()),
        );

        let looper = tokio::spawn(
            LoopDriver::new(self.controller.clone(), self.settings.looping.clone())
                .run(tasks.clone()),
        );

        info!(node.id = %self.node_id, "📽️ Node online");

        let mut recent = RecentCommands::new(self.settings.dedupe_window);
        loop {
            tokio::select! {
                message = inbound.recv() => {
                    match message {
                        Some(message) => self.route(message, &mut recent, &sync_tx).await,
                        None => {
                            warn!(node.id = %self.node_id, "Bus subscription closed");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        tasks.cancel();
        self.controller.shutdown().await;
        for task in [heartbeat, sync, looper] {
            let _ = task.await;
        }
        info!(node.id = %self.node_id, "Node stopped");
        Ok(())
    }

    async fn route(
        &self,
        message: BusMessage,
        recent: &mut RecentCommands,
        sync_tx: &mpsc::Sender<TimeSyncResponse>,
    ) {
        match message.topic {
            Topic::Command => {
                // Retained-copy clears arrive as empty payloads
                if message.payload.trim().is_empty() {
                    return;
                }
                let command = match PlayCommand::decode(&message.payload) {
                    Ok(command) => command,
                    Err(e) => {
                        warn!(node.id = %self.node_id, "Dropping malformed command {:?}: {}", message.payload, e);
                        return;
                    }
                };
                if !recent.first_sighting(&command.command_id) {
                    debug!(node.id = %self.node_id, command.id = %command.command_id, "Duplicate command ignored");
                    return;
                }
                debug!(
                    node.id = %self.node_id,
                    command.id = %command.command_id,
                    retained = message.retained,
                    "Command received"
                );
                let session = self.controller.begin_manual(command).await;
                let controller = self.controller.clone();
                tokio::spawn(async move {
                    controller.run_session(session).await;
                });
            }
            Topic::TimeSyncResponse => {
                if self.clock.read().await.is_synced() {
                    return;
                }
                match TimeSyncResponse::decode(&message.payload) {
                    Ok(response) => {
                        let _ = sync_tx.try_send(response);
                    }
                    Err(e) => debug!(node.id = %self.node_id, "Dropping malformed time response: {}", e),
                }
            }
            other => debug!(topic = %other, "Ignoring message on unexpected topic"),
        }
    }
}

async fn heartbeat_loop(
    bus: Arc<dyn Bus>,
    node_id: NodeId,
    every: Duration,
    shutdown: CancellationToken,
) {
    let payload = Heartbeat {
        node_id: node_id.clone(),
    }
    .encode();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = bus.publish(Topic::Heartbeat, &payload, PublishOptions::default()).await {
                    debug!(node.id = %node_id, "Heartbeat publish failed: {}", e);
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
