//! Coordinator runtime: owns membership, the command table and the dispatcher,
//! and routes everything the nodes send.

use reelconf::TimingConfig;
use reelproto::{
    epoch_seconds, Ack, Bus, BusError, BusMessage, CommandId, Heartbeat, MediaLibrary,
    PublishOptions, RetryPolicy, TimeSyncRequest, TimeSyncResponse, Topic,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::{CommandStatus, CommandTable};
use crate::dispatch::{DispatchSettings, Dispatcher};
use crate::membership::MembershipTracker;
use crate::CoordinatorError;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub heartbeat_timeout: Duration,
    pub ack_timeout: Duration,
    pub dispatch: DispatchSettings,
}

impl CoordinatorSettings {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            heartbeat_timeout: timing.heartbeat_timeout(),
            ack_timeout: timing.ack_timeout(),
            dispatch: DispatchSettings {
                lead_time: timing.lead_time(),
                publish: RetryPolicy::new(timing.publish_attempts, timing.publish_delay()),
                retain_clear: timing.retain_clear(),
            },
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_timing(&TimingConfig::default())
    }
}

pub struct Coordinator {
    bus: Arc<dyn Bus>,
    membership: Arc<MembershipTracker>,
    commands: Arc<CommandTable>,
    dispatcher: Dispatcher,
    library: RwLock<MediaLibrary>,
}

impl Coordinator {
    pub fn new(bus: Arc<dyn Bus>, library: MediaLibrary, settings: CoordinatorSettings) -> Self {
        let membership = Arc::new(MembershipTracker::new(settings.heartbeat_timeout));
        let commands = Arc::new(CommandTable::new(settings.ack_timeout));
        let dispatcher = Dispatcher::new(
            bus.clone(),
            membership.clone(),
            commands.clone(),
            settings.dispatch,
        );
        Self {
            bus,
            membership,
            commands,
            dispatcher,
            library: RwLock::new(library),
        }
    }

    pub fn membership(&self) -> &Arc<MembershipTracker> {
        &self.membership
    }

    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    /// Rescan the media directory. A failed scan keeps the previous listing.
    pub async fn videos(&self) -> MediaLibrary {
        let root = self.library.read().await.root().to_path_buf();
        match tokio::task::spawn_blocking(move || MediaLibrary::scan(root)).await {
            Ok(Ok(fresh)) => {
                *self.library.write().await = fresh.clone();
                fresh
            }
            Ok(Err(e)) => {
                warn!("Media rescan failed, keeping previous listing: {}", e);
                self.library.read().await.clone()
            }
            Err(e) => {
                warn!("Media rescan task failed: {}", e);
                self.library.read().await.clone()
            }
        }
    }

    /// Broadcast a play command for `video_index`.
    pub async fn play(&self, video_index: i64) -> Result<CommandId, CoordinatorError> {
        let count = self.videos().await.len();
        self.dispatcher.dispatch(video_index, count).await
    }

    pub async fn command_status(&self, command_id: &str) -> Result<CommandStatus, CoordinatorError> {
        let id = CommandId::parse(command_id)
            .map_err(|_| CoordinatorError::CommandNotFound(command_id.to_string()))?;
        self.commands.status(&id).await
    }

    pub async fn active_node_count(&self) -> usize {
        self.membership.active_count().await
    }

    /// Consume node traffic until `shutdown` fires. Also runs the sweepers.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), BusError> {
        let mut inbound = self
            .bus
            .subscribe(&[Topic::Heartbeat, Topic::Ack, Topic::TimeSyncRequest])
            .await?;

        let sweep_every = (self.membership.heartbeat_timeout() / 2).max(Duration::from_millis(100));
        let sweeper = self
            .membership
            .clone()
            .spawn_sweeper(sweep_every, shutdown.clone());
        let reaper = self
            .commands
            .clone()
            .spawn_reaper(self.commands.ack_timeout(), shutdown.clone());

        info!("🎞️  Coordinator listening for nodes");

        loop {
            tokio::select! {
                message = inbound.recv() => {
                    match message {
                        Some(message) => self.route(message).await,
                        None => {
                            warn!("Bus subscription closed");
                            break;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        sweeper.abort();
        reaper.abort();
        info!("Coordinator stopped");
        Ok(())
    }

    async fn route(&self, message: BusMessage) {
        match message.topic {
            Topic::Heartbeat => match Heartbeat::decode(&message.payload) {
                Ok(heartbeat) => {
                    self.membership.record_heartbeat(&heartbeat.node_id).await;
                }
                Err(e) => debug!("Dropping malformed heartbeat {:?}: {}", message.payload, e),
            },
            Topic::Ack => match Ack::decode(&message.payload) {
                Ok(ack) => {
                    self.commands.ingest_ack(&ack).await;
                }
                Err(e) => warn!("Dropping malformed ack {:?}: {}", message.payload, e),
            },
            Topic::TimeSyncRequest => {
                if let Ok(request) = TimeSyncRequest::decode(&message.payload) {
                    debug!(node.id = %request.node_id, "Time sync request");
                }
                let response = TimeSyncResponse {
                    coordinator_time: epoch_seconds(),
                };
                if let Err(e) = self
                    .bus
                    .publish(
                        Topic::TimeSyncResponse,
                        &response.encode(),
                        PublishOptions::reliable(),
                    )
                    .await
                {
                    warn!("Failed to answer time sync request: {}", e);
                }
            }
            other => debug!(topic = %other, "Ignoring message on unexpected topic"),
        }
    }
}
