//! Coordinator scenarios driven through the in-memory bus, with simulated nodes.

use marquee::{CommandStatus, Coordinator, CoordinatorError, CoordinatorSettings};
use reelproto::{
    Ack, Bus, CommandId, MediaLibrary, MemoryBus, NodeId, PlayCommand, PublishOptions,
    TimeSyncResponse, Topic,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Harness {
    bus: MemoryBus,
    coordinator: Arc<Coordinator>,
    shutdown: CancellationToken,
    media: tempfile::TempDir,
}

impl Harness {
    async fn start(videos: usize) -> Self {
        let media = tempfile::tempdir().unwrap();
        for i in 0..videos {
            std::fs::write(media.path().join(format!("clip{:02}.mp4", i)), b"").unwrap();
        }

        let bus = MemoryBus::new();
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(bus.clone()),
            MediaLibrary::scan(media.path()).unwrap(),
            CoordinatorSettings::default(),
        ));
        let shutdown = CancellationToken::new();
        tokio::spawn(coordinator.clone().run(shutdown.clone()));
        // let the router subscribe
        tokio::time::sleep(Duration::from_millis(10)).await;

        Self {
            bus,
            coordinator,
            shutdown,
            media,
        }
    }

    async fn heartbeat(&self, node: &str) {
        self.bus
            .publish(Topic::Heartbeat, node, PublishOptions::default())
            .await
            .unwrap();
    }

    async fn ack(&self, ack: Ack) {
        self.bus
            .publish(Topic::Ack, &ack.encode(), PublishOptions::reliable())
            .await
            .unwrap();
    }

    async fn status(&self, id: &CommandId) -> CommandStatus {
        self.coordinator.command_status(id.as_str()).await.unwrap()
    }

    /// Poll until the router has caught up.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn node(s: &str) -> NodeId {
    NodeId::parse(s).unwrap()
}

#[tokio::test(start_paused = true)]
async fn happy_path_three_nodes() {
    let h = Harness::start(3).await;
    for n in ["n1", "n2", "n3"] {
        h.heartbeat(n).await;
    }
    h.settle().await;
    assert_eq!(h.coordinator.active_node_count().await, 3);

    let id = h.coordinator.play(2).await.unwrap();
    let sent = h.bus.published(Topic::Command).await;
    let cmd = PlayCommand::decode(&sent[0].payload).unwrap();
    assert_eq!(cmd.video_index, 2);

    for n in ["n1", "n2", "n3"] {
        h.ack(Ack::success(node(n), id.clone())).await;
    }
    h.settle().await;

    let status = h.status(&id).await;
    assert!(status.completed);
    assert_eq!(status.success_count, 3);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.expected_responders, 3);
    assert!(status.elapsed_seconds < 5.0);
}

#[tokio::test(start_paused = true)]
async fn partial_ack_completes_at_timeout() {
    let h = Harness::start(1).await;
    h.heartbeat("n1").await;
    h.heartbeat("n2").await;
    h.settle().await;

    let id = h.coordinator.play(0).await.unwrap();
    h.ack(Ack::success(node("n1"), id.clone())).await;
    h.settle().await;

    let status = h.status(&id).await;
    assert!(!status.completed);
    assert_eq!(status.total_responses, 1);

    tokio::time::sleep(Duration::from_millis(5100)).await;
    let status = h.status(&id).await;
    assert!(status.completed);
    assert_eq!(status.total_responses, 1);
    assert_eq!(status.expected_responders, 2);
}

#[tokio::test(start_paused = true)]
async fn node_error_is_reported() {
    let h = Harness::start(2).await;
    h.heartbeat("n1").await;
    h.heartbeat("n2").await;
    h.settle().await;

    let id = h.coordinator.play(1).await.unwrap();
    h.ack(Ack::success(node("n1"), id.clone())).await;
    h.ack(Ack::error(node("n2"), id.clone(), "file missing")).await;
    h.settle().await;

    let status = h.status(&id).await;
    assert!(status.completed);
    assert_eq!(status.success_count, 1);
    assert_eq!(status.error_count, 1);
    assert_eq!(status.failures[0].detail.as_deref(), Some("file missing"));
}

#[tokio::test(start_paused = true)]
async fn no_receivers_after_heartbeats_stop() {
    let h = Harness::start(2).await;
    h.heartbeat("n1").await;
    h.settle().await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.coordinator.active_node_count().await, 0);

    let err = h.coordinator.play(0).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NoReceivers));
    assert!(h.bus.published(Topic::Command).await.is_empty());
    assert!(h.coordinator.commands().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn expected_responders_fixed_at_dispatch() {
    let h = Harness::start(1).await;
    h.heartbeat("n1").await;
    h.heartbeat("n2").await;
    h.settle().await;

    let id = h.coordinator.play(0).await.unwrap();
    h.heartbeat("n3").await;
    h.settle().await;
    assert_eq!(h.coordinator.active_node_count().await, 3);

    h.ack(Ack::success(node("n1"), id.clone())).await;
    h.ack(Ack::success(node("n3"), id.clone())).await;
    h.settle().await;

    let status = h.status(&id).await;
    assert_eq!(status.expected_responders, 2);
    assert!(status.completed);
}

#[tokio::test(start_paused = true)]
async fn repeated_acks_are_idempotent() {
    let h = Harness::start(1).await;
    h.heartbeat("n1").await;
    h.heartbeat("n2").await;
    h.settle().await;

    let id = h.coordinator.play(0).await.unwrap();
    for _ in 0..3 {
        h.ack(Ack::success(node("n1"), id.clone())).await;
    }
    h.settle().await;

    let status = h.status(&id).await;
    assert_eq!(status.total_responses, 1);
    assert!(!status.completed);
}

#[tokio::test(start_paused = true)]
async fn commands_are_reaped_after_twice_the_timeout() {
    let h = Harness::start(1).await;
    h.heartbeat("n1").await;
    h.settle().await;

    let id = h.coordinator.play(0).await.unwrap();
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert!(matches!(
        h.coordinator.command_status(id.as_str()).await,
        Err(CoordinatorError::CommandNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn answers_time_sync_requests() {
    let h = Harness::start(0).await;
    let mut responses = h.bus.subscribe(&[Topic::TimeSyncResponse]).await.unwrap();

    h.bus
        .publish(Topic::TimeSyncRequest, "n1", PublishOptions::reliable())
        .await
        .unwrap();

    let msg = responses.recv().await.unwrap();
    let response = TimeSyncResponse::decode(&msg.payload).unwrap();
    assert!(response.coordinator_time > 1_577_836_800.0);
}

#[tokio::test(start_paused = true)]
async fn malformed_traffic_is_dropped() {
    let h = Harness::start(1).await;
    h.bus
        .publish(Topic::Heartbeat, "", PublishOptions::default())
        .await
        .unwrap();
    h.bus
        .publish(Topic::Heartbeat, "bad:id", PublishOptions::default())
        .await
        .unwrap();
    h.bus
        .publish(Topic::Ack, "garbage", PublishOptions::reliable())
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(h.coordinator.active_node_count().await, 0);

    // Router is still alive
    h.heartbeat("n1").await;
    h.settle().await;
    assert_eq!(h.coordinator.active_node_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn listing_tracks_the_media_directory() {
    let h = Harness::start(2).await;
    std::fs::write(h.media.path().join("clip00b.mp4"), b"").unwrap();

    let library = h.coordinator.videos().await;
    assert_eq!(library.names(), ["clip00.mp4", "clip00b.mp4", "clip01.mp4"]);

    // A directory that cannot be read leaves the last listing in place
    std::fs::remove_dir_all(h.media.path()).unwrap();
    assert_eq!(h.coordinator.videos().await.len(), 3);

    h.heartbeat("n1").await;
    h.settle().await;
    assert!(h.coordinator.play(2).await.is_ok());
}
