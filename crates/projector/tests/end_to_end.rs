//! Coordinator and nodes talking over one in-memory bus.

use marquee::{Coordinator, CoordinatorSettings};
use projector::{
    ControllerSettings, MediaEngine, NodeRuntime, NodeSettings, PlaybackController, SharedClock,
    SimulatedEngine,
};
use reelproto::{
    Ack, AckStatus, Bus, MediaLibrary, MemoryBus, NodeId, PublishOptions, Topic,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct TestNode {
    id: NodeId,
    clock: SharedClock,
    manual: Arc<SimulatedEngine>,
}

async fn spawn_node(bus: &MemoryBus, media: &Path, name: &str, shutdown: &CancellationToken) -> TestNode {
    let id = NodeId::parse(name).unwrap();
    let looper = Arc::new(SimulatedEngine::new("loop", Duration::from_secs(20)));
    let manual = Arc::new(SimulatedEngine::new("manual", Duration::from_secs(4)));
    let clock = SharedClock::default();
    let controller = Arc::new(PlaybackController::new(
        id.clone(),
        Arc::new(bus.clone()),
        MediaLibrary::scan(media).unwrap(),
        clock.clone(),
        looper,
        manual.clone(),
        ControllerSettings::default(),
    ));
    let runtime = NodeRuntime::new(
        Arc::new(bus.clone()),
        controller,
        clock.clone(),
        NodeSettings::default(),
    );
    tokio::spawn(runtime.run(shutdown.clone()));
    TestNode { id, clock, manual }
}

async fn acks_from(bus: &MemoryBus, node: &NodeId) -> Vec<Ack> {
    bus.published(Topic::Ack)
        .await
        .iter()
        .filter_map(|m| Ack::decode(&m.payload).ok())
        .filter(|ack| &ack.node_id == node)
        .collect()
}

fn media_dir() -> tempfile::TempDir {
    let media = tempfile::tempdir().unwrap();
    for name in ["intro.mp4", "one.mp4", "two.mkv"] {
        std::fs::write(media.path().join(name), b"").unwrap();
    }
    media
}

fn start_coordinator(bus: &MemoryBus, media: &Path, shutdown: &CancellationToken) -> Arc<Coordinator> {
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(bus.clone()),
        MediaLibrary::scan(media).unwrap(),
        CoordinatorSettings::default(),
    ));
    tokio::spawn(coordinator.clone().run(shutdown.clone()));
    coordinator
}

#[tokio::test(start_paused = true)]
async fn every_node_plays_and_acks() {
    let media = media_dir();
    let bus = MemoryBus::new();
    let shutdown = CancellationToken::new();
    let coordinator = start_coordinator(&bus, media.path(), &shutdown);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let a = spawn_node(&bus, media.path(), "node-a", &shutdown).await;
    let b = spawn_node(&bus, media.path(), "node-b", &shutdown).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(coordinator.active_node_count().await, 2);
    assert!(a.clock.read().await.is_synced());
    assert!(b.clock.read().await.is_synced());

    let command_id = coordinator.play(2).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let status = coordinator.command_status(command_id.as_str()).await.unwrap();
    assert!(status.completed);
    assert_eq!(status.success_count, 2);
    assert_eq!(status.error_count, 0);
    assert_eq!(status.expected_responders, 2);

    for node in [&a, &b] {
        assert_eq!(node.manual.loaded().await, Some(media.path().join("two.mkv")));
        // live copies and the retained copy all carry the same id
        assert_eq!(node.manual.start_count().await, 1);
        let acks = acks_from(&bus, &node.id).await;
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].status, AckStatus::Success);
    }
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn late_joiner_inside_persist_window_still_plays() {
    let media = media_dir();
    let bus = MemoryBus::new();
    let shutdown = CancellationToken::new();
    let coordinator = start_coordinator(&bus, media.path(), &shutdown);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let early = spawn_node(&bus, media.path(), "node-early", &shutdown).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let command_id = coordinator.play(1).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let late = spawn_node(&bus, media.path(), "node-late", &shutdown).await;

    // the retained copy is gone by now
    tokio::time::sleep(Duration::from_secs(3)).await;
    let too_late = spawn_node(&bus, media.path(), "node-too-late", &shutdown).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    for node in [&early, &late] {
        assert_eq!(node.manual.loaded().await, Some(media.path().join("one.mp4")));
        let acks = acks_from(&bus, &node.id).await;
        assert_eq!(acks.len(), 1, "{}", node.id);
        assert_eq!(acks[0].command_id, command_id);
        assert_eq!(acks[0].status, AckStatus::Success);
    }
    assert_eq!(too_late.manual.start_count().await, 0);
    assert!(acks_from(&bus, &too_late.id).await.is_empty());

    let status = coordinator.command_status(command_id.as_str()).await.unwrap();
    assert!(status.completed);
    assert_eq!(status.expected_responders, 1);
    assert_eq!(status.success_count, 2);
    shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn malformed_and_empty_commands_are_ignored() {
    let media = media_dir();
    let bus = MemoryBus::new();
    let shutdown = CancellationToken::new();
    let node = spawn_node(&bus, media.path(), "node-a", &shutdown).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for payload in ["", "garbage", "1,notanumber,abc", "1,2"] {
        bus.publish(Topic::Command, payload, PublishOptions::reliable())
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(node.manual.start_count().await, 0);
    assert!(bus.published(Topic::Ack).await.is_empty());
    assert!(!node.manual.is_playing().await);
    shutdown.cancel();
}
