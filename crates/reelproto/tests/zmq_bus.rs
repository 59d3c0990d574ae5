//! Hub and spoke over loopback TCP.

use reelproto::{Bus, BusError, PublishOptions, Subscription, Topic, ZmqBus, ZmqRole, ZmqTiming};
use std::time::Duration;
use tokio::time::timeout;

fn fast_timing() -> ZmqTiming {
    ZmqTiming {
        retain_interval: Duration::from_millis(50),
        beacon_interval: Duration::from_millis(100),
        liveness: Duration::from_millis(600),
    }
}

fn hub_role(publish: &str, subscribe: &str) -> ZmqRole {
    ZmqRole::Hub {
        publish: publish.to_string(),
        subscribe: subscribe.to_string(),
    }
}

fn spoke_role(publish: &str, subscribe: &str) -> ZmqRole {
    ZmqRole::Spoke {
        publish: publish.to_string(),
        subscribe: subscribe.to_string(),
    }
}

/// Publish heartbeats from `spoke` until one arrives on `upstream`.
async fn heartbeat_until_heard(spoke: &ZmqBus, upstream: &mut Subscription, patience: Duration) -> String {
    timeout(patience, async {
        loop {
            // Sends fail while the spoke is reconnecting
            let _ = spoke
                .publish(Topic::Heartbeat, "node-a", PublishOptions::default())
                .await;
            if let Ok(Some(msg)) = timeout(Duration::from_millis(100), upstream.recv()).await {
                return msg.payload;
            }
        }
    })
    .await
    .expect("heartbeat should reach the hub")
}

#[tokio::test]
async fn spoke_and_hub_exchange_messages() {
    const HUB_PUB: &str = "tcp://127.0.0.1:45790";
    const HUB_SUB: &str = "tcp://127.0.0.1:45791";

    let hub = ZmqBus::open(hub_role(HUB_PUB, HUB_SUB), fast_timing())
        .await
        .expect("hub should bind");
    let spoke = ZmqBus::open(spoke_role(HUB_PUB, HUB_SUB), fast_timing())
        .await
        .expect("spoke should connect");

    let mut upstream = hub.subscribe(&[Topic::Heartbeat]).await.unwrap();
    let mut downstream = spoke.subscribe(&[Topic::Command]).await.unwrap();

    // PUB/SUB drops until the subscription propagates, so keep sending
    let heartbeat = heartbeat_until_heard(&spoke, &mut upstream, Duration::from_secs(5)).await;
    assert_eq!(heartbeat, "node-a");

    // A retained command is repeated by the hub until cleared
    hub.publish(Topic::Command, "0,1700000000.000000,c-1", PublishOptions::retained())
        .await
        .unwrap();
    let command = timeout(Duration::from_secs(5), downstream.recv())
        .await
        .expect("retained command should be repeated")
        .unwrap();
    assert_eq!(command.topic, Topic::Command);
    assert_eq!(command.payload, "0,1700000000.000000,c-1");

    hub.publish(Topic::Command, "", PublishOptions::retained())
        .await
        .unwrap();
}

#[tokio::test]
async fn spoke_recovers_after_hub_restart() {
    const HUB_PUB: &str = "tcp://127.0.0.1:45792";
    const HUB_SUB: &str = "tcp://127.0.0.1:45793";

    let hub = ZmqBus::open(hub_role(HUB_PUB, HUB_SUB), fast_timing())
        .await
        .expect("hub should bind");
    let spoke = ZmqBus::open(spoke_role(HUB_PUB, HUB_SUB), fast_timing())
        .await
        .expect("spoke should connect");
    let mut downstream = spoke.subscribe(&[Topic::Command]).await.unwrap();

    let mut upstream = hub.subscribe(&[Topic::Heartbeat]).await.unwrap();
    heartbeat_until_heard(&spoke, &mut upstream, Duration::from_secs(5)).await;
    drop(upstream);
    drop(hub);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let hub = timeout(Duration::from_secs(5), async {
        loop {
            match ZmqBus::open(hub_role(HUB_PUB, HUB_SUB), fast_timing()).await {
                Ok(hub) => return hub,
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    })
    .await
    .expect("hub should rebind its ports");

    // Upstream works again once the spoke notices and reconnects
    let mut upstream = hub.subscribe(&[Topic::Heartbeat]).await.unwrap();
    let heartbeat = heartbeat_until_heard(&spoke, &mut upstream, Duration::from_secs(20)).await;
    assert_eq!(heartbeat, "node-a");

    // The subscription taken before the restart still receives
    hub.publish(Topic::Command, "1,1700000000.000000,c-2", PublishOptions::retained())
        .await
        .unwrap();
    let command = timeout(Duration::from_secs(10), downstream.recv())
        .await
        .expect("retained command should reach the reconnected spoke")
        .unwrap();
    assert_eq!(command.payload, "1,1700000000.000000,c-2");
}

#[tokio::test]
async fn spoke_refuses_publishes_while_hub_is_gone() {
    const HUB_PUB: &str = "tcp://127.0.0.1:45794";
    const HUB_SUB: &str = "tcp://127.0.0.1:45795";

    let hub = ZmqBus::open(hub_role(HUB_PUB, HUB_SUB), fast_timing())
        .await
        .expect("hub should bind");
    let spoke = ZmqBus::open(spoke_role(HUB_PUB, HUB_SUB), fast_timing())
        .await
        .expect("spoke should connect");
    drop(hub);

    // No beacons arrive, so the spoke gives up on the link and refuses sends
    let refused = timeout(Duration::from_secs(10), async {
        loop {
            match spoke
                .publish(Topic::Heartbeat, "node-a", PublishOptions::default())
                .await
            {
                Err(BusError::Transport(reason)) => return reason,
                _ => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    })
    .await
    .expect("publishes should fail while reconnecting");
    assert!(refused.contains("reconnecting"), "got {}", refused);
}
