//! ZMQ PUB/SUB transport between the coordinator (hub) and the nodes (spokes).
//!
//! The hub binds a PUB socket for downstream topics and a SUB socket for
//! upstream topics; spokes connect to both. Every message is two frames,
//! `[topic, payload]`. PUB/SUB has no broker-side retention, so the hub keeps
//! retained payloads itself and re-publishes them on a short interval until
//! they are cleared. A node that connects inside that window still receives
//! the message.
//!
//! The hub also sends a beacon frame on a fixed interval. `zeromq` sockets do
//! not reconnect once their peer is gone, so a spoke that hears nothing for
//! the liveness window drops both sockets and connects again. Subscribers
//! keep their receivers across reconnects.
//!
//! A single task owns the sockets of each direction (hub) or both sockets
//! (spoke). Publishes go through an mpsc channel with a oneshot reply so
//! callers learn whether the send happened.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use super::{Bus, BusError, BusMessage, PublishOptions, Subscribers, Subscription};
use crate::retry::Backoff;
use crate::Topic;

/// First frame of the hub's keepalive. Never delivered to subscribers.
const BEACON: &str = "bus/beacon";

/// Intervals of the ZMQ transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZmqTiming {
    /// How often the hub repeats retained payloads.
    pub retain_interval: Duration,
    /// How often the hub sends a beacon.
    pub beacon_interval: Duration,
    /// Silence after which a spoke reconnects.
    pub liveness: Duration,
}

impl Default for ZmqTiming {
    fn default() -> Self {
        Self {
            retain_interval: Duration::from_millis(250),
            beacon_interval: Duration::from_secs(1),
            liveness: Duration::from_secs(4),
        }
    }
}

/// Which side of the hub/spoke layout this process is.
#[derive(Debug, Clone)]
pub enum ZmqRole {
    /// Bind both sockets. `publish` carries downstream topics, `subscribe` receives upstream ones.
    Hub { publish: String, subscribe: String },
    /// Connect to a hub's `publish` and `subscribe` endpoints.
    Spoke { publish: String, subscribe: String },
}

struct Outbound {
    topic: Topic,
    payload: String,
    retain: bool,
    reply: oneshot::Sender<Result<(), BusError>>,
}

struct TaskSet(Vec<JoinHandle<()>>);

impl Drop for TaskSet {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Bus over ZMQ sockets. Clones share the sockets.
#[derive(Clone)]
pub struct ZmqBus {
    outbound: mpsc::Sender<Outbound>,
    subscribers: Arc<Mutex<Subscribers>>,
    retained: Arc<Mutex<HashMap<Topic, String>>>,
    _tasks: Arc<TaskSet>,
}

impl ZmqBus {
    /// Open sockets for `role`. A spoke waits here until the hub is reachable.
    pub async fn open(role: ZmqRole, timing: ZmqTiming) -> Result<Self, BusError> {
        let (tx, rx) = mpsc::channel(256);
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let retained = Arc::new(Mutex::new(HashMap::new()));

        let tasks = match role {
            ZmqRole::Hub { publish, subscribe } => {
                let mut pub_socket = PubSocket::new();
                let mut sub_socket = SubSocket::new();
                pub_socket
                    .bind(&publish)
                    .await
                    .map_err(|e| BusError::Transport(format!("bind {}: {}", publish, e)))?;
                sub_socket
                    .bind(&subscribe)
                    .await
                    .map_err(|e| BusError::Transport(format!("bind {}: {}", subscribe, e)))?;
                sub_socket
                    .subscribe("")
                    .await
                    .map_err(|e| BusError::Transport(format!("subscribe: {}", e)))?;
                info!("📡 Bus hub listening: PUB {} / SUB {}", publish, subscribe);

                vec![
                    tokio::spawn(run_hub_writer(pub_socket, rx, retained.clone(), timing)),
                    tokio::spawn(run_hub_reader(sub_socket, subscribers.clone())),
                ]
            }
            ZmqRole::Spoke { publish, subscribe } => {
                let link = SpokeLink {
                    publish,
                    subscribe,
                    liveness: timing.liveness,
                };
                let sockets = link.connect_with_backoff().await;
                info!("📡 Bus spoke connected: SUB {} / PUB {}", link.publish, link.subscribe);
                vec![tokio::spawn(link.run(sockets, rx, subscribers.clone()))]
            }
        };

        Ok(Self {
            outbound: tx,
            subscribers,
            retained,
            _tasks: Arc::new(TaskSet(tasks)),
        })
    }
}

fn frame(topic: &str, payload: &str) -> ZmqMessage {
    let mut msg = ZmqMessage::from(topic.to_string());
    msg.push_back(Bytes::from(payload.to_string()));
    msg
}

enum Inbound {
    Message(BusMessage),
    Beacon,
    Malformed(String),
}

fn decode(msg: ZmqMessage) -> Inbound {
    let frames = msg.into_vec();
    if frames.len() != 2 {
        return Inbound::Malformed(format!("{} frames", frames.len()));
    }
    let topic = match std::str::from_utf8(&frames[0]) {
        Ok(BEACON) => return Inbound::Beacon,
        Ok(name) => match name.parse::<Topic>() {
            Ok(topic) => topic,
            Err(_) => return Inbound::Malformed(format!("unknown topic {:?}", name)),
        },
        Err(_) => return Inbound::Malformed("non-UTF-8 topic".to_string()),
    };
    match String::from_utf8(frames[1].to_vec()) {
        Ok(payload) => Inbound::Message(BusMessage {
            topic,
            payload,
            retained: false,
        }),
        Err(_) => Inbound::Malformed(format!("non-UTF-8 payload on {}", topic)),
    }
}

async fn run_hub_writer(
    mut socket: PubSocket,
    mut rx: mpsc::Receiver<Outbound>,
    retained: Arc<Mutex<HashMap<Topic, String>>>,
    timing: ZmqTiming,
) {
    let mut repeat = tokio::time::interval(timing.retain_interval);
    repeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut beacon = tokio::time::interval(timing.beacon_interval);
    beacon.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            request = rx.recv() => {
                let Some(request) = request else { break };
                if request.retain {
                    let mut store = retained.lock().await;
                    if request.payload.is_empty() {
                        store.remove(&request.topic);
                    } else {
                        store.insert(request.topic, request.payload.clone());
                    }
                }
                let result = socket
                    .send(frame(request.topic.as_str(), &request.payload))
                    .await
                    .map_err(|e| BusError::Publish {
                        topic: request.topic,
                        reason: e.to_string(),
                    });
                let _ = request.reply.send(result);
            }
            _ = repeat.tick() => {
                let snapshot: Vec<(Topic, String)> = retained
                    .lock()
                    .await
                    .iter()
                    .map(|(t, p)| (*t, p.clone()))
                    .collect();
                for (topic, payload) in snapshot {
                    if let Err(e) = socket.send(frame(topic.as_str(), &payload)).await {
                        warn!(%topic, "retained re-publish failed: {}", e);
                    }
                }
            }
            _ = beacon.tick() => {
                if let Err(e) = socket.send(frame(BEACON, "")).await {
                    debug!("beacon send failed: {}", e);
                }
            }
        }
    }

    debug!("bus writer shutting down");
}

async fn run_hub_reader(mut socket: SubSocket, subscribers: Arc<Mutex<Subscribers>>) {
    loop {
        let msg = match socket.recv().await {
            Ok(msg) => msg,
            Err(e) => {
                warn!("bus receive failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        match decode(msg) {
            Inbound::Message(message) => subscribers.lock().await.deliver(&message),
            Inbound::Beacon => {}
            Inbound::Malformed(reason) => warn!("dropping message: {}", reason),
        }
    }
}

/// Both sockets of a spoke, rebuilt together.
struct SpokeSockets {
    publisher: PubSocket,
    subscriber: SubSocket,
}

struct SpokeLink {
    publish: String,
    subscribe: String,
    liveness: Duration,
}

impl SpokeLink {
    async fn connect(&self) -> Result<SpokeSockets, BusError> {
        let mut subscriber = SubSocket::new();
        subscriber
            .connect(&self.publish)
            .await
            .map_err(|e| BusError::Transport(format!("connect {}: {}", self.publish, e)))?;
        subscriber
            .subscribe("")
            .await
            .map_err(|e| BusError::Transport(format!("subscribe: {}", e)))?;
        let mut publisher = PubSocket::new();
        publisher
            .connect(&self.subscribe)
            .await
            .map_err(|e| BusError::Transport(format!("connect {}: {}", self.subscribe, e)))?;
        Ok(SpokeSockets {
            publisher,
            subscriber,
        })
    }

    /// Keep trying to connect, capped exponential backoff between attempts.
    async fn connect_with_backoff(&self) -> SpokeSockets {
        let backoff = reconnect_backoff();
        let mut attempt = 0u32;
        loop {
            match self.connect().await {
                Ok(sockets) => return sockets,
                Err(e) => {
                    attempt += 1;
                    let delay = backoff.for_attempt(attempt);
                    warn!("{} (attempt {}), retrying in {:?}", e, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Reconnect while refusing publishes. `None` once the bus handle is gone.
    async fn reconnect(&self, rx: &mut mpsc::Receiver<Outbound>) -> Option<SpokeSockets> {
        let connecting = self.connect_with_backoff();
        tokio::pin!(connecting);
        loop {
            tokio::select! {
                sockets = &mut connecting => return Some(sockets),
                request = rx.recv() => {
                    let request = request?;
                    let _ = request.reply.send(Err(BusError::Transport(
                        "reconnecting to hub".to_string(),
                    )));
                }
            }
        }
    }

    async fn run(
        self,
        mut sockets: SpokeSockets,
        mut rx: mpsc::Receiver<Outbound>,
        subscribers: Arc<Mutex<Subscribers>>,
    ) {
        let mut last_heard = Instant::now();
        loop {
            let alive = tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else { break };
                    let result = sockets
                        .publisher
                        .send(frame(request.topic.as_str(), &request.payload))
                        .await
                        .map_err(|e| BusError::Publish {
                            topic: request.topic,
                            reason: e.to_string(),
                        });
                    let ok = result.is_ok();
                    let _ = request.reply.send(result);
                    ok
                }
                msg = sockets.subscriber.recv() => match msg {
                    Ok(msg) => {
                        last_heard = Instant::now();
                        match decode(msg) {
                            Inbound::Message(message) => subscribers.lock().await.deliver(&message),
                            Inbound::Beacon => {}
                            Inbound::Malformed(reason) => warn!("dropping message: {}", reason),
                        }
                        true
                    }
                    Err(e) => {
                        warn!("bus receive failed: {}", e);
                        false
                    }
                },
                _ = tokio::time::sleep_until(last_heard + self.liveness) => {
                    warn!("No traffic from hub for {:?}", self.liveness);
                    false
                }
            };

            if !alive {
                drop(sockets);
                info!("📡 Reconnecting to hub");
                sockets = match self.reconnect(&mut rx).await {
                    Some(sockets) => sockets,
                    None => break,
                };
                last_heard = Instant::now();
                info!("📡 Bus spoke reconnected: SUB {} / PUB {}", self.publish, self.subscribe);
            }
        }

        debug!("bus spoke shutting down");
    }
}

fn reconnect_backoff() -> Backoff {
    Backoff::new(Duration::from_millis(250), Duration::from_secs(5))
}

#[async_trait]
impl Bus for ZmqBus {
    async fn publish(
        &self,
        topic: Topic,
        payload: &str,
        options: PublishOptions,
    ) -> Result<(), BusError> {
        let (reply, result) = oneshot::channel();
        self.outbound
            .send(Outbound {
                topic,
                payload: payload.to_string(),
                retain: options.retain,
                reply,
            })
            .await
            .map_err(|_| BusError::Closed)?;
        result.await.map_err(|_| BusError::Closed)?
    }

    async fn subscribe(&self, topics: &[Topic]) -> Result<Subscription, BusError> {
        let (tx, rx) = self.subscribers.lock().await.add(topics);
        let retained = self.retained.lock().await;
        for topic in topics {
            if let Some(payload) = retained.get(topic) {
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
