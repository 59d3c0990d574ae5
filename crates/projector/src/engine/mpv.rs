//! mpv driven over its JSON IPC socket.
//!
//! One mpv process per engine, started idle. Requests carry a `request_id`
//! and are matched to replies by the reader task; events update the cached
//! playback state so `is_playing` never round-trips to the player.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::MediaEngine;
use crate::EngineError;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct MpvSettings {
    pub binary: String,
    pub args: Vec<String>,
    pub socket_path: PathBuf,
    pub startup_timeout: Duration,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

#[derive(Debug, Default)]
struct Observed {
    file_loaded: AtomicBool,
    paused: AtomicBool,
}

pub struct MpvEngine {
    name: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: Pending,
    next_id: AtomicU64,
    observed: Arc<Observed>,
    ends: broadcast::Sender<()>,
    reader: JoinHandle<()>,
    _child: Child,
}

impl MpvEngine {
    /// Start mpv idle and connect to its IPC socket.
    pub async fn launch(name: impl Into<String>, settings: &MpvSettings) -> Result<Self, EngineError> {
        let name = name.into();
        let _ = tokio::fs::remove_file(&settings.socket_path).await;

        let child = Command::new(&settings.binary)
            .arg("--idle=yes")
            .arg("--no-terminal")
            .arg("--keep-open=no")
            .arg(format!("--input-ipc-server={}", settings.socket_path.display()))
            .args(&settings.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(EngineError::Spawn)?;

        let stream = connect(&settings.socket_path, settings.startup_timeout).await?;
        let (read_half, write_half) = stream.into_split();

        let pending: Pending = Arc::default();
        let observed = Arc::new(Observed::default());
        observed.paused.store(true, Ordering::SeqCst);
        let (ends, _) = broadcast::channel(16);

        let reader = tokio::spawn(read_loop(
            name.clone(),
            BufReader::new(read_half),
            pending.clone(),
            observed.clone(),
            ends.clone(),
        ));

        let engine = Self {
            name,
            writer: Mutex::new(write_half),
            pending,
            next_id: AtomicU64::new(1),
            observed,
            ends,
            reader,
            _child: child,
        };
        engine.command(json!(["observe_property", 1, "pause"])).await?;
        info!(engine = %engine.name, socket = %settings.socket_path.display(), "🎬 mpv ready");
        Ok(engine)
    }

    async fn command(&self, args: Value) -> Result<Value, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut line = json!({ "command": args, "request_id": id }).to_string();
        line.push('\n');
        let written = {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(message))) => Err(EngineError::Command(message)),
            Ok(Err(_)) => Err(EngineError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(EngineError::Timeout)
            }
        }
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn connect(path: &Path, timeout: Duration) -> Result<UnixStream, EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() >= deadline => return Err(EngineError::Io(e)),
            Err(_) => tokio::time::sleep(CONNECT_POLL).await,
        }
    }
}

async fn read_loop(
    name: String,
    mut reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    pending: Pending,
    observed: Arc<Observed>,
    ends: broadcast::Sender<()>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(engine = %name, error = %e, "mpv IPC read failed");
                break;
            }
        }
        let Ok(msg) = serde_json::from_str::<Value>(line.trim()) else {
            debug!(engine = %name, line = %line.trim(), "Unparseable mpv line");
            continue;
        };

        if let Some(id) = msg.get("request_id").and_then(Value::as_u64) {
            if let Some(tx) = pending.lock().await.remove(&id) {
                let reply = match msg.get("error").and_then(Value::as_str) {
                    Some("success") | None => Ok(msg.get("data").cloned().unwrap_or(Value::Null)),
                    Some(other) => Err(other.to_string()),
                };
                let _ = tx.send(reply);
            }
            continue;
        }

        match msg.get("event").and_then(Value::as_str) {
            Some("file-loaded") => observed.file_loaded.store(true, Ordering::SeqCst),
            Some("end-file") => {
                observed.file_loaded.store(false, Ordering::SeqCst);
                if msg.get("reason").and_then(Value::as_str) == Some("eof") {
                    debug!(engine = %name, "Media ended");
                    let _ = ends.send(());
                }
            }
            Some("property-change") if msg.get("name").and_then(Value::as_str) == Some("pause") => {
                let paused = msg.get("data").and_then(Value::as_bool).unwrap_or(true);
                observed.paused.store(paused, Ordering::SeqCst);
            }
            _ => {}
        }
    }
    observed.file_loaded.store(false, Ordering::SeqCst);
    pending.lock().await.clear();
}

#[async_trait]
impl MediaEngine for MpvEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, path: &Path) -> Result<(), EngineError> {
        self.command(json!(["set_property", "pause", true])).await?;
        self.command(json!(["loadfile", path.to_string_lossy(), "replace"]))
            .await?;
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.set_paused(false).await
    }

    async fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        self.command(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.command(json!(["stop"])).await?;
        self.observed.file_loaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        self.observed.file_loaded.load(Ordering::SeqCst) && !self.observed.paused.load(Ordering::SeqCst)
    }

    fn end_events(&self) -> broadcast::Receiver<()> {
        self.ends.subscribe()
    }
}
