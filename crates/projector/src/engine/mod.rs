//! Media engines: something that can load one file, play, pause and stop it.
//!
//! A node owns two independent engine handles, one for the looping default
//! video and one for commanded videos. Which one may play is decided by the
//! controller, never by the engines.

mod mpv;
mod simulated;

pub use mpv::{MpvEngine, MpvSettings};
pub use simulated::SimulatedEngine;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::EngineError;

#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Load a file paused at its start.
    async fn load(&self, path: &Path) -> Result<(), EngineError>;

    async fn play(&self) -> Result<(), EngineError>;

    async fn set_paused(&self, paused: bool) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;

    async fn is_playing(&self) -> bool;

    /// Fires once each time loaded media reaches its natural end.
    fn end_events(&self) -> broadcast::Receiver<()>;
}

pub type EngineHandle = Arc<dyn MediaEngine>;

/// Poll until the engine's playing state equals `playing`. False on timeout.
pub async fn wait_for_state(
    engine: &dyn MediaEngine,
    playing: bool,
    timeout: Duration,
    poll: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if engine.is_playing().await == playing {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}
