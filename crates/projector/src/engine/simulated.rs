//! Engine with no output. Plays "media" of a fixed length on the tokio clock.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::debug;

use super::MediaEngine;
use crate::EngineError;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    /// Playback counts from `since` (later than now while starting up).
    Playing { since: Instant, offset: Duration },
    Paused { offset: Duration },
    /// Accepted `play` but never started.
    Stalled,
}

#[derive(Debug)]
struct SimState {
    loaded: Option<PathBuf>,
    phase: Phase,
    /// Bumped on every transition so stale end timers do nothing.
    epoch: u64,
    fail_starts: u32,
    hang_loads: u32,
    starts: u32,
    history: Vec<PathBuf>,
}

pub struct SimulatedEngine {
    name: String,
    media_length: Duration,
    startup_delay: Duration,
    state: Arc<Mutex<SimState>>,
    ends: broadcast::Sender<()>,
}

impl SimulatedEngine {
    pub fn new(name: impl Into<String>, media_length: Duration) -> Self {
        let (ends, _) = broadcast::channel(16);
        Self {
            name: name.into(),
            media_length,
            startup_delay: Duration::ZERO,
            state: Arc::new(Mutex::new(SimState {
                loaded: None,
                phase: Phase::Idle,
                epoch: 0,
                fail_starts: 0,
                hang_loads: 0,
                starts: 0,
                history: Vec::new(),
            })),
            ends,
        }
    }

    /// Time between `play` and the engine reporting playing.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// The next `n` calls to `play` are accepted but never start.
    pub async fn fail_next_starts(&self, n: u32) {
        self.state.lock().await.fail_starts = n;
    }

    /// The next `n` calls to `load` never return, like a wedged player.
    pub async fn hang_next_loads(&self, n: u32) {
        self.state.lock().await.hang_loads = n;
    }

    /// How many times `play` was called.
    pub async fn start_count(&self) -> u32 {
        self.state.lock().await.starts
    }

    pub async fn loaded(&self) -> Option<PathBuf> {
        self.state.lock().await.loaded.clone()
    }

    /// Every file ever loaded, oldest first.
    pub async fn load_history(&self) -> Vec<PathBuf> {
        self.state.lock().await.history.clone()
    }

    fn position(&self, phase: Phase, now: Instant) -> Duration {
        match phase {
            Phase::Playing { since, offset } => offset + now.saturating_duration_since(since),
            Phase::Paused { offset } => offset,
            Phase::Idle | Phase::Stalled => Duration::ZERO,
        }
    }

    fn arm_end_timer(&self, epoch: u64, fires_in: Duration) {
        let state = self.state.clone();
        let ends = self.ends.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            tokio::time::sleep(fires_in).await;
            let mut state = state.lock().await;
            if state.epoch == epoch {
                state.phase = Phase::Idle;
                state.epoch += 1;
                debug!(engine = %name, "Media ended");
                let _ = ends.send(());
            }
        });
    }
}

#[async_trait]
impl MediaEngine for SimulatedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, path: &Path) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.hang_loads > 0 {
            state.hang_loads -= 1;
            drop(state);
            return std::future::pending().await;
        }
        state.loaded = Some(path.to_path_buf());
        state.history.push(path.to_path_buf());
        state.phase = Phase::Paused {
            offset: Duration::ZERO,
        };
        state.epoch += 1;
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        if state.loaded.is_none() {
            return Err(EngineError::NothingLoaded);
        }
        state.starts += 1;
        state.epoch += 1;

        if state.fail_starts > 0 {
            state.fail_starts -= 1;
            state.phase = Phase::Stalled;
            return Ok(());
        }

        let offset = self.position(state.phase, Instant::now());
        state.phase = Phase::Playing {
            since: Instant::now() + self.startup_delay,
            offset,
        };
        let remaining = self.media_length.saturating_sub(offset) + self.startup_delay;
        self.arm_end_timer(state.epoch, remaining);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        match (state.phase, paused) {
            (Phase::Playing { .. }, true) => {
                let offset = self.position(state.phase, now).min(self.media_length);
                state.phase = Phase::Paused { offset };
                state.epoch += 1;
            }
            (Phase::Paused { offset }, false) => {
                state.phase = Phase::Playing { since: now, offset };
                state.epoch += 1;
                self.arm_end_timer(state.epoch, self.media_length.saturating_sub(offset));
            }
            _ => {}
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        state.phase = Phase::Idle;
        state.epoch += 1;
        Ok(())
    }

    async fn is_playing(&self) -> bool {
        let state = self.state.lock().await;
        match state.phase {
            Phase::Playing { since, .. } => {
                let now = Instant::now();
                now >= since && self.position(state.phase, now) < self.media_length
            }
            _ => false,
        }
    }

    fn end_events(&self) -> broadcast::Receiver<()> {
        self.ends.subscribe()
    }
}
