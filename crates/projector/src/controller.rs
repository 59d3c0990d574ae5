//! Playback mode controller.
//!
//! A node holds two engines. The deck records which one is active; the other
//! is parked and never receives a play call. Every engine call goes through
//! the deck lock after checking the session generation, so the loop driver
//! and a manual session can never interleave calls. Waits and sleeps happen
//! with the lock released.

use reelconf::TimingConfig;
use reelproto::{
    epoch_seconds, Ack, Bus, CommandId, MediaLibrary, NodeId, PlayCommand, PublishOptions,
    RetryPolicy, Topic,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::engine::{wait_for_state, EngineHandle};
use crate::{ClockError, EngineError, PlaybackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Looping,
    Manual,
}

/// Published on every transition. `generation` identifies the current owner
/// of the active engine; anything holding an older value is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeState {
    pub mode: PlaybackMode,
    pub generation: u64,
}

enum Deck {
    Looping {
        active: EngineHandle,
        parked: EngineHandle,
    },
    Manual {
        active: EngineHandle,
        parked: EngineHandle,
        command_id: CommandId,
    },
}

impl Deck {
    fn active(&self) -> &EngineHandle {
        match self {
            Deck::Looping { active, .. } | Deck::Manual { active, .. } => active,
        }
    }

    fn mode(&self) -> PlaybackMode {
        match self {
            Deck::Looping { .. } => PlaybackMode::Looping,
            Deck::Manual { .. } => PlaybackMode::Manual,
        }
    }

    fn to_manual(&self, command_id: CommandId) -> Deck {
        match self {
            Deck::Looping { active, parked } => Deck::Manual {
                active: parked.clone(),
                parked: active.clone(),
                command_id,
            },
            Deck::Manual { active, parked, .. } => Deck::Manual {
                active: active.clone(),
                parked: parked.clone(),
                command_id,
            },
        }
    }

    fn to_looping(&self) -> Deck {
        match self {
            Deck::Looping { active, parked } => Deck::Looping {
                active: active.clone(),
                parked: parked.clone(),
            },
            Deck::Manual { active, parked, .. } => Deck::Looping {
                active: parked.clone(),
                parked: active.clone(),
            },
        }
    }
}

struct DeckState {
    deck: Deck,
    generation: u64,
    closed: bool,
}

impl DeckState {
    fn snapshot(&self) -> ModeState {
        ModeState {
            mode: self.deck.mode(),
            generation: self.generation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Bound on waiting for an engine to report stopped.
    pub stop_timeout: Duration,
    /// Attempts and gap for getting the manual engine to play.
    pub engine_start: RetryPolicy,
    /// How long one start attempt waits for "playing".
    pub start_timeout: Duration,
    /// Lateness beyond this gets logged.
    pub late_threshold: Duration,
    /// Engine state polling interval.
    pub poll: Duration,
    /// Bound on a single engine call made while holding the deck.
    pub call_timeout: Duration,
    /// Ack publish attempts.
    pub ack: RetryPolicy,
}

impl ControllerSettings {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            stop_timeout: timing.loop_stop_timeout(),
            engine_start: RetryPolicy::new(timing.engine_start_attempts, Duration::from_millis(500)),
            start_timeout: timing.engine_start_timeout(),
            late_threshold: timing.late_threshold(),
            poll: Duration::from_millis(100),
            call_timeout: timing.engine_start_timeout(),
            ack: RetryPolicy::new(timing.publish_attempts, timing.publish_delay()),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_timing(&TimingConfig::default())
    }
}

/// A manual session that has taken the deck but not yet started playing.
pub struct ManualSession {
    command: PlayCommand,
    generation: u64,
    outgoing: EngineHandle,
    engine: EngineHandle,
}

impl ManualSession {
    pub fn command_id(&self) -> &CommandId {
        &self.command.command_id
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    /// Started on time, acked success and ran to its end.
    Played,
    /// Acked an error and handed the deck back to the loop.
    Failed(PlaybackError),
    /// A newer command took over.
    Superseded,
}

/// Result of one loop driver request.
pub enum LoopPass {
    Started {
        engine: EngineHandle,
        generation: u64,
        ends: broadcast::Receiver<()>,
    },
    NotLooping,
    NoMedia,
    Failed(PlaybackError),
}

pub struct PlaybackController {
    node_id: NodeId,
    bus: Arc<dyn Bus>,
    library: RwLock<MediaLibrary>,
    clock: SharedClock,
    settings: ControllerSettings,
    state: Mutex<DeckState>,
    modes: watch::Sender<ModeState>,
}

impl PlaybackController {
    pub fn new(
        node_id: NodeId,
        bus: Arc<dyn Bus>,
        library: MediaLibrary,
        clock: SharedClock,
        loop_engine: EngineHandle,
        manual_engine: EngineHandle,
        settings: ControllerSettings,
    ) -> Self {
        let state = DeckState {
            deck: Deck::Looping {
                active: loop_engine,
                parked: manual_engine,
            },
            generation: 0,
            closed: false,
        };
        let (modes, _) = watch::channel(state.snapshot());
        Self {
            node_id,
            bus,
            library: RwLock::new(library),
            clock,
            settings,
            state: Mutex::new(state),
            modes,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn modes(&self) -> watch::Receiver<ModeState> {
        self.modes.subscribe()
    }

    pub fn mode(&self) -> PlaybackMode {
        self.modes.borrow().mode
    }

    pub async fn library_len(&self) -> usize {
        self.library.read().await.len()
    }

    /// Rescan the media directory. A failed scan keeps the previous listing.
    pub async fn refresh_library(&self) -> usize {
        let root = self.library.read().await.root().to_path_buf();
        match tokio::task::spawn_blocking(move || MediaLibrary::scan(root)).await {
            Ok(Ok(fresh)) => {
                let count = fresh.len();
                *self.library.write().await = fresh;
                count
            }
            Ok(Err(e)) => {
                debug!(node.id = %self.node_id, "Media rescan failed: {}", e);
                self.library.read().await.len()
            }
            Err(e) => {
                warn!(node.id = %self.node_id, "Media rescan task failed: {}", e);
                self.library.read().await.len()
            }
        }
    }

    /// Take the deck for a command: stop whatever is active and switch to manual.
    ///
    /// Only holds the lock for the switch itself. Call [`run_session`](Self::run_session)
    /// next to wait for the old engine and drive playback.
    pub async fn begin_manual(&self, command: PlayCommand) -> ManualSession {
        let mut state = self.state.lock().await;
        let outgoing = state.deck.active().clone();
        state.generation += 1;
        state.deck = state.deck.to_manual(command.command_id.clone());
        let engine = state.deck.active().clone();
        self.modes.send_replace(state.snapshot());

        if let Err(e) = self.bounded(outgoing.stop()).await {
            warn!(node.id = %self.node_id, engine = outgoing.name(), "Stop failed: {}", e);
        }

        info!(
            node.id = %self.node_id,
            command.id = %command.command_id,
            video.index = command.video_index,
            "🎯 Switching to manual playback"
        );

        ManualSession {
            generation: state.generation,
            command,
            outgoing,
            engine,
        }
    }

    pub async fn run_command(&self, command: PlayCommand) -> SessionOutcome {
        let session = self.begin_manual(command).await;
        self.run_session(session).await
    }

    pub async fn run_session(&self, session: ManualSession) -> SessionOutcome {
        if !wait_for_state(
            session.outgoing.as_ref(),
            false,
            self.settings.stop_timeout,
            self.settings.poll,
        )
        .await
        {
            warn!(
                node.id = %self.node_id,
                engine = session.outgoing.name(),
                "Previous engine still playing after stop timeout"
            );
        }

        let command_id = session.command.command_id.clone();
        match self.drive_manual(&session).await {
            Ok(()) => {
                self.return_to_looping(session.generation).await;
                SessionOutcome::Played
            }
            Err(PlaybackError::Superseded) => {
                debug!(node.id = %self.node_id, command.id = %command_id, "Session superseded");
                SessionOutcome::Superseded
            }
            Err(e) => {
                if !self.is_current(session.generation) {
                    debug!(node.id = %self.node_id, command.id = %command_id, "Session superseded after error: {}", e);
                    return SessionOutcome::Superseded;
                }
                error!(node.id = %self.node_id, command.id = %command_id, "Playback failed: {}", e);
                self.send_ack(Ack::error(self.node_id.clone(), command_id, e.to_string()))
                    .await;
                self.return_to_looping(session.generation).await;
                SessionOutcome::Failed(e)
            }
        }
    }

    async fn drive_manual(&self, session: &ManualSession) -> Result<(), PlaybackError> {
        let command = &session.command;
        let path = self.resolve(command.video_index).await?;
        let engine = &session.engine;

        self.start_engine(session, &path).await?;

        // Primed: hold on the first frame until the shared start instant
        self.with_current(session.generation, engine.set_paused(true))
            .await?;

        let plan = self
            .clock
            .read()
            .await
            .plan_start(command.scheduled_start_at, epoch_seconds());
        if plan.degraded {
            warn!(node.id = %self.node_id, command.id = %command.command_id, "{}", ClockError::SyncNeverCompleted);
        }
        if plan.lateness > self.settings.late_threshold {
            warn!(
                node.id = %self.node_id,
                command.id = %command.command_id,
                late_by = plan.lateness.as_secs_f64(),
                "Command arrived past its start time, starting now"
            );
        }

        self.sleep_while_current(session.generation, plan.wait).await?;

        let ends = engine.end_events();
        self.with_current(session.generation, engine.set_paused(false))
            .await?;

        let playing = wait_for_state(
            engine.as_ref(),
            true,
            self.settings.start_timeout,
            self.settings.poll,
        )
        .await;
        if !self.is_current(session.generation) {
            return Err(PlaybackError::Superseded);
        }
        if !playing {
            return Err(PlaybackError::EngineStopped);
        }

        info!(
            node.id = %self.node_id,
            command.id = %command.command_id,
            video.index = command.video_index,
            "▶️ Playback started"
        );
        self.send_ack(Ack::success(self.node_id.clone(), command.command_id.clone()))
            .await;

        self.wait_for_end(session, ends).await
    }

    /// Map an index onto the directory as it is now, not as it was at startup.
    async fn resolve(&self, index: usize) -> Result<PathBuf, PlaybackError> {
        self.refresh_library().await;
        let path = self
            .library
            .read()
            .await
            .path(index)
            .ok_or(PlaybackError::InvalidIndex(index))?;
        if !media_present(Some(&path)).await {
            return Err(PlaybackError::FileMissing(path));
        }
        Ok(path)
    }

    async fn start_engine(&self, session: &ManualSession, path: &std::path::Path) -> Result<(), PlaybackError> {
        let engine = &session.engine;
        let result = self
            .settings
            .engine_start
            .retry_while(
                move |attempt| async move {
                    self.with_current(session.generation, async {
                        engine.load(path).await?;
                        engine.play().await
                    })
                    .await?;
                    if wait_for_state(
                        engine.as_ref(),
                        true,
                        self.settings.start_timeout,
                        self.settings.poll,
                    )
                    .await
                    {
                        Ok(())
                    } else {
                        warn!(node.id = %self.node_id, attempt, "Engine did not start");
                        Err(PlaybackError::EngineStartFailed { attempts: attempt })
                    }
                },
                |e| !matches!(e, PlaybackError::Superseded),
            )
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(exhausted) => match exhausted.last_error {
                PlaybackError::Superseded => Err(PlaybackError::Superseded),
                _ => Err(PlaybackError::EngineStartFailed {
                    attempts: exhausted.attempts,
                }),
            },
        }
    }

    /// Run an engine call under the deck lock if `generation` still owns it.
    async fn with_current<T, F>(&self, generation: u64, call: F) -> Result<T, PlaybackError>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        let state = self.state.lock().await;
        if state.generation != generation || state.closed {
            return Err(PlaybackError::Superseded);
        }
        let value = self.bounded(call).await;
        drop(state);
        Ok(value?)
    }

    /// A hung engine must not keep the deck locked.
    async fn bounded<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        tokio::time::timeout(self.settings.call_timeout, call)
            .await
            .unwrap_or(Err(EngineError::Timeout))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.modes.borrow().generation == generation
    }

    async fn sleep_while_current(&self, generation: u64, wait: Duration) -> Result<(), PlaybackError> {
        if wait.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = superseded(self.modes(), generation) => Err(PlaybackError::Superseded),
        }
    }

    async fn wait_for_end(
        &self,
        session: &ManualSession,
        mut ends: broadcast::Receiver<()>,
    ) -> Result<(), PlaybackError> {
        let engine = &session.engine;
        let superseded = superseded(self.modes(), session.generation);
        tokio::pin!(superseded);
        loop {
            tokio::select! {
                _ = &mut superseded => return Err(PlaybackError::Superseded),
                _ = ends.recv() => break,
                _ = tokio::time::sleep(self.settings.poll) => {
                    if !engine.is_playing().await {
                        break;
                    }
                }
            }
        }
        // A newer session stopping this engine also looks like an end
        if !self.is_current(session.generation) {
            return Err(PlaybackError::Superseded);
        }
        debug!(node.id = %self.node_id, command.id = %session.command.command_id, "Manual playback finished");
        Ok(())
    }

    /// Stop the manual engine and give the deck back to the loop, unless a newer
    /// session took it in the meantime.
    async fn return_to_looping(&self, generation: u64) {
        let engine = {
            let state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            let engine = state.deck.active().clone();
            if let Err(e) = self.bounded(engine.stop()).await {
                warn!(node.id = %self.node_id, engine = engine.name(), "Stop failed: {}", e);
            }
            engine
        };

        if !wait_for_state(engine.as_ref(), false, self.settings.stop_timeout, self.settings.poll).await {
            warn!(node.id = %self.node_id, engine = engine.name(), "Manual engine still playing after stop timeout");
        }

        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        state.generation += 1;
        state.deck = state.deck.to_looping();
        self.modes.send_replace(state.snapshot());
        info!(node.id = %self.node_id, "🔁 Back to looping");
    }

    /// Start one pass of the default video on the loop engine.
    pub async fn start_loop_pass(&self) -> LoopPass {
        let mut path = self.library.read().await.path(0);
        if !media_present(path.as_deref()).await {
            // The loop file vanished or was never there; the listing is stale
            self.refresh_library().await;
            path = self.library.read().await.path(0);
        }
        let path = match path {
            Some(path) => path,
            None => return LoopPass::NoMedia,
        };
        if !media_present(Some(&path)).await {
            return LoopPass::Failed(PlaybackError::FileMissing(path));
        }

        let (engine, generation, ends) = {
            let state = self.state.lock().await;
            if state.closed || state.deck.mode() != PlaybackMode::Looping {
                return LoopPass::NotLooping;
            }
            let engine = state.deck.active().clone();
            let ends = engine.end_events();
            let started = self
                .bounded(async {
                    engine.load(&path).await?;
                    engine.play().await
                })
                .await;
            if let Err(e) = started {
                return LoopPass::Failed(e.into());
            }
            (engine, state.generation, ends)
        };

        if wait_for_state(engine.as_ref(), true, self.settings.start_timeout, self.settings.poll).await {
            debug!(node.id = %self.node_id, path = %path.display(), "Loop pass started");
            LoopPass::Started {
                engine,
                generation,
                ends,
            }
        } else if !self.is_current(generation) {
            LoopPass::NotLooping
        } else {
            LoopPass::Failed(PlaybackError::EngineStartFailed { attempts: 1 })
        }
    }

    /// Stop both engines and refuse further loop passes.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.generation += 1;
        self.modes.send_replace(state.snapshot());
        let engines = match &state.deck {
            Deck::Looping { active, parked } | Deck::Manual { active, parked, .. } => {
                [active.clone(), parked.clone()]
            }
        };
        for engine in engines {
            if let Err(e) = self.bounded(engine.stop()).await {
                warn!(node.id = %self.node_id, engine = engine.name(), "Stop failed: {}", e);
            }
        }
    }

    async fn send_ack(&self, ack: Ack) {
        let payload = ack.encode();
        let bus = &self.bus;
        let payload = &payload;
        let result = self
            .settings
            .ack
            .retry(move |_| async move {
                bus.publish(Topic::Ack, payload, PublishOptions::reliable())
                    .await
            })
            .await;
        match result {
            Ok(()) => debug!(
                node.id = %self.node_id,
                command.id = %ack.command_id,
                ack.status = ack.status.as_str(),
                "Ack sent"
            ),
            Err(e) => error!(
                node.id = %self.node_id,
                command.id = %ack.command_id,
                attempts = e.attempts,
                "Ack lost: {}",
                e.last_error
            ),
        }
    }
}

/// Resolves once `generation` no longer owns the deck.
pub(crate) async fn superseded(mut modes: watch::Receiver<ModeState>, generation: u64) {
    loop {
        if modes.borrow_and_update().generation != generation {
            return;
        }
        if modes.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn media_present(path: Option<&std::path::Path>) -> bool {
    match path {
        Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
        None => false,
    }
}
