use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to a media engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no media loaded")]
    NothingLoaded,

    #[error("failed to launch player: {0}")]
    Spawn(std::io::Error),

    #[error("player IPC error: {0}")]
    Io(#[from] std::io::Error),

    #[error("player rejected command: {0}")]
    Command(String),

    #[error("player did not answer in time")]
    Timeout,

    #[error("player connection closed")]
    Disconnected,
}

/// Why a manual playback session did not run to completion.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("video index {0} is not in the media library")]
    InvalidIndex(usize),

    #[error("file missing: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("engine failed to start after {attempts} attempts")]
    EngineStartFailed { attempts: u32 },

    #[error("engine stopped right after resuming")]
    EngineStopped,

    #[error("superseded by a newer command")]
    Superseded,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("clock sync never completed, scheduling against the local clock")]
    SyncNeverCompleted,
}
