use reelproto::CommandId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("video index {index} out of range (library has {count} videos)")]
    InvalidIndex { index: i64, count: usize },

    #[error("no active playback nodes")]
    NoReceivers,

    #[error("every publish of command {command_id} failed: {reason}")]
    PublishFailed { command_id: CommandId, reason: String },

    #[error("command not found: {0}")]
    CommandNotFound(String),
}
