//! Coordinator for synchronized multi-screen playback.
//!
//! Tracks which playback nodes are alive, broadcasts play commands with a
//! shared start instant, and aggregates the nodes' acknowledgments.

pub mod commands;
pub mod coordinator;
pub mod dispatch;
mod error;
pub mod membership;
pub mod telemetry;
pub mod web;

pub use commands::{AckOutcome, CommandRecord, CommandStatus, CommandTable};
pub use coordinator::{Coordinator, CoordinatorSettings};
pub use dispatch::{DispatchSettings, Dispatcher};
pub use error::CoordinatorError;
pub use membership::MembershipTracker;
