//! Playback node.
//!
//! Loops the first video of the media library until a play command arrives,
//! then primes the commanded video on a second engine and starts it at the
//! coordinator's scheduled instant.

pub mod clock;
pub mod controller;
pub mod engine;
mod error;
pub mod identity;
pub mod loop_driver;
pub mod runtime;

pub use clock::{ClockOffset, ClockSync, SharedClock, StartPlan};
pub use controller::{
    ControllerSettings, LoopPass, ModeState, PlaybackController, PlaybackMode, SessionOutcome,
};
pub use engine::{EngineHandle, MediaEngine, MpvEngine, MpvSettings, SimulatedEngine};
pub use error::{ClockError, EngineError, PlaybackError};
pub use loop_driver::{LoopDriver, LoopSettings};
pub use runtime::{NodeRuntime, NodeSettings};
