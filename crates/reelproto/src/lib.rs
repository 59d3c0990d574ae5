//! Wire protocol for synchronized playback.
//!
//! A coordinator broadcasts play commands to a set of playback nodes over a
//! publish/subscribe bus. Nodes announce themselves with heartbeats, estimate
//! the coordinator's clock once, and acknowledge each command. Every payload
//! is a short plain-text string; see [`messages`] for the formats.

pub mod bus;
pub mod domain;
mod error;
pub mod media;
pub mod messages;
pub mod retry;
pub mod topic;

pub use bus::{Bus, BusError, BusMessage, MemoryBus, PublishOptions, Qos, Subscription, ZmqBus, ZmqRole, ZmqTiming};
pub use domain::{epoch_seconds, format_epoch, AckStatus, CommandId, NodeId};
pub use error::ParseError;
pub use media::{MediaError, MediaLibrary};
pub use messages::{Ack, Heartbeat, PlayCommand, TimeSyncRequest, TimeSyncResponse};
pub use retry::{Backoff, Exhausted, RepeatReport, RetryPolicy};
pub use topic::Topic;
