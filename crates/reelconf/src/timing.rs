//! Protocol timing. Every value is milliseconds on disk and a `Duration` in code.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and intervals shared by the coordinator and the nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Node heartbeat period.
    pub heartbeat_interval_ms: u64,
    /// A node is inactive once its last heartbeat is older than this.
    pub heartbeat_timeout_ms: u64,
    /// How long a command waits for a full quorum of acks.
    pub ack_timeout_ms: u64,
    /// Added to "now" to produce a command's scheduled start.
    pub lead_time_ms: u64,
    /// Live publishes per command.
    pub publish_attempts: u32,
    /// Pause between live publishes.
    pub publish_delay_ms: u64,
    /// Lifetime of the retained copy of a command.
    pub retain_clear_ms: u64,
    /// Retry period of the node's time-sync request.
    pub sync_interval_ms: u64,
    /// Start attempts before an engine is declared failed.
    pub engine_start_attempts: u32,
    /// Bounded wait for an engine to report playing.
    pub engine_start_timeout_ms: u64,
    /// Bounded wait for the loop engine to report stopped.
    pub loop_stop_timeout_ms: u64,
    /// Lateness beyond which a manual start is logged as late.
    pub late_threshold_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 10_000,
            ack_timeout_ms: 5_000,
            lead_time_ms: 3_500,
            publish_attempts: 3,
            publish_delay_ms: 150,
            retain_clear_ms: 2_000,
            sync_interval_ms: 5_000,
            engine_start_attempts: 3,
            engine_start_timeout_ms: 3_000,
            loop_stop_timeout_ms: 5_000,
            late_threshold_ms: 1_000,
        }
    }
}

impl TimingConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn lead_time(&self) -> Duration {
        Duration::from_millis(self.lead_time_ms)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    pub fn retain_clear(&self) -> Duration {
        Duration::from_millis(self.retain_clear_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn engine_start_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_start_timeout_ms)
    }

    pub fn loop_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_stop_timeout_ms)
    }

    pub fn late_threshold(&self) -> Duration {
        Duration::from_millis(self.late_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let timing = TimingConfig::default();
        assert_eq!(timing.heartbeat_timeout(), Duration::from_secs(10));
        assert_eq!(timing.ack_timeout(), Duration::from_secs(5));
        assert_eq!(timing.lead_time(), Duration::from_millis(3500));
        assert_eq!(timing.publish_attempts, 3);
        assert_eq!(timing.retain_clear(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let timing: TimingConfig = toml::from_str("ack_timeout_ms = 8000").unwrap();
        assert_eq!(timing.ack_timeout(), Duration::from_secs(8));
        assert_eq!(timing.heartbeat_interval(), Duration::from_secs(5));
    }
}
