//! Keeps the default video (index 0) playing whenever the node is idle.

use reelproto::Backoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{superseded, LoopPass, ModeState, PlaybackController, PlaybackMode};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Delay after each failed start, grows per consecutive failure.
    pub retry: Backoff,
    /// After this many consecutive failures, take a longer cooldown.
    pub cooldown_after: u32,
    pub cooldown: Backoff,
    /// Rescan interval while the library is empty.
    pub idle_rescan: Duration,
    /// Engine state polling while a pass plays.
    pub poll: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            retry: Backoff::new(Duration::from_millis(500), Duration::from_secs(5)),
            cooldown_after: 5,
            cooldown: Backoff::new(Duration::from_secs(30), Duration::from_secs(300)),
            idle_rescan: Duration::from_secs(10),
            poll: Duration::from_millis(250),
        }
    }
}

impl LoopSettings {
    /// Pause before the next attempt after `failures` consecutive failures.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if self.cooldown_after > 0 && failures > 0 && failures % self.cooldown_after == 0 {
            self.cooldown.for_attempt(failures / self.cooldown_after)
        } else {
            self.retry.for_attempt(failures)
        }
    }
}

pub struct LoopDriver {
    controller: Arc<PlaybackController>,
    settings: LoopSettings,
}

impl LoopDriver {
    pub fn new(controller: Arc<PlaybackController>, settings: LoopSettings) -> Self {
        Self {
            controller,
            settings,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut modes = self.controller.modes();
        let mut failures: u32 = 0;
        let node_id = self.controller.node_id().clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                looping = wait_for_looping(&mut modes) => {
                    if !looping {
                        break;
                    }
                }
            }

            let pause = match self.controller.start_loop_pass().await {
                LoopPass::Started {
                    engine,
                    generation,
                    mut ends,
                } => {
                    if failures > 0 {
                        info!(node.id = %node_id, failures, "Loop recovered");
                    }
                    failures = 0;
                    let superseded = superseded(self.controller.modes(), generation);
                    tokio::pin!(superseded);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = &mut superseded => break,
                            _ = ends.recv() => break,
                            _ = tokio::time::sleep(self.settings.poll) => {
                                if !engine.is_playing().await {
                                    break;
                                }
                            }
                        }
                    }
                    Duration::ZERO
                }
                LoopPass::NotLooping => self.settings.poll,
                LoopPass::NoMedia => {
                    let found = self.controller.refresh_library().await;
                    if found == 0 {
                        debug!(node.id = %node_id, "No media to loop yet");
                        self.settings.idle_rescan
                    } else {
                        info!(node.id = %node_id, videos = found, "📼 Media appeared");
                        Duration::ZERO
                    }
                }
                LoopPass::Failed(e) => {
                    failures += 1;
                    let delay = self.settings.delay_after(failures);
                    warn!(
                        node.id = %node_id,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Loop pass failed: {}",
                        e
                    );
                    delay
                }
            };

            if !pause.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }
        debug!(node.id = %node_id, "Loop driver stopped");
    }
}

async fn wait_for_looping(modes: &mut watch::Receiver<ModeState>) -> bool {
    modes
        .wait_for(|m| m.mode == PlaybackMode::Looping)
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_every_fifth_failure() {
        let settings = LoopSettings::default();
        assert_eq!(settings.delay_after(1), Duration::from_millis(500));
        assert_eq!(settings.delay_after(3), Duration::from_secs(2));
        assert_eq!(settings.delay_after(5), Duration::from_secs(30));
        assert_eq!(settings.delay_after(6), Duration::from_secs(5));
        assert_eq!(settings.delay_after(10), Duration::from_secs(60));
    }
}
