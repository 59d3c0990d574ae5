//! Turns a play request into a broadcast command.
//!
//! The command goes out several times on the live topic and once more as a
//! retained message, so nodes that miss the live copies (or subscribe a
//! moment late) still get it. The retained copy is cleared after a short
//! window so a node joining much later does not replay a stale command.

use reelproto::{
    epoch_seconds, Bus, BusError, CommandId, PlayCommand, PublishOptions, RetryPolicy, Topic,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::commands::{CommandRecord, CommandTable};
use crate::membership::MembershipTracker;
use crate::CoordinatorError;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Gap between now and the scheduled start, enough for every node to prime.
    pub lead_time: Duration,
    /// Live publishes per command.
    pub publish: RetryPolicy,
    /// Lifetime of the retained copy.
    pub retain_clear: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_millis(3500),
            publish: RetryPolicy::new(3, Duration::from_millis(150)),
            retain_clear: Duration::from_secs(2),
        }
    }
}

pub struct Dispatcher {
    bus: Arc<dyn Bus>,
    membership: Arc<MembershipTracker>,
    commands: Arc<CommandTable>,
    settings: DispatchSettings,
    /// Command whose retained copy is currently on the bus.
    retained_owner: Arc<Mutex<Option<CommandId>>>,
}

impl Dispatcher {
    pub fn new(
        bus: Arc<dyn Bus>,
        membership: Arc<MembershipTracker>,
        commands: Arc<CommandTable>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            bus,
            membership,
            commands,
            settings,
            retained_owner: Arc::new(Mutex::new(None)),
        }
    }

    /// Validate, record and broadcast a command for `video_index` out of `media_count` videos.
    pub async fn dispatch(
        &self,
        video_index: i64,
        media_count: usize,
    ) -> Result<CommandId, CoordinatorError> {
        let index = usize::try_from(video_index)
            .ok()
            .filter(|i| *i < media_count)
            .ok_or(CoordinatorError::InvalidIndex {
                index: video_index,
                count: media_count,
            })?;

        let expected = self.membership.active_count().await;
        if expected == 0 {
            warn!(video.index = index, "Refusing command, no active nodes");
            return Err(CoordinatorError::NoReceivers);
        }

        let command = PlayCommand {
            video_index: index,
            scheduled_start_at: epoch_seconds() + self.settings.lead_time.as_secs_f64(),
            command_id: CommandId::new(),
        };
        let command_id = command.command_id.clone();

        // Recorded before publishing so an early ack is never orphaned
        self.commands
            .insert(CommandRecord::new(
                command_id.clone(),
                index,
                command.scheduled_start_at,
                expected,
            ))
            .await;

        let payload = command.encode();
        let bus = &self.bus;
        let live_payload = &payload;
        let report = self
            .settings
            .publish
            .repeat(move |attempt| async move {
                let result = bus
                    .publish(Topic::Command, live_payload, PublishOptions::reliable())
                    .await;
                if let Err(e) = &result {
                    warn!(attempt, "Command publish failed: {}", e);
                }
                result
            })
            .await;

        // Ownership moves with the publish so an older clear cannot wipe this copy
        let retained = {
            let mut owner = self.retained_owner.lock().await;
            let result = self
                .bus
                .publish(Topic::Command, &payload, PublishOptions::retained())
                .await;
            match &result {
                Ok(()) => *owner = Some(command_id.clone()),
                Err(e) => warn!(command.id = %command_id, "Retained publish failed: {}", e),
            }
            result
        };
        if retained.is_ok() {
            self.schedule_retained_clear(command_id.clone());
        }

        if !report.any_succeeded() && retained.is_err() {
            self.commands.remove(&command_id).await;
            let reason = retained
                .err()
                .or_else(|| report.failures.into_iter().last())
                .map(|e: BusError| e.to_string())
                .unwrap_or_default();
            return Err(CoordinatorError::PublishFailed { command_id, reason });
        }

        info!(
            command.id = %command_id,
            video.index = index,
            command.scheduled_start_at = command.scheduled_start_at,
            command.expected = expected,
            publish.live_ok = report.successes,
            "🎬 Command dispatched"
        );

        Ok(command_id)
    }

    fn schedule_retained_clear(&self, command_id: CommandId) {
        let bus = self.bus.clone();
        let owner = self.retained_owner.clone();
        let delay = self.settings.retain_clear;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut current = owner.lock().await;
            // A newer command owns the retained slot now
            if current.as_ref() != Some(&command_id) {
                debug!(command.id = %command_id, "Retained copy already superseded");
                return;
            }
            match bus
                .publish(Topic::Command, "", PublishOptions::retained())
                .await
            {
                Ok(()) => {
                    debug!(command.id = %command_id, "Retained copy cleared");
                    *current = None;
                }
                Err(e) => warn!(command.id = %command_id, "Failed to clear retained copy: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reelproto::{MemoryBus, NodeId, Subscription};

    /// Stores retained commands at once but takes `delay` to confirm them.
    struct SlowConfirmBus {
        inner: MemoryBus,
        delay: Duration,
    }

    #[async_trait]
    impl Bus for SlowConfirmBus {
        async fn publish(
            &self,
            topic: Topic,
            payload: &str,
            options: PublishOptions,
        ) -> Result<(), BusError> {
            self.inner.publish(topic, payload, options).await?;
            if options.retain && !payload.is_empty() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(())
        }

        async fn subscribe(&self, topics: &[Topic]) -> Result<Subscription, BusError> {
            self.inner.subscribe(topics).await
        }
    }

    struct Fixture {
        bus: MemoryBus,
        membership: Arc<MembershipTracker>,
        commands: Arc<CommandTable>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let bus = MemoryBus::new();
        let membership = Arc::new(MembershipTracker::new(Duration::from_secs(10)));
        let commands = Arc::new(CommandTable::new(Duration::from_secs(5)));
        let dispatcher = Dispatcher::new(
            Arc::new(bus.clone()),
            membership.clone(),
            commands.clone(),
            DispatchSettings::default(),
        );
        Fixture {
            bus,
            membership,
            commands,
            dispatcher,
        }
    }

    async fn join(f: &Fixture, names: &[&str]) {
        for name in names {
            f.membership
                .record_heartbeat(&NodeId::parse(name).unwrap())
                .await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_out_of_range_index() {
        let f = fixture();
        join(&f, &["n1"]).await;

        for bad in [-1, 3, 99] {
            assert!(matches!(
                f.dispatcher.dispatch(bad, 3).await,
                Err(CoordinatorError::InvalidIndex { .. })
            ));
        }
        assert!(f.bus.published(Topic::Command).await.is_empty());
        assert!(f.commands.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_without_receivers() {
        let f = fixture();
        assert!(matches!(
            f.dispatcher.dispatch(0, 3).await,
            Err(CoordinatorError::NoReceivers)
        ));
        assert!(f.bus.published(Topic::Command).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_redundantly_then_clears_retained() {
        let f = fixture();
        join(&f, &["n1", "n2"]).await;

        let id = f.dispatcher.dispatch(2, 3).await.unwrap();

        let sent = f.bus.published(Topic::Command).await;
        // three live copies plus the retained one
        assert_eq!(sent.len(), 4);
        let cmd = PlayCommand::decode(&sent[0].payload).unwrap();
        assert_eq!(cmd.command_id, id);
        assert_eq!(cmd.video_index, 2);
        assert!(cmd.scheduled_start_at > epoch_seconds());

        assert!(f.bus.retained(Topic::Command).await.is_some());
        assert_eq!(f.commands.status(&id).await.unwrap().expected_responders, 2);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(f.bus.retained(Topic::Command).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_publish_failure_still_dispatches() {
        let f = fixture();
        join(&f, &["n1"]).await;
        f.bus.fail_next_publishes(2).await;

        let id = f.dispatcher.dispatch(0, 1).await.unwrap();
        assert!(f.commands.status(&id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn total_publish_failure_removes_command() {
        let f = fixture();
        join(&f, &["n1"]).await;
        f.bus.set_failing(true).await;

        let err = f.dispatcher.dispatch(0, 1).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PublishFailed { .. }));
        assert!(f.commands.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_command_keeps_its_retained_copy() {
        let f = fixture();
        join(&f, &["n1"]).await;

        f.dispatcher.dispatch(0, 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let second = f.dispatcher.dispatch(1, 2).await.unwrap();

        // first clear fires here and must leave the second command alone
        tokio::time::sleep(Duration::from_millis(700)).await;
        let retained = f.bus.retained(Topic::Command).await.unwrap();
        assert_eq!(PlayCommand::decode(&retained).unwrap().command_id, second);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_slow_retained_publish_spares_the_newer_command() {
        let bus = MemoryBus::new();
        let membership = Arc::new(MembershipTracker::new(Duration::from_secs(10)));
        membership
            .record_heartbeat(&NodeId::parse("n1").unwrap())
            .await;
        let dispatcher = Dispatcher::new(
            Arc::new(SlowConfirmBus {
                inner: bus.clone(),
                delay: Duration::from_secs(1),
            }),
            membership,
            Arc::new(CommandTable::new(Duration::from_secs(5))),
            DispatchSettings::default(),
        );

        // The first clear fires while the second retained publish is still unconfirmed
        dispatcher.dispatch(0, 2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let second = dispatcher.dispatch(1, 2).await.unwrap();

        let retained = bus.retained(Topic::Command).await.unwrap();
        assert_eq!(PlayCommand::decode(&retained).unwrap().command_id, second);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(bus.retained(Topic::Command).await, None);
    }
}
