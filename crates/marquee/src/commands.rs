//! Command table: every dispatched command and the acks it has gathered.
//!
//! A command completes once acks from as many distinct nodes as were active
//! at dispatch have arrived, or once the ack timeout has passed. The expected
//! count is fixed at creation. Acks are keyed by node, so a repeated ack
//! replaces the earlier one and counts once.

use reelproto::{Ack, AckStatus, CommandId, NodeId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::CoordinatorError;

#[derive(Debug, Clone)]
pub struct AckRecord {
    pub status: AckStatus,
    pub detail: Option<String>,
    pub received_at: Instant,
}

#[derive(Debug, Clone)]
pub struct CommandRecord {
    pub command_id: CommandId,
    pub video_index: usize,
    pub scheduled_start_at: f64,
    pub issued_at: Instant,
    pub expected_responders: usize,
    pub acks: HashMap<NodeId, AckRecord>,
}

impl CommandRecord {
    pub fn new(
        command_id: CommandId,
        video_index: usize,
        scheduled_start_at: f64,
        expected_responders: usize,
    ) -> Self {
        Self {
            command_id,
            video_index,
            scheduled_start_at,
            issued_at: Instant::now(),
            expected_responders,
            acks: HashMap::new(),
        }
    }
}

/// A node that reported an error.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NodeFailure {
    pub node_id: String,
    pub detail: Option<String>,
}

/// Point-in-time view of one command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandStatus {
    pub command_id: String,
    pub video_index: usize,
    pub completed: bool,
    pub success_count: usize,
    pub error_count: usize,
    pub total_responses: usize,
    pub expected_responders: usize,
    pub elapsed_seconds: f64,
    pub failures: Vec<NodeFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First ack from this node for the command.
    Recorded,
    /// The node had already acked; its entry was overwritten.
    Replaced,
    /// The command is unknown or already reaped.
    UnknownCommand,
}

#[derive(Debug)]
pub struct CommandTable {
    commands: Mutex<HashMap<CommandId, CommandRecord>>,
    ack_timeout: Duration,
}

impl CommandTable {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            commands: Mutex::new(HashMap::new()),
            ack_timeout,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    pub async fn insert(&self, record: CommandRecord) {
        info!(
            command.id = %record.command_id,
            video.index = record.video_index,
            command.expected = record.expected_responders,
            "Command created"
        );
        self.commands
            .lock()
            .await
            .insert(record.command_id.clone(), record);
    }

    pub async fn remove(&self, command_id: &CommandId) -> Option<CommandRecord> {
        self.commands.lock().await.remove(command_id)
    }

    pub async fn len(&self) -> usize {
        self.commands.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.commands.lock().await.is_empty()
    }

    /// Fold one ack into its command. Last write wins per node.
    pub async fn ingest_ack(&self, ack: &Ack) -> AckOutcome {
        let mut commands = self.commands.lock().await;
        let Some(record) = commands.get_mut(&ack.command_id) else {
            debug!(
                command.id = %ack.command_id,
                node.id = %ack.node_id,
                "Ack for unknown command"
            );
            return AckOutcome::UnknownCommand;
        };

        let previous = record.acks.insert(
            ack.node_id.clone(),
            AckRecord {
                status: ack.status,
                detail: ack.detail.clone(),
                received_at: Instant::now(),
            },
        );

        match ack.status {
            AckStatus::Success => info!(
                command.id = %ack.command_id,
                node.id = %ack.node_id,
                "Ack success"
            ),
            AckStatus::Error => warn!(
                command.id = %ack.command_id,
                node.id = %ack.node_id,
                detail = ack.detail.as_deref().unwrap_or(""),
                "Ack error"
            ),
        }

        if previous.is_some() {
            AckOutcome::Replaced
        } else {
            AckOutcome::Recorded
        }
    }

    pub async fn status(&self, command_id: &CommandId) -> Result<CommandStatus, CoordinatorError> {
        let commands = self.commands.lock().await;
        let record = commands
            .get(command_id)
            .ok_or_else(|| CoordinatorError::CommandNotFound(command_id.to_string()))?;
        Ok(self.summarize(record, Instant::now()))
    }

    fn summarize(&self, record: &CommandRecord, now: Instant) -> CommandStatus {
        let elapsed = now.duration_since(record.issued_at);
        let total = record.acks.len();
        let success_count = record
            .acks
            .values()
            .filter(|a| a.status == AckStatus::Success)
            .count();

        let mut failures: Vec<NodeFailure> = record
            .acks
            .iter()
            .filter(|(_, a)| a.status == AckStatus::Error)
            .map(|(node, a)| NodeFailure {
                node_id: node.to_string(),
                detail: a.detail.clone(),
            })
            .collect();
        failures.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        CommandStatus {
            command_id: record.command_id.to_string(),
            video_index: record.video_index,
            completed: total >= record.expected_responders || elapsed > self.ack_timeout,
            success_count,
            error_count: total - success_count,
            total_responses: total,
            expected_responders: record.expected_responders,
            elapsed_seconds: elapsed.as_secs_f64(),
            failures,
        }
    }

    /// Remove commands older than twice the ack timeout.
    pub async fn reap_expired(&self) -> Vec<CommandId> {
        let now = Instant::now();
        let horizon = self.ack_timeout * 2;
        let mut commands = self.commands.lock().await;

        let expired: Vec<CommandId> = commands
            .values()
            .filter(|r| now.duration_since(r.issued_at) > horizon)
            .map(|r| r.command_id.clone())
            .collect();

        for id in &expired {
            if let Some(record) = commands.remove(id) {
                let status = self.summarize(&record, now);
                info!(
                    command.id = %id,
                    command.success = status.success_count,
                    command.errors = status.error_count,
                    command.expected = status.expected_responders,
                    "Command reaped"
                );
            }
        }
        expired
    }

    /// Reap on a fixed period until `shutdown` fires.
    pub fn spawn_reaper(
        self: Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.reap_expired().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    async fn table_with(expected: usize) -> (CommandTable, CommandId) {
        let table = CommandTable::new(Duration::from_secs(5));
        let id = CommandId::new();
        table
            .insert(CommandRecord::new(id.clone(), 1, 1_700_000_000.0, expected))
            .await;
        (table, id)
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_completes_before_timeout() {
        let (table, id) = table_with(2).await;
        table.ingest_ack(&Ack::success(node("a"), id.clone())).await;
        assert!(!table.status(&id).await.unwrap().completed);

        table
            .ingest_ack(&Ack::error(node("b"), id.clone(), "file missing"))
            .await;
        let status = table.status(&id).await.unwrap();
        assert!(status.completed);
        assert_eq!(status.success_count, 1);
        assert_eq!(status.error_count, 1);
        assert_eq!(
            status.failures,
            vec![NodeFailure {
                node_id: "b".to_string(),
                detail: Some("file missing".to_string()),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_completes_partial() {
        let (table, id) = table_with(3).await;
        table.ingest_ack(&Ack::success(node("a"), id.clone())).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!table.status(&id).await.unwrap().completed);

        tokio::time::advance(Duration::from_millis(1)).await;
        let status = table.status(&id).await.unwrap();
        assert!(status.completed);
        assert_eq!(status.total_responses, 1);
        assert_eq!(status.expected_responders, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ack_counts_once_and_last_wins() {
        let (table, id) = table_with(2).await;
        assert_eq!(
            table.ingest_ack(&Ack::error(node("a"), id.clone(), "late")).await,
            AckOutcome::Recorded
        );
        assert_eq!(
            table.ingest_ack(&Ack::success(node("a"), id.clone())).await,
            AckOutcome::Replaced
        );

        let status = table.status(&id).await.unwrap();
        assert_eq!(status.total_responses, 1);
        assert_eq!(status.success_count, 1);
        assert!(!status.completed);
    }

    #[tokio::test(start_paused = true)]
    async fn totals_never_decrease() {
        let (table, id) = table_with(4).await;
        let mut last = 0;
        for name in ["a", "b", "a", "c", "b"] {
            table.ingest_ack(&Ack::success(node(name), id.clone())).await;
            let total = table.status(&id).await.unwrap().total_responses;
            assert!(total >= last);
            last = total;
        }
        assert_eq!(last, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_and_reaped_commands() {
        let (table, id) = table_with(1).await;
        assert_eq!(
            table
                .ingest_ack(&Ack::success(node("a"), CommandId::new()))
                .await,
            AckOutcome::UnknownCommand
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(table.reap_expired().await.is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(table.reap_expired().await, vec![id.clone()]);
        assert!(matches!(
            table.status(&id).await,
            Err(CoordinatorError::CommandNotFound(_))
        ));
        assert_eq!(
            table.ingest_ack(&Ack::success(node("a"), id)).await,
            AckOutcome::UnknownCommand
        );
    }
}
