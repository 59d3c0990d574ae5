//! Plain-text payloads for each topic.
//!
//! Formats (fields are comma or colon separated, no quoting):
//!
//! | topic | payload |
//! |---|---|
//! | heartbeat | `<nodeId>` |
//! | command | `<videoIndex>,<scheduledStartAt>,<commandId>` |
//! | ack | `<nodeId>:<commandId>:<success\|error>[:<detail>]` |
//! | time request | `<nodeId>` |
//! | time response | `<epochSeconds>` |
//!
//! An empty command payload is a cleared retained copy, not a command.

use crate::domain::{format_epoch, AckStatus, CommandId, NodeId};
use crate::ParseError;

fn non_empty(payload: &str) -> Result<&str, ParseError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        Err(ParseError::Empty)
    } else {
        Ok(trimmed)
    }
}

fn parse_epoch(field: &'static str, raw: &str) -> Result<f64, ParseError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidField {
            field,
            value: raw.to_string(),
        })
}

/// Periodic liveness announcement from a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub node_id: NodeId,
}

impl Heartbeat {
    pub fn encode(&self) -> String {
        self.node_id.to_string()
    }

    pub fn decode(payload: &str) -> Result<Self, ParseError> {
        Ok(Self {
            node_id: NodeId::parse(non_empty(payload)?)?,
        })
    }
}

/// Instruction for every node to start one video at a wall-clock instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayCommand {
    pub video_index: usize,
    /// Epoch seconds on the coordinator's clock.
    pub scheduled_start_at: f64,
    pub command_id: CommandId,
}

impl PlayCommand {
    pub fn encode(&self) -> String {
        format!(
            "{},{},{}",
            self.video_index,
            format_epoch(self.scheduled_start_at),
            self.command_id
        )
    }

    pub fn decode(payload: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = non_empty(payload)?.split(',').collect();
        if fields.len() != 3 {
            return Err(ParseError::FieldCount {
                expected: 3,
                got: fields.len(),
            });
        }

        let video_index =
            fields[0]
                .trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidField {
                    field: "videoIndex",
                    value: fields[0].to_string(),
                })?;
        let scheduled_start_at = parse_epoch("scheduledStartAt", fields[1])?;
        let command_id = CommandId::parse(fields[2].trim())?;

        Ok(Self {
            video_index,
            scheduled_start_at,
            command_id,
        })
    }
}

/// A node's report on one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub node_id: NodeId,
    pub command_id: CommandId,
    pub status: AckStatus,
    pub detail: Option<String>,
}

impl Ack {
    pub fn success(node_id: NodeId, command_id: CommandId) -> Self {
        Self {
            node_id,
            command_id,
            status: AckStatus::Success,
            detail: None,
        }
    }

    pub fn error(node_id: NodeId, command_id: CommandId, detail: impl Into<String>) -> Self {
        Self {
            node_id,
            command_id,
            status: AckStatus::Error,
            detail: Some(detail.into()),
        }
    }

    pub fn encode(&self) -> String {
        match &self.detail {
            // Newlines would split the payload on line-oriented tooling
            Some(detail) => format!(
                "{}:{}:{}:{}",
                self.node_id,
                self.command_id,
                self.status,
                detail.replace(['\n', '\r'], " ")
            ),
            None => format!("{}:{}:{}", self.node_id, self.command_id, self.status),
        }
    }

    /// The detail is the remainder after the third colon and may itself contain colons.
    pub fn decode(payload: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = non_empty(payload)?.splitn(4, ':').collect();
        if fields.len() < 3 {
            return Err(ParseError::FieldCount {
                expected: 3,
                got: fields.len(),
            });
        }

        Ok(Self {
            node_id: NodeId::parse(fields[0])?,
            command_id: CommandId::parse(fields[1])?,
            status: fields[2].parse()?,
            detail: fields
                .get(3)
                .map(|d| d.to_string())
                .filter(|d| !d.is_empty()),
        })
    }
}

/// Node asking for the coordinator's clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSyncRequest {
    pub node_id: NodeId,
}

impl TimeSyncRequest {
    pub fn encode(&self) -> String {
        self.node_id.to_string()
    }

    pub fn decode(payload: &str) -> Result<Self, ParseError> {
        Ok(Self {
            node_id: NodeId::parse(non_empty(payload)?)?,
        })
    }
}

/// Coordinator clock reading in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSyncResponse {
    pub coordinator_time: f64,
}

impl TimeSyncResponse {
    pub fn encode(&self) -> String {
        format_epoch(self.coordinator_time)
    }

    pub fn decode(payload: &str) -> Result<Self, ParseError> {
        Ok(Self {
            coordinator_time: parse_epoch("epochSeconds", non_empty(payload)?)?,
        })
    }
}
