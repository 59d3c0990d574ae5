//! Identifier newtypes and wall-clock helpers.
//!
//! On the wire every identifier is plain text. The newtypes reject the
//! separator characters of the text formats so a value that parses can
//! always be encoded again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::ParseError;

fn validate_token(s: &str) -> Result<(), ParseError> {
    let bad = s.is_empty()
        || s.chars()
            .any(|c| c == ':' || c == ',' || c.is_whitespace() || c.is_control());
    if bad {
        Err(ParseError::InvalidIdentifier(s.to_string()))
    } else {
        Ok(())
    }
}

/// Opaque identity a node announces in heartbeats and acks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        validate_token(s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_token(&s)?;
        Ok(Self(s))
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// Unique identifier of one play command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandId(String);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        validate_token(s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CommandId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CommandId {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_token(&s)?;
        Ok(Self(s))
    }
}

impl From<CommandId> for String {
    fn from(id: CommandId) -> Self {
        id.0
    }
}

/// Outcome a node reports for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckStatus::Success => "success",
            AckStatus::Error => "error",
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AckStatus::Success),
            "error" => Ok(AckStatus::Error),
            other => Err(ParseError::InvalidField {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Current wall-clock time as epoch seconds with sub-second precision.
pub fn epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Render epoch seconds the way every message carries them.
pub fn format_epoch(secs: f64) -> String {
    format!("{:.6}", secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_rejects_separators() {
        assert!(NodeId::parse("node-7f3a").is_ok());
        assert!(NodeId::parse("").is_err());
        assert!(NodeId::parse("a:b").is_err());
        assert!(NodeId::parse("a,b").is_err());
        assert!(NodeId::parse("a b").is_err());
    }

    #[test]
    fn command_ids_are_unique_tokens() {
        let a = CommandId::new();
        let b = CommandId::new();
        assert_ne!(a, b);
        assert_eq!(CommandId::parse(a.as_str()).unwrap(), a);
    }

    #[test]
    fn ack_status_text() {
        assert_eq!("success".parse::<AckStatus>().unwrap(), AckStatus::Success);
        assert_eq!(AckStatus::Error.to_string(), "error");
        assert!("ok".parse::<AckStatus>().is_err());
    }

    #[test]
    fn epoch_is_recent() {
        // 2020-01-01
        assert!(epoch_seconds() > 1_577_836_800.0);
        assert_eq!(format_epoch(1.5), "1.500000");
    }
}
