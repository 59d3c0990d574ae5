//! Bus topics. Names are kept compatible with the deployed boxes.

use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// Every topic the playback protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// node -> coordinator, payload `<nodeId>`
    Heartbeat,
    /// coordinator -> nodes, payload `<videoIndex>,<scheduledStartAt>,<commandId>`
    Command,
    /// node -> coordinator, payload `<nodeId>:<commandId>:<status>[:<detail>]`
    Ack,
    /// node -> coordinator, payload is an opaque marker
    TimeSyncRequest,
    /// coordinator -> nodes, payload `<epochSeconds>`
    TimeSyncResponse,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Heartbeat,
        Topic::Command,
        Topic::Ack,
        Topic::TimeSyncRequest,
        Topic::TimeSyncResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Heartbeat => "clients/status",
            Topic::Command => "video/play",
            Topic::Ack => "video/ack",
            Topic::TimeSyncRequest => "time/request",
            Topic::TimeSyncResponse => "time/response",
        }
    }

    /// Topics that flow from the coordinator to the nodes.
    pub fn is_downstream(&self) -> bool {
        matches!(self, Topic::Command | Topic::TimeSyncResponse)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParseError::UnknownTopic(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
        assert!("video/stop".parse::<Topic>().is_err());
    }

    #[test]
    fn direction() {
        assert!(Topic::Command.is_downstream());
        assert!(!Topic::Ack.is_downstream());
    }
}
