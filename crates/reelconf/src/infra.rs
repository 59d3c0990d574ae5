//! Infrastructure configuration - paths, sockets, telemetry, player backend.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths shared by the coordinator and the nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the media files (a mounted USB stick on the nodes).
    /// Default: /media/usb
    #[serde(default = "PathsConfig::default_media_dir")]
    pub media_dir: PathBuf,

    /// Where a node persists its generated identity.
    /// Default: ~/.local/share/reel
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    fn default_media_dir() -> PathBuf {
        PathBuf::from("/media/usb")
    }

    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/reel"))
            .unwrap_or_else(|| PathBuf::from(".local/share/reel"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media_dir: Self::default_media_dir(),
            state_dir: Self::default_state_dir(),
        }
    }
}

/// Addresses the coordinator binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// HTTP control surface port.
    /// Default: 5000
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,

    /// PUB socket for coordinator-to-node topics (commands, time responses).
    /// Default: tcp://0.0.0.0:5590
    #[serde(default = "BindConfig::default_bus_publish")]
    pub bus_publish: String,

    /// SUB socket for node-to-coordinator topics (heartbeats, acks, time requests).
    /// Default: tcp://0.0.0.0:5591
    #[serde(default = "BindConfig::default_bus_subscribe")]
    pub bus_subscribe: String,
}

impl BindConfig {
    fn default_http_port() -> u16 {
        5000
    }

    fn default_bus_publish() -> String {
        "tcp://0.0.0.0:5590".to_string()
    }

    fn default_bus_subscribe() -> String {
        "tcp://0.0.0.0:5591".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
            bus_publish: Self::default_bus_publish(),
            bus_subscribe: Self::default_bus_subscribe(),
        }
    }
}

/// Where nodes find the coordinator's sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Coordinator PUB socket (nodes subscribe here).
    /// Default: tcp://192.168.50.1:5590
    #[serde(default = "HubConfig::default_publish")]
    pub publish: String,

    /// Coordinator SUB socket (nodes publish here).
    /// Default: tcp://192.168.50.1:5591
    #[serde(default = "HubConfig::default_subscribe")]
    pub subscribe: String,
}

impl HubConfig {
    fn default_publish() -> String {
        "tcp://192.168.50.1:5590".to_string()
    }

    fn default_subscribe() -> String {
        "tcp://192.168.50.1:5591".to_string()
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            publish: Self::default_publish(),
            subscribe: Self::default_subscribe(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: "" (disabled)
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log level or EnvFilter directive.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// True when an OTLP exporter should be installed.
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Which media engine a node drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// External mpv processes over JSON IPC.
    #[default]
    Mpv,
    /// In-process engine with no video output.
    Simulated,
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpv" => Ok(Self::Mpv),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(format!("unknown engine kind: {other}")),
        }
    }
}

/// Node player settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub engine: EngineKind,

    /// Fixed node id. Empty means derive from the machine id.
    #[serde(default)]
    pub node_id: String,

    /// Default: mpv
    #[serde(default = "PlayerConfig::default_mpv_binary")]
    pub mpv_binary: String,

    /// Extra arguments handed to every mpv process.
    #[serde(default = "PlayerConfig::default_mpv_args")]
    pub mpv_args: Vec<String>,

    /// Directory for mpv IPC sockets.
    /// Default: /tmp
    #[serde(default = "PlayerConfig::default_socket_dir")]
    pub socket_dir: PathBuf,

    /// How long a node waits for the media directory to appear at startup.
    /// Default: 30000
    #[serde(default = "PlayerConfig::default_media_wait_ms")]
    pub media_wait_ms: u64,
}

impl PlayerConfig {
    fn default_mpv_binary() -> String {
        "mpv".to_string()
    }

    fn default_mpv_args() -> Vec<String> {
        vec!["--fullscreen".to_string(), "--no-osc".to_string()]
    }

    fn default_socket_dir() -> PathBuf {
        PathBuf::from("/tmp")
    }

    fn default_media_wait_ms() -> u64 {
        30_000
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            node_id: String::new(),
            mpv_binary: Self::default_mpv_binary(),
            mpv_args: Self::default_mpv_args(),
            socket_dir: Self::default_socket_dir(),
            media_wait_ms: Self::default_media_wait_ms(),
        }
    }
}
