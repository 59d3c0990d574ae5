//! Configuration loading for the reel coordinator (`marquee`) and nodes (`projector`).
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, tables merge key by key):
//! 1. `/etc/reel/config.toml` (system)
//! 2. `~/.config/reel/config.toml` (user)
//! 3. `./reel.toml` or the `--config` path (local override)
//! 4. Environment variables (`REEL_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! media_dir = "/media/usb"
//!
//! [bind]
//! http_port = 5000
//! bus_publish = "tcp://0.0.0.0:5590"
//! bus_subscribe = "tcp://0.0.0.0:5591"
//!
//! [hub]
//! publish = "tcp://192.168.50.1:5590"
//! subscribe = "tcp://192.168.50.1:5591"
//!
//! [timing]
//! lead_time_ms = 3500
//!
//! [player]
//! engine = "mpv"
//! ```

pub mod infra;
pub mod loader;
pub mod timing;

pub use infra::{BindConfig, EngineKind, HubConfig, PathsConfig, PlayerConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use timing::TimingConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete configuration. Both binaries read the same file and use the sections they need.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReelConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    /// Coordinator listeners.
    #[serde(default)]
    pub bind: BindConfig,

    /// Node view of the coordinator.
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub player: PlayerConfig,
}

impl ReelConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an optional explicit file replacing `./reel.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        let mut sources = ConfigSources::default();
        let mut config = Self::from_files(&files)?;
        sources.files = files;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Merge the given files in order, without env overrides.
    pub fn from_files(files: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for path in files {
            loader::merge_tables(&mut merged, loader::load_table_from_file(path)?);
        }
        let origin = files.last().map(PathBuf::as_path).unwrap_or(Path::new("<defaults>"));
        loader::config_from_table(merged, origin)
    }

    pub(crate) fn expand_paths(&mut self) {
        self.paths.media_dir = expand_path(&self.paths.media_dir.to_string_lossy());
        self.paths.state_dir = expand_path(&self.paths.state_dir.to_string_lossy());
        self.player.socket_dir = expand_path(&self.player.socket_dir.to_string_lossy());
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand so the sections come out in a readable order
        let mut output = String::new();

        output.push_str("# Reel Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!("media_dir = \"{}\"\n", self.paths.media_dir.display()));
        output.push_str(&format!("state_dir = \"{}\"\n", self.paths.state_dir.display()));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("http_port = {}\n", self.bind.http_port));
        output.push_str(&format!("bus_publish = \"{}\"\n", self.bind.bus_publish));
        output.push_str(&format!("bus_subscribe = \"{}\"\n", self.bind.bus_subscribe));

        output.push_str("\n[hub]\n");
        output.push_str(&format!("publish = \"{}\"\n", self.hub.publish));
        output.push_str(&format!("subscribe = \"{}\"\n", self.hub.subscribe));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("otlp_endpoint = \"{}\"\n", self.telemetry.otlp_endpoint));
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        let t = &self.timing;
        output.push_str("\n[timing]\n");
        output.push_str(&format!("heartbeat_interval_ms = {}\n", t.heartbeat_interval_ms));
        output.push_str(&format!("heartbeat_timeout_ms = {}\n", t.heartbeat_timeout_ms));
        output.push_str(&format!("ack_timeout_ms = {}\n", t.ack_timeout_ms));
        output.push_str(&format!("lead_time_ms = {}\n", t.lead_time_ms));
        output.push_str(&format!("publish_attempts = {}\n", t.publish_attempts));
        output.push_str(&format!("publish_delay_ms = {}\n", t.publish_delay_ms));
        output.push_str(&format!("retain_clear_ms = {}\n", t.retain_clear_ms));
        output.push_str(&format!("sync_interval_ms = {}\n", t.sync_interval_ms));
        output.push_str(&format!("engine_start_attempts = {}\n", t.engine_start_attempts));
        output.push_str(&format!("engine_start_timeout_ms = {}\n", t.engine_start_timeout_ms));
        output.push_str(&format!("loop_stop_timeout_ms = {}\n", t.loop_stop_timeout_ms));
        output.push_str(&format!("late_threshold_ms = {}\n", t.late_threshold_ms));

        output.push_str("\n[player]\n");
        let engine = match self.player.engine {
            EngineKind::Mpv => "mpv",
            EngineKind::Simulated => "simulated",
        };
        output.push_str(&format!("engine = \"{}\"\n", engine));
        output.push_str(&format!("node_id = \"{}\"\n", self.player.node_id));
        output.push_str(&format!("mpv_binary = \"{}\"\n", self.player.mpv_binary));
        output.push_str("mpv_args = [");
        let args: Vec<String> = self
            .player
            .mpv_args
            .iter()
            .map(|a| format!("\"{}\"", a))
            .collect();
        output.push_str(&args.join(", "));
        output.push_str("]\n");
        output.push_str(&format!("socket_dir = \"{}\"\n", self.player.socket_dir.display()));
        output.push_str(&format!("media_wait_ms = {}\n", self.player.media_wait_ms));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ReelConfig::default();
        assert_eq!(config.bind.http_port, 5000);
        assert_eq!(config.paths.media_dir, PathBuf::from("/media/usb"));
        assert!(!config.telemetry.otlp_enabled());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = ReelConfig::default();
        let rendered = config.to_toml();
        assert!(rendered.contains("[timing]"));
        assert!(rendered.contains("[player]"));

        let reparsed: ReelConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.bind.http_port, config.bind.http_port);
        assert_eq!(reparsed.timing.lead_time_ms, config.timing.lead_time_ms);
        assert_eq!(reparsed.player.mpv_args, config.player.mpv_args);
    }

    #[test]
    fn test_later_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        std::fs::File::create(&first)
            .unwrap()
            .write_all(b"[bind]\nhttp_port = 6000\n[timing]\nack_timeout_ms = 9000\n")
            .unwrap();
        std::fs::File::create(&second)
            .unwrap()
            .write_all(b"[bind]\nhttp_port = 6100\n")
            .unwrap();

        let config = ReelConfig::from_files(&[first, second]).unwrap();
        assert_eq!(config.bind.http_port, 6100);
        assert_eq!(config.timing.ack_timeout_ms, 9000);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = ReelConfig::from_files(&[PathBuf::from("/nonexistent/reel.toml")]).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
