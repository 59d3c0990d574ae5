//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, EngineKind, ReelConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/reel/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("reel/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("reel.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Deep-merge `overlay` into `base`. Tables merge key by key, anything else replaces.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a config, filling gaps with defaults.
pub fn config_from_table(table: toml::Table, origin: &Path) -> Result<ReelConfig, ConfigError> {
    let mut config: ReelConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;
    config.expand_paths();
    Ok(config)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ReelConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup (the process env in production).
pub fn apply_overrides_from<F>(config: &mut ReelConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut hit = |key: &str| {
        let value = lookup(key);
        if value.is_some() {
            sources.env_overrides.push(key.to_string());
        }
        value
    };

    if let Some(v) = hit("REEL_MEDIA_DIR") {
        config.paths.media_dir = expand_path(&v);
    }
    if let Some(v) = hit("REEL_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
    }

    if let Some(v) = hit("REEL_HTTP_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.http_port = port;
        }
    }
    if let Some(v) = hit("REEL_BUS_PUBLISH") {
        config.bind.bus_publish = v;
    }
    if let Some(v) = hit("REEL_BUS_SUBSCRIBE") {
        config.bind.bus_subscribe = v;
    }

    if let Some(v) = hit("REEL_HUB_PUBLISH") {
        config.hub.publish = v;
    }
    if let Some(v) = hit("REEL_HUB_SUBSCRIBE") {
        config.hub.subscribe = v;
    }

    if let Some(v) = hit("REEL_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
    }
    // Standard OTEL variable wins over ours
    if let Some(v) = hit("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = v;
    }
    if let Some(v) = hit("REEL_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = hit("RUST_LOG") {
        config.telemetry.log_level = v;
    }

    if let Some(v) = hit("REEL_NODE_ID") {
        config.player.node_id = v;
    }
    if let Some(v) = hit("REEL_ENGINE") {
        if let Ok(kind) = v.parse::<EngineKind>() {
            config.player.engine = kind;
        }
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
