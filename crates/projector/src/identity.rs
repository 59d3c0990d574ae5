//! Stable node identity.

use anyhow::{Context, Result};
use reelproto::NodeId;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];
const ID_FILE: &str = "node-id";

/// Pick this node's id: explicit override, machine id, or a persisted random id.
pub fn resolve_node_id(override_id: Option<&str>, state_dir: &Path) -> Result<NodeId> {
    let machine_ids: Vec<PathBuf> = MACHINE_ID_PATHS.iter().map(PathBuf::from).collect();
    resolve_from(override_id, &machine_ids, state_dir)
}

pub fn resolve_from(
    override_id: Option<&str>,
    machine_id_paths: &[PathBuf],
    state_dir: &Path,
) -> Result<NodeId> {
    if let Some(id) = override_id.map(str::trim).filter(|id| !id.is_empty()) {
        return NodeId::parse(id).with_context(|| format!("Invalid node id {:?}", id));
    }

    for path in machine_id_paths {
        if let Some(id) = from_machine_id(path) {
            return Ok(id);
        }
    }

    let id_file = state_dir.join(ID_FILE);
    if let Ok(stored) = std::fs::read_to_string(&id_file) {
        if let Ok(id) = NodeId::parse(stored.trim()) {
            return Ok(id);
        }
    }

    let simple = Uuid::new_v4().simple().to_string();
    let id = NodeId::parse(&format!("node-{}", &simple[..12]))?;
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;
    std::fs::write(&id_file, id.as_str())
        .with_context(|| format!("Failed to write {}", id_file.display()))?;
    info!(node.id = %id, "Generated new node id");
    Ok(id)
}

fn from_machine_id(path: &Path) -> Option<NodeId> {
    let raw = std::fs::read_to_string(path).ok()?;
    let hex: String = raw.trim().chars().take(12).collect();
    if hex.len() < 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    NodeId::parse(&format!("node-{}", hex)).ok()
}
