//! Ordered listing of playable files in the media directory.
//!
//! The position of a file in the sorted listing is its video index on the
//! wire, so every host that sees the same files agrees on the numbering.

use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// File extensions treated as video (compared case-insensitively).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "flv", "wmv", "webm", "mpeg", "mpg", "ts",
];

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media directory {path} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        source: walkdir::Error,
    },
}

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaLibrary {
    root: PathBuf,
    files: Vec<String>,
}

impl MediaLibrary {
    /// List video files directly inside `root`, sorted by name.
    pub fn scan(root: impl Into<PathBuf>) -> Result<Self, MediaError> {
        let root = root.into();
        let mut files = Vec::new();

        for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|source| MediaError::Unreadable {
                path: root.clone(),
                source,
            })?;
            if entry.file_type().is_file() && is_video(entry.path()) {
                if let Some(name) = entry.file_name().to_str() {
                    files.push(name.to_string());
                }
            }
        }

        files.sort();
        Ok(Self { root, files })
    }

    /// An empty library for `root`. Used when the directory is not there yet.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.files
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.files.get(index).map(String::as_str)
    }

    pub fn path(&self, index: usize) -> Option<PathBuf> {
        self.name(index).map(|name| self.root.join(name))
    }
}
