//! Storage layout for drift
//!
//! All state lives under the project root, at locations taken from
//! [`Config`]:
//!
//! ```text
//! .drift.toml                          # Project configuration
//! .drift/
//!   evolution/
//!     evolution-index.json             # Evolution event index
//!     evolution-index.json.lock        # Append lock
//!   timeline/
//!     unified-timeline.json            # Last synchronized unified snapshot
//!   snapshots/                         # Context snapshot summaries (*.json)
//!   builds/                            # Build attempt logs (*.log)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::config::{Config, CONFIG_FILE};
use crate::error::Result;
use crate::lock;

/// Top-level state directory
pub const STATE_DIR: &str = ".drift";

/// Resolved on-disk locations for one project
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    evolution_dir: PathBuf,
    index_file: PathBuf,
    timeline_dir: PathBuf,
    snapshot_file: PathBuf,
    snapshots_dir: PathBuf,
    builds_dir: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> Self {
        let root = root.into();
        let evolution_dir = root.join(&config.evolution.dir);
        let timeline_dir = root.join(&config.timeline.dir);
        Self {
            index_file: evolution_dir.join(&config.evolution.index_file),
            snapshot_file: timeline_dir.join(&config.timeline.snapshot_file),
            snapshots_dir: root.join(&config.sources.snapshots_dir),
            builds_dir: root.join(&config.sources.builds_dir),
            evolution_dir,
            timeline_dir,
            root,
        }
    }

    // =========================================================================
    // Path accessors
    // =========================================================================

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn evolution_dir(&self) -> &Path {
        &self.evolution_dir
    }

    /// Path to the evolution index
    pub fn index_file(&self) -> &Path {
        &self.index_file
    }

    /// Lock guarding read-modify-write of the evolution index
    pub fn index_lock_file(&self) -> PathBuf {
        lock::lock_path_for(&self.index_file)
    }

    pub fn timeline_dir(&self) -> &Path {
        &self.timeline_dir
    }

    /// Path to the persisted unified timeline snapshot
    pub fn snapshot_file(&self) -> &Path {
        &self.snapshot_file
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    // =========================================================================
    // Directory initialization
    // =========================================================================

    /// Create every state directory
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.evolution_dir)?;
        fs::create_dir_all(&self.timeline_dir)?;
        fs::create_dir_all(&self.snapshots_dir)?;
        fs::create_dir_all(&self.builds_dir)?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.evolution_dir.exists()
    }

    // =========================================================================
    // File I/O helpers
    // =========================================================================

    /// Write JSON atomically (temp file, then rename)
    pub fn write_json<T: Serialize>(&self, path: &Path, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        lock::write_atomic(path, json.as_bytes())
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)?;
        let data: T = serde_json::from_str(&content)?;
        Ok(data)
    }
}

/// Normalize a path to the forward-slash, project-relative form used as a key
///
/// Absolute paths under `root` are made relative; a leading `./` is dropped.
pub fn normalize_path(root: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).unwrap_or(candidate)
    } else {
        candidate
    };
    let mut normalized = relative.to_string_lossy().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_follow_config() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.timeline.snapshot_file = "snap.json".to_string();
        let storage = Storage::new(temp.path(), &config);

        assert_eq!(
            storage.index_file(),
            temp.path().join(".drift/evolution/evolution-index.json")
        );
        assert_eq!(
            storage.index_lock_file(),
            temp.path()
                .join(".drift/evolution/evolution-index.json.lock")
        );
        assert_eq!(
            storage.snapshot_file(),
            temp.path().join(".drift/timeline/snap.json")
        );
        assert_eq!(storage.config_file(), temp.path().join(".drift.toml"));
    }

    #[test]
    fn init_creates_layout() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path(), &Config::default());
        assert!(!storage.is_initialized());

        storage.init().unwrap();
        assert!(storage.is_initialized());
        assert!(storage.timeline_dir().is_dir());
        assert!(storage.snapshots_dir().is_dir());
        assert!(storage.builds_dir().is_dir());
    }

    #[test]
    fn json_round_trip() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path(), &Config::default());
        let path = temp.path().join("nested/data.json");

        storage.write_json(&path, &vec![1, 2, 3]).unwrap();
        let back: Vec<u32> = storage.read_json(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }

    #[test]
    fn normalize_strips_root_and_dot_prefix() {
        let root = Path::new("/work/project");
        assert_eq!(normalize_path(root, "./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path(root, "/work/project/src/a.rs"), "src/a.rs");
        assert_eq!(normalize_path(root, "src/b.rs"), "src/b.rs");
    }
}
