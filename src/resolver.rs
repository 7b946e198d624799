//! File state resolution and change classification.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::EvolutionConfig;
use crate::error::{Error, Result};
use crate::event::{EventKind, FileState};
use crate::worktree::WorkingTree;

/// Bytes inspected for NUL when deciding whether content is binary.
const BINARY_SNIFF_LEN: usize = 8000;

/// SHA-256 of `data`, lowercase hex, truncated to `length` characters.
pub fn hash_content(data: &[u8], length: usize) -> String {
    let digest = Sha256::digest(data);
    let mut encoded = hex::encode(digest);
    encoded.truncate(length);
    encoded
}

fn is_binary(bytes: &[u8]) -> bool {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    sniff.contains(&0) || std::str::from_utf8(bytes).is_err()
}

/// State of an existing file with content `bytes`.
///
/// Binary content is recorded as existing with no hash or line count.
pub fn state_from_bytes(bytes: &[u8], hash_length: usize) -> FileState {
    if is_binary(bytes) {
        return FileState {
            exists: true,
            content_hash: None,
            size_bytes: bytes.len() as u64,
            line_count: 0,
        };
    }

    FileState {
        exists: true,
        content_hash: Some(hash_content(bytes, hash_length)),
        size_bytes: bytes.len() as u64,
        line_count: bytes.split(|b| *b == b'\n').count(),
    }
}

/// Classify the transition from `previous` to `current`.
pub fn classify(current: &FileState, previous: Option<&FileState>) -> EventKind {
    match previous {
        None if current.exists => EventKind::Created,
        None => EventKind::Deleted,
        Some(prev) if prev.exists && !current.exists => EventKind::Deleted,
        Some(prev) if !prev.exists && current.exists => EventKind::Created,
        Some(prev) if prev.content_hash != current.content_hash => EventKind::Modified,
        Some(_) => EventKind::Modified,
    }
}

/// Glob-based ignore list.
///
/// A path is ignored when a pattern matches the whole path or any single
/// component of it, so `node_modules` skips every file underneath.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                let raw = raw.as_ref().trim().trim_end_matches('/');
                glob::Pattern::new(raw).map_err(|err| {
                    Error::InvalidConfig(format!("invalid ignore pattern '{raw}': {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        self.patterns.iter().any(|pattern| {
            pattern.matches(path)
                || path
                    .split('/')
                    .filter(|component| !component.is_empty())
                    .any(|component| pattern.matches(component))
        })
    }
}

/// Resolves file state through a [`WorkingTree`], honoring the ignore list.
#[derive(Clone)]
pub struct FileStateResolver {
    tree: Arc<dyn WorkingTree>,
    ignore: IgnoreMatcher,
    hash_length: usize,
}

impl FileStateResolver {
    pub fn new(tree: Arc<dyn WorkingTree>, ignore: IgnoreMatcher, hash_length: usize) -> Self {
        Self {
            tree,
            ignore,
            hash_length,
        }
    }

    pub fn from_config(tree: Arc<dyn WorkingTree>, config: &EvolutionConfig) -> Result<Self> {
        Ok(Self::new(
            tree,
            IgnoreMatcher::new(config.ignore.as_slice())?,
            config.hash_length,
        ))
    }

    pub fn tree(&self) -> &Arc<dyn WorkingTree> {
        &self.tree
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore.is_ignored(path)
    }

    /// Current state of `path`; `None` when the path is ignored.
    pub fn resolve(&self, path: &str) -> Option<FileState> {
        if self.is_ignored(path) {
            return None;
        }
        Some(self.tree.file_state(path, self.hash_length))
    }
}
