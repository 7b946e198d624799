//! Timeline sources other than the evolution store.
//!
//! Providers hand over records as raw JSON so a malformed record still
//! reaches the timeline; typed parsing happens during normalization.
//!
//! ```text
//! .drift/snapshots/*.json     one summary per file, or {"snapshots": [...]}
//! .drift/builds/*.log         [timestamp] [storyId] [subtaskId] action: {json}
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::event::EvolutionEvent;

static BUILD_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\] \[(.*?)\] \[(.*?)\] (\w+): (.*)").ok());

/// Origin of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    FileEvolution,
    BuildState,
    ContextSnapshot,
    UserAction,
    System,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::FileEvolution,
        Source::BuildState,
        Source::ContextSnapshot,
        Source::UserAction,
        Source::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::FileEvolution => "file_evolution",
            Source::BuildState => "build_state",
            Source::ContextSnapshot => "context_snapshot",
            Source::UserAction => "user_action",
            Source::System => "system",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Source::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == normalized)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "invalid source '{s}': expected one of file_evolution, build_state, \
                     context_snapshot, user_action, system"
                ))
            })
    }
}

/// A record from one source, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    FileEvolution(EvolutionEvent),
    BuildState(Value),
    ContextSnapshot(Value),
    UserAction(Value),
    System(Value),
}

impl SourceRecord {
    pub fn source(&self) -> Source {
        match self {
            SourceRecord::FileEvolution(_) => Source::FileEvolution,
            SourceRecord::BuildState(_) => Source::BuildState,
            SourceRecord::ContextSnapshot(_) => Source::ContextSnapshot,
            SourceRecord::UserAction(_) => Source::UserAction,
            SourceRecord::System(_) => Source::System,
        }
    }
}

/// Context snapshot summary as written by the snapshot collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    #[serde(default)]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub modified_files: Vec<String>,
}

/// One parsed build attempt log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    pub timestamp: DateTime<Utc>,
    pub story_id: String,
    #[serde(default)]
    pub subtask_id: Option<String>,
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

/// Anything that can feed records into the unified timeline.
pub trait RecordProvider: Send + Sync {
    /// Short name used in logs and statistics.
    fn name(&self) -> &str;

    fn records(&self) -> Result<Vec<SourceRecord>>;
}

// =============================================================================
// Build log parsing
// =============================================================================

/// Parse `[timestamp] [storyId] [subtaskId] action: {json}`.
///
/// Returns the line's fields as JSON: a [`BuildRecord`] shape when the line
/// matches (an unparseable payload becomes `{}`), otherwise `{"line": ...}`
/// so the caller can surface it as a malformed record.
pub fn parse_log_line(line: &str) -> Value {
    let captures = BUILD_LINE.as_ref().and_then(|re| re.captures(line));
    let Some(caps) = captures else {
        return serde_json::json!({ "line": line });
    };

    let field = |idx: usize| caps.get(idx).map(|m| m.as_str()).unwrap_or_default();
    let details: Value = serde_json::from_str(field(5)).unwrap_or_else(|_| serde_json::json!({}));
    let subtask = field(3);

    serde_json::json!({
        "timestamp": field(1),
        "storyId": field(2),
        "subtaskId": if subtask.is_empty() { Value::Null } else { Value::from(subtask) },
        "action": field(4),
        "details": details,
    })
}

fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
        .collect();
    paths.sort();
    Ok(paths)
}

// =============================================================================
// File-backed providers
// =============================================================================

/// Context snapshot summaries stored as `*.json` files in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RecordProvider for SnapshotDir {
    fn name(&self) -> &str {
        "snapshots"
    }

    fn records(&self) -> Result<Vec<SourceRecord>> {
        let mut records = Vec::new();
        for path in files_with_extension(&self.dir, "json")? {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "unreadable snapshot file");
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(mut map)) if map.get("snapshots").is_some_and(Value::is_array) => {
                    if let Some(Value::Array(items)) = map.remove("snapshots") {
                        records.extend(items.into_iter().map(SourceRecord::ContextSnapshot));
                    }
                }
                Ok(value) => records.push(SourceRecord::ContextSnapshot(value)),
                Err(_) => records.push(SourceRecord::ContextSnapshot(serde_json::json!({
                    "file": path.display().to_string(),
                    "raw": content,
                }))),
            }
        }
        Ok(records)
    }
}

/// Build attempt logs stored as `*.log` files in one directory.
#[derive(Debug, Clone)]
pub struct BuildLogDir {
    dir: PathBuf,
}

impl BuildLogDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RecordProvider for BuildLogDir {
    fn name(&self) -> &str {
        "builds"
    }

    fn records(&self) -> Result<Vec<SourceRecord>> {
        let mut records = Vec::new();
        for path in files_with_extension(&self.dir, "log")? {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "unreadable build log");
                    continue;
                }
            };
            records.extend(
                content
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(|line| SourceRecord::BuildState(parse_log_line(line))),
            );
        }
        Ok(records)
    }
}

/// In-memory provider for records pushed by the embedding process, such as
/// user actions or system notices.
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    records: Mutex<Vec<SourceRecord>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, record: SourceRecord) {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.push(record);
    }
}

impl RecordProvider for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn records(&self) -> Result<Vec<SourceRecord>> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.clone())
    }
}
