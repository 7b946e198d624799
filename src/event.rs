//! Evolution event records.
//!
//! An [`EvolutionEvent`] is written once per tracked change and never
//! mutated afterwards. File-level events carry a [`FileState`]; task-level
//! events (start, complete, branch and merge points) do not.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::error::{Error, Result};

/// Closed set of recognized change and lifecycle labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Renamed,
    BranchPoint,
    MergePoint,
    TaskStart,
    TaskComplete,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Created,
        EventKind::Modified,
        EventKind::Deleted,
        EventKind::Renamed,
        EventKind::BranchPoint,
        EventKind::MergePoint,
        EventKind::TaskStart,
        EventKind::TaskComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Modified => "modified",
            EventKind::Deleted => "deleted",
            EventKind::Renamed => "renamed",
            EventKind::BranchPoint => "branch_point",
            EventKind::MergePoint => "merge_point",
            EventKind::TaskStart => "task_start",
            EventKind::TaskComplete => "task_complete",
        }
    }

    /// Whether events of this kind describe a single file.
    pub fn is_file_level(&self) -> bool {
        matches!(
            self,
            EventKind::Created | EventKind::Modified | EventKind::Deleted | EventKind::Renamed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "invalid event kind '{}': expected one of {}",
                    s,
                    EventKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Observable state of a file at event time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub exists: bool,
    /// Truncated content digest; `None` for absent, binary or unreadable files.
    pub content_hash: Option<String>,
    pub size_bytes: u64,
    pub line_count: usize,
}

impl FileState {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Version-control metadata, passed through from the working tree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMeta {
    pub branch: Option<String>,
    pub commit: Option<String>,
    #[serde(default)]
    pub staged: bool,
    #[serde(default)]
    pub modified: bool,
    pub last_commit_for_file: Option<String>,
    #[serde(default)]
    pub commits_ahead_of_baseline: u32,
}

/// Free-form attribution for an event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl TaskContext {
    pub fn is_empty(&self) -> bool {
        self.story_id.is_none()
            && self.subtask_id.is_none()
            && self.agent.is_none()
            && self.intent.is_none()
    }
}

/// Closed line range `[start_line, end_line]`, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSection {
    pub start_line: u32,
    pub end_line: u32,
}

impl LineSection {
    /// Build a section, swapping the bounds if they arrive reversed.
    pub fn new(start_line: u32, end_line: u32) -> Self {
        if start_line <= end_line {
            Self {
                start_line,
                end_line,
            }
        } else {
            Self {
                start_line: end_line,
                end_line: start_line,
            }
        }
    }

    pub fn overlaps(&self, other: &LineSection) -> bool {
        self.start_line <= other.end_line && other.start_line <= self.end_line
    }
}

impl FromStr for LineSection {
    type Err = Error;

    /// Parses `10-20` or a single line `7`.
    fn from_str(s: &str) -> Result<Self> {
        let parse = |raw: &str| {
            raw.trim().parse::<u32>().map_err(|_| {
                Error::InvalidArgument(format!("invalid line section '{s}': expected START-END"))
            })
        };
        match s.split_once('-') {
            Some((start, end)) => Ok(LineSection::new(parse(start)?, parse(end)?)),
            None => {
                let line = parse(s)?;
                Ok(LineSection::new(line, line))
            }
        }
    }
}

/// Summary of how a file changed since its previous record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    #[serde(default)]
    pub lines_added: u32,
    #[serde(default)]
    pub lines_removed: u32,
    #[serde(default)]
    pub sections: Vec<LineSection>,
}

/// Branch details attached to branch and merge points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
}

/// One immutable record in the evolution store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_state: Option<FileState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_meta: Option<VersionMeta>,
    #[serde(default, skip_serializing_if = "TaskContext::is_empty")]
    pub task_context: TaskContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_summary: Option<DiffSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchInfo>,
    /// Path before a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    /// Number of files recorded alongside a task-level event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_tracked: Option<usize>,
}

impl EvolutionEvent {
    fn base(task_id: impl Into<String>, event_kind: EventKind) -> Self {
        Self {
            id: new_event_id(),
            file_path: None,
            task_id: task_id.into(),
            timestamp: Utc::now(),
            event_kind,
            file_state: None,
            version_meta: None,
            task_context: TaskContext::default(),
            diff_summary: None,
            branch: None,
            previous_path: None,
            files_tracked: None,
        }
    }

    /// New file-level event stamped with the current time.
    pub fn file(
        task_id: impl Into<String>,
        path: impl Into<String>,
        event_kind: EventKind,
        state: FileState,
    ) -> Self {
        let mut event = Self::base(task_id, event_kind);
        event.file_path = Some(path.into());
        event.file_state = Some(state);
        event
    }

    /// New task-level event (no file path or file state).
    pub fn task(task_id: impl Into<String>, event_kind: EventKind) -> Self {
        Self::base(task_id, event_kind)
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.task_context = context;
        self
    }

    pub fn with_version_meta(mut self, meta: VersionMeta) -> Self {
        self.version_meta = Some(meta);
        self
    }

    pub fn with_diff(mut self, diff: DiffSummary) -> Self {
        self.diff_summary = Some(diff);
        self
    }

    pub fn with_branch(mut self, branch: BranchInfo) -> Self {
        self.branch = Some(branch);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_task_level(&self) -> bool {
        self.file_path.is_none()
    }

    /// Content hash carried by this event, if any.
    pub fn content_hash(&self) -> Option<&str> {
        self.file_state
            .as_ref()
            .and_then(|state| state.content_hash.as_deref())
    }
}

static ID_GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());

/// Monotonic ULID ids: later calls in this process always sort after earlier ones.
pub fn new_event_id() -> String {
    let mut generator = ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // The random part only overflows after 2^80 ids in one millisecond.
    let ulid = generator.generate().unwrap_or_else(|_| Ulid::new());
    format!("evo-{}", ulid.to_string().to_ascii_lowercase())
}
