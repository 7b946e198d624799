//! Unified timeline.
//!
//! Merges the evolution store with every registered [`RecordProvider`] into
//! one ascending list of [`UnifiedEntry`] values, persists a synchronized
//! snapshot of it, and serves trend analysis and export on top.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, TimelineConfig};
use crate::drift::{self, DriftAnalysis};
use crate::error::Result;
use crate::event::{BranchInfo, DiffSummary, EvolutionEvent, TaskContext, VersionMeta};
use crate::export::{self, ExportFormat, ExportSummary};
use crate::resolver::hash_content;
use crate::sources::{
    BuildLogDir, BuildRecord, RecordProvider, SnapshotDir, SnapshotSummary, Source, SourceRecord,
};
use crate::storage::Storage;
use crate::store::{EventFilter, EventStore, StoreStatistics};
use crate::trends::{self, TrendAnalysis};

/// Schema version of the persisted unified snapshot
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Event kind given to records that could not be normalized
pub const UNKNOWN_KIND: &str = "unknown";

/// Entries considered by trend analysis when no limit is given
pub const DEFAULT_TREND_LIMIT: usize = 1000;

/// One normalized timeline entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    pub event_kind: String,
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub details: Value,
}

impl UnifiedEntry {
    pub fn is_unknown(&self) -> bool {
        self.event_kind == UNKNOWN_KIND
    }
}

/// Filters applied after sorting; `limit` keeps the most recent N.
#[derive(Debug, Clone, Default)]
pub struct TimelineFilter {
    pub source: Option<Source>,
    pub task_id: Option<String>,
    pub kinds: Vec<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TimelineFilter {
    pub fn matches(&self, entry: &UnifiedEntry) -> bool {
        if let Some(source) = self.source {
            if entry.source != source {
                return false;
            }
        }

        if let Some(task) = &self.task_id {
            if entry.task_id.as_deref() != Some(task.as_str()) {
                return false;
            }
        }

        if !self.kinds.is_empty() && !self.kinds.iter().any(|kind| kind == &entry.event_kind) {
            return false;
        }

        if let Some(since) = &self.since {
            if &entry.timestamp < since {
                return false;
            }
        }

        true
    }
}

/// Persisted result of [`Timeline::sync`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineSnapshot {
    pub version: String,
    pub synced_at: DateTime<Utc>,
    pub entry_count: usize,
    pub sources: Vec<Source>,
    pub tasks: Vec<String>,
    pub entries: Vec<UnifiedEntry>,
}

/// Location and freshness of the persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStatus {
    pub path: String,
    pub exists: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub age_seconds: Option<i64>,
    pub entry_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatistics {
    pub file_evolution: StoreStatistics,
    pub records_by_source: BTreeMap<String, usize>,
    pub snapshot_count: usize,
    pub build_record_count: usize,
    pub unified_timeline: SnapshotStatus,
}

// =============================================================================
// Normalization
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvolutionDetails<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version_meta: Option<&'a VersionMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diff_summary: Option<&'a DiffSummary>,
    #[serde(skip_serializing_if = "context_is_empty")]
    task_context: &'a TaskContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a BranchInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files_tracked: Option<usize>,
}

fn context_is_empty(context: &&TaskContext) -> bool {
    context.is_empty()
}

/// Shape accepted from user-action and system sources.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenericRecord {
    #[serde(default)]
    id: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default, alias = "eventType")]
    event_kind: Option<String>,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

/// Stable id for records that carry none.
fn derived_id(source: Source, raw: &Value) -> String {
    let key = format!("{}:{}", source.as_str(), raw);
    format!("tl-{}", hash_content(key.as_bytes(), 16))
}

fn string_field(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| raw.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Entry for a record its source could not interpret.
///
/// The raw payload is kept under `details.raw`; the timestamp falls back to
/// `observed_at` when the record has no usable one.
fn unknown_entry(source: Source, raw: Value, observed_at: DateTime<Utc>) -> UnifiedEntry {
    let timestamp = raw
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(observed_at);

    UnifiedEntry {
        id: string_field(&raw, &["id"]).unwrap_or_else(|| derived_id(source, &raw)),
        timestamp,
        source,
        event_kind: UNKNOWN_KIND.to_string(),
        task_id: string_field(&raw, &["taskId", "storyId"]),
        file_path: None,
        summary: format!("Unrecognized {source} record"),
        details: serde_json::json!({ "raw": raw }),
    }
}

fn normalize_evolution(event: EvolutionEvent) -> UnifiedEntry {
    let kind = event.event_kind.as_str();
    let summary = match &event.file_path {
        Some(path) => format!("{kind}: {path}"),
        None => kind.to_string(),
    };
    let details = serde_json::to_value(EvolutionDetails {
        version_meta: event.version_meta.as_ref(),
        diff_summary: event.diff_summary.as_ref(),
        task_context: &event.task_context,
        branch: event.branch.as_ref(),
        previous_path: event.previous_path.as_deref(),
        files_tracked: event.files_tracked,
    })
    .unwrap_or_else(|_| serde_json::json!({}));

    UnifiedEntry {
        id: event.id,
        timestamp: event.timestamp,
        source: Source::FileEvolution,
        event_kind: kind.to_string(),
        task_id: Some(event.task_id),
        file_path: event.file_path,
        summary,
        details,
    }
}

fn normalize_snapshot(raw: Value, observed_at: DateTime<Utc>) -> UnifiedEntry {
    let summary: SnapshotSummary = match serde_json::from_value(raw.clone()) {
        Ok(summary) => summary,
        Err(_) => return unknown_entry(Source::ContextSnapshot, raw, observed_at),
    };

    UnifiedEntry {
        id: summary
            .id
            .clone()
            .unwrap_or_else(|| derived_id(Source::ContextSnapshot, &raw)),
        timestamp: summary.timestamp,
        source: Source::ContextSnapshot,
        event_kind: "snapshot".to_string(),
        task_id: summary.story_id.clone(),
        file_path: None,
        summary: summary
            .description
            .clone()
            .unwrap_or_else(|| "Context snapshot".to_string()),
        details: serde_json::json!({
            "storyId": summary.story_id,
            "agent": summary.agent,
            "modifiedFiles": summary.modified_files,
        }),
    }
}

fn normalize_build(raw: Value, observed_at: DateTime<Utc>) -> UnifiedEntry {
    let record: BuildRecord = match serde_json::from_value(raw.clone()) {
        Ok(record) => record,
        Err(_) => return unknown_entry(Source::BuildState, raw, observed_at),
    };

    let action = if record.action.is_empty() {
        "build_event".to_string()
    } else {
        record.action.clone()
    };
    let target = record
        .subtask_id
        .clone()
        .unwrap_or_else(|| record.story_id.clone());

    UnifiedEntry {
        id: derived_id(Source::BuildState, &raw),
        timestamp: record.timestamp,
        source: Source::BuildState,
        summary: format!("{action}: {target}"),
        event_kind: action,
        task_id: Some(record.story_id),
        file_path: None,
        details: raw,
    }
}

fn normalize_generic(source: Source, raw: Value, observed_at: DateTime<Utc>) -> UnifiedEntry {
    let record: GenericRecord = match serde_json::from_value(raw.clone()) {
        Ok(record) => record,
        Err(_) => return unknown_entry(source, raw, observed_at),
    };

    UnifiedEntry {
        id: record.id.unwrap_or_else(|| derived_id(source, &raw)),
        timestamp: record.timestamp,
        source,
        event_kind: record
            .event_kind
            .unwrap_or_else(|| UNKNOWN_KIND.to_string()),
        task_id: record.task_id,
        file_path: record.file_path,
        summary: record.summary.unwrap_or_else(|| "Unknown event".to_string()),
        details: record.details.unwrap_or(raw),
    }
}

/// Normalize one source record; never fails.
pub fn normalize(record: SourceRecord, observed_at: DateTime<Utc>) -> UnifiedEntry {
    match record {
        SourceRecord::FileEvolution(event) => normalize_evolution(event),
        SourceRecord::ContextSnapshot(raw) => normalize_snapshot(raw, observed_at),
        SourceRecord::BuildState(raw) => normalize_build(raw, observed_at),
        SourceRecord::UserAction(raw) => normalize_generic(Source::UserAction, raw, observed_at),
        SourceRecord::System(raw) => normalize_generic(Source::System, raw, observed_at),
    }
}

/// Sort ascending by timestamp, filter, then keep the most recent `limit`.
pub fn select(mut entries: Vec<UnifiedEntry>, filter: &TimelineFilter) -> Vec<UnifiedEntry> {
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    let mut selected: Vec<UnifiedEntry> =
        entries.into_iter().filter(|entry| filter.matches(entry)).collect();
    if let Some(limit) = filter.limit {
        if selected.len() > limit {
            selected.drain(..selected.len() - limit);
        }
    }
    selected
}

// =============================================================================
// Aggregator
// =============================================================================

/// Read API over every timeline source of one project.
pub struct Timeline {
    store: Arc<EventStore>,
    providers: Vec<Box<dyn RecordProvider>>,
    storage: Storage,
    max_entries: usize,
    stale_after: Duration,
}

impl Timeline {
    /// Aggregator over the evolution store only.
    pub fn new(store: Arc<EventStore>, config: &TimelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage: store.storage().clone(),
            store,
            providers: Vec::new(),
            max_entries: config.max_entries,
            stale_after: config.stale_after()?,
        })
    }

    /// Aggregator with the snapshot and build-log directories from `config`.
    pub fn from_config(store: Arc<EventStore>, config: &Config) -> Result<Self> {
        let timeline = Self::new(store, &config.timeline)?;
        let snapshots = SnapshotDir::new(timeline.storage.snapshots_dir());
        let builds = BuildLogDir::new(timeline.storage.builds_dir());
        Ok(timeline
            .with_provider(Box::new(snapshots))
            .with_provider(Box::new(builds)))
    }

    pub fn with_provider(mut self, provider: Box<dyn RecordProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Every raw record from every source. Failing providers are skipped.
    pub fn collect(&self) -> Vec<SourceRecord> {
        let mut records: Vec<SourceRecord> = self
            .store
            .query(&EventFilter::default())
            .into_iter()
            .map(SourceRecord::FileEvolution)
            .collect();

        for provider in &self.providers {
            match provider.records() {
                Ok(batch) => records.extend(batch),
                Err(err) => {
                    tracing::warn!(provider = provider.name(), error = %err, "timeline source unavailable");
                }
            }
        }
        records
    }

    /// Normalized, ascending and filtered timeline across all sources.
    pub fn unified_timeline(&self, filter: &TimelineFilter) -> Vec<UnifiedEntry> {
        let observed_at = Utc::now();
        let entries = self
            .collect()
            .into_iter()
            .map(|record| normalize(record, observed_at))
            .collect();
        select(entries, filter)
    }

    /// Trend statistics over the filtered timeline (most recent 1000 by default).
    pub fn analyze_trends(&self, filter: &TimelineFilter) -> TrendAnalysis {
        let filter = TimelineFilter {
            limit: Some(filter.limit.unwrap_or(DEFAULT_TREND_LIMIT)),
            ..filter.clone()
        };
        trends::analyze(&self.unified_timeline(&filter))
    }

    pub fn detect_drift<S: AsRef<str>>(&self, task_ids: &[S]) -> DriftAnalysis {
        drift::detect_drift(&self.store, task_ids)
    }

    /// Recompute the unified timeline and persist it, capped at `max_entries`.
    pub fn sync(&self) -> Result<TimelineSnapshot> {
        let entries = self.unified_timeline(&TimelineFilter {
            limit: Some(self.max_entries),
            ..TimelineFilter::default()
        });

        let sources: BTreeSet<Source> = entries.iter().map(|entry| entry.source).collect();
        let tasks: BTreeSet<String> = entries
            .iter()
            .filter_map(|entry| entry.task_id.clone())
            .collect();

        let snapshot = TimelineSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            synced_at: Utc::now(),
            entry_count: entries.len(),
            sources: sources.into_iter().collect(),
            tasks: tasks.into_iter().collect(),
            entries,
        };

        self.storage
            .write_json(self.storage.snapshot_file(), &snapshot)?;
        tracing::debug!(entries = snapshot.entry_count, "unified timeline synced");
        Ok(snapshot)
    }

    /// Last synced snapshot; `None` when missing or unreadable.
    pub fn load_persisted(&self) -> Option<TimelineSnapshot> {
        let path = self.storage.snapshot_file();
        if !path.exists() {
            return None;
        }
        match self.storage.read_json(path) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unified snapshot unreadable");
                None
            }
        }
    }

    /// Persisted entries while fresh, otherwise a live recomputation.
    pub fn cached_timeline(&self) -> Vec<UnifiedEntry> {
        if let Some(snapshot) = self.load_persisted() {
            if Utc::now() - snapshot.synced_at <= self.stale_after {
                return snapshot.entries;
            }
            tracing::debug!("unified snapshot stale; recomputing");
        }
        self.unified_timeline(&TimelineFilter::default())
    }

    /// Export the filtered timeline; `format` is validated before any work.
    pub fn export(
        &self,
        path: &Path,
        format: &str,
        filter: &TimelineFilter,
    ) -> Result<ExportSummary> {
        let format: ExportFormat = format.parse()?;
        let entries = self.unified_timeline(filter);
        export::write_export(path, &entries, format)
    }

    pub fn snapshot_status(&self) -> SnapshotStatus {
        let path = self.storage.snapshot_file();
        let persisted = self.load_persisted();
        SnapshotStatus {
            path: path.display().to_string(),
            exists: path.exists(),
            synced_at: persisted.as_ref().map(|s| s.synced_at),
            age_seconds: persisted
                .as_ref()
                .map(|s| (Utc::now() - s.synced_at).num_seconds()),
            entry_count: persisted.as_ref().map(|s| s.entry_count),
        }
    }

    pub fn statistics(&self) -> AggregatorStatistics {
        let mut records_by_source: BTreeMap<String, usize> = BTreeMap::new();
        for provider in &self.providers {
            if let Ok(records) = provider.records() {
                for record in records {
                    *records_by_source
                        .entry(record.source().as_str().to_string())
                        .or_default() += 1;
                }
            }
        }

        let file_evolution = self.store.statistics();
        records_by_source.insert(
            Source::FileEvolution.as_str().to_string(),
            file_evolution.total_records,
        );

        AggregatorStatistics {
            snapshot_count: records_by_source
                .get(Source::ContextSnapshot.as_str())
                .copied()
                .unwrap_or(0),
            build_record_count: records_by_source
                .get(Source::BuildState.as_str())
                .copied()
                .unwrap_or(0),
            file_evolution,
            records_by_source,
            unified_timeline: self.snapshot_status(),
        }
    }
}

/// Render entries for terminal output.
pub fn format_timeline(entries: &[UnifiedEntry]) -> String {
    if entries.is_empty() {
        return "No timeline entries".to_string();
    }

    entries
        .iter()
        .map(|entry| {
            let ts = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
            let task = entry.task_id.as_deref().unwrap_or("-");
            format!(
                "{ts} [{source}] {summary} (task={task} kind={kind})",
                source = entry.source,
                summary = entry.summary,
                kind = entry.event_kind
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, FileState};
    use crate::sources::MemorySource;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, hour, minute, 0).unwrap()
    }

    #[test]
    fn evolution_entries_summarize_kind_and_path() {
        let event = EvolutionEvent::file("T1", "src/a.rs", EventKind::Modified, FileState::default());
        let entry = normalize(SourceRecord::FileEvolution(event.clone()), Utc::now());
        assert_eq!(entry.id, event.id);
        assert_eq!(entry.summary, "modified: src/a.rs");
        assert_eq!(entry.task_id.as_deref(), Some("T1"));

        let task = EvolutionEvent::task("T1", EventKind::TaskStart);
        let entry = normalize(SourceRecord::FileEvolution(task), Utc::now());
        assert_eq!(entry.summary, "task_start");
        assert!(entry.file_path.is_none());
    }

    #[test]
    fn snapshot_entries_use_story_and_description() {
        let raw = serde_json::json!({
            "id": "snap-1",
            "timestamp": "2026-01-05T10:00:00Z",
            "storyId": "S1",
            "agent": "dev",
        });
        let entry = normalize(SourceRecord::ContextSnapshot(raw), Utc::now());
        assert_eq!(entry.event_kind, "snapshot");
        assert_eq!(entry.task_id.as_deref(), Some("S1"));
        assert_eq!(entry.summary, "Context snapshot");
        assert_eq!(entry.details["agent"], "dev");
    }

    #[test]
    fn build_entries_use_action_and_subtask() {
        let raw = crate::sources::parse_log_line(
            r#"[2026-01-05T10:00:00Z] [S1] [S1.2] failure: {"code":1}"#,
        );
        let entry = normalize(SourceRecord::BuildState(raw.clone()), Utc::now());
        assert_eq!(entry.event_kind, "failure");
        assert_eq!(entry.summary, "failure: S1.2");
        assert_eq!(entry.task_id.as_deref(), Some("S1"));
        assert_eq!(entry.id, normalize(SourceRecord::BuildState(raw), Utc::now()).id);
    }

    #[test]
    fn malformed_records_become_unknown() {
        let observed = at(9, 0);
        let raw = serde_json::json!({ "line": "garbage" });
        let entry = normalize(SourceRecord::BuildState(raw.clone()), observed);
        assert!(entry.is_unknown());
        assert_eq!(entry.timestamp, observed);
        assert_eq!(entry.details["raw"], raw);

        let snapshot = serde_json::json!({ "timestamp": "2026-01-05T08:00:00Z", "storyId": 7 });
        let entry = normalize(SourceRecord::ContextSnapshot(snapshot), observed);
        assert!(entry.is_unknown());
        assert_eq!(entry.timestamp, at(8, 0));
    }

    #[test]
    fn generic_records_pass_through() {
        let raw = serde_json::json!({
            "timestamp": "2026-01-05T10:00:00Z",
            "eventType": "approve",
            "taskId": "T9",
            "summary": "User approved plan",
        });
        let entry = normalize(SourceRecord::UserAction(raw), Utc::now());
        assert_eq!(entry.source, Source::UserAction);
        assert_eq!(entry.event_kind, "approve");
        assert_eq!(entry.summary, "User approved plan");
    }

    #[test]
    fn select_sorts_then_filters_then_tails() {
        let source = MemorySource::new("test");
        for (hour, task) in [(12, "B"), (9, "A"), (11, "A"), (10, "B")] {
            source.push(SourceRecord::System(serde_json::json!({
                "timestamp": at(hour, 0).to_rfc3339(),
                "eventKind": "tick",
                "taskId": task,
            })));
        }
        let entries: Vec<UnifiedEntry> = source
            .records()
            .unwrap()
            .into_iter()
            .map(|r| normalize(r, Utc::now()))
            .collect();

        let all = select(entries.clone(), &TimelineFilter::default());
        let hours: Vec<_> = all.iter().map(|e| e.timestamp).collect();
        assert_eq!(hours, vec![at(9, 0), at(10, 0), at(11, 0), at(12, 0)]);

        let tail = select(
            entries,
            &TimelineFilter {
                task_id: Some("A".to_string()),
                limit: Some(1),
                ..TimelineFilter::default()
            },
        );
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].timestamp, at(11, 0));
    }
}
