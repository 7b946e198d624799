//! Task-lifecycle entry points that turn working-tree observations into
//! evolution events.
//!
//! Collaborator failures never abort tracking: missing version metadata is
//! recorded as absent and a failed diff lookup degrades to an empty summary.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::event::{
    BranchInfo, DiffSummary, EventKind, EvolutionEvent, LineSection, TaskContext,
    VersionMeta,
};
use crate::resolver::{classify, FileStateResolver};
use crate::storage::normalize_path;
use crate::store::EventStore;
use crate::worktree::WorkingTree;

/// Caller-supplied context for a tracking call.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    pub context: TaskContext,
    /// Changed line ranges known to the caller; replaces the collaborator's.
    pub sections: Option<Vec<LineSection>>,
}

impl TrackOptions {
    pub fn with_context(context: TaskContext) -> Self {
        Self {
            context,
            sections: None,
        }
    }
}

/// Result of [`Tracker::track_task`].
#[derive(Debug, Clone)]
pub struct TaskTrackResult {
    pub files: Vec<EvolutionEvent>,
    pub task_event: EvolutionEvent,
}

pub struct Tracker {
    store: Arc<EventStore>,
    resolver: FileStateResolver,
    baseline: String,
}

impl Tracker {
    pub fn new(store: Arc<EventStore>, resolver: FileStateResolver) -> Self {
        Self {
            store,
            resolver,
            baseline: "main".to_string(),
        }
    }

    /// Base branch recorded on branch and merge points when none is given.
    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    fn tree(&self) -> &Arc<dyn WorkingTree> {
        self.resolver.tree()
    }

    /// Record the current state of one file; `None` when the path is ignored.
    pub fn track_file(
        &self,
        path: &str,
        task_id: &str,
        options: &TrackOptions,
    ) -> Result<Option<EvolutionEvent>> {
        validate_task_id(task_id)?;
        let path = normalize_path(self.store.storage().root(), path);

        let Some(state) = self.resolver.resolve(&path) else {
            tracing::debug!(path = %path, "path ignored; not tracked");
            return Ok(None);
        };

        let previous = self
            .store
            .latest_for_path(&path)
            .and_then(|event| event.file_state);
        let kind = classify(&state, previous.as_ref());
        let diff = match &previous {
            Some(prev) if state.exists && prev.content_hash != state.content_hash => {
                Some(self.diff_for(&path, options))
            }
            _ => None,
        };

        let mut event = EvolutionEvent::file(task_id, path.as_str(), kind, state)
            .with_context(options.context.clone());
        if let Some(meta) = self.version_meta(&path) {
            event = event.with_version_meta(meta);
        }
        if let Some(diff) = diff {
            event = event.with_diff(diff);
        }

        self.store.append(event.clone())?;
        tracing::debug!(path = %path, task = task_id, kind = %kind, "tracked file");
        Ok(Some(event))
    }

    /// Track every modified path of the working tree, then record a
    /// task-level `kind` event (`task_start` or `task_complete`).
    pub fn track_task(
        &self,
        task_id: &str,
        kind: EventKind,
        options: &TrackOptions,
    ) -> Result<TaskTrackResult> {
        validate_task_id(task_id)?;
        if !matches!(kind, EventKind::TaskStart | EventKind::TaskComplete) {
            return Err(Error::InvalidArgument(format!(
                "task events must be task_start or task_complete, got {kind}"
            )));
        }

        let modified = self.tree().modified_paths().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "working tree unavailable; no files tracked");
            Vec::new()
        });

        let mut files = Vec::new();
        for entry in modified {
            if let Some(event) = self.track_file(&entry.path, task_id, options)? {
                files.push(event);
            }
        }

        let mut task_event =
            EvolutionEvent::task(task_id, kind).with_context(options.context.clone());
        task_event.files_tracked = Some(files.len());
        self.store.append(task_event.clone())?;

        Ok(TaskTrackResult { files, task_event })
    }

    /// Record that `task_id` branched off as `branch`.
    pub fn record_branch_point(
        &self,
        task_id: &str,
        branch: &str,
        base_branch: Option<&str>,
    ) -> Result<EvolutionEvent> {
        validate_task_id(task_id)?;
        let branch = self.branch_info(branch, base_branch)?;
        let event = EvolutionEvent::task(task_id, EventKind::BranchPoint).with_branch(branch);
        self.store.append(event.clone())?;
        Ok(event)
    }

    /// Record that `from_branch` was merged into `into_branch`.
    pub fn record_merge_point(
        &self,
        task_id: &str,
        from_branch: &str,
        into_branch: Option<&str>,
    ) -> Result<EvolutionEvent> {
        validate_task_id(task_id)?;
        let branch = self.branch_info(from_branch, into_branch)?;
        let event = EvolutionEvent::task(task_id, EventKind::MergePoint).with_branch(branch);
        self.store.append(event.clone())?;
        Ok(event)
    }

    /// Record a rename from `from` to `to`, using the new path's state.
    pub fn record_rename(
        &self,
        task_id: &str,
        from: &str,
        to: &str,
        options: &TrackOptions,
    ) -> Result<Option<EvolutionEvent>> {
        validate_task_id(task_id)?;
        let root = self.store.storage().root();
        let from = normalize_path(root, from);
        let to = normalize_path(root, to);
        if from == to {
            return Err(Error::InvalidArgument(format!(
                "rename source and target are the same: {to}"
            )));
        }

        let Some(state) = self.resolver.resolve(&to) else {
            return Ok(None);
        };

        let mut event = EvolutionEvent::file(task_id, to.as_str(), EventKind::Renamed, state)
            .with_context(options.context.clone());
        event.previous_path = Some(from);
        if let Some(meta) = self.version_meta(&to) {
            event = event.with_version_meta(meta);
        }

        self.store.append(event.clone())?;
        Ok(Some(event))
    }

    fn diff_for(&self, path: &str, options: &TrackOptions) -> DiffSummary {
        let mut diff = match self.tree().diff_summary(path) {
            Ok(diff) => diff.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(path, error = %err, "diff unavailable; recording empty summary");
                DiffSummary::default()
            }
        };
        if let Some(sections) = &options.sections {
            let mut sections = sections.clone();
            sections.sort();
            sections.dedup();
            diff.sections = sections;
        }
        diff
    }

    fn version_meta(&self, path: &str) -> Option<VersionMeta> {
        match self.tree().version_meta(path) {
            Ok(meta) => Some(meta),
            Err(err) => {
                tracing::warn!(path, error = %err, "version metadata unavailable");
                None
            }
        }
    }

    fn branch_info(&self, name: &str, base: Option<&str>) -> Result<BranchInfo> {
        if name.trim().is_empty() {
            return Err(Error::InvalidArgument("branch name cannot be empty".to_string()));
        }
        let base_commit = match self.tree().repository_meta() {
            Ok(meta) => meta.commit,
            Err(err) => {
                tracing::warn!(error = %err, "repository metadata unavailable");
                None
            }
        };
        Ok(BranchInfo {
            name: name.to_string(),
            base_branch: Some(base.unwrap_or(&self.baseline).to_string()),
            base_commit,
        })
    }
}

fn validate_task_id(task_id: &str) -> Result<()> {
    if task_id.trim().is_empty() {
        return Err(Error::InvalidArgument("task id cannot be empty".to_string()));
    }
    Ok(())
}
