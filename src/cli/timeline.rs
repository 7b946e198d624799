//! drift timeline, trends, sync and export commands

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::export::ExportFormat;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::sources::Source;
use crate::sync::SyncHandle;
use crate::timeline::{format_timeline, TimelineFilter};
use crate::trends::format_trends;

use super::{parse_since_opt, Project};

/// Polling step while waiting on background syncs
const SYNC_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
pub struct FilterArgs {
    pub source: Option<String>,
    pub task: Option<String>,
    pub kind: Vec<String>,
    pub since: Option<String>,
    pub limit: Option<usize>,
}

impl FilterArgs {
    fn into_filter(self) -> Result<TimelineFilter> {
        Ok(TimelineFilter {
            source: self.source.as_deref().map(str::parse::<Source>).transpose()?,
            task_id: self.task,
            kinds: self.kind,
            since: parse_since_opt(self.since.as_deref())?,
            limit: self.limit,
        })
    }
}

pub fn run_timeline(
    root: Option<&Path>,
    args: FilterArgs,
    cached: bool,
    output: OutputOptions,
) -> Result<()> {
    let filter = args.into_filter()?;
    let project = Project::open(root)?;
    let timeline = project.timeline()?;

    let entries = if cached {
        crate::timeline::select(timeline.cached_timeline(), &filter)
    } else {
        timeline.unified_timeline(&filter)
    };

    let mut human = HumanOutput::new(format!("drift timeline: {} entries", entries.len()));
    if !entries.is_empty() {
        for line in format_timeline(&entries).lines() {
            human.push_detail(line);
        }
    }

    emit_success(output, "timeline", &entries, Some(&human))
}

pub fn run_trends(root: Option<&Path>, args: FilterArgs, output: OutputOptions) -> Result<()> {
    let filter = args.into_filter()?;
    let project = Project::open(root)?;
    let analysis = project.timeline()?.analyze_trends(&filter);

    let mut human = HumanOutput::new("drift trends");
    for line in format_trends(&analysis).lines() {
        if !line.trim().is_empty() {
            human.push_detail(line.trim());
        }
    }

    emit_success(output, "trends", &analysis, Some(&human))
}

pub fn run_sync(
    root: Option<&Path>,
    repeat: Option<usize>,
    interval: Option<String>,
    output: OutputOptions,
) -> Result<()> {
    let project = Project::open(root)?;
    let timeline = Arc::new(project.timeline()?);

    let snapshot = timeline.sync()?;

    let mut background_syncs = 0;
    let mut failed_syncs = 0;
    if let Some(repeat) = repeat.filter(|n| *n > 0) {
        let interval = match interval.as_deref() {
            Some(raw) => {
                let interval = parse_duration(raw)?;
                if interval <= chrono::Duration::zero() {
                    return Err(Error::InvalidArgument(format!(
                        "interval must be positive: {raw}"
                    )));
                }
                interval.to_std().map_err(|err| {
                    Error::InvalidArgument(format!("invalid interval '{raw}': {err}"))
                })?
            }
            None => project.config.timeline.sync_interval()?,
        };

        let handle = SyncHandle::spawn(Arc::clone(&timeline), interval);
        // Failed syncs count toward `repeat`.
        while handle.completed() + handle.failed() < repeat {
            thread::sleep(SYNC_POLL.min(interval));
        }
        background_syncs = handle.completed();
        failed_syncs = handle.failed();
        handle.stop();
    }

    let persisted = timeline.load_persisted().unwrap_or(snapshot);

    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct SyncReport {
        path: String,
        synced_at: chrono::DateTime<chrono::Utc>,
        entry_count: usize,
        sources: Vec<Source>,
        tasks: Vec<String>,
        background_syncs: usize,
        failed_syncs: usize,
    }

    let report = SyncReport {
        path: project.storage.snapshot_file().display().to_string(),
        synced_at: persisted.synced_at,
        entry_count: persisted.entry_count,
        sources: persisted.sources,
        tasks: persisted.tasks,
        background_syncs,
        failed_syncs,
    };

    let mut human = HumanOutput::new(format!(
        "drift sync: {} entries persisted",
        report.entry_count
    ));
    human.push_summary("path", report.path.clone());
    human.push_summary(
        "sources",
        report
            .sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    if background_syncs + failed_syncs > 0 {
        human.push_summary("background syncs", background_syncs.to_string());
    }
    if failed_syncs > 0 {
        human.push_warning(format!("{failed_syncs} background sync(s) failed"));
    }

    emit_success(output, "sync", &report, Some(&human))
}

pub fn run_export(
    root: Option<&Path>,
    path: &Path,
    format: &str,
    args: FilterArgs,
    output: OutputOptions,
) -> Result<()> {
    // Reject the format before touching the project.
    let format: ExportFormat = format.parse()?;
    let filter = args.into_filter()?;
    let project = Project::open(root)?;
    let summary = project
        .timeline()?
        .export(path, format.as_str(), &filter)?;

    let mut human = HumanOutput::new(format!(
        "drift export: {} entries written",
        summary.entry_count
    ));
    human.push_summary("path", summary.path.display().to_string());
    human.push_summary("format", summary.format.as_str());

    emit_success(output, "export", &summary, Some(&human))
}
