//! drift history, drift stats and drift reset commands

use std::path::Path;

use crate::error::{Error, Result};
use crate::event::{EventKind, EvolutionEvent};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::normalize_path;
use crate::store::EventFilter;

use super::{parse_since_opt, Project};

pub struct HistoryArgs {
    pub file: Option<String>,
    pub task: Option<String>,
    pub since: Option<String>,
    pub kind: Vec<String>,
    pub limit: Option<usize>,
}

pub fn run_history(root: Option<&Path>, args: HistoryArgs, output: OutputOptions) -> Result<()> {
    let project = Project::open(root)?;
    let kinds = args
        .kind
        .iter()
        .map(|kind| kind.parse::<EventKind>())
        .collect::<Result<Vec<_>>>()?;

    let filter = EventFilter {
        file_path: None,
        task_id: args.task,
        since: parse_since_opt(args.since.as_deref())?,
        kinds,
        limit: args.limit,
    };
    let events = match &args.file {
        Some(path) => {
            let key = normalize_path(project.storage.root(), path);
            project.store.file_history(&key, &filter)
        }
        None => project.store.query(&filter),
    };

    let mut human = HumanOutput::new(format!("drift history: {} event(s)", events.len()));
    for event in &events {
        human.push_detail(format_event(event));
    }

    emit_success(output, "history", &events, Some(&human))
}

fn format_event(event: &EvolutionEvent) -> String {
    let ts = event.timestamp.format("%Y-%m-%d %H:%M:%S");
    let target = event
        .file_path
        .as_deref()
        .or_else(|| event.branch.as_ref().map(|b| b.name.as_str()))
        .unwrap_or("-");
    format!("{ts} {} {} {target}", event.task_id, event.event_kind)
}

pub fn run_stats(root: Option<&Path>, output: OutputOptions) -> Result<()> {
    let project = Project::open(root)?;
    let timeline = project.timeline()?;
    let stats = timeline.statistics();

    let mut human = HumanOutput::new("drift stats");
    let evolution = &stats.file_evolution;
    human.push_summary("records", evolution.total_records.to_string());
    human.push_summary("tasks", evolution.task_count.to_string());
    human.push_summary("files", evolution.file_count.to_string());
    human.push_summary("snapshots", stats.snapshot_count.to_string());
    human.push_summary("build records", stats.build_record_count.to_string());
    human.push_summary(
        "unified timeline",
        match stats.unified_timeline.age_seconds {
            Some(age) => format!("synced {age}s ago"),
            None => "never synced".to_string(),
        },
    );
    for (kind, count) in &evolution.by_event_type {
        human.push_detail(format!("{kind}: {count}"));
    }
    for file in &evolution.top_files {
        human.push_detail(format!("{} ({} events)", file.path, file.count));
    }

    if let Err(err) = project.store.verify() {
        human.push_warning(err.to_string());
        human.push_next_step("drift reset --yes");
    }
    if !project.storage.is_initialized() {
        human.push_warning("drift not initialized; using defaults");
        human.push_next_step("drift init");
    }

    emit_success(output, "stats", &stats, Some(&human))
}

pub fn run_reset(root: Option<&Path>, yes: bool, output: OutputOptions) -> Result<()> {
    if !yes {
        return Err(Error::InvalidArgument(
            "reset discards every evolution record; pass --yes to confirm".to_string(),
        ));
    }

    let project = Project::open(root)?;
    let discarded = project.store.load_index().records.len();
    project.store.reset()?;

    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ResetReport {
        index: String,
        discarded_records: usize,
    }

    let report = ResetReport {
        index: project.storage.index_file().display().to_string(),
        discarded_records: discarded,
    };
    let mut human = HumanOutput::new("drift reset: evolution index replaced");
    human.push_summary("index", report.index.clone());
    human.push_summary("discarded", discarded.to_string());

    emit_success(output, "reset", &report, Some(&human))
}
