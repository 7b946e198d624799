//! drift track and drift task commands

use std::path::Path;

use crate::error::Result;
use crate::event::{EventKind, EvolutionEvent, LineSection, TaskContext};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::tracker::TrackOptions;

use super::{Project, TaskCommands};

pub struct TrackArgs {
    pub paths: Vec<String>,
    pub task: String,
    pub lines: Vec<LineSection>,
    pub context: TaskContext,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct TrackReport {
    task_id: String,
    tracked: Vec<EvolutionEvent>,
    ignored: Vec<String>,
}

pub fn run_track(root: Option<&Path>, args: TrackArgs, output: OutputOptions) -> Result<()> {
    let project = Project::open(root)?;
    let tracker = project.tracker()?;
    let options = TrackOptions {
        context: args.context,
        sections: (!args.lines.is_empty()).then_some(args.lines),
    };

    let mut tracked = Vec::new();
    let mut ignored = Vec::new();
    for path in &args.paths {
        match tracker.track_file(path, &args.task, &options)? {
            Some(event) => tracked.push(event),
            None => ignored.push(path.clone()),
        }
    }

    let mut human = HumanOutput::new(format!(
        "drift track: {} file(s) recorded for {}",
        tracked.len(),
        args.task
    ));
    for event in &tracked {
        human.push_detail(describe(event));
    }
    for path in &ignored {
        human.push_warning(format!("ignored by evolution.ignore: {path}"));
    }

    let report = TrackReport {
        task_id: args.task,
        tracked,
        ignored,
    };
    emit_success(output, "track", &report, Some(&human))
}

pub fn run_task(root: Option<&Path>, command: TaskCommands, output: OutputOptions) -> Result<()> {
    let project = Project::open(root)?;
    let tracker = project.tracker()?;

    match command {
        TaskCommands::Start { id, context } => {
            lifecycle(&tracker, &id, EventKind::TaskStart, context.into_context(), output)
        }
        TaskCommands::Complete { id, context } => lifecycle(
            &tracker,
            &id,
            EventKind::TaskComplete,
            context.into_context(),
            output,
        ),
        TaskCommands::Branch { id, name, base } => {
            let event = tracker.record_branch_point(&id, &name, base.as_deref())?;
            let mut human = HumanOutput::new(format!("drift task branch: {id} on {name}"));
            if let Some(branch) = &event.branch {
                if let Some(base) = &branch.base_branch {
                    human.push_summary("base", base.clone());
                }
                if let Some(commit) = &branch.base_commit {
                    human.push_summary("commit", commit.clone());
                }
            }
            emit_success(output, "task branch", &event, Some(&human))
        }
        TaskCommands::Merge { id, from, into } => {
            let event = tracker.record_merge_point(&id, &from, into.as_deref())?;
            let target = event
                .branch
                .as_ref()
                .and_then(|b| b.base_branch.clone())
                .unwrap_or_default();
            let human = HumanOutput::new(format!("drift task merge: {from} into {target}"));
            emit_success(output, "task merge", &event, Some(&human))
        }
        TaskCommands::Rename {
            id,
            from,
            to,
            context,
        } => {
            let options = TrackOptions::with_context(context.into_context());
            let event = tracker.record_rename(&id, &from, &to, &options)?;
            let header = match &event {
                Some(_) => format!("drift task rename: {from} -> {to}"),
                None => format!("drift task rename: {to} is ignored; nothing recorded"),
            };
            let human = HumanOutput::new(header);
            emit_success(output, "task rename", &event, Some(&human))
        }
    }
}

fn lifecycle(
    tracker: &crate::tracker::Tracker,
    task_id: &str,
    kind: EventKind,
    context: TaskContext,
    output: OutputOptions,
) -> Result<()> {
    let result = tracker.track_task(task_id, kind, &TrackOptions::with_context(context))?;
    let verb = if kind == EventKind::TaskStart {
        "start"
    } else {
        "complete"
    };

    let mut human = HumanOutput::new(format!(
        "drift task {verb}: {task_id} ({} file(s) tracked)",
        result.files.len()
    ));
    for event in &result.files {
        human.push_detail(describe(event));
    }

    #[derive(serde::Serialize)]
    #[serde(rename_all = "camelCase")]
    struct LifecycleReport<'a> {
        task_event: &'a EvolutionEvent,
        files: &'a [EvolutionEvent],
    }

    let report = LifecycleReport {
        task_event: &result.task_event,
        files: &result.files,
    };
    emit_success(output, &format!("task {verb}"), &report, Some(&human))
}

fn describe(event: &EvolutionEvent) -> String {
    let path = event.file_path.as_deref().unwrap_or("-");
    match &event.diff_summary {
        Some(diff) => format!(
            "{} {path} (+{} -{})",
            event.event_kind, diff.lines_added, diff.lines_removed
        ),
        None => format!("{} {path}", event.event_kind),
    }
}
