//! Command-line interface for drift
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::config::{parse_duration, Config};
use crate::error::{Error, Result};
use crate::event::{LineSection, TaskContext};
use crate::output::OutputOptions;
use crate::resolver::FileStateResolver;
use crate::storage::Storage;
use crate::store::EventStore;
use crate::timeline::Timeline;
use crate::tracker::Tracker;
use crate::worktree::{open_working_tree, WorkingTree};

mod check;
mod history;
mod init;
mod timeline;
mod track;

/// drift - file evolution and drift detection for parallel tasks
///
/// Records how files change under each task, flags tasks whose edits
/// collide, and merges every activity source into one timeline.
#[derive(Parser, Debug)]
#[command(name = "drift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project root (defaults to the enclosing git checkout or current directory)
    #[arg(long, global = true, env = "DRIFT_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Attribution flags shared by tracking commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ContextArgs {
    /// Story the change belongs to
    #[arg(long)]
    pub story: Option<String>,

    /// Subtask the change belongs to
    #[arg(long)]
    pub subtask: Option<String>,

    /// Agent making the change
    #[arg(long)]
    pub agent: Option<String>,

    /// Free-form intent of the change
    #[arg(long)]
    pub intent: Option<String>,
}

impl ContextArgs {
    pub fn into_context(self) -> TaskContext {
        TaskContext {
            story_id: self.story,
            subtask_id: self.subtask,
            agent: self.agent,
            intent: self.intent,
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize drift in a project
    Init,

    /// Record the current state of files for a task
    Track {
        /// Project-relative paths to record
        #[arg(required = true)]
        paths: Vec<String>,

        /// Task the change belongs to
        #[arg(long, env = "DRIFT_TASK")]
        task: String,

        /// Changed line ranges (e.g., "10-20"); replaces computed ranges
        #[arg(long = "lines", value_delimiter = ',')]
        lines: Vec<LineSection>,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Task lifecycle events
    #[command(subcommand)]
    Task(TaskCommands),

    /// Show recorded evolution events
    History {
        /// Only events for this path
        #[arg(long)]
        file: Option<String>,

        /// Only events for this task
        #[arg(long)]
        task: Option<String>,

        /// Only events at or after this time (RFC 3339 or age like "2h")
        #[arg(long)]
        since: Option<String>,

        /// Only events of these kinds
        #[arg(long, value_delimiter = ',')]
        kind: Vec<String>,

        /// Keep the most recent N events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Detect conflicting changes between tasks
    Check {
        /// Tasks to compare
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Show the unified timeline across all sources
    Timeline {
        /// Only entries from this source
        #[arg(long)]
        source: Option<String>,

        /// Only entries for this task
        #[arg(long)]
        task: Option<String>,

        /// Only entries of these kinds
        #[arg(long, value_delimiter = ',')]
        kind: Vec<String>,

        /// Only entries at or after this time (RFC 3339 or age like "2h")
        #[arg(long)]
        since: Option<String>,

        /// Keep the most recent N entries
        #[arg(long)]
        limit: Option<usize>,

        /// Serve the persisted snapshot when fresh
        #[arg(long)]
        cached: bool,
    },

    /// Activity trends and insights
    Trends {
        /// Only entries at or after this time (RFC 3339 or age like "2h")
        #[arg(long)]
        since: Option<String>,

        /// Most recent entries to analyze
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Recompute and persist the unified timeline
    Sync {
        /// Keep syncing in the background until this many syncs completed
        #[arg(long)]
        repeat: Option<usize>,

        /// Interval between repeated syncs (defaults to timeline.sync_interval)
        #[arg(long)]
        interval: Option<String>,
    },

    /// Export the unified timeline
    Export {
        /// Output file
        path: PathBuf,

        /// Output format: json or csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Only entries from this source
        #[arg(long)]
        source: Option<String>,

        /// Only entries for this task
        #[arg(long)]
        task: Option<String>,

        /// Only entries at or after this time (RFC 3339 or age like "2h")
        #[arg(long)]
        since: Option<String>,
    },

    /// Store and timeline statistics
    Stats,

    /// Replace the evolution index with an empty one
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Track every modified file and mark the task started
    Start {
        /// Task ID
        id: String,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Track every modified file and mark the task complete
    Complete {
        /// Task ID
        id: String,

        #[command(flatten)]
        context: ContextArgs,
    },

    /// Record that the task branched off
    Branch {
        /// Task ID
        id: String,

        /// Branch created for the task
        #[arg(long)]
        name: String,

        /// Branch it was created from (defaults to evolution.baseline)
        #[arg(long)]
        base: Option<String>,
    },

    /// Record that the task's branch was merged
    Merge {
        /// Task ID
        id: String,

        /// Branch that was merged
        #[arg(long)]
        from: String,

        /// Branch merged into (defaults to evolution.baseline)
        #[arg(long)]
        into: Option<String>,
    },

    /// Record a file rename
    Rename {
        /// Task ID
        id: String,

        /// Previous path
        #[arg(long)]
        from: String,

        /// New path
        #[arg(long)]
        to: String,

        #[command(flatten)]
        context: ContextArgs,
    },
}

/// Everything a command needs about the project it runs in
pub(crate) struct Project {
    pub config: Config,
    pub storage: Storage,
    pub store: Arc<EventStore>,
    tree: Arc<dyn WorkingTree>,
}

impl Project {
    pub fn open(root: Option<&Path>) -> Result<Self> {
        let start = match root {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir()?,
        };
        if !start.is_dir() {
            return Err(Error::NotFound(format!(
                "project directory {}",
                start.display()
            )));
        }
        let root = project_root(&start);
        let config = Config::load_from_root(&root)?;
        let storage = Storage::new(&root, &config);
        let store = Arc::new(EventStore::open(storage.clone(), &config.evolution)?);
        let tree = open_working_tree(&root, &config.evolution.baseline)?;

        Ok(Self {
            config,
            storage,
            store,
            tree,
        })
    }

    pub fn tracker(&self) -> Result<Tracker> {
        let resolver = FileStateResolver::from_config(Arc::clone(&self.tree), &self.config.evolution)?;
        Ok(Tracker::new(Arc::clone(&self.store), resolver)
            .with_baseline(self.config.evolution.baseline.clone()))
    }

    pub fn timeline(&self) -> Result<Timeline> {
        Timeline::from_config(Arc::clone(&self.store), &self.config)
    }
}

/// The enclosing git checkout's workdir, or `start` itself.
fn project_root(start: &Path) -> PathBuf {
    git2::Repository::discover(start)
        .ok()
        .and_then(|repo| repo.workdir().map(Path::to_path_buf))
        .unwrap_or_else(|| start.to_path_buf())
}

/// RFC 3339 timestamp, or an age such as "2h" counted back from now
pub(crate) fn parse_since(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value.trim()) {
        return Ok(ts.with_timezone(&Utc));
    }
    let age = parse_duration(value).map_err(|_| {
        Error::InvalidArgument(format!(
            "invalid time '{value}': expected RFC 3339 or an age like 2h"
        ))
    })?;
    Utc::now()
        .checked_sub_signed(age)
        .ok_or_else(|| Error::InvalidArgument(format!("time '{value}' is out of range")))
}

pub(crate) fn parse_since_opt(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_since).transpose()
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        let root = self.root.as_deref();

        match self.command {
            Commands::Init => init::run(root, output),
            Commands::Track {
                paths,
                task,
                lines,
                context,
            } => track::run_track(
                root,
                track::TrackArgs {
                    paths,
                    task,
                    lines,
                    context: context.into_context(),
                },
                output,
            ),
            Commands::Task(cmd) => track::run_task(root, cmd, output),
            Commands::History {
                file,
                task,
                since,
                kind,
                limit,
            } => history::run_history(
                root,
                history::HistoryArgs {
                    file,
                    task,
                    since,
                    kind,
                    limit,
                },
                output,
            ),
            Commands::Check { tasks } => check::run(root, tasks, output),
            Commands::Timeline {
                source,
                task,
                kind,
                since,
                limit,
                cached,
            } => timeline::run_timeline(
                root,
                timeline::FilterArgs {
                    source,
                    task,
                    kind,
                    since,
                    limit,
                },
                cached,
                output,
            ),
            Commands::Trends { since, limit } => timeline::run_trends(
                root,
                timeline::FilterArgs {
                    since,
                    limit,
                    ..timeline::FilterArgs::default()
                },
                output,
            ),
            Commands::Sync { repeat, interval } => {
                timeline::run_sync(root, repeat, interval, output)
            }
            Commands::Export {
                path,
                format,
                source,
                task,
                since,
            } => timeline::run_export(
                root,
                &path,
                &format,
                timeline::FilterArgs {
                    source,
                    task,
                    since,
                    ..timeline::FilterArgs::default()
                },
                output,
            ),
            Commands::Stats => history::run_stats(root, output),
            Commands::Reset { yes } => history::run_reset(root, yes, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_with_lines_and_context() {
        let cli = Cli::try_parse_from([
            "drift", "track", "src/a.rs", "--task", "T1", "--lines", "10-20,30", "--agent", "dev",
        ])
        .unwrap();
        match cli.command {
            Commands::Track {
                paths,
                task,
                lines,
                context,
            } => {
                assert_eq!(paths, vec!["src/a.rs"]);
                assert_eq!(task, "T1");
                assert_eq!(lines, vec![LineSection::new(10, 20), LineSection::new(30, 30)]);
                assert_eq!(context.agent.as_deref(), Some("dev"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn since_accepts_timestamps_and_ages() {
        let ts = parse_since("2026-01-05T10:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-05T10:00:00+00:00");

        let recent = parse_since("2h").unwrap();
        assert!(Utc::now() - recent >= chrono::Duration::hours(2));
        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn since_rejects_ages_beyond_the_calendar() {
        assert!(matches!(
            parse_since("9999999999999d"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_since("100000000d"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
