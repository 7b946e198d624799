//! Trend statistics over timeline entries.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use serde_json::json;

use crate::sources::Source;
use crate::timeline::UnifiedEntry;

/// Entries shown in the hot-file and active-task insights
const TOP_N: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub entry_count: usize,
}

/// Entry counts per UTC hour and per weekday (Sunday = 0).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityHeatmap {
    pub by_hour: [usize; 24],
    pub by_day_of_week: [usize; 7],
}

impl Default for ActivityHeatmap {
    fn default() -> Self {
        Self {
            by_hour: [0; 24],
            by_day_of_week: [0; 7],
        }
    }
}

impl ActivityHeatmap {
    pub fn peak_hour(&self) -> Option<(usize, usize)> {
        self.by_hour
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, count)| *count > 0)
            // earliest hour wins ties
            .fold(None, |best: Option<(usize, usize)>, (hour, count)| match best {
                Some((_, top)) if top >= count => best,
                _ => Some((hour, count)),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    HotFiles,
    ActiveTasks,
    ActivityPattern,
    FailureRate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendAnalysis {
    pub period: Period,
    pub by_source: BTreeMap<String, usize>,
    pub by_event_kind: BTreeMap<String, usize>,
    pub by_task: BTreeMap<String, usize>,
    pub by_file: BTreeMap<String, usize>,
    pub activity_heatmap: ActivityHeatmap,
    pub insights: Vec<Insight>,
}

/// Highest counts first; ties fall back to key order.
fn top(counts: &BTreeMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> =
        counts.iter().map(|(key, count)| (key.clone(), *count)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

pub fn analyze(entries: &[UnifiedEntry]) -> TrendAnalysis {
    let mut by_source = BTreeMap::new();
    let mut by_event_kind = BTreeMap::new();
    let mut by_task = BTreeMap::new();
    let mut by_file = BTreeMap::new();
    let mut heatmap = ActivityHeatmap::default();

    for entry in entries {
        *by_source.entry(entry.source.as_str().to_string()).or_default() += 1;
        *by_event_kind.entry(entry.event_kind.clone()).or_default() += 1;
        if let Some(task) = &entry.task_id {
            *by_task.entry(task.clone()).or_default() += 1;
        }
        if let Some(path) = &entry.file_path {
            *by_file.entry(path.clone()).or_default() += 1;
        }
        heatmap.by_hour[entry.timestamp.hour() as usize] += 1;
        heatmap.by_day_of_week[entry.timestamp.weekday().num_days_from_sunday() as usize] += 1;
    }

    let period = Period {
        start: entries.iter().map(|e| e.timestamp).min(),
        end: entries.iter().map(|e| e.timestamp).max(),
        entry_count: entries.len(),
    };

    let insights = insights(entries, &by_task, &by_file, &heatmap);

    TrendAnalysis {
        period,
        by_source,
        by_event_kind,
        by_task,
        by_file,
        activity_heatmap: heatmap,
        insights,
    }
}

fn insights(
    entries: &[UnifiedEntry],
    by_task: &BTreeMap<String, usize>,
    by_file: &BTreeMap<String, usize>,
    heatmap: &ActivityHeatmap,
) -> Vec<Insight> {
    let mut insights = Vec::new();

    let hot_files = top(by_file, TOP_N);
    if !hot_files.is_empty() {
        insights.push(Insight {
            kind: InsightKind::HotFiles,
            title: "Most frequently modified files".to_string(),
            description: format!("{} is the most active file", hot_files[0].0),
            data: json!(hot_files),
        });
    }

    let active_tasks = top(by_task, TOP_N);
    if !active_tasks.is_empty() {
        insights.push(Insight {
            kind: InsightKind::ActiveTasks,
            title: "Most active tasks".to_string(),
            description: format!("{} has the most recorded activity", active_tasks[0].0),
            data: json!(active_tasks),
        });
    }

    if let Some((hour, count)) = heatmap.peak_hour() {
        insights.push(Insight {
            kind: InsightKind::ActivityPattern,
            title: "Peak activity hour".to_string(),
            description: format!("Most activity occurs at {hour:02}:00 UTC"),
            data: json!({ "peakHour": hour, "count": count }),
        });
    }

    let builds: Vec<&UnifiedEntry> = entries
        .iter()
        .filter(|entry| entry.source == Source::BuildState)
        .collect();
    if !builds.is_empty() {
        let failures = builds
            .iter()
            .filter(|entry| entry.event_kind == "failure")
            .count();
        let rate = failures as f64 / builds.len() as f64 * 100.0;
        insights.push(Insight {
            kind: InsightKind::FailureRate,
            title: "Build failure rate".to_string(),
            description: format!("{rate:.1}% of build events failed"),
            data: json!({ "total": builds.len(), "failures": failures, "rate": format!("{rate:.1}") }),
        });
    }

    insights
}

pub fn format_trends(analysis: &TrendAnalysis) -> String {
    let mut out = String::new();
    let period = &analysis.period;
    match (period.start, period.end) {
        (Some(start), Some(end)) => out.push_str(&format!(
            "{} entries from {} to {}\n",
            period.entry_count,
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        )),
        _ => out.push_str("No timeline entries\n"),
    }

    if !analysis.by_source.is_empty() {
        out.push_str("\nBy source:\n");
        for (source, count) in &analysis.by_source {
            out.push_str(&format!("  {source:<18} {count}\n"));
        }
    }

    if !analysis.insights.is_empty() {
        out.push_str("\nInsights:\n");
        for insight in &analysis.insights {
            out.push_str(&format!("  - {}: {}\n", insight.title, insight.description));
        }
    }

    out.trim_end().to_string()
}
