//! Drift analysis across tasks.
//!
//! Finds files touched by more than one task and grades each overlap from the
//! diff sections recorded on every task's latest event for the file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{EventKind, EvolutionEvent, LineSection};
use crate::store::EventStore;

/// Upper bound on line numbers listed per conflict.
pub const MAX_REPORTED_LINES: usize = 10_000;

/// Conflict severity, ordered `none < low < medium < high < critical`.
///
/// `Critical` is reserved for symbol-level analysis and is never produced
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task's latest change to a conflicting file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictChange {
    pub task_id: String,
    pub event_kind: EventKind,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub sections: Vec<LineSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConflict {
    pub file_path: String,
    pub tasks: Vec<String>,
    pub severity: Severity,
    pub changes: Vec<ConflictChange>,
    pub overlapping_lines: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftAnalysis {
    pub tasks: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
    pub overall_severity: Severity,
    pub file_conflicts: Vec<FileConflict>,
    pub recommendations: Vec<String>,
}

/// Analyze drift between `task_ids` using the events in `store`.
///
/// Duplicate ids are collapsed; the result does not depend on input order.
pub fn detect_drift<S: AsRef<str>>(store: &EventStore, task_ids: &[S]) -> DriftAnalysis {
    let tasks: BTreeSet<String> = task_ids
        .iter()
        .map(|id| id.as_ref().trim().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    let events: BTreeMap<String, Vec<EvolutionEvent>> = tasks
        .into_iter()
        .map(|task| {
            let history = store.task_history(&task);
            (task, history)
        })
        .collect();

    analyze(&events)
}

/// Analyze drift over pre-fetched task histories (ascending by timestamp).
pub fn analyze(task_events: &BTreeMap<String, Vec<EvolutionEvent>>) -> DriftAnalysis {
    let mut file_to_tasks: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (task, events) in task_events {
        for event in events {
            if let Some(path) = event.file_path.as_deref() {
                file_to_tasks.entry(path).or_default().insert(task.as_str());
            }
        }
    }

    let file_conflicts: Vec<FileConflict> = file_to_tasks
        .into_iter()
        .filter(|(_, tasks)| tasks.len() >= 2)
        .map(|(path, tasks)| conflict_for(path, &tasks, task_events))
        .collect();

    let overall_severity = file_conflicts
        .iter()
        .map(|conflict| conflict.severity)
        .max()
        .unwrap_or(Severity::None);

    let recommendations = recommendations_for(overall_severity, &file_conflicts);

    DriftAnalysis {
        tasks: task_events.keys().cloned().collect(),
        analyzed_at: Utc::now(),
        overall_severity,
        file_conflicts,
        recommendations,
    }
}

fn conflict_for(
    path: &str,
    tasks: &BTreeSet<&str>,
    task_events: &BTreeMap<String, Vec<EvolutionEvent>>,
) -> FileConflict {
    let changes: Vec<ConflictChange> = tasks
        .iter()
        .filter_map(|task| {
            let latest = task_events
                .get(*task)?
                .iter()
                .filter(|event| event.file_path.as_deref() == Some(path))
                .max_by_key(|event| event.timestamp)?;
            let diff = latest.diff_summary.as_ref()?;
            let mut sections = diff.sections.clone();
            sections.sort();
            Some(ConflictChange {
                task_id: task.to_string(),
                event_kind: latest.event_kind,
                lines_added: diff.lines_added,
                lines_removed: diff.lines_removed,
                sections,
            })
        })
        .collect();

    let (severity, overlapping_lines) = if changes.len() < 2 {
        (Severity::Low, Vec::new())
    } else {
        let overlapping = overlapping_lines(&changes);
        if overlapping.is_empty() {
            (Severity::Medium, overlapping)
        } else {
            (Severity::High, overlapping)
        }
    };

    FileConflict {
        file_path: path.to_string(),
        tasks: tasks.iter().map(|task| task.to_string()).collect(),
        severity,
        changes,
        overlapping_lines,
    }
}

/// Sorted lines covered by more than one contributing section.
///
/// Sections of every change are pooled, so two sections of the same task
/// can overlap each other. At most [`MAX_REPORTED_LINES`] lines are listed.
fn overlapping_lines(changes: &[ConflictChange]) -> Vec<u32> {
    let sections: Vec<&LineSection> = changes.iter().flat_map(|c| &c.sections).collect();

    let mut intersections: Vec<(u32, u32)> = Vec::new();
    for (idx, a) in sections.iter().enumerate() {
        for b in &sections[idx + 1..] {
            if a.overlaps(b) {
                intersections.push((
                    a.start_line.max(b.start_line),
                    a.end_line.min(b.end_line),
                ));
            }
        }
    }

    let mut lines = Vec::new();
    for (start, end) in merge_ranges(intersections) {
        let room = MAX_REPORTED_LINES - lines.len();
        lines.extend((start..=end).take(room));
        if lines.len() == MAX_REPORTED_LINES {
            tracing::debug!(limit = MAX_REPORTED_LINES, "overlapping lines truncated");
            break;
        }
    }
    lines
}

/// Sort and coalesce overlapping closed ranges.
fn merge_ranges(mut ranges: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Human guidance derived from the overall severity and the conflicts.
pub fn recommendations_for(overall: Severity, conflicts: &[FileConflict]) -> Vec<String> {
    let mut recommendations = Vec::new();

    match overall {
        Severity::None => {
            return vec!["No conflicts detected. Safe to proceed with merge.".to_string()];
        }
        Severity::Low => recommendations.push(
            "LOW: Shared files touched but no competing edits recorded. Verify before merging."
                .to_string(),
        ),
        Severity::Medium => recommendations.push(
            "MEDIUM: Same files modified but different sections. Auto-merge likely to succeed."
                .to_string(),
        ),
        Severity::High => recommendations.push(
            "HIGH: Overlapping changes detected. Resolve the overlapping regions before merging."
                .to_string(),
        ),
        Severity::Critical => {
            recommendations.push(
                "CRITICAL: Multiple tasks modified the same functions/classes. Manual review required."
                    .to_string(),
            );
            recommendations
                .push("Consider rebasing one task onto the other before merging.".to_string());
        }
    }

    for conflict in conflicts {
        if conflict.severity >= Severity::High {
            recommendations.push(format!(
                "Review {}: {} both modified this file.",
                conflict.file_path,
                conflict.tasks.join(", ")
            ));
        }
    }

    recommendations
}

/// Render an analysis for terminal output.
pub fn format_drift(analysis: &DriftAnalysis) -> String {
    let mut lines = Vec::new();
    lines.push(format!("Drift analysis: {}", analysis.tasks.join(", ")));
    lines.push(format!(
        "Overall severity: {}",
        analysis.overall_severity.as_str().to_uppercase()
    ));

    if !analysis.file_conflicts.is_empty() {
        lines.push(String::new());
        lines.push("File conflicts:".to_string());
        for conflict in &analysis.file_conflicts {
            lines.push(format!("- {} [{}]", conflict.file_path, conflict.severity));
            lines.push(format!("    tasks: {}", conflict.tasks.join(", ")));
            if !conflict.overlapping_lines.is_empty() {
                lines.push(format!(
                    "    overlapping lines: {}",
                    format_line_ranges(&conflict.overlapping_lines)
                ));
            }
        }
    }

    if !analysis.recommendations.is_empty() {
        lines.push(String::new());
        lines.push("Recommendations:".to_string());
        for rec in &analysis.recommendations {
            lines.push(format!("- {rec}"));
        }
    }

    lines.join("\n")
}

/// Collapse sorted line numbers into `a-b` runs.
pub fn format_line_ranges(lines: &[u32]) -> String {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &line in lines {
        match runs.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(line) => *end = line,
            _ => runs.push((line, line)),
        }
    }
    runs.iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DiffSummary, FileState};

    fn edit(task: &str, path: &str, sections: &[(u32, u32)]) -> EvolutionEvent {
        EvolutionEvent::file(task, path, EventKind::Modified, FileState::default()).with_diff(
            DiffSummary {
                lines_added: 1,
                lines_removed: 0,
                sections: sections
                    .iter()
                    .map(|(s, e)| LineSection::new(*s, *e))
                    .collect(),
            },
        )
    }

    fn histories(events: Vec<EvolutionEvent>) -> BTreeMap<String, Vec<EvolutionEvent>> {
        let mut map: BTreeMap<String, Vec<EvolutionEvent>> = BTreeMap::new();
        for event in events {
            map.entry(event.task_id.clone()).or_default().push(event);
        }
        map
    }

    #[test]
    fn severity_is_totally_ordered() {
        assert!(Severity::None < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn overlapping_sections_are_high() {
        let analysis = analyze(&histories(vec![
            edit("A", "f.rs", &[(1, 10)]),
            edit("B", "f.rs", &[(5, 15)]),
        ]));
        assert_eq!(analysis.overall_severity, Severity::High);
        assert_eq!(
            analysis.file_conflicts[0].overlapping_lines,
            vec![5, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn disjoint_sections_are_medium() {
        let analysis = analyze(&histories(vec![
            edit("A", "f.rs", &[(1, 5)]),
            edit("B", "f.rs", &[(6, 10)]),
        ]));
        assert_eq!(analysis.overall_severity, Severity::Medium);
        assert!(analysis.file_conflicts[0].overlapping_lines.is_empty());
    }

    #[test]
    fn sections_are_pooled_across_changes() {
        let analysis = analyze(&histories(vec![
            edit("A", "f.rs", &[(1, 5), (3, 8)]),
            edit("B", "f.rs", &[(20, 30)]),
        ]));
        assert_eq!(analysis.overall_severity, Severity::High);
        assert_eq!(analysis.file_conflicts[0].overlapping_lines, vec![3, 4, 5]);
    }

    #[test]
    fn huge_overlaps_are_bounded() {
        let analysis = analyze(&histories(vec![
            edit("A", "f.rs", &[(1, 4_000_000_000)]),
            edit("B", "f.rs", &[(1, 4_000_000_000)]),
        ]));
        let lines = &analysis.file_conflicts[0].overlapping_lines;
        assert_eq!(analysis.overall_severity, Severity::High);
        assert_eq!(lines.len(), MAX_REPORTED_LINES);
        assert_eq!(lines[0], 1);
    }

    #[test]
    fn merged_ranges_coalesce_nested_and_touching() {
        assert_eq!(
            merge_ranges(vec![(5, 10), (1, 3), (2, 4), (6, 7), (20, 20)]),
            vec![(1, 4), (5, 10), (20, 20)]
        );
    }

    #[test]
    fn missing_diff_data_is_low() {
        let plain = EvolutionEvent::file("B", "f.rs", EventKind::Created, FileState::default());
        let analysis = analyze(&histories(vec![edit("A", "f.rs", &[(1, 5)]), plain]));
        let conflict = &analysis.file_conflicts[0];
        assert_eq!(conflict.severity, Severity::Low);
        assert_eq!(conflict.changes.len(), 1);
        assert_eq!(conflict.tasks, vec!["A", "B"]);
    }

    #[test]
    fn no_shared_files_is_none() {
        let analysis = analyze(&histories(vec![
            edit("A", "a.rs", &[(1, 5)]),
            edit("B", "b.rs", &[(1, 5)]),
        ]));
        assert_eq!(analysis.overall_severity, Severity::None);
        assert!(analysis.file_conflicts.is_empty());
        assert_eq!(
            analysis.recommendations,
            vec!["No conflicts detected. Safe to proceed with merge."]
        );
    }

    #[test]
    fn task_level_events_are_not_conflicts() {
        let analysis = analyze(&histories(vec![
            EvolutionEvent::task("A", EventKind::TaskStart),
            EvolutionEvent::task("B", EventKind::TaskStart),
        ]));
        assert_eq!(analysis.overall_severity, Severity::None);
    }

    #[test]
    fn high_conflicts_get_file_recommendations() {
        let analysis = analyze(&histories(vec![
            edit("A", "shared.js", &[(10, 20)]),
            edit("B", "shared.js", &[(15, 25)]),
        ]));
        assert!(analysis.recommendations[0].starts_with("HIGH:"));
        assert_eq!(
            analysis.recommendations[1],
            "Review shared.js: A, B both modified this file."
        );
    }

    #[test]
    fn critical_recommendations_are_defined() {
        let recs = recommendations_for(Severity::Critical, &[]);
        assert_eq!(recs.len(), 2);
        assert!(recs[0].starts_with("CRITICAL:"));
    }

    #[test]
    fn format_collapses_line_runs() {
        assert_eq!(format_line_ranges(&[5, 6, 7, 9, 12, 13]), "5-7, 9, 12-13");
        assert_eq!(
            format_line_ranges(&[u32::MAX - 1, u32::MAX]),
            format!("{}-{}", u32::MAX - 1, u32::MAX)
        );

        let analysis = analyze(&histories(vec![
            edit("A", "f.rs", &[(1, 10)]),
            edit("B", "f.rs", &[(5, 15)]),
        ]));
        let rendered = format_drift(&analysis);
        assert!(rendered.contains("Overall severity: HIGH"));
        assert!(rendered.contains("overlapping lines: 5-10"));
    }
}
