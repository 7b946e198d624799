//! drift check command implementation

use std::path::Path;

use crate::drift::{self, Severity};
use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};

use super::Project;

pub fn run(root: Option<&Path>, tasks: Vec<String>, output: OutputOptions) -> Result<()> {
    let project = Project::open(root)?;
    let analysis = drift::detect_drift(&project.store, &tasks);

    let mut human = HumanOutput::new(format!(
        "drift check: {}",
        analysis.overall_severity.as_str().to_uppercase()
    ));
    human.push_summary("tasks", analysis.tasks.join(", "));
    human.push_summary("conflicts", analysis.file_conflicts.len().to_string());
    for conflict in &analysis.file_conflicts {
        let mut line = format!(
            "{} [{}] tasks: {}",
            conflict.file_path,
            conflict.severity,
            conflict.tasks.join(", ")
        );
        if !conflict.overlapping_lines.is_empty() {
            line.push_str(&format!(
                " overlapping lines: {}",
                drift::format_line_ranges(&conflict.overlapping_lines)
            ));
        }
        human.push_detail(line);
    }
    if analysis.overall_severity >= Severity::High {
        human.push_warning("overlapping edits must be resolved before merging");
    }
    for recommendation in &analysis.recommendations {
        human.push_next_step(recommendation.clone());
    }

    emit_success(output, "check", &analysis, Some(&human))
}
