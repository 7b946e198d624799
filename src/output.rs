//! Shared output formatting for drift CLI commands.
//!
//! Every command either prints human text or one JSON envelope
//! (`schema_version`, `command`, `status`, `data` or `error`).

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "drift.v1";

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human report: a header line followed by optional titled sections.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    summary: Vec<(String, String)>,
    details: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    pub fn push_summary(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.summary.push((key.into(), value.into()));
    }

    pub fn push_detail(&mut self, value: impl Into<String>) {
        self.details.push(value.into());
    }

    pub fn push_warning(&mut self, value: impl Into<String>) {
        self.warnings.push(value.into());
    }

    pub fn push_next_step(&mut self, value: impl Into<String>) {
        self.next_steps.push(value.into());
    }
}

impl fmt::Display for HumanOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header)?;

        let summary: Vec<String> = self
            .summary
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{key}: {value}")
                }
            })
            .collect();

        for (title, items) in [
            ("Summary", &summary),
            ("Details", &self.details),
            ("Warnings", &self.warnings),
            ("Next steps", &self.next_steps),
        ] {
            if items.is_empty() {
                continue;
            }
            write!(f, "\n\n{title}:")?;
            for item in items {
                write!(f, "\n- {item}")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "is_empty")]
    warnings: &'a [String],
    #[serde(skip_serializing_if = "is_empty")]
    next_steps: &'a [String],
}

fn is_empty(items: &&[String]) -> bool {
    items.is_empty()
}

fn print_envelope<T: Serialize>(envelope: &Envelope<'_, T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: Option<&HumanOutput>,
) -> Result<()> {
    if options.json {
        let (warnings, next_steps) = match human {
            Some(h) => (h.warnings.as_slice(), h.next_steps.as_slice()),
            None => (&[][..], &[][..]),
        };
        return print_envelope(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "success",
            data: Some(data),
            error: None,
            warnings,
            next_steps,
        });
    }

    if let (false, Some(human)) = (options.quiet, human) {
        println!("{human}");
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);

    if json {
        return print_envelope::<()>(&Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: "error",
            data: None,
            error: Some(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: err.kind(),
                details: err.details(),
            }),
            warnings: &[],
            next_steps: &next_steps,
        });
    }

    eprintln!("error: {err}");
    if let Some(hint) = next_steps.first() {
        eprintln!("hint: {hint}");
    }
    Ok(())
}

pub fn format_human(output: &HumanOutput) -> String {
    output.to_string()
}

/// Best-effort command name for error envelopes raised before clap parses.
///
/// `task` is a command group, so its subcommand is included (`task start`).
pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--root" {
            args.next();
        } else if !arg.starts_with('-') {
            positional.push(arg);
            if positional.len() == 2 || positional[0] != "task" {
                break;
            }
        }
    }

    match positional.as_slice() {
        [] => "drift".to_string(),
        [group, sub] => format!("{group} {sub}"),
        [command, ..] => command.clone(),
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    let steps: &[&str] = match err {
        Error::CorruptStore { .. } => &["drift stats", "drift reset --yes"],
        Error::InvalidConfig(_) => &["fix .drift.toml then retry"],
        Error::UnsupportedFormat(_) => &["use --format json or --format csv"],
        Error::LockFailed(_) => &["retry once other drift processes finish"],
        _ => &[],
    };
    steps.iter().map(|step| step.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn human_output_lists_sections_in_order() {
        let mut human = HumanOutput::new("drift check: HIGH");
        human.push_summary("tasks", "A, B");
        human.push_detail("shared.rs");
        human.push_warning("index unreadable");
        human.push_next_step("drift reset --yes");

        let text = format_human(&human);
        let summary = text.find("Summary:").unwrap();
        let details = text.find("Details:").unwrap();
        let warnings = text.find("Warnings:").unwrap();
        let next = text.find("Next steps:").unwrap();
        assert!(text.starts_with("drift check: HIGH\n\nSummary:"));
        assert!(summary < details && details < warnings && warnings < next);
        assert!(text.contains("- tasks: A, B"));
    }

    #[test]
    fn header_only_output_has_no_sections() {
        assert_eq!(format_human(&HumanOutput::new("drift init")), "drift init");
    }

    #[test]
    fn command_name_skips_flags_and_root_value() {
        assert_eq!(command_name(args(&[])), "drift");
        assert_eq!(command_name(args(&["--json", "check", "A", "B"])), "check");
        assert_eq!(command_name(args(&["--root", "/tmp/x", "stats"])), "stats");
        assert_eq!(
            command_name(args(&["task", "--json", "start", "T1"])),
            "task start"
        );
        assert_eq!(command_name(args(&["task"])), "task");
    }

    #[test]
    fn errors_suggest_recovery() {
        let err = Error::UnsupportedFormat("xml".to_string());
        assert_eq!(
            error_next_steps(&err),
            vec!["use --format json or --format csv".to_string()]
        );
        assert!(error_next_steps(&Error::NotFound("/tmp/x".to_string())).is_empty());
    }

    #[test]
    fn error_envelope_omits_data() {
        let err = Error::UnsupportedFormat("xml".to_string());
        let envelope = Envelope::<()> {
            schema_version: SCHEMA_VERSION,
            command: "export",
            status: "error",
            data: None,
            error: Some(ErrorBody {
                message: err.to_string(),
                code: err.exit_code(),
                kind: err.kind(),
                details: err.details(),
            }),
            warnings: &[],
            next_steps: &[],
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("data").is_none());
        assert!(value.get("next_steps").is_none());
        assert_eq!(value["error"]["kind"], "unsupported_format");
    }
}
