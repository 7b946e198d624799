//! Timeline export to JSON or CSV.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock::write_atomic;
use crate::timeline::UnifiedEntry;

pub const CSV_COLUMNS: [&str; 6] = [
    "timestamp",
    "source",
    "eventKind",
    "taskId",
    "filePath",
    "summary",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Document written by a JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub entry_count: usize,
    pub entries: Vec<UnifiedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub entry_count: usize,
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// One header line plus one row per entry; every value is JSON-quoted.
pub fn render_csv(entries: &[UnifiedEntry]) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push('\n');
    for entry in entries {
        let row = [
            entry.timestamp.to_rfc3339(),
            entry.source.as_str().to_string(),
            entry.event_kind.clone(),
            entry.task_id.clone().unwrap_or_default(),
            entry.file_path.clone().unwrap_or_default(),
            entry.summary.clone(),
        ];
        let quoted: Vec<String> = row.iter().map(|value| quote(value)).collect();
        out.push_str(&quoted.join(","));
        out.push('\n');
    }
    out
}

pub fn render(entries: &[UnifiedEntry], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => {
            let document = ExportDocument {
                exported_at: Utc::now(),
                entry_count: entries.len(),
                entries: entries.to_vec(),
            };
            Ok(serde_json::to_string_pretty(&document)?)
        }
        ExportFormat::Csv => Ok(render_csv(entries)),
    }
}

pub fn write_export(path: &Path, entries: &[UnifiedEntry], format: ExportFormat) -> Result<ExportSummary> {
    let body = render(entries, format)?;
    write_atomic(path, body.as_bytes())?;
    tracing::info!(path = %path.display(), format = %format, entries = entries.len(), "timeline exported");

    Ok(ExportSummary {
        path: path.to_path_buf(),
        format,
        entry_count: entries.len(),
    })
}
