//! Configuration loading and management
//!
//! Handles parsing of `.drift.toml` configuration files.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the per-project configuration file
pub const CONFIG_FILE: &str = ".drift.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Evolution store configuration
    #[serde(default)]
    pub evolution: EvolutionConfig,

    /// Unified timeline configuration
    #[serde(default)]
    pub timeline: TimelineConfig,

    /// External timeline sources
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// Evolution store and file state resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Directory holding the evolution index, relative to the project root
    #[serde(default = "default_evolution_dir")]
    pub dir: String,

    /// Index file name inside `dir`
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Record count that triggers eviction
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Records older than this are evicted first (e.g., "30d")
    #[serde(default = "default_max_age")]
    pub max_age: String,

    /// Hex characters kept from the SHA-256 content digest
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,

    /// Baseline branch for commits-ahead counts
    #[serde(default = "default_baseline")]
    pub baseline: String,

    /// Glob patterns for paths that are never tracked
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

fn default_evolution_dir() -> String {
    ".drift/evolution".to_string()
}

fn default_index_file() -> String {
    "evolution-index.json".to_string()
}

fn default_max_records() -> usize {
    1000
}

fn default_max_age() -> String {
    "30d".to_string()
}

fn default_hash_length() -> usize {
    16
}

fn default_baseline() -> String {
    "main".to_string()
}

fn default_ignore() -> Vec<String> {
    [
        "node_modules",
        ".git",
        "dist",
        "build",
        "coverage",
        "target",
        ".drift",
        ".drift.toml",
        "*.log",
        "*.lock",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            dir: default_evolution_dir(),
            index_file: default_index_file(),
            max_records: default_max_records(),
            max_age: default_max_age(),
            hash_length: default_hash_length(),
            baseline: default_baseline(),
            ignore: default_ignore(),
        }
    }
}

/// Unified timeline persistence and background sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Directory holding the unified snapshot
    #[serde(default = "default_timeline_dir")]
    pub dir: String,

    /// Snapshot file name inside `dir`
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    /// Most recent entries kept in the persisted snapshot
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// A persisted snapshot older than this is recomputed on read
    #[serde(default = "default_stale_after")]
    pub stale_after: String,

    /// Run background sync when a long-lived process asks for it
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    /// Interval between background syncs
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,
}

fn default_timeline_dir() -> String {
    ".drift/timeline".to_string()
}

fn default_snapshot_file() -> String {
    "unified-timeline.json".to_string()
}

fn default_max_entries() -> usize {
    5000
}

fn default_stale_after() -> String {
    "5m".to_string()
}

fn default_auto_sync() -> bool {
    true
}

fn default_sync_interval() -> String {
    "60s".to_string()
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            dir: default_timeline_dir(),
            snapshot_file: default_snapshot_file(),
            max_entries: default_max_entries(),
            stale_after: default_stale_after(),
            auto_sync: default_auto_sync(),
            sync_interval: default_sync_interval(),
        }
    }
}

/// Locations of collaborator-produced records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Directory of context snapshot summaries (`*.json`)
    #[serde(default = "default_snapshots_dir")]
    pub snapshots_dir: String,

    /// Directory of build attempt logs (`*.log`)
    #[serde(default = "default_builds_dir")]
    pub builds_dir: String,
}

fn default_snapshots_dir() -> String {
    ".drift/snapshots".to_string()
}

fn default_builds_dir() -> String {
    ".drift/builds".to_string()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            snapshots_dir: default_snapshots_dir(),
            builds_dir: default_builds_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a `.drift.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the project root, or return defaults
    ///
    /// A present but invalid file is an error: bad retention settings must
    /// not silently fall back to something that evicts everything.
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that would produce pathological behavior
    pub fn validate(&self) -> Result<()> {
        self.evolution.validate()?;
        self.timeline.validate()?;
        Ok(())
    }
}

impl EvolutionConfig {
    /// Parsed `max_age`
    pub fn max_age(&self) -> Result<Duration> {
        parse_positive_duration(&self.max_age, "evolution.max_age")
    }

    pub fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "evolution.dir cannot be empty".to_string(),
            ));
        }
        if self.index_file.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "evolution.index_file cannot be empty".to_string(),
            ));
        }
        if self.max_records == 0 {
            return Err(Error::InvalidConfig(
                "evolution.max_records must be > 0".to_string(),
            ));
        }
        if !(4..=64).contains(&self.hash_length) {
            return Err(Error::InvalidConfig(format!(
                "evolution.hash_length must be between 4 and 64 (got {})",
                self.hash_length
            )));
        }
        self.max_age()?;
        for pattern in &self.ignore {
            validate_pattern(pattern, "evolution.ignore")?;
        }
        Ok(())
    }
}

impl TimelineConfig {
    /// Parsed `stale_after`
    pub fn stale_after(&self) -> Result<Duration> {
        parse_positive_duration(&self.stale_after, "timeline.stale_after")
    }

    /// Parsed `sync_interval`
    pub fn sync_interval(&self) -> Result<std::time::Duration> {
        let interval = parse_positive_duration(&self.sync_interval, "timeline.sync_interval")?;
        interval.to_std().map_err(|err| {
            Error::InvalidConfig(format!("timeline.sync_interval out of range: {err}"))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot_file.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "timeline.snapshot_file cannot be empty".to_string(),
            ));
        }
        if self.max_entries == 0 {
            return Err(Error::InvalidConfig(
                "timeline.max_entries must be > 0".to_string(),
            ));
        }
        self.stale_after()?;
        self.sync_interval()?;
        Ok(())
    }
}

fn validate_pattern(pattern: &str, field: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(Error::InvalidConfig(format!(
            "{field}: pattern cannot be empty"
        )));
    }
    glob::Pattern::new(pattern).map_err(|err| {
        Error::InvalidConfig(format!("{field}: invalid glob pattern '{pattern}': {err}"))
    })?;
    Ok(())
}

fn parse_positive_duration(raw: &str, field: &str) -> Result<Duration> {
    let duration = parse_duration(raw)
        .map_err(|err| Error::InvalidConfig(format!("{field}: {err}")))?;
    if duration <= Duration::zero() {
        return Err(Error::InvalidConfig(format!("{field} must be > 0")));
    }
    Ok(duration)
}

/// Parse a duration string such as `30s`, `15m`, `2h`, `30d`, `1w`
///
/// A bare number is read as minutes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit() && c != '-') {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, "m"),
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {}", num_str)))?;

    let duration = match unit.to_lowercase().as_str() {
        "ms" => Duration::try_milliseconds(num),
        "s" | "sec" | "second" | "seconds" => Duration::try_seconds(num),
        "m" | "min" | "minute" | "minutes" => Duration::try_minutes(num),
        "h" | "hr" | "hour" | "hours" => Duration::try_hours(num),
        "d" | "day" | "days" => Duration::try_days(num),
        "w" | "week" | "weeks" => Duration::try_weeks(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{}'. Expected: ms, s, m, h, d, w",
                unit
            )));
        }
    };

    duration.ok_or_else(|| Error::InvalidArgument(format!("Duration out of range: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.evolution.dir, ".drift/evolution");
        assert_eq!(cfg.evolution.index_file, "evolution-index.json");
        assert_eq!(cfg.evolution.max_records, 1000);
        assert_eq!(cfg.evolution.max_age().unwrap(), Duration::days(30));
        assert_eq!(cfg.evolution.hash_length, 16);
        assert_eq!(cfg.evolution.baseline, "main");
        assert!(cfg.evolution.ignore.contains(&"node_modules".to_string()));
        assert_eq!(cfg.timeline.max_entries, 5000);
        assert!(cfg.timeline.auto_sync);
        assert_eq!(
            cfg.timeline.sync_interval().unwrap(),
            std::time::Duration::from_secs(60)
        );
        assert_eq!(cfg.sources.builds_dir, ".drift/builds");
        cfg.validate().unwrap();
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[evolution]
max_records = 50
max_age = "7d"
hash_length = 12
baseline = "develop"
ignore = ["vendor", "*.tmp"]

[timeline]
max_entries = 200
stale_after = "30s"
auto_sync = false
sync_interval = "5m"

[sources]
snapshots_dir = "state/snapshots"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.evolution.max_records, 50);
        assert_eq!(cfg.evolution.max_age().unwrap(), Duration::days(7));
        assert_eq!(cfg.evolution.hash_length, 12);
        assert_eq!(cfg.evolution.baseline, "develop");
        assert_eq!(cfg.evolution.ignore, vec!["vendor", "*.tmp"]);
        assert_eq!(cfg.evolution.dir, ".drift/evolution");
        assert_eq!(cfg.timeline.max_entries, 200);
        assert_eq!(cfg.timeline.stale_after().unwrap(), Duration::seconds(30));
        assert!(!cfg.timeline.auto_sync);
        assert_eq!(cfg.sources.snapshots_dir, "state/snapshots");
        assert_eq!(cfg.sources.builds_dir, ".drift/builds");
    }

    #[test]
    fn zero_retention_cap_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[evolution]\nmax_records = 0\n").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn negative_max_age_rejected() {
        let mut cfg = Config::default();
        cfg.evolution.max_age = "-3d".to_string();
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));

        cfg.evolution.max_age = "0d".to_string();
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn invalid_ignore_pattern_rejected() {
        let mut cfg = Config::default();
        cfg.evolution.ignore = vec!["[unclosed".to_string()];
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn load_from_root_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_root(dir.path()).expect("defaults");
        assert_eq!(cfg.evolution.max_records, 1000);
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        Config::default().save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("max_records = 1000"));
        let reloaded = Config::load(&path).expect("reload");
        assert_eq!(reloaded.timeline.snapshot_file, "unified-timeline.json");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("10").unwrap(), Duration::minutes(10));
        assert!(parse_duration("3y").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn out_of_range_durations_are_errors() {
        assert!(matches!(
            parse_duration("9999999999999d"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(parse_duration("99999999999999999999s").is_err());

        let cfg = EvolutionConfig {
            max_age: "9999999999999d".to_string(),
            ..EvolutionConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn oversized_max_age_in_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[evolution]\nmax_age = \"9999999999999d\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }
}
