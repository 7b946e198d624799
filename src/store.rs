//! Evolution event store
//!
//! Append-only, capped and time-boxed record of [`EvolutionEvent`]s, persisted
//! as one JSON index. Appends re-read the index under the index lock, apply
//! retention and publish atomically. An index that cannot be parsed is moved
//! aside to `<index>.corrupt-<ulid>` by the next append, which then starts
//! from a fresh index. Reads go through a per-handle cache that
//! is dropped on every write made through the handle and revalidated against
//! the file's modification stamp so writes from other processes are seen.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::EvolutionConfig;
use crate::error::{Error, Result};
use crate::event::{EventKind, EvolutionEvent};
use crate::lock::{FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::storage::Storage;

/// Schema version written to fresh indexes
pub const INDEX_VERSION: &str = "1.0.0";

/// Number of entries reported in [`StoreStatistics::top_files`]
const TOP_FILES: usize = 10;

/// On-disk evolution index document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionIndex {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<EvolutionEvent>,
}

impl EvolutionIndex {
    pub fn fresh() -> Self {
        let now = Utc::now();
        Self {
            version: INDEX_VERSION.to_string(),
            created_at: now,
            updated_at: now,
            records: Vec::new(),
        }
    }
}

/// Retention limits applied on every append
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    max_records: usize,
    max_age: Duration,
}

impl RetentionPolicy {
    /// Both limits must be positive.
    pub fn new(max_records: usize, max_age: Duration) -> Result<Self> {
        if max_records == 0 {
            return Err(Error::InvalidConfig(
                "evolution.max_records must be > 0".to_string(),
            ));
        }
        if max_age <= Duration::zero() {
            return Err(Error::InvalidConfig(
                "evolution.max_age must be > 0".to_string(),
            ));
        }
        Ok(Self {
            max_records,
            max_age,
        })
    }

    pub fn from_config(config: &EvolutionConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.max_records, config.max_age()?)
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Evict records once the cap is exceeded
    ///
    /// Records older than `max_age` go first; if the store is still over the
    /// cap only the most recent `max_records` survive. Surviving records keep
    /// their relative order.
    pub fn apply(&self, records: &mut Vec<EvolutionEvent>, now: DateTime<Utc>) -> usize {
        let before = records.len();
        if before <= self.max_records {
            return 0;
        }

        // A cutoff before the representable range ages nothing out.
        if let Some(cutoff) = now.checked_sub_signed(self.max_age) {
            records.retain(|record| record.timestamp >= cutoff);
        }

        if records.len() > self.max_records {
            let excess = records.len() - self.max_records;
            let mut by_age: Vec<(DateTime<Utc>, usize)> = records
                .iter()
                .enumerate()
                .map(|(idx, record)| (record.timestamp, idx))
                .collect();
            by_age.sort();
            let evicted: HashSet<usize> = by_age.into_iter().take(excess).map(|(_, idx)| idx).collect();

            let mut idx = 0;
            records.retain(|_| {
                let keep = !evicted.contains(&idx);
                idx += 1;
                keep
            });
        }

        before - records.len()
    }
}

/// Query over stored events
///
/// Empty `kinds` admits every kind. `limit` keeps the most recent N after
/// sorting ascending by timestamp.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub file_path: Option<String>,
    pub task_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub kinds: Vec<EventKind>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn for_file(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &EvolutionEvent) -> bool {
        if let Some(path) = &self.file_path {
            if event.file_path.as_deref() != Some(path.as_str()) {
                return false;
            }
        }

        if let Some(task) = &self.task_id {
            if &event.task_id != task {
                return false;
            }
        }

        if let Some(since) = &self.since {
            if &event.timestamp < since {
                return false;
            }
        }

        if !self.kinds.is_empty() && !self.kinds.contains(&event.event_kind) {
            return false;
        }

        true
    }
}

/// Per-file record count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCount {
    pub path: String,
    pub count: usize,
}

/// Summary of the store contents
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatistics {
    pub total_records: usize,
    pub by_event_type: BTreeMap<String, usize>,
    pub task_count: usize,
    pub file_count: usize,
    pub top_files: Vec<FileCount>,
    pub oldest_record: Option<DateTime<Utc>>,
    pub newest_record: Option<DateTime<Utc>>,
}

type FileStamp = Option<(SystemTime, u64)>;

struct CachedIndex {
    stamp: FileStamp,
    index: EvolutionIndex,
}

/// Handle to the evolution store of one project
pub struct EventStore {
    storage: Storage,
    retention: RetentionPolicy,
    lock_timeout_ms: u64,
    cache: Mutex<Option<CachedIndex>>,
}

impl EventStore {
    pub fn new(storage: Storage, retention: RetentionPolicy) -> Self {
        Self {
            storage,
            retention,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            cache: Mutex::new(None),
        }
    }

    pub fn open(storage: Storage, config: &EvolutionConfig) -> Result<Self> {
        Ok(Self::new(storage, RetentionPolicy::from_config(config)?))
    }

    pub fn with_lock_timeout(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append one event, enforcing retention
    ///
    /// A corrupt index is preserved next to the original path and replaced
    /// by a fresh one; see [`EventStore::quarantined`].
    pub fn append(&self, event: EvolutionEvent) -> Result<()> {
        self.append_all(vec![event])
    }

    /// Append several events under a single lock acquisition
    pub fn append_all(&self, events: Vec<EvolutionEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let _lock = FileLock::acquire(self.storage.index_lock_file(), self.lock_timeout_ms)?;
        let mut index = match self.read_disk() {
            Ok(index) => index.unwrap_or_else(EvolutionIndex::fresh),
            Err(Error::CorruptStore { reason, .. }) => {
                let preserved = self.quarantine()?;
                tracing::warn!(
                    preserved = %preserved.display(),
                    %reason,
                    "evolution index corrupt; starting a fresh index"
                );
                EvolutionIndex::fresh()
            }
            Err(err) => return Err(err),
        };

        let appended = events.len();
        index.records.extend(events);
        let now = Utc::now();
        let evicted = self.retention.apply(&mut index.records, now);
        index.updated_at = now;

        self.storage.write_json(self.storage.index_file(), &index)?;
        self.invalidate();

        tracing::debug!(
            appended,
            evicted,
            total = index.records.len(),
            "appended evolution events"
        );
        Ok(())
    }

    /// Replace the index with a fresh, empty one
    pub fn reset(&self) -> Result<()> {
        let _lock = FileLock::acquire(self.storage.index_lock_file(), self.lock_timeout_ms)?;
        self.storage
            .write_json(self.storage.index_file(), &EvolutionIndex::fresh())?;
        self.invalidate();
        tracing::debug!(path = %self.storage.index_file().display(), "evolution index reset");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current index; missing or corrupt files read as empty
    pub fn load_index(&self) -> EvolutionIndex {
        let stamp = self.file_stamp();
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(cached) = cache.as_ref() {
            if cached.stamp == stamp {
                return cached.index.clone();
            }
        }

        let index = match self.read_disk() {
            Ok(Some(index)) => index,
            Ok(None) => EvolutionIndex::fresh(),
            Err(err) => {
                tracing::warn!(error = %err, "evolution index unreadable; treating as empty");
                EvolutionIndex::fresh()
            }
        };

        *cache = Some(CachedIndex {
            stamp,
            index: index.clone(),
        });
        index
    }

    /// Strict read: surfaces corruption instead of recovering from it
    pub fn verify(&self) -> Result<()> {
        self.read_disk().map(|_| ())
    }

    /// Matching events, ascending by timestamp, limited to the most recent N
    pub fn query(&self, filter: &EventFilter) -> Vec<EvolutionEvent> {
        let mut events: Vec<EvolutionEvent> = self
            .load_index()
            .records
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        if let Some(limit) = filter.limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }
        events
    }

    /// Evolution of one file, combined with any further filter constraints
    pub fn file_history(&self, path: &str, filter: &EventFilter) -> Vec<EvolutionEvent> {
        let filter = EventFilter {
            file_path: Some(path.to_string()),
            ..filter.clone()
        };
        self.query(&filter)
    }

    /// Every event owned by a task
    pub fn task_history(&self, task_id: &str) -> Vec<EvolutionEvent> {
        self.query(&EventFilter::for_task(task_id))
    }

    /// Most recent file-level event for `path`
    pub fn latest_for_path(&self, path: &str) -> Option<EvolutionEvent> {
        self.query(&EventFilter {
            file_path: Some(path.to_string()),
            limit: Some(1),
            ..EventFilter::default()
        })
        .pop()
    }

    pub fn statistics(&self) -> StoreStatistics {
        let records = self.load_index().records;

        let mut by_event_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut tasks: HashSet<&str> = HashSet::new();
        let mut files: HashMap<&str, usize> = HashMap::new();

        for record in &records {
            *by_event_type
                .entry(record.event_kind.as_str().to_string())
                .or_default() += 1;
            tasks.insert(record.task_id.as_str());
            if let Some(path) = record.file_path.as_deref() {
                *files.entry(path).or_default() += 1;
            }
        }

        let mut top_files: Vec<FileCount> = files
            .iter()
            .map(|(path, count)| FileCount {
                path: path.to_string(),
                count: *count,
            })
            .collect();
        top_files.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.path.cmp(&b.path)));
        top_files.truncate(TOP_FILES);

        StoreStatistics {
            total_records: records.len(),
            by_event_type,
            task_count: tasks.len(),
            file_count: files.len(),
            top_files,
            oldest_record: records.iter().map(|r| r.timestamp).min(),
            newest_record: records.iter().map(|r| r.timestamp).max(),
        }
    }

    /// Corrupt indexes moved aside by earlier appends, oldest first
    pub fn quarantined(&self) -> Vec<PathBuf> {
        let index = self.storage.index_file();
        let (Some(dir), Some(name)) = (index.parent(), index.file_name()) else {
            return Vec::new();
        };
        let prefix = format!("{}.corrupt-", name.to_string_lossy());
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
            })
            .collect();
        paths.sort();
        paths
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Move the unreadable index aside; caller holds the index lock.
    fn quarantine(&self) -> Result<PathBuf> {
        let index = self.storage.index_file();
        let mut name = index.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", Ulid::new().to_string().to_ascii_lowercase()));
        let preserved = PathBuf::from(name);
        fs::rename(index, &preserved)?;
        self.invalidate();
        Ok(preserved)
    }

    fn read_disk(&self) -> Result<Option<EvolutionIndex>> {
        let path = self.storage.index_file();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|err| Error::CorruptStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let index = serde_json::from_str(&content).map_err(|err| Error::CorruptStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Ok(Some(index))
    }

    fn file_stamp(&self) -> FileStamp {
        let meta = fs::metadata(self.storage.index_file()).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        *cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::FileState;
    use tempfile::TempDir;

    fn store_in(temp: &TempDir, max_records: usize) -> EventStore {
        let storage = Storage::new(temp.path(), &Config::default());
        EventStore::new(
            storage,
            RetentionPolicy::new(max_records, Duration::days(30)).unwrap(),
        )
    }

    fn modified(task: &str, path: &str, minutes_ago: i64) -> EvolutionEvent {
        EvolutionEvent::file(task, path, EventKind::Modified, FileState::default())
            .with_timestamp(Utc::now() - Duration::minutes(minutes_ago))
    }

    #[test]
    fn cold_start_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp, 10);
        assert!(store.query(&EventFilter::default()).is_empty());
        assert_eq!(store.statistics().total_records, 0);
        assert!(store.latest_for_path("a.rs").is_none());
    }

    #[test]
    fn query_sorts_ascending_and_limits_to_tail() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp, 100);
        store.append(modified("T1", "a.rs", 1)).unwrap();
        store.append(modified("T1", "b.rs", 30)).unwrap();
        store.append(modified("T2", "a.rs", 10)).unwrap();

        let all = store.query(&EventFilter::default());
        let paths: Vec<_> = all.iter().filter_map(|e| e.file_path.as_deref()).collect();
        assert_eq!(paths, vec!["b.rs", "a.rs", "a.rs"]);

        let tail = store.query(&EventFilter {
            limit: Some(2),
            ..EventFilter::default()
        });
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].task_id, "T2");
        assert_eq!(tail[1].task_id, "T1");

        assert_eq!(store.task_history("T1").len(), 2);
        assert_eq!(store.file_history("a.rs", &EventFilter::default()).len(), 2);
        assert_eq!(store.latest_for_path("a.rs").unwrap().task_id, "T1");
    }

    #[test]
    fn kind_allow_list_filters() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp, 100);
        store.append(modified("T1", "a.rs", 2)).unwrap();
        store
            .append(EvolutionEvent::task("T1", EventKind::TaskStart))
            .unwrap();

        let filter = EventFilter {
            kinds: vec![EventKind::TaskStart],
            ..EventFilter::default()
        };
        let events = store.query(&filter);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_task_level());
    }

    #[test]
    fn retention_keeps_most_recent() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp, 3);
        for i in 0..6 {
            store.append(modified("T1", &format!("f{i}.rs"), 60 - i)).unwrap();
        }

        let events = store.query(&EventFilter::default());
        assert_eq!(events.len(), 3);
        let paths: Vec<_> = events.iter().filter_map(|e| e.file_path.as_deref()).collect();
        assert_eq!(paths, vec!["f3.rs", "f4.rs", "f5.rs"]);
    }

    #[test]
    fn retention_drops_aged_records_first() {
        let policy = RetentionPolicy::new(2, Duration::days(1)).unwrap();
        let now = Utc::now();
        let mut records = vec![
            modified("T1", "old.rs", 60 * 24 * 3),
            modified("T1", "a.rs", 5),
            modified("T1", "b.rs", 4),
        ];
        let evicted = policy.apply(&mut records, now);
        assert_eq!(evicted, 1);
        assert!(records.iter().all(|r| r.file_path.as_deref() != Some("old.rs")));
    }

    #[test]
    fn retention_is_noop_under_cap() {
        let policy = RetentionPolicy::new(5, Duration::seconds(1)).unwrap();
        let mut records = vec![modified("T1", "ancient.rs", 60 * 24 * 365)];
        assert_eq!(policy.apply(&mut records, Utc::now()), 0);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn corrupt_index_reads_empty_until_next_append() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp, 10);
        let path = store.storage().index_file().to_path_buf();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{\"version\":\"1.0.0\",\"rec").unwrap();

        assert!(store.query(&EventFilter::default()).is_empty());
        assert!(matches!(store.verify(), Err(Error::CorruptStore { .. })));
        assert!(store.quarantined().is_empty());

        store.append(modified("T1", "a.rs", 0)).unwrap();
        assert_eq!(store.query(&EventFilter::default()).len(), 1);
        store.verify().unwrap();

        let preserved = store.quarantined();
        assert_eq!(preserved.len(), 1);
        assert_eq!(
            fs::read_to_string(&preserved[0]).unwrap(),
            "{\"version\":\"1.0.0\",\"rec"
        );
    }

    #[test]
    fn zero_limits_are_rejected_at_construction() {
        assert!(matches!(
            RetentionPolicy::new(0, Duration::days(1)),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            RetentionPolicy::new(10, Duration::zero()),
            Err(Error::InvalidConfig(_))
        ));

        let temp = TempDir::new().unwrap();
        let config = EvolutionConfig {
            max_records: 0,
            ..EvolutionConfig::default()
        };
        let storage = Storage::new(temp.path(), &Config::default());
        assert!(matches!(
            EventStore::open(storage, &config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn huge_max_age_never_overflows() {
        let policy = RetentionPolicy::new(1, Duration::try_days(100_000_000).unwrap()).unwrap();
        let mut records = vec![modified("T1", "a.rs", 10), modified("T1", "b.rs", 5)];
        assert_eq!(policy.apply(&mut records, Utc::now()), 1);
        assert_eq!(records[0].file_path.as_deref(), Some("b.rs"));
    }

    #[test]
    fn writes_from_another_handle_are_visible() {
        let temp = TempDir::new().unwrap();
        let reader = store_in(&temp, 10);
        let writer = store_in(&temp, 10);

        assert!(reader.query(&EventFilter::default()).is_empty());
        writer.append(modified("T1", "a.rs", 0)).unwrap();
        writer.append(modified("T1", "b.rs", 0)).unwrap();
        assert_eq!(reader.query(&EventFilter::default()).len(), 2);
    }

    #[test]
    fn statistics_summarize_records() {
        let temp = TempDir::new().unwrap();
        let store = store_in(&temp, 100);
        store.append(modified("T1", "a.rs", 3)).unwrap();
        store.append(modified("T2", "a.rs", 2)).unwrap();
        store.append(modified("T2", "b.rs", 1)).unwrap();
        store
            .append(EvolutionEvent::task("T3", EventKind::TaskComplete))
            .unwrap();

        let stats = store.statistics();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.by_event_type["modified"], 3);
        assert_eq!(stats.by_event_type["task_complete"], 1);
        assert_eq!(stats.task_count, 3);
        assert_eq!(stats.file_count, 2);
        assert_eq!(
            stats.top_files[0],
            FileCount {
                path: "a.rs".to_string(),
                count: 2
            }
        );
        assert!(stats.oldest_record <= stats.newest_record);
    }
}
