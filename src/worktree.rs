//! Working-tree collaborator.
//!
//! Everything drift needs to know about files and version control goes
//! through [`WorkingTree`]. [`GitWorkingTree`] answers from a local git
//! checkout via libgit2; [`MemoryWorkingTree`] is a scriptable in-memory
//! stand-in for tests and embedders without a repository.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use git2::{DiffOptions, ErrorCode, Oid, Patch, Repository, Sort, Status};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{DiffSummary, FileState, LineSection, VersionMeta};
use crate::resolver::state_from_bytes;

/// Commits inspected when looking for the last commit touching a path.
const LAST_COMMIT_SCAN_LIMIT: usize = 500;

/// Status of a path that differs from the committed tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
    TypeChanged,
    Untracked,
    Conflicted,
}

impl PathStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathStatus::Added => "added",
            PathStatus::Modified => "modified",
            PathStatus::Deleted => "deleted",
            PathStatus::Renamed => "renamed",
            PathStatus::TypeChanged => "type_changed",
            PathStatus::Untracked => "untracked",
            PathStatus::Conflicted => "conflicted",
        }
    }
}

/// A path reported by [`WorkingTree::modified_paths`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedPath {
    pub status: PathStatus,
    pub path: String,
}

impl ModifiedPath {
    pub fn new(status: PathStatus, path: impl Into<String>) -> Self {
        Self {
            status,
            path: path.into(),
        }
    }
}

/// Read-only view of a project working tree.
///
/// Paths are project-relative with forward slashes. Implementations report
/// failures as errors; callers degrade them to empty values.
pub trait WorkingTree: Send + Sync {
    /// Raw file content, `None` when the path does not exist.
    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Repository-level metadata: branch, head commit, commits ahead.
    fn repository_meta(&self) -> Result<VersionMeta>;

    /// Version-control metadata for `path`.
    fn version_meta(&self, path: &str) -> Result<VersionMeta>;

    /// Every path that differs from the committed tree.
    fn modified_paths(&self) -> Result<Vec<ModifiedPath>>;

    /// Changed line ranges for `path`, `None` when it is unchanged.
    fn diff_summary(&self, path: &str) -> Result<Option<DiffSummary>>;

    /// Observable state of `path`.
    ///
    /// Unreadable files count as existing with no hash.
    fn file_state(&self, path: &str, hash_length: usize) -> FileState {
        match self.read_file(path) {
            Ok(Some(bytes)) => state_from_bytes(&bytes, hash_length),
            Ok(None) => FileState::absent(),
            Err(err) => {
                tracing::warn!(path, error = %err, "unable to read file; recording without hash");
                FileState {
                    exists: true,
                    ..FileState::default()
                }
            }
        }
    }
}

// =============================================================================
// Git-backed working tree
// =============================================================================

/// Working tree of a local git checkout.
///
/// The repository is reopened per call so the handle can be shared across
/// threads.
#[derive(Debug, Clone)]
pub struct GitWorkingTree {
    workdir: PathBuf,
    baseline: String,
}

impl GitWorkingTree {
    /// Open the checkout containing `start`; `baseline` is the branch used
    /// for commits-ahead counts.
    pub fn open(start: &Path, baseline: impl Into<String>) -> Result<Self> {
        let repo = Repository::discover(start).map_err(|err| {
            if err.code() == ErrorCode::NotFound {
                Error::CollaboratorUnavailable(format!(
                    "no git repository at {}",
                    start.display()
                ))
            } else {
                Error::Git(err)
            }
        })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                Error::CollaboratorUnavailable("bare repositories are not supported".to_string())
            })?;

        Ok(Self {
            workdir,
            baseline: baseline.into(),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::open(&self.workdir)?)
    }
}

impl WorkingTree for GitWorkingTree {
    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.workdir.join(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn repository_meta(&self) -> Result<VersionMeta> {
        let repo = self.repo()?;
        Ok(head_meta(&repo, &self.baseline))
    }

    fn version_meta(&self, path: &str) -> Result<VersionMeta> {
        let repo = self.repo()?;
        let mut meta = head_meta(&repo, &self.baseline);

        match repo.status_file(Path::new(path)) {
            Ok(status) => {
                meta.staged = status.intersects(
                    Status::INDEX_NEW
                        | Status::INDEX_MODIFIED
                        | Status::INDEX_DELETED
                        | Status::INDEX_RENAMED
                        | Status::INDEX_TYPECHANGE,
                );
                meta.modified = status.intersects(
                    Status::WT_NEW
                        | Status::WT_MODIFIED
                        | Status::WT_DELETED
                        | Status::WT_RENAMED
                        | Status::WT_TYPECHANGE,
                );
            }
            Err(err) if err.code() == ErrorCode::NotFound => {}
            Err(err) => return Err(Error::Git(err)),
        }

        if meta.commit.is_some() {
            meta.last_commit_for_file =
                last_commit_touching(&repo, path)?.map(|oid| oid.to_string());
        }

        Ok(meta)
    }

    fn modified_paths(&self) -> Result<Vec<ModifiedPath>> {
        let repo = self.repo()?;
        let mut options = git2::StatusOptions::new();
        options.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut options))?;

        let mut paths = Vec::new();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else {
                continue;
            };
            let status = entry.status();

            let path_status = if status.is_conflicted() {
                PathStatus::Conflicted
            } else if status.is_ignored() {
                continue;
            } else if status.is_wt_new() || status.is_index_new() {
                if status.is_wt_new() && !status.is_index_new() {
                    PathStatus::Untracked
                } else {
                    PathStatus::Added
                }
            } else if status.is_wt_deleted() || status.is_index_deleted() {
                PathStatus::Deleted
            } else if status.is_wt_renamed() || status.is_index_renamed() {
                PathStatus::Renamed
            } else if status.is_wt_typechange() || status.is_index_typechange() {
                PathStatus::TypeChanged
            } else if status.is_wt_modified() || status.is_index_modified() {
                PathStatus::Modified
            } else {
                continue;
            };

            paths.push(ModifiedPath::new(path_status, path));
        }

        paths.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(paths)
    }

    fn diff_summary(&self, path: &str) -> Result<Option<DiffSummary>> {
        let repo = self.repo()?;
        let head_tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(_) => None,
        };

        let mut options = DiffOptions::new();
        options
            .pathspec(path)
            .include_untracked(true)
            .show_untracked_content(true)
            .recurse_untracked_dirs(true)
            .context_lines(0);
        let diff = repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut options))?;

        let mut summary = DiffSummary::default();
        let mut touched = false;
        for idx in 0..diff.deltas().len() {
            let Some(patch) = Patch::from_diff(&diff, idx)? else {
                continue;
            };
            touched = true;
            let (_, added, removed) = patch.line_stats()?;
            summary.lines_added += added as u32;
            summary.lines_removed += removed as u32;

            for hunk_idx in 0..patch.num_hunks() {
                let (hunk, _) = patch.hunk(hunk_idx)?;
                let start = hunk.new_start().max(1);
                let end = start + hunk.new_lines().saturating_sub(1);
                summary.sections.push(LineSection::new(start, end));
            }
        }

        summary.sections.sort();
        Ok(touched.then_some(summary))
    }
}

/// Branch, head commit and commits ahead of `baseline`.
///
/// An unborn HEAD yields no branch or commit.
fn head_meta(repo: &Repository, baseline: &str) -> VersionMeta {
    let mut meta = VersionMeta::default();
    if let Ok(head) = repo.head() {
        if head.is_branch() {
            meta.branch = head.shorthand().map(str::to_string);
        }
        meta.commit = head.target().map(|oid| oid.to_string());
    }

    if meta.commit.is_some() {
        meta.commits_ahead_of_baseline = commits_ahead(repo, baseline, "HEAD")
            .map(|commits| commits.len() as u32)
            .unwrap_or(0);
    }
    meta
}

/// Most recent commit reachable from HEAD whose tree entry for `path`
/// differs from its first parent's.
fn last_commit_touching(repo: &Repository, path: &str) -> Result<Option<Oid>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push_head()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

    let target = Path::new(path);
    for oid in revwalk.take(LAST_COMMIT_SCAN_LIMIT) {
        let commit = repo.find_commit(oid?)?;
        let current = commit.tree()?.get_path(target).ok().map(|entry| entry.id());
        let parent = match commit.parent(0) {
            Ok(parent) => parent.tree()?.get_path(target).ok().map(|entry| entry.id()),
            Err(_) => None,
        };
        if current != parent {
            return Ok(Some(commit.id()));
        }
    }

    Ok(None)
}

/// Commits reachable from `branch_ref` but not from `base_ref`.
fn commits_ahead(repo: &Repository, base_ref: &str, branch_ref: &str) -> Result<Vec<Oid>> {
    let mut revwalk = repo.revwalk()?;
    let range = format!("{base_ref}..{branch_ref}");
    revwalk.push_range(&range).map_err(|err| {
        Error::OperationFailed(format!("unable to walk range '{}': {}", range, err))
    })?;

    let mut commits = Vec::new();
    for oid in revwalk {
        commits.push(oid?);
    }
    Ok(commits)
}

// =============================================================================
// Plain directory
// =============================================================================

/// Working tree of a directory outside version control.
///
/// Files are read from disk; every version-control query reports the
/// collaborator as unavailable.
#[derive(Debug, Clone)]
pub struct PlainWorkingTree {
    root: PathBuf,
}

impl PlainWorkingTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn unavailable(&self) -> Error {
        Error::CollaboratorUnavailable(format!(
            "{} is not under version control",
            self.root.display()
        ))
    }
}

impl WorkingTree for PlainWorkingTree {
    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.root.join(path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn repository_meta(&self) -> Result<VersionMeta> {
        Err(self.unavailable())
    }

    fn version_meta(&self, _path: &str) -> Result<VersionMeta> {
        Err(self.unavailable())
    }

    fn modified_paths(&self) -> Result<Vec<ModifiedPath>> {
        Err(self.unavailable())
    }

    fn diff_summary(&self, _path: &str) -> Result<Option<DiffSummary>> {
        Err(self.unavailable())
    }
}

/// Git working tree for `root` when it is inside a checkout, otherwise a
/// plain directory view.
pub fn open_working_tree(root: &Path, baseline: &str) -> Result<Arc<dyn WorkingTree>> {
    match GitWorkingTree::open(root, baseline) {
        Ok(tree) => Ok(Arc::new(tree)),
        Err(Error::CollaboratorUnavailable(reason)) => {
            tracing::debug!(%reason, "falling back to plain working tree");
            Ok(Arc::new(PlainWorkingTree::new(root)))
        }
        Err(err) => Err(err),
    }
}

// =============================================================================
// In-memory working tree
// =============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<String, Vec<u8>>,
    unreadable: Vec<String>,
    meta: HashMap<String, VersionMeta>,
    default_meta: VersionMeta,
    modified: Vec<ModifiedPath>,
    diffs: HashMap<String, DiffSummary>,
    unavailable: bool,
}

/// Scriptable working tree held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkingTree {
    state: Mutex<MemoryState>,
}

impl MemoryWorkingTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut state)
    }

    pub fn write(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        let path = path.into();
        self.with_state(|state| {
            state.unreadable.retain(|p| p != &path);
            state.files.insert(path, content.into());
        });
    }

    pub fn remove(&self, path: &str) {
        self.with_state(|state| {
            state.files.remove(path);
        });
    }

    /// Make `path` exist but fail every read.
    pub fn mark_unreadable(&self, path: impl Into<String>) {
        let path = path.into();
        self.with_state(|state| {
            if !state.unreadable.contains(&path) {
                state.unreadable.push(path);
            }
        });
    }

    pub fn set_version_meta(&self, path: impl Into<String>, meta: VersionMeta) {
        let path = path.into();
        self.with_state(|state| {
            state.meta.insert(path, meta);
        });
    }

    /// Metadata reported for paths without their own entry.
    pub fn set_default_meta(&self, meta: VersionMeta) {
        self.with_state(|state| state.default_meta = meta);
    }

    pub fn set_modified(&self, paths: Vec<ModifiedPath>) {
        self.with_state(|state| state.modified = paths);
    }

    pub fn set_diff(&self, path: impl Into<String>, diff: DiffSummary) {
        let path = path.into();
        self.with_state(|state| {
            state.diffs.insert(path, diff);
        });
    }

    pub fn clear_diff(&self, path: &str) {
        self.with_state(|state| {
            state.diffs.remove(path);
        });
    }

    /// Fail every version-control query, as a missing repository would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.with_state(|state| state.unavailable = unavailable);
    }

    fn check_available(state: &MemoryState) -> Result<()> {
        if state.unavailable {
            return Err(Error::CollaboratorUnavailable(
                "in-memory working tree marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl WorkingTree for MemoryWorkingTree {
    fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.with_state(|state| {
            if state.unreadable.iter().any(|p| p == path) {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{path} is unreadable"),
                )));
            }
            Ok(state.files.get(path).cloned())
        })
    }

    fn repository_meta(&self) -> Result<VersionMeta> {
        self.with_state(|state| {
            Self::check_available(state)?;
            Ok(state.default_meta.clone())
        })
    }

    fn version_meta(&self, path: &str) -> Result<VersionMeta> {
        self.with_state(|state| {
            Self::check_available(state)?;
            Ok(state
                .meta
                .get(path)
                .cloned()
                .unwrap_or_else(|| state.default_meta.clone()))
        })
    }

    fn modified_paths(&self) -> Result<Vec<ModifiedPath>> {
        self.with_state(|state| {
            Self::check_available(state)?;
            Ok(state.modified.clone())
        })
    }

    fn diff_summary(&self, path: &str) -> Result<Option<DiffSummary>> {
        self.with_state(|state| {
            Self::check_available(state)?;
            Ok(state.diffs.get(path).cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_tree_reports_written_files() {
        let tree = MemoryWorkingTree::new();
        tree.write("src/a.rs", "fn a() {}\n");

        let state = tree.file_state("src/a.rs", 16);
        assert!(state.exists);
        assert_eq!(state.content_hash.as_deref().map(str::len), Some(16));
        assert_eq!(state.size_bytes, 10);

        tree.remove("src/a.rs");
        assert_eq!(tree.file_state("src/a.rs", 16), FileState::absent());
    }

    #[test]
    fn unreadable_file_exists_without_hash() {
        let tree = MemoryWorkingTree::new();
        tree.mark_unreadable("secret.bin");

        let state = tree.file_state("secret.bin", 16);
        assert!(state.exists);
        assert!(state.content_hash.is_none());
    }

    #[test]
    fn plain_tree_reads_files_without_version_control() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join("notes.md"), "one\ntwo\n").unwrap();

        let tree = open_working_tree(temp.path(), "main").unwrap();
        let state = tree.file_state("notes.md", 16);
        assert!(state.exists);
        assert_eq!(state.line_count, 3);
        assert!(!tree.file_state("missing.md", 16).exists);
        assert!(matches!(
            tree.version_meta("notes.md"),
            Err(Error::CollaboratorUnavailable(_))
        ));
    }

    #[test]
    fn unavailable_tree_fails_queries() {
        let tree = MemoryWorkingTree::new();
        tree.set_modified(vec![ModifiedPath::new(PathStatus::Modified, "a.rs")]);
        assert_eq!(tree.modified_paths().unwrap().len(), 1);

        tree.set_unavailable(true);
        assert!(matches!(
            tree.modified_paths(),
            Err(Error::CollaboratorUnavailable(_))
        ));
        assert!(tree.version_meta("a.rs").is_err());
    }

    #[test]
    fn per_path_meta_overrides_default() {
        let tree = MemoryWorkingTree::new();
        tree.set_default_meta(VersionMeta {
            branch: Some("main".to_string()),
            ..VersionMeta::default()
        });
        tree.set_version_meta(
            "a.rs",
            VersionMeta {
                branch: Some("feature".to_string()),
                staged: true,
                ..VersionMeta::default()
            },
        );

        assert_eq!(tree.version_meta("a.rs").unwrap().branch.as_deref(), Some("feature"));
        assert_eq!(tree.version_meta("b.rs").unwrap().branch.as_deref(), Some("main"));
    }
}
