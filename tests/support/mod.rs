#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::Command;
use git2::{IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

use drift::config::Config;
use drift::storage::Storage;
use drift::store::EventStore;

/// Scratch project directory without version control.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        write_under(self.dir.path(), rel_path, contents)
    }

    pub fn write_config(&self, contents: &str) -> std::io::Result<PathBuf> {
        self.write_file(".drift.toml", contents)
    }

    pub fn storage(&self) -> Storage {
        let config = Config::load_from_root(self.path()).expect("config");
        Storage::new(self.path(), &config)
    }

    pub fn store(&self) -> Arc<EventStore> {
        let config = Config::load_from_root(self.path()).expect("config");
        let storage = Storage::new(self.path(), &config);
        Arc::new(EventStore::open(storage, &config.evolution).expect("store"))
    }

    pub fn drift(&self) -> Command {
        drift_in(self.path())
    }
}

/// Scratch git checkout.
pub struct TestRepo {
    dir: TempDir,
    repo: Repository,
}

impl TestRepo {
    pub fn init() -> Result<Self, git2::Error> {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let repo = Repository::init(dir.path())?;
        set_identity(&repo)?;
        Ok(Self { dir, repo })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
        write_under(self.dir.path(), rel_path, contents)
    }

    pub fn commit_all(&self, message: &str) -> Result<Oid, git2::Error> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("drift-test", "drift-test@example.com")?;

        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|head| head.target())
            .and_then(|oid| self.repo.find_commit(oid).ok());

        match parent {
            Some(parent) => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent]),
            None => self
                .repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[]),
        }
    }

    pub fn commit_file(
        &self,
        rel_path: &str,
        contents: &str,
        message: &str,
    ) -> Result<Oid, Box<dyn std::error::Error>> {
        self.write_file(rel_path, contents)?;
        Ok(self.commit_all(message)?)
    }

    pub fn head_branch(&self) -> String {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.shorthand().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn drift(&self) -> Command {
        drift_in(self.path())
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}

pub fn drift_in(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("drift").expect("binary");
    cmd.current_dir(root)
        .env_remove("DRIFT_ROOT")
        .env_remove("DRIFT_TASK")
        .env_remove("RUST_LOG");
    cmd
}

/// Parse the JSON envelope printed by a `--json` command.
pub fn json_output(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("valid JSON envelope")
}

fn write_under(root: &Path, rel_path: &str, contents: &str) -> std::io::Result<PathBuf> {
    let path = root.join(rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)?;
    Ok(path)
}

fn set_identity(repo: &Repository) -> Result<(), git2::Error> {
    let mut cfg = repo.config()?;
    cfg.set_str("user.name", "drift-test")?;
    cfg.set_str("user.email", "drift-test@example.com")?;
    Ok(())
}
