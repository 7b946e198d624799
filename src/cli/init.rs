//! drift init command implementation
//!
//! Creates the `.drift/` state layout and a default `.drift.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::STATE_DIR;

use super::Project;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitReport {
    root: PathBuf,
    created: Vec<&'static str>,
    gitignore_updated: bool,
}

pub fn run(root: Option<&Path>, output: OutputOptions) -> Result<()> {
    let project = Project::open(root)?;
    let storage = &project.storage;
    let root = storage.root().to_path_buf();

    let mut created = Vec::new();
    if !storage.is_initialized() {
        created.push(".drift/");
    }
    storage.init()?;

    let config_path = storage.config_file();
    if !existing_file(&config_path)? {
        Config::default().save(&config_path)?;
        created.push(".drift.toml");
    }

    // Only touch .gitignore inside a git checkout.
    let gitignore_updated = root.join(".git").exists() && ignore_state_dir(&root)?;

    let mut human = HumanOutput::new(if created.is_empty() && !gitignore_updated {
        "drift init: nothing to do"
    } else {
        "drift init: initialized project"
    });
    human.push_summary("root", root.display().to_string());
    if !created.is_empty() {
        human.push_summary("created", created.join(", "));
    }
    if gitignore_updated {
        human.push_summary("updated", ".gitignore");
    }
    human.push_next_step("drift task start <task-id>");
    human.push_next_step("drift track <path> --task <task-id>");

    let report = InitReport {
        root,
        created,
        gitignore_updated,
    };
    emit_success(output, "init", &report, Some(&human))
}

/// `Ok(true)` for a regular file, `Ok(false)` when absent.
fn existing_file(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(true),
        Ok(_) => Err(Error::OperationFailed(format!(
            "{} exists but is not a file",
            path.display()
        ))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Append `.drift/` to the project's `.gitignore` unless already listed.
fn ignore_state_dir(root: &Path) -> Result<bool> {
    let path = root.join(".gitignore");
    let mut contents = if existing_file(&path)? {
        fs::read_to_string(&path)?
    } else {
        String::new()
    };

    if lists_state_dir(&contents) {
        return Ok(false);
    }
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("{STATE_DIR}/\n"));
    fs::write(&path, contents)?;
    Ok(true)
}

fn lists_state_dir(contents: &str) -> bool {
    contents
        .lines()
        .map(|line| line.trim().trim_matches('/'))
        .any(|entry| entry == STATE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn recognizes_existing_ignore_entries() {
        assert!(lists_state_dir("target/\n.drift/\n"));
        assert!(lists_state_dir("/.drift"));
        assert!(!lists_state_dir("# .drift\n.drifter\n"));
    }

    #[test]
    fn gitignore_entry_is_appended_once() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".gitignore"), "target/").unwrap();

        assert!(ignore_state_dir(temp.path()).unwrap());
        assert!(!ignore_state_dir(temp.path()).unwrap());
        assert_eq!(
            fs::read_to_string(temp.path().join(".gitignore")).unwrap(),
            "target/\n.drift/\n"
        );
    }

    #[test]
    fn directory_in_place_of_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".drift.toml");
        fs::create_dir(&path).unwrap();
        assert!(existing_file(&path).is_err());
        assert!(!existing_file(&temp.path().join("missing")).unwrap());
    }
}
