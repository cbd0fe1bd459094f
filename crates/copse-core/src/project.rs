//! Project discovery and worktree enumeration
//!
//! A copse project is a directory holding a .copse/ marker, a main/ or
//! master/ default worktree, and sibling directories that are each a git
//! worktree of the same repository.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::CopseError;

/// A copse-enabled repository discovered on disk.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub config: Config,
    pub default_worktree: String,
    pub default_worktree_path: PathBuf,
}

/// A git worktree living directly under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub name: String,
    pub path: PathBuf,
}

impl Project {
    /// Walk upward from `start` until a .copse directory is found.
    pub fn discover(start: &Path) -> Result<Project, CopseError> {
        let root = locate_root(start)?;
        Project::load(&root)
    }

    /// Construct a Project from a known root directory.
    pub fn load(root: &Path) -> Result<Project, CopseError> {
        let (default_name, default_path) = resolve_default_worktree(root)?;
        let config_path = root.join(".copse").join("config.toml");
        let config = Config::load(&config_path)?;
        Ok(Project {
            root: root.to_path_buf(),
            config_path,
            config,
            default_worktree: default_name,
            default_worktree_path: default_path,
        })
    }
}

fn locate_root(start: &Path) -> Result<PathBuf, CopseError> {
    let mut cur = std::path::absolute(start)?;
    loop {
        if cur.join(".copse").is_dir() {
            return Ok(cur);
        }
        if !cur.pop() {
            return Err(CopseError::ProjectNotFound);
        }
    }
}

/// Report which default worktree directory (main/master) exists under root.
pub fn resolve_default_worktree(root: &Path) -> Result<(String, PathBuf), CopseError> {
    let main_path = root.join("main");
    let master_path = root.join("master");

    let main_ok = is_worktree(&main_path);
    let master_ok = is_worktree(&master_path);

    match (main_ok, master_ok) {
        (true, true) => Err(CopseError::DefaultWorktreeConflict),
        (false, false) => Err(CopseError::DefaultWorktreeMissing),
        (true, false) => Ok(("main".to_string(), main_path)),
        (false, true) => Ok(("master".to_string(), master_path)),
    }
}

fn is_worktree(path: &Path) -> bool {
    path.is_dir() && path.join(".git").exists()
}

/// Enumerate all git worktrees immediately under the root, sorted by name.
pub fn list_worktrees(root: &Path) -> Result<Vec<Worktree>, CopseError> {
    let mut result = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == ".copse" {
            continue;
        }
        let path = root.join(&name);
        if !is_worktree(&path) {
            continue;
        }
        result.push(Worktree { name, path });
    }
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

/// Ensure a baseline config file exists, writing one when missing.
pub fn ensure_config(root: &Path, default_branch: &str) -> Result<Config, CopseError> {
    std::fs::create_dir_all(root.join(".copse"))?;
    let path = root.join(".copse").join("config.toml");
    if !path.exists() {
        let cfg = Config::default_for(default_branch);
        Config::save(&path, &cfg)?;
        return Ok(cfg);
    }
    Config::load(&path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark_worktree(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        // A .git file (as in linked worktrees) counts the same as a directory.
        std::fs::write(path.join(".git"), "gitdir: elsewhere\n").unwrap();
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".copse")).unwrap();
        mark_worktree(&dir.path().join("main"));
        let nested = dir.path().join("main").join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let proj = Project::discover(&nested).unwrap();
        assert_eq!(proj.root, std::path::absolute(dir.path()).unwrap());
        assert_eq!(proj.default_worktree, "main");
    }

    #[test]
    fn test_discover_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Project::discover(dir.path()),
            Err(CopseError::ProjectNotFound)
        ));
    }

    #[test]
    fn test_default_worktree_conflict() {
        let dir = tempfile::tempdir().unwrap();
        mark_worktree(&dir.path().join("main"));
        mark_worktree(&dir.path().join("master"));
        assert!(matches!(
            resolve_default_worktree(dir.path()),
            Err(CopseError::DefaultWorktreeConflict)
        ));
    }

    #[test]
    fn test_list_worktrees_skips_non_worktrees() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".copse")).unwrap();
        mark_worktree(&dir.path().join("main"));
        mark_worktree(&dir.path().join("feature-x"));
        std::fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let wts = list_worktrees(dir.path()).unwrap();
        let names: Vec<_> = wts.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["feature-x", "main"]);
    }

    #[test]
    fn test_ensure_config_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ensure_config(dir.path(), "master").unwrap();
        assert_eq!(cfg.default_branch, "master");
        // Second call loads rather than overwrites.
        let again = ensure_config(dir.path(), "main").unwrap();
        assert_eq!(again.default_branch, "master");
    }
}
