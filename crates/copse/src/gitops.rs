//! Git mutations used by the cleanup commands
//!
//! Worktree removal, branch deletion, and remote pruning. Everything runs
//! from the default worktree so deleting a worktree never saws off the
//! branch it is standing on.

use std::io::Write;
use std::path::Path;

use copse_core::error::single_line;
use copse_core::git;
use copse_core::processes::{canonicalize_path, is_within};
use copse_core::project::Project;

/// Log sink for cleanup steps; None while the live renderer owns stdout.
pub type LogSink<'a> = Option<&'a mut dyn Write>;

fn log_line(log: &mut LogSink<'_>, line: &str) {
    if let Some(out) = log.as_deref_mut() {
        let _ = writeln!(out, "{}", line);
    }
}

/// Remove a worktree, resetting write permissions first so read-only build
/// output does not wedge the deletion.
pub fn git_worktree_remove(
    repo_dir: &Path,
    path: &Path,
    log: &mut LogSink<'_>,
) -> Result<(), String> {
    make_tree_writable(path).map_err(|e| format!("reset permissions: {}", e))?;
    let path_str = path.to_string_lossy();
    git::run(repo_dir, &["worktree", "remove", "--force", &path_str])
        .map_err(|e| single_line(&e))?;
    log_line(log, &format!("  removed worktree {}", path.display()));
    Ok(())
}

pub fn git_delete_local_branch(
    repo_dir: &Path,
    branch: &str,
    log: &mut LogSink<'_>,
) -> Result<(), String> {
    git::run(repo_dir, &["branch", "-D", branch]).map_err(|e| single_line(&e))?;
    log_line(log, &format!("  deleted local branch {}", branch));
    Ok(())
}

/// Delete the remote branch, tolerating one already deleted out from under
/// us (a merged PR usually deletes its head branch).
pub fn git_delete_remote_branch(
    repo_dir: &Path,
    branch: &str,
    log: &mut LogSink<'_>,
) -> Result<(), String> {
    match git::run(repo_dir, &["push", "origin", "--delete", branch]) {
        Ok(_) => {
            log_line(log, &format!("  deleted remote branch origin/{}", branch));
            Ok(())
        }
        Err(err) => match remote_branch_missing(repo_dir, "origin", branch) {
            Ok(true) => {
                log_line(
                    log,
                    &format!("  remote branch origin/{} already deleted", branch),
                );
                Ok(())
            }
            _ => Err(single_line(&err)),
        },
    }
}

fn remote_branch_missing(repo_dir: &Path, remote: &str, branch: &str) -> Result<bool, String> {
    if remote.is_empty() || branch.is_empty() {
        return Ok(false);
    }
    let out = git::run(repo_dir, &["ls-remote", "--heads", remote, branch])
        .map_err(|e| single_line(&e))?;
    Ok(out.trim().is_empty())
}

pub fn prune_remote(repo_dir: &Path, log: &mut LogSink<'_>) -> Result<(), String> {
    git::run(repo_dir, &["remote", "prune", "origin"]).map_err(|e| single_line(&e))?;
    log_line(log, "Pruned remote origin");
    Ok(())
}

/// Give the whole tree owner-write permission so removal cannot fail on
/// read-only artifacts.
pub fn make_tree_writable(root: &Path) -> std::io::Result<()> {
    if !root.exists() {
        return Ok(());
    }
    visit_tree(root)
}

fn visit_tree(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = meta.permissions().mode();
        if mode & 0o200 == 0 {
            let mut perms = meta.permissions();
            perms.set_mode(mode | 0o200);
            std::fs::set_permissions(path, perms)?;
        }
    }
    if meta.is_dir() {
        for entry in std::fs::read_dir(path)? {
            visit_tree(&entry?.path())?;
        }
    }
    Ok(())
}

/// Last-resort removal for --force when `git worktree remove` refuses.
/// Refuses anything that is not an immediate child of the project root,
/// the default worktree, or a root without the project marker.
pub fn rm_rf_worktree(proj: &Project, worktree_path: &Path) -> Result<(), String> {
    let root = canonicalize_path(&proj.root);
    let wt = canonicalize_path(worktree_path);

    if !root.join(".copse").exists() {
        return Err(format!(
            "rm -rf refused: missing .copse directory at {}",
            root.display()
        ));
    }
    if !is_within(&wt, &root) {
        return Err(format!(
            "rm -rf refused: {} is outside project root {}",
            wt.display(),
            root.display()
        ));
    }
    if wt.parent() != Some(root.as_path()) {
        return Err(format!(
            "rm -rf refused: {} is not an immediate child of project root {}",
            wt.display(),
            root.display()
        ));
    }
    if wt == canonicalize_path(&proj.default_worktree_path) {
        return Err(format!(
            "rm -rf refused: {} is the default worktree",
            wt.display()
        ));
    }
    if wt.file_name().is_some_and(|name| name == ".copse") {
        return Err("rm -rf refused: target is .copse".to_string());
    }

    make_tree_writable(&wt).map_err(|e| format!("reset permissions: {}", e))?;
    std::fs::remove_dir_all(&wt).map_err(|e| format!("rm -rf failed for {}: {}", wt.display(), e))
}
