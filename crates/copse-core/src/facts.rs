//! Per-worktree fact gathering
//!
//! One synchronous pass over a worktree collecting everything the
//! classification engine needs. Commands pick an option set: the dashboard
//! skips the expensive merge/tree/remote checks, the mutating commands take
//! all of them.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::CopseError;
use crate::git::{self, Operation};
use crate::project::{Project, Worktree};

/// Immutable git-side facts for one worktree, gathered in a single pass.
#[derive(Debug, Clone)]
pub struct WorktreeFacts {
    pub worktree: Worktree,
    /// Checked-out branch; empty for detached HEAD
    pub branch: String,
    pub head_hash: String,
    pub dirty: bool,
    pub has_stash: bool,
    pub operation: Option<Operation>,
    /// Commits ahead/behind the branch's upstream
    pub ahead: i64,
    pub behind: i64,
    /// Commits ahead/behind the comparison ref
    pub base_ahead: i64,
    pub base_behind: i64,
    /// Commits whose patches are absent from the comparison ref
    pub unique_commits: i64,
    pub merged_into_default: bool,
    pub tree_matches_default: bool,
    pub has_remote_branch: bool,
    pub remote_matches_head: bool,
    /// HEAD commit time, or the newest dirty-file mtime when dirty
    pub last_activity: Option<DateTime<Utc>>,
}

impl WorktreeFacts {
    fn empty(worktree: Worktree) -> WorktreeFacts {
        WorktreeFacts {
            worktree,
            branch: String::new(),
            head_hash: String::new(),
            dirty: false,
            has_stash: false,
            operation: None,
            ahead: 0,
            behind: 0,
            base_ahead: 0,
            base_behind: 0,
            unique_commits: 0,
            merged_into_default: false,
            tree_matches_default: false,
            has_remote_branch: false,
            remote_matches_head: false,
            last_activity: None,
        }
    }

    /// Uncommitted, stashed, or unmerged work that deletion would lose.
    pub fn has_pending_work(&self) -> bool {
        self.dirty || self.has_stash || self.unique_commits > 0
    }
}

/// Which optional facts to collect.
#[derive(Debug, Clone, Default)]
pub struct GatherOptions {
    pub include_unique_commits: bool,
    pub include_merge_state: bool,
    pub include_tree_match: bool,
    pub include_remote_info: bool,
    /// Pre-scanned set of branches with stash entries, to avoid re-running
    /// `git stash list` once per worktree
    pub stash_branches: Option<HashSet<String>>,
}

impl GatherOptions {
    /// What the status dashboard needs.
    pub fn for_status() -> GatherOptions {
        GatherOptions {
            include_unique_commits: true,
            ..GatherOptions::default()
        }
    }

    /// Everything, for the mutating commands.
    pub fn full() -> GatherOptions {
        GatherOptions {
            include_unique_commits: true,
            include_merge_state: true,
            include_tree_match: true,
            include_remote_info: true,
            stash_branches: None,
        }
    }
}

/// Gather facts for one worktree against the given comparison ref.
pub fn gather(
    proj: &Project,
    wt: &Worktree,
    compare_ref: &str,
    opts: &GatherOptions,
) -> Result<WorktreeFacts, CopseError> {
    let mut facts = WorktreeFacts::empty(wt.clone());

    let status = git::status(&wt.path)?;
    facts.branch = status.head;
    facts.head_hash = status.head_oid;
    facts.dirty = status.has_changes;
    facts.ahead = status.ahead;
    facts.behind = status.behind;

    if !facts.branch.is_empty() {
        facts.has_stash = match &opts.stash_branches {
            Some(branches) => branches.contains(&facts.branch),
            None => git::has_branch_stash(&wt.path, &facts.branch)?,
        };
    }

    // A failed operation probe is not fatal; the badge just goes missing.
    facts.operation = git::worktree_operation(&wt.path).unwrap_or(None);

    let mut ts = git::head_timestamp(&wt.path)?;
    if facts.dirty {
        if let Some(dirty_ts) = latest_mtime(&wt.path, &status.paths) {
            ts = dirty_ts;
        }
    }
    facts.last_activity = Some(ts);

    let (base_ahead, base_behind) =
        git::ahead_behind_default_branch(&wt.path, &proj.config.default_branch)?;
    facts.base_ahead = base_ahead;
    facts.base_behind = base_behind;

    let compare_ref = if compare_ref.is_empty() {
        &proj.config.default_branch
    } else {
        compare_ref
    };

    if opts.include_merge_state {
        facts.merged_into_default = git::head_merged_into(&wt.path, compare_ref)?;
    }
    if opts.include_tree_match {
        facts.tree_matches_default = git::head_same_tree(&wt.path, compare_ref)?;
    }
    if opts.include_unique_commits {
        facts.unique_commits = git::unique_commits_compared_to(&wt.path, compare_ref)?;
    }
    if opts.include_remote_info && !facts.branch.is_empty() {
        let remote_head =
            git::remote_branch_head(&proj.default_worktree_path, "origin", &facts.branch)?;
        facts.has_remote_branch = remote_head.is_some();
        if let Some(hash) = remote_head {
            facts.remote_matches_head = hash == facts.head_hash;
        }
    }

    Ok(facts)
}

/// Newest modification time among the given paths relative to `dir`.
fn latest_mtime(dir: &Path, paths: &[String]) -> Option<DateTime<Utc>> {
    let mut newest: Option<DateTime<Utc>> = None;
    for path in paths {
        if path.is_empty() {
            continue;
        }
        let Ok(meta) = std::fs::metadata(dir.join(path)) else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        let ts: DateTime<Utc> = modified.into();
        if newest.is_none_or(|cur| ts > cur) {
            newest = Some(ts);
        }
    }
    newest
}

/// Recognize the characteristic "not a git repository ... .git/worktrees/"
/// failure left behind by a half-deleted worktree, and suggest the fix.
pub fn friendly_worktree_git_error(worktree_name: &str, err: &CopseError) -> Option<String> {
    let msg = crate::error::single_line(err);
    if !msg.to_lowercase().contains("not a git repository") {
        return None;
    }
    if !msg.contains(".git/worktrees/") {
        return None;
    }
    let missing = msg
        .split_whitespace()
        .find(|field| field.contains(".git/worktrees/"))
        .map(|field| field.trim_matches(':').to_string());
    let detail = missing
        .map(|path| format!(" (missing {})", path))
        .unwrap_or_default();
    Some(format!(
        "broken git metadata for {}{}; run `git worktree prune` in your main worktree or delete the directory",
        worktree_name, detail
    ))
}
