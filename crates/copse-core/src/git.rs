//! Git plumbing for the fact provider
//!
//! Thin wrappers over the git CLI. Every function takes the worktree (or
//! repository) directory explicitly; nothing here touches process-global
//! state. Output parsing is split into pure helpers so it can be tested
//! without a repository.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};

use crate::error::CopseError;

/// Execute git within `dir` and return trimmed stdout.
pub fn run(dir: &Path, args: &[&str]) -> Result<String, CopseError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| CopseError::Git {
            command: args.join(" "),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CopseError::Git {
            command: args.join(" "),
            message: stderr.trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run git expecting success or exit code 1, mapping them to true/false.
/// Used for boolean plumbing commands (merge-base --is-ancestor, diff --quiet).
fn run_boolean(dir: &Path, args: &[&str]) -> Result<bool, CopseError> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|e| CopseError::Git {
            command: args.join(" "),
            message: e.to_string(),
        })?;
    if output.status.success() {
        return Ok(true);
    }
    if output.status.code() == Some(1) {
        return Ok(false);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(CopseError::Git {
        command: args.join(" "),
        message: stderr.trim().to_string(),
    })
}

/// Summary of `git status --porcelain=2 --branch` for one worktree.
#[derive(Debug, Clone, Default)]
pub struct StatusSummary {
    /// Checked-out branch name; empty for a detached HEAD
    pub head: String,
    /// HEAD commit hash; empty in an unborn branch
    pub head_oid: String,
    /// Any staged or unstaged changes (untracked included)
    pub has_changes: bool,
    /// Commits ahead of upstream, when an upstream is configured
    pub ahead: i64,
    /// Commits behind upstream
    pub behind: i64,
    /// Paths mentioned by status entries, for mtime-based recency
    pub paths: Vec<String>,
}

/// Gather branch/dirty/ahead-behind facts in a single git invocation.
pub fn status(dir: &Path) -> Result<StatusSummary, CopseError> {
    let out = run(dir, &["status", "--porcelain=2", "--branch"])?;
    Ok(parse_status_porcelain(&out))
}

fn parse_status_porcelain(out: &str) -> StatusSummary {
    let mut summary = StatusSummary::default();
    for line in out.lines() {
        if let Some(rest) = line.strip_prefix("# branch.head ") {
            let head = rest.trim();
            summary.head = if head == "(detached)" {
                String::new()
            } else {
                head.to_string()
            };
        } else if let Some(rest) = line.strip_prefix("# branch.oid ") {
            let oid = rest.trim();
            summary.head_oid = if oid == "(initial)" {
                String::new()
            } else {
                oid.to_string()
            };
        } else if let Some(rest) = line.strip_prefix("# branch.ab ") {
            let mut fields = rest.split_whitespace();
            if let (Some(plus), Some(minus)) = (fields.next(), fields.next()) {
                summary.ahead = plus.trim_start_matches('+').parse().unwrap_or(0);
                summary.behind = minus.trim_start_matches('-').parse().unwrap_or(0);
            }
        } else if !line.starts_with('#') && !line.is_empty() {
            summary.has_changes = true;
            if let Some(path) = status_entry_path(line) {
                summary.paths.push(path.to_string());
            }
        }
    }
    summary
}

/// Extract the pathname from one porcelain-v2 status entry.
fn status_entry_path(line: &str) -> Option<&str> {
    let mut fields = line.split(' ');
    match fields.next()? {
        // 1 XY sub mH mI mW hH hI path
        "1" => line.split(' ').nth(8),
        // 2 XY sub mH mI mW hH hI Xscore path<sep>origPath
        "2" => line.split(' ').nth(9).map(|p| p.split('\t').next().unwrap_or(p)),
        // ? path / ! path
        "?" | "!" => line.split_once(' ').map(|(_, p)| p),
        // u XY sub m1 m2 m3 mW h1 h2 h3 path
        "u" => line.split(' ').nth(10),
        _ => None,
    }
}

/// Whether any stash entries mention the given branch.
pub fn has_branch_stash(dir: &Path, branch: &str) -> Result<bool, CopseError> {
    let out = run(dir, &["stash", "list"])?;
    if out.trim().is_empty() || branch.is_empty() {
        return Ok(false);
    }
    let pattern = format!("on {}:", branch);
    Ok(out.lines().any(|line| line.contains(&pattern)))
}

/// High-level git operation in progress inside a worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Rebasing,
    Merging,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Rebasing => "rebasing",
            Operation::Merging => "merging",
        }
    }
}

/// Inspect git metadata to determine whether a rebase or merge is underway.
pub fn worktree_operation(dir: &Path) -> Result<Option<Operation>, CopseError> {
    let git_dir = run(dir, &["rev-parse", "--git-dir"])?;
    let git_dir = if Path::new(&git_dir).is_absolute() {
        std::path::PathBuf::from(git_dir)
    } else {
        dir.join(git_dir)
    };
    if git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists() {
        return Ok(Some(Operation::Rebasing));
    }
    if git_dir.join("MERGE_HEAD").exists() {
        return Ok(Some(Operation::Merging));
    }
    Ok(None)
}

/// Timestamp of the HEAD commit.
pub fn head_timestamp(dir: &Path) -> Result<DateTime<Utc>, CopseError> {
    let out = run(dir, &["log", "-1", "--format=%cI", "HEAD"])?;
    DateTime::parse_from_rfc3339(out.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| CopseError::GitParse {
            command: "log -1 --format=%cI HEAD".to_string(),
            output: out,
        })
}

/// Whether HEAD is already an ancestor of the given ref.
pub fn head_merged_into(dir: &Path, reference: &str) -> Result<bool, CopseError> {
    if reference.is_empty() {
        return Ok(false);
    }
    run_boolean(dir, &["merge-base", "--is-ancestor", "HEAD", reference])
}

/// Whether HEAD has the same tree as the given ref.
/// Catches squash- and rebase-merged branches that left no ancestry trail.
pub fn head_same_tree(dir: &Path, reference: &str) -> Result<bool, CopseError> {
    if reference.is_empty() {
        return Ok(false);
    }
    run_boolean(dir, &["diff", "--quiet", "HEAD", reference, "--"])
}

/// Count commits reachable from HEAD whose patches are not present on the
/// given ref (git-cherry patch-id comparison, so cherry-picks count as
/// already merged).
pub fn unique_commits_compared_to(dir: &Path, reference: &str) -> Result<i64, CopseError> {
    if reference.is_empty() {
        return Ok(0);
    }
    let out = run(dir, &["cherry", reference, "HEAD"])?;
    Ok(count_cherry_unmerged(&out))
}

fn count_cherry_unmerged(out: &str) -> i64 {
    out.lines()
        .filter(|line| line.trim_start().starts_with('+'))
        .count() as i64
}

/// Whether the fully-qualified ref exists.
pub fn ref_exists(dir: &Path, reference: &str) -> bool {
    Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["show-ref", "--verify", "--quiet", reference])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Count commits on each side of `ref...HEAD`.
pub fn ahead_behind_against_ref(dir: &Path, reference: &str) -> Result<(i64, i64), CopseError> {
    let range = format!("{}...HEAD", reference);
    let out = run(dir, &["rev-list", "--left-right", "--count", &range])?;
    parse_left_right(&out).ok_or_else(|| CopseError::GitParse {
        command: format!("rev-list --left-right --count {}", range),
        output: out,
    })
}

fn parse_left_right(out: &str) -> Option<(i64, i64)> {
    let mut fields = out.split_whitespace();
    let behind: i64 = fields.next()?.parse().ok()?;
    let ahead: i64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((ahead, behind))
}

/// Compare HEAD to the remote-tracking default branch. Missing remote ref
/// yields zeros rather than an error.
pub fn ahead_behind_default_branch(
    dir: &Path,
    default_branch: &str,
) -> Result<(i64, i64), CopseError> {
    if default_branch.is_empty() {
        return Ok((0, 0));
    }
    let full_ref = format!("refs/remotes/origin/{}", default_branch);
    if !ref_exists(dir, &full_ref) {
        return Ok((0, 0));
    }
    ahead_behind_against_ref(dir, &format!("origin/{}", default_branch))
}

/// Current commit for remote/branch, when the remote-tracking ref exists.
pub fn remote_branch_head(
    dir: &Path,
    remote: &str,
    branch: &str,
) -> Result<Option<String>, CopseError> {
    if remote.is_empty() || branch.is_empty() {
        return Ok(None);
    }
    let full_ref = format!("refs/remotes/{}/{}", remote, branch);
    if !ref_exists(dir, &full_ref) {
        return Ok(None);
    }
    let out = run(dir, &["rev-parse", &full_ref])?;
    Ok(Some(out))
}

/// Which side of the default branch acts as the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    LocalFirst,
    RemoteFirst,
}

/// Select the ref that should act as the "default branch" for safety checks.
///
/// Policy:
/// - missing remote-tracking default branch: local-first
/// - local default branch ahead of the remote-tracking one: local-first
/// - otherwise remote-first (`<remote>/<branch>`)
pub fn comparison_ref(
    dir: &Path,
    remote: &str,
    default_branch: &str,
) -> Result<(String, SyncMode), CopseError> {
    let default_branch = default_branch.trim();
    if default_branch.is_empty() {
        return Ok((String::new(), SyncMode::LocalFirst));
    }
    let remote = if remote.trim().is_empty() {
        "origin"
    } else {
        remote.trim()
    };

    let remote_full = format!("refs/remotes/{}/{}", remote, default_branch);
    if !ref_exists(dir, &remote_full) {
        return Ok((default_branch.to_string(), SyncMode::LocalFirst));
    }
    let local_full = format!("refs/heads/{}", default_branch);
    let remote_ref = format!("{}/{}", remote, default_branch);
    if !ref_exists(dir, &local_full) {
        return Ok((remote_ref, SyncMode::RemoteFirst));
    }

    let range = format!("{}...{}", remote_ref, default_branch);
    let out = match run(dir, &["rev-list", "--left-right", "--count", &range]) {
        Ok(out) => out,
        // When the relationship cannot be determined, prefer the remote-first
        // view so unpushed work is never treated as integrated by accident.
        Err(_) => return Ok((remote_ref, SyncMode::RemoteFirst)),
    };
    let (local_ahead, _) = parse_left_right(&out).ok_or_else(|| CopseError::GitParse {
        command: format!("rev-list --left-right --count {}", range),
        output: out,
    })?;
    if local_ahead > 0 {
        Ok((default_branch.to_string(), SyncMode::LocalFirst))
    } else {
        Ok((remote_ref, SyncMode::RemoteFirst))
    }
}

/// Configured URL for the given remote name.
pub fn remote_url(dir: &Path, remote: &str) -> Result<String, CopseError> {
    let remote = if remote.trim().is_empty() {
        "origin"
    } else {
        remote
    };
    run(dir, &["remote", "get-url", remote])
}

/// Extract owner/repo from a GitHub remote URL (ssh, https, or scp-like).
pub fn parse_github_remote(raw: &str) -> Result<(String, String), CopseError> {
    let trimmed = raw.trim().trim_end_matches(".git");
    if trimmed.is_empty() {
        return Err(parse_remote_err(raw, "empty remote URL"));
    }

    let (host, path) = if let Some(rest) = trimmed.strip_prefix("git@") {
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| parse_remote_err(raw, "invalid ssh remote"))?;
        (host.to_string(), path.to_string())
    } else if let Some(rest) = trimmed.strip_prefix("ssh://") {
        split_host_path(rest).ok_or_else(|| parse_remote_err(raw, "invalid ssh remote"))?
    } else if let Some(rest) = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
    {
        split_host_path(rest).ok_or_else(|| parse_remote_err(raw, "invalid http remote"))?
    } else if let Some((host, path)) = trimmed.split_once(':') {
        (host.to_string(), path.to_string())
    } else {
        return Err(parse_remote_err(raw, "unsupported remote URL"));
    };

    // Drop any user@ prefix left on the host portion.
    let host = host.rsplit('@').next().unwrap_or(&host);
    if !host.eq_ignore_ascii_case("github.com") {
        return Err(parse_remote_err(raw, "remote host is not github.com"));
    }

    let mut segments = path.trim_start_matches('/').split('/');
    let owner = segments.next().unwrap_or("");
    let repo = segments.next().unwrap_or("");
    if owner.is_empty() || repo.is_empty() {
        return Err(parse_remote_err(raw, "invalid GitHub remote path"));
    }
    Ok((owner.to_string(), repo.to_string()))
}

fn split_host_path(rest: &str) -> Option<(String, String)> {
    let (host, path) = rest.split_once('/')?;
    // Strip a :port suffix if present.
    let host = host.split(':').next()?;
    Some((host.to_string(), path.to_string()))
}

fn parse_remote_err(raw: &str, message: &str) -> CopseError {
    CopseError::Git {
        command: "remote get-url".to_string(),
        message: format!("{}: {}", message, raw),
    }
}
