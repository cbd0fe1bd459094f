//! Candidate collection and row projection
//!
//! Builds the per-run `CandidateState` collection from a synchronous git
//! facts pass, accumulating every applicable block reason up front, and
//! projects candidates into renderer rows after each update.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use copse_core::candidate::{CandidateState, Classification, Stage};
use copse_core::error::single_line;
use copse_core::facts::{self, GatherOptions};
use copse_core::pr::{self, WorkflowExpectations};
use copse_core::processes::{canonicalize_path, detect_worktree_processes, is_within};
use copse_core::project::{Project, Worktree, list_worktrees};
use copse_core::{CopseError, git};

use crate::pipeline::PR_PENDING_LABEL;
use crate::render::RowState;

pub const BLOCK_REASON_CURRENT: &str = "currently inside this worktree";

/// The comparison ref for safety checks plus the workflow mode it implies.
#[derive(Debug, Clone)]
pub struct CompareContext {
    pub reference: String,
    pub workflow: WorkflowExpectations,
}

/// Decide which ref "merged" is measured against, and whether this
/// repository's workflow expects PRs (remote-first) or not (local-first).
pub fn comparison_context(proj: &Project) -> CompareContext {
    match git::comparison_ref(
        &proj.default_worktree_path,
        proj.config.ci.remote_name(),
        &proj.config.default_branch,
    ) {
        Ok((reference, mode)) => CompareContext {
            reference,
            workflow: WorkflowExpectations {
                prs_expected: mode == git::SyncMode::RemoteFirst,
            },
        },
        Err(_) => CompareContext {
            reference: proj.config.default_branch.clone(),
            workflow: WorkflowExpectations::default(),
        },
    }
}

/// Gather every non-default worktree into a candidate, block reasons
/// accumulated. Unreadable git state becomes a blocked candidate rather
/// than an abort, so one broken worktree never hides the others.
pub fn collect_candidates(
    proj: &Project,
    compare: &CompareContext,
    wd: &Path,
    now: DateTime<Utc>,
) -> Result<Vec<CandidateState>, CopseError> {
    let worktrees = list_worktrees(&proj.root)?;
    let mut candidates = Vec::with_capacity(worktrees.len());
    let mut branch_usage: HashMap<String, Vec<String>> = HashMap::new();

    for wt in &worktrees {
        if wt.name == proj.default_worktree {
            continue;
        }
        let cand = inspect_worktree(proj, wt, compare, wd, now);
        if !cand.facts.branch.is_empty() && cand.facts.branch != "(unknown)" {
            branch_usage
                .entry(cand.facts.branch.clone())
                .or_default()
                .push(wt.name.clone());
        }
        candidates.push(cand);
    }

    for cand in &mut candidates {
        let mut others: Vec<String> = branch_usage
            .get(&cand.facts.branch)
            .map(|names| {
                names
                    .iter()
                    .filter(|name| *name != cand.name())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        others.sort();
        if !others.is_empty() {
            cand.block_reasons
                .push(format!("branch also used by {}", others.join(", ")));
            cand.shared_with = others;
        }
        if !cand.block_reasons.is_empty() && !cand.stage.is_mutating() {
            cand.stage = Stage::Blocked;
        }
    }

    Ok(candidates)
}

fn inspect_worktree(
    proj: &Project,
    wt: &Worktree,
    compare: &CompareContext,
    wd: &Path,
    now: DateTime<Utc>,
) -> CandidateState {
    let compare_label = proj.config.default_branch.clone();
    match facts::gather(proj, wt, &compare.reference, &GatherOptions::full()) {
        Ok(facts) => {
            let mut cand = CandidateState::new(facts, compare_label);
            if cand.facts.branch.is_empty() {
                cand.block_reasons.push("detached HEAD".to_string());
            }
            if cand.facts.branch == proj.config.default_branch {
                cand.block_reasons.push(format!(
                    "branch is the default ({})",
                    proj.config.default_branch
                ));
            }
            cand.is_current = is_within(&canonicalize_path(wd), &canonicalize_path(&wt.path));
            if cand.is_current {
                cand.block_reasons.push(BLOCK_REASON_CURRENT.to_string());
            }
            if cand.facts.dirty {
                cand.block_reasons
                    .push("worktree has uncommitted changes".to_string());
            }
            if cand.facts.has_stash {
                cand.block_reasons
                    .push("stash entries reference this branch".to_string());
            }
            if !cand.block_reasons.is_empty() {
                cand.stage = Stage::Blocked;
            }
            cand
        }
        Err(err) => {
            let mut facts = facts::WorktreeFacts {
                worktree: wt.clone(),
                branch: "(unknown)".to_string(),
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
            };
            facts.last_activity = Some(now);
            let mut cand = CandidateState::new(facts, compare_label);
            let msg = facts::friendly_worktree_git_error(&wt.name, &err)
                .unwrap_or_else(|| format!("git error: {}", single_line(&err)));
            cand.block_reasons.push(msg);
            cand.stage = Stage::Blocked;
            cand
        }
    }
}

/// Scan once and record each candidate's blocking processes. Unsupported
/// platforms leave every candidate untouched (the signal simply vanishes).
pub fn attach_processes(candidates: &mut [CandidateState]) -> Result<(), CopseError> {
    let worktrees: Vec<Worktree> = candidates
        .iter()
        .map(|c| c.facts.worktree.clone())
        .collect();
    let scan = detect_worktree_processes(&worktrees)?;
    if !scan.supported {
        return Ok(());
    }
    for cand in candidates {
        let key = canonicalize_path(&cand.facts.worktree.path);
        let procs = scan.by_root.get(&key).cloned().unwrap_or_default();
        cand.set_processes(procs);
    }
    Ok(())
}

/// Stable display order: most recent activity first, name as tiebreak.
pub fn sort_for_display(candidates: &mut [CandidateState]) {
    candidates.sort_by(|a, b| {
        b.facts
            .last_activity
            .cmp(&a.facts.last_activity)
            .then_with(|| a.name().cmp(b.name()))
    });
}

/// Build the initial renderer row for a candidate.
pub fn candidate_row(cand: &CandidateState) -> RowState {
    let mut row = RowState {
        name: cand.name().to_string(),
        path: cand.facts.worktree.path.clone(),
        branch: cand.facts.branch.clone(),
        pr_label: PR_PENDING_LABEL.to_string(),
        ..RowState::default()
    };
    populate_row(cand, &mut row);
    row
}

/// Refresh a row from its candidate after an update.
pub fn populate_row(cand: &CandidateState, row: &mut RowState) {
    row.name = cand.name().to_string();
    row.branch = cand.facts.branch.clone();
    row.dirty = cand.facts.dirty;
    row.current = cand.is_current;
    row.operation = cand.facts.operation;
    row.ahead = cand.facts.base_ahead;
    row.behind = cand.facts.base_behind;
    row.timestamp = cand.facts.last_activity;
    row.action_label = Some(action_label(cand));
    row.processes = cand.processes.clone();
    row.needs_input = cand.stage == Stage::AwaitingInput;
    row.process_warn =
        !cand.processes.is_empty() && cand.classification != Classification::Safe;
    row.has_error = matches!(cand.stage, Stage::Blocked | Stage::Error);
}

/// The action shown in a mutating command's detail column.
pub fn action_label(cand: &CandidateState) -> String {
    match cand.stage {
        Stage::Ready => "will clean".to_string(),
        Stage::AwaitingInput => cand
            .gray_reasons
            .first()
            .cloned()
            .unwrap_or_else(|| "awaiting review".to_string()),
        Stage::Cleaning => "cleaning".to_string(),
        Stage::Cleaned => "cleaned".to_string(),
        Stage::Skipped => "skipped".to_string(),
        Stage::Blocked => match cand.block_reasons.first() {
            Some(reason) => format!("blocked: {}", reason),
            None => "blocked".to_string(),
        },
        Stage::Error => "error".to_string(),
        Stage::Scanning => "scanning".to_string(),
    }
}

/// PR line for the confirmation panel: only active PRs, and only when the
/// worktree actually holds work worth weighing.
pub fn describe_pr_summary(cand: &CandidateState) -> String {
    if cand.facts.unique_commits == 0 && !cand.facts.dirty && !cand.facts.has_stash {
        return "none".to_string();
    }
    let active = pr::open_pull_requests(&cand.prs);
    if active.is_empty() {
        return "none".to_string();
    }
    active
        .iter()
        .map(|pr| format!("#{} {}", pr.number, pr.state_label()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Absorb PR updated-at times into recency, the way the original dashboard
/// treats a PR comment as activity.
pub fn advance_activity_from_prs(cand: &mut CandidateState) {
    let latest = cand
        .prs
        .iter()
        .filter_map(|pr| pr.updated_at)
        .max();
    if let (Some(latest), Some(current)) = (latest, cand.facts.last_activity) {
        if latest > current {
            cand.facts.last_activity = Some(latest);
        }
    } else if cand.facts.last_activity.is_none() {
        cand.facts.last_activity = latest;
    }
}

/// Resolve worktree arguments by name first, then by path containment.
pub fn resolve_worktree_args(
    worktrees: &[Worktree],
    args: &[String],
    wd: &Path,
) -> Result<Vec<Worktree>, String> {
    let mut seen: Vec<String> = Vec::new();
    let mut targets = Vec::new();
    for arg in args {
        let wt = match worktrees.iter().find(|wt| wt.name == *arg) {
            Some(wt) => wt.clone(),
            None => find_worktree_by_path(worktrees, arg, wd)?
                .ok_or_else(|| format!("no worktree matches {}", arg))?,
        };
        if seen.contains(&wt.name) {
            continue;
        }
        seen.push(wt.name.clone());
        targets.push(wt);
    }
    Ok(targets)
}

/// The worktree whose root contains `path`, if any.
pub fn find_worktree_containing<'a>(
    worktrees: &'a [Worktree],
    path: &Path,
) -> Option<&'a Worktree> {
    let canonical = canonicalize_path(path);
    worktrees
        .iter()
        .find(|wt| is_within(&canonical, &canonicalize_path(&wt.path)))
}

fn find_worktree_by_path(
    worktrees: &[Worktree],
    arg: &str,
    base: &Path,
) -> Result<Option<Worktree>, String> {
    let path = Path::new(arg);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(arg)
    };
    let canonical = canonicalize_path(&path);

    let mut matched: Option<&Worktree> = None;
    for wt in worktrees {
        let root = canonicalize_path(&wt.path);
        if is_within(&canonical, &root) {
            if let Some(prev) = matched {
                if prev.path != wt.path {
                    return Err(format!(
                        "path {} matches multiple worktrees ({}, {})",
                        arg, prev.name, wt.name
                    ));
                }
            }
            matched = Some(wt);
        }
    }
    Ok(matched.cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use copse_core::facts::WorktreeFacts;
    use copse_core::pr::PullRequestInfo;
    use chrono::TimeZone;

    fn worktree(name: &str, path: &str) -> Worktree {
        Worktree {
            name: name.to_string(),
            path: path.into(),
        }
    }

    fn candidate(name: &str) -> CandidateState {
        let facts = WorktreeFacts {
            worktree: worktree(name, &format!("/p/{name}")),
            branch: name.to_string(),
            head_hash: "abc".to_string(),
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
            last_activity: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        };
        CandidateState::new(facts, "main".to_string())
    }

    #[test]
    fn test_sort_for_display_recency_then_name() {
        let mut a = candidate("alpha");
        let mut b = candidate("beta");
        let mut c = candidate("gamma");
        a.facts.last_activity = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        b.facts.last_activity = Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        c.facts.last_activity = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut cands = vec![c, a, b];
        sort_for_display(&mut cands);
        let names: Vec<&str> = cands.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn test_action_label_stages() {
        let mut cand = candidate("w");
        cand.stage = Stage::Ready;
        assert_eq!(action_label(&cand), "will clean");

        cand.stage = Stage::AwaitingInput;
        cand.gray_reasons = vec!["stale for 20 days".to_string()];
        assert_eq!(action_label(&cand), "stale for 20 days");

        cand.stage = Stage::Blocked;
        cand.block_reasons = vec!["detached HEAD".to_string()];
        assert_eq!(action_label(&cand), "blocked: detached HEAD");
    }

    #[test]
    fn test_describe_pr_summary_suppressed_without_work() {
        let mut cand = candidate("w");
        cand.prs = vec![PullRequestInfo {
            number: 107,
            state: "MERGED".to_string(),
            is_draft: false,
            updated_at: None,
            url: String::new(),
        }];
        assert_eq!(describe_pr_summary(&cand), "none");

        cand.facts.unique_commits = 1;
        cand.prs[0].state = "OPEN".to_string();
        assert_eq!(describe_pr_summary(&cand), "#107 open");
    }

    #[test]
    fn test_advance_activity_from_prs() {
        let mut cand = candidate("w");
        let before = cand.facts.last_activity;
        cand.prs = vec![PullRequestInfo {
            number: 1,
            state: "OPEN".to_string(),
            is_draft: false,
            updated_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()),
            url: String::new(),
        }];
        advance_activity_from_prs(&mut cand);
        assert!(cand.facts.last_activity > before);
    }

    #[test]
    fn test_resolve_worktree_args_by_name_dedups() {
        let wts = vec![worktree("a", "/p/a"), worktree("b", "/p/b")];
        let targets = resolve_worktree_args(
            &wts,
            &["a".to_string(), "a".to_string(), "b".to_string()],
            Path::new("/p"),
        )
        .unwrap();
        let names: Vec<&str> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_worktree_args_unknown() {
        let wts = vec![worktree("a", "/p/a")];
        assert!(resolve_worktree_args(&wts, &["zed".to_string()], Path::new("/p")).is_err());
    }

    #[test]
    fn test_populate_row_flags() {
        let mut cand = candidate("w");
        cand.stage = Stage::AwaitingInput;
        cand.classification = Classification::Gray;
        cand.set_processes(vec![copse_core::ProcessInfo {
            pid: 3,
            ppid: 1,
            command: "watch".to_string(),
            cwd: "/p/w".to_string(),
        }]);
        let row = candidate_row(&cand);
        assert!(row.needs_input);
        assert!(row.process_warn);
        assert!(!row.has_error);
        assert_eq!(row.action_label.as_deref(), Some("awaiting review"));
    }
}
