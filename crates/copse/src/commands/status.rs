//! The status dashboard
//!
//! One synchronous git pass builds the table; PR and CI results then stream
//! in concurrently and repaint rows in place. A worktree whose git state is
//! unreadable degrades to an error row instead of hiding the rest.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use copse_core::candidate::{CandidateState, Classification};
use copse_core::classify::{Thresholds, classify};
use copse_core::error::single_line;
use copse_core::facts::{self, GatherOptions, WorktreeFacts};
use copse_core::pr::{PullRequestInfo, open_pull_requests};
use copse_core::processes::{canonicalize_path, is_within};
use copse_core::project::{Project, list_worktrees};

use crate::candidates::{
    self, CompareContext, advance_activity_from_prs, comparison_context,
};
use crate::commands::current_time;
use crate::github::{self, GithubRepo};
use crate::pipeline::{
    self, CancelToken, CiRequest, FetchError, PR_PENDING_LABEL, StageReport,
};
use crate::render::{ColumnLayout, Renderer, RowState, Theme, build_layout, print_rows};

pub fn run_status() -> Result<i32> {
    let wd = std::env::current_dir()?;
    let proj = Project::discover(&wd)?;
    let compare = comparison_context(&proj);
    let now = current_time();

    let worktrees = list_worktrees(&proj.root)?;
    let mut candidates: Vec<CandidateState> = Vec::with_capacity(worktrees.len());
    for wt in &worktrees {
        match facts::gather(&proj, wt, &compare.reference, &GatherOptions::for_status()) {
            Ok(facts) => {
                let mut cand =
                    CandidateState::new(facts, proj.config.default_branch.clone());
                cand.is_current =
                    is_within(&canonicalize_path(&wd), &canonicalize_path(&wt.path));
                candidates.push(cand);
            }
            Err(err) => {
                eprintln!("warning: {}: {}", wt.name, single_line(&err));
                candidates.push(error_candidate(wt.clone(), &proj, &err));
            }
        }
    }

    candidates::sort_for_display(&mut candidates);
    if let Err(err) = candidates::attach_processes(&mut candidates) {
        eprintln!("warning: {}", single_line(&err));
    }

    let mut rows: Vec<RowState> = candidates.iter().map(status_row).collect();
    for (i, cand) in candidates.iter_mut().enumerate() {
        cand.row = Some(i);
    }

    let mut dash = Dashboard::new(&rows, now);
    dash.render(&rows);

    let cancel = CancelToken::new();
    cancel.install_interrupt_handler();

    let thresholds = Thresholds {
        stale_days: proj.config.tidy.stale_days,
        divergence_commits: proj.config.tidy.divergence_commits,
    };

    let default_index = candidates
        .iter()
        .position(|cand| cand.name() == proj.default_worktree);
    let priority = pipeline::priority_order(candidates.len(), default_index);

    run_pr_phase(
        &compare,
        &thresholds,
        &mut candidates,
        &mut rows,
        &mut dash,
        &cancel,
        priority.clone(),
        now,
    );

    if !cancel.is_cancelled() {
        run_ci_phase(
            &proj,
            &mut candidates,
            &mut rows,
            &mut dash,
            &cancel,
            priority,
            now,
        );
    } else {
        mark_ci_phase_interrupted(&mut rows, &mut dash);
    }

    if dash.interactive() {
        dash.render(&rows);
    } else {
        let layout = build_layout(&rows, now, None);
        let mut stdout = std::io::stdout().lock();
        print_rows(&mut stdout, &rows, &layout, &Theme::plain(), now)?;
        stdout.flush()?;
    }
    Ok(0)
}

fn error_candidate(
    wt: copse_core::Worktree,
    proj: &Project,
    err: &copse_core::CopseError,
) -> CandidateState {
    let facts = WorktreeFacts {
        worktree: wt,
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
    let name = facts.worktree.name.clone();
    let mut cand = CandidateState::new(facts, proj.config.default_branch.clone());
    let msg = facts::friendly_worktree_git_error(&name, err)
        .unwrap_or_else(|| single_line(err));
    cand.block_reasons.push(msg);
    cand.stage = copse_core::Stage::Error;
    cand
}

fn status_row(cand: &CandidateState) -> RowState {
    let mut row = RowState {
        name: cand.name().to_string(),
        path: cand.facts.worktree.path.clone(),
        branch: if cand.facts.branch == "(unknown)" {
            String::new()
        } else {
            cand.facts.branch.clone()
        },
        dirty: cand.facts.dirty,
        current: cand.is_current,
        operation: cand.facts.operation,
        ahead: cand.facts.ahead,
        behind: cand.facts.behind,
        timestamp: cand.facts.last_activity,
        processes: cand.processes.clone(),
        ..RowState::default()
    };
    if cand.stage == copse_core::Stage::Error {
        row.has_error = true;
        row.pr_label = cand
            .block_reasons
            .first()
            .cloned()
            .unwrap_or_else(|| "error".to_string());
    } else if cand.facts.branch.is_empty() {
        row.pr_label = "PR: none".to_string();
    } else {
        row.pr_label = PR_PENDING_LABEL.to_string();
    }
    row
}

/// The live terminal, or nothing when output is piped.
struct Dashboard {
    renderer: Option<Renderer>,
    layout: ColumnLayout,
    now: DateTime<Utc>,
}

impl Dashboard {
    fn new(rows: &[RowState], now: DateTime<Utc>) -> Dashboard {
        match Renderer::try_new(Theme::colored()) {
            Some(renderer) => {
                let mut layout = build_layout(rows, now, Some(renderer.width()));
                layout.color = true;
                Dashboard {
                    renderer: Some(renderer),
                    layout,
                    now,
                }
            }
            None => Dashboard {
                renderer: None,
                layout: build_layout(rows, now, None),
                now,
            },
        }
    }

    fn interactive(&self) -> bool {
        self.renderer.is_some()
    }

    fn render(&mut self, rows: &[RowState]) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(rows, &self.layout, self.now);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_pr_phase(
    compare: &CompareContext,
    thresholds: &Thresholds,
    candidates: &mut [CandidateState],
    rows: &mut [RowState],
    dash: &mut Dashboard,
    cancel: &CancelToken,
    priority: Vec<usize>,
    now: DateTime<Utc>,
) {
    let targets: Vec<(usize, String, std::path::PathBuf, String)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, cand)| cand.stage != copse_core::Stage::Error)
        .map(|(i, cand)| {
            (
                i,
                cand.facts.branch.clone(),
                cand.facts.worktree.path.clone(),
                cand.name().to_string(),
            )
        })
        .collect();
    let requests = pipeline::dedup_pr_requests(&targets);

    let report = pipeline::run_pr_stage(
        &requests,
        priority,
        cancel,
        |req| {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            github::query_pull_requests(&req.dir, &req.branch).map_err(|msg| {
                if cancel.is_cancelled() {
                    FetchError::Cancelled
                } else {
                    FetchError::Failed(msg)
                }
            })
        },
        |index, outcome| {
            match outcome {
                Ok(prs) => {
                    candidates[index].prs = prs;
                    advance_activity_from_prs(&mut candidates[index]);
                    rows[index].pr_label = status_pr_label(&candidates[index].prs);
                    rows[index].timestamp = candidates[index].facts.last_activity;
                }
                Err(_) => {
                    rows[index].pr_label = "PR: unavailable".to_string();
                }
            }
            classify(&mut candidates[index], thresholds, compare.workflow, now);
            rows[index].process_warn = !candidates[index].processes.is_empty()
                && candidates[index].classification != Classification::Safe;
            dash.render(rows);
        },
    );

    report_stage(&report, "cancelled GitHub fetch");
    if report.cancelled {
        let mut labels: Vec<String> = rows.iter().map(|r| r.pr_label.clone()).collect();
        pipeline::mark_pr_interrupted(&mut labels, |_| {});
        for (row, label) in rows.iter_mut().zip(labels) {
            row.pr_label = label;
        }
        dash.render(rows);
    }
}

/// One worktree's PR column from its full PR list.
fn status_pr_label(prs: &[PullRequestInfo]) -> String {
    if prs.is_empty() {
        return "PR: none".to_string();
    }
    let open = open_pull_requests(prs);
    match open.len() {
        0 => {
            let pr = &prs[0];
            format!("PR #{} {}", pr.number, pr.state_label())
        }
        1 => format!("PR #{} {}", open[0].number, open[0].state_label()),
        _ => copse_core::pr::format_multiple_prs(&open),
    }
}

fn run_ci_phase(
    proj: &Project,
    candidates: &mut [CandidateState],
    rows: &mut [RowState],
    dash: &mut Dashboard,
    cancel: &CancelToken,
    priority: Vec<usize>,
    now: DateTime<Utc>,
) {
    let repo = match github::resolve_github_repo(proj) {
        Ok(repo) => repo,
        Err(msg) => {
            let label = github::error_label(&msg);
            for (i, cand) in candidates.iter().enumerate() {
                if cand.stage != copse_core::Stage::Error {
                    rows[i].ci_label = label.clone();
                }
            }
            dash.render(rows);
            eprintln!("warning: {}", msg);
            return;
        }
    };

    let mut targets: Vec<CiRequest> = Vec::new();
    for (i, cand) in candidates.iter().enumerate() {
        if cand.stage == copse_core::Stage::Error {
            continue;
        }
        match github::determine_ci_target(&cand.prs, &cand.facts.branch, &cand.facts.head_hash)
        {
            Ok(target) => targets.push(CiRequest {
                reference: target.reference,
                branch: target.branch,
                head: target.head,
                indices: vec![i],
            }),
            Err(msg) => {
                rows[i].ci_label = github::error_label(&msg);
            }
        }
    }
    let requests = pipeline::dedup_ci_requests(targets);
    let workdir = proj.default_worktree_path.clone();

    let report = run_ci_requests(
        &requests,
        priority,
        cancel,
        &repo,
        &workdir,
        |index, outcome| {
            match outcome {
                Ok(result) => {
                    rows[index].ci_label = github::ci_label(&result, now);
                    candidates[index].ci = result;
                }
                Err(msg) => {
                    rows[index].ci_label = github::error_label(&msg);
                    candidates[index].ci = copse_core::ci::CiResult {
                        state: copse_core::ci::CiState::Error,
                        failure: None,
                        message: msg,
                    };
                }
            }
            dash.render(rows);
        },
    );

    report_stage(&report, "cancelled GitHub fetch");
    if report.cancelled {
        mark_ci_phase_interrupted(rows, dash);
    }
}

fn run_ci_requests(
    requests: &[CiRequest],
    priority: Vec<usize>,
    cancel: &CancelToken,
    repo: &GithubRepo,
    workdir: &std::path::Path,
    apply: impl FnMut(usize, Result<copse_core::ci::CiResult, String>),
) -> StageReport {
    pipeline::run_ci_stage(
        requests,
        priority,
        pipeline::CI_CONCURRENCY,
        cancel,
        |req| {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let target = github::CiTarget {
                reference: req.reference.clone(),
                branch: req.branch.clone(),
                head: req.head.clone(),
            };
            github::fetch_ci_target(repo, workdir, &target).map_err(|msg| {
                if cancel.is_cancelled() {
                    FetchError::Cancelled
                } else {
                    FetchError::Failed(msg)
                }
            })
        },
        apply,
    )
}

fn mark_ci_phase_interrupted(rows: &mut [RowState], dash: &mut Dashboard) {
    let mut labels: Vec<String> = rows.iter().map(|r| r.ci_label.clone()).collect();
    pipeline::mark_ci_interrupted(&mut labels, |_| {});
    for (row, label) in rows.iter_mut().zip(labels) {
        row.ci_label = label;
    }
    dash.render(rows);
}

fn report_stage(report: &StageReport, cancel_message: &str) {
    if report.cancelled {
        eprintln!("warning: {}", cancel_message);
    } else if let Some(summary) = report.warn_summary() {
        eprintln!("warning: {}", summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr(number: u64, state: &str) -> PullRequestInfo {
        PullRequestInfo {
            number,
            state: state.to_string(),
            is_draft: false,
            updated_at: None,
            url: String::new(),
        }
    }

    #[test]
    fn test_status_pr_label() {
        assert_eq!(status_pr_label(&[]), "PR: none");
        assert_eq!(status_pr_label(&[pr(12, "OPEN")]), "PR #12 open");
        assert_eq!(status_pr_label(&[pr(12, "MERGED")]), "PR #12 merged");
        assert_eq!(
            status_pr_label(&[pr(1, "OPEN"), pr(2, "OPEN")]),
            "PR #1, #2 multiple"
        );
    }
}
