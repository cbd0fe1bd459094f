//! The rm command: remove specific worktrees through the tidy safety engine
//!
//! Same facts, classification, and prompts as tidy, but scoped to named
//! targets. --force clears block reasons (with a warning) and falls back to
//! a guarded rm -rf when git itself refuses.

use std::io::Write;
use std::path::Path;

use anyhow::{Result, bail};

use copse_core::candidate::{CandidateState, Classification};
use copse_core::classify::{Thresholds, classify};
use copse_core::error::single_line;
use copse_core::processes::{canonicalize_path, is_within};
use copse_core::project::{Project, Worktree, list_worktrees};

use crate::candidates::{
    self, BLOCK_REASON_CURRENT, advance_activity_from_prs, attach_processes,
    comparison_context, find_worktree_containing, resolve_worktree_args,
};
use crate::commands::current_time;
use crate::github;
use crate::gitops;
use crate::pipeline::{self, CancelToken, CiRequest, FetchError};
use crate::prompt::prompt_for_candidate;

#[derive(Debug, Default)]
pub struct RmOptions {
    pub dry_run: bool,
    pub force: bool,
}

pub fn run_rm(opts: &RmOptions, args: &[String]) -> Result<i32> {
    github::ensure_gh_available().map_err(|e| anyhow::anyhow!(e))?;

    let initial_wd = std::env::current_dir()?;
    let proj = Project::discover(&initial_wd)?;
    let compare = comparison_context(&proj);
    let now = current_time();

    let worktrees = list_worktrees(&proj.root)?;
    let targets = resolve_rm_targets(&worktrees, &proj, args, &initial_wd)?;

    let mut candidates = candidates::collect_candidates(&proj, &compare, &initial_wd, now)?;
    let mut selected: Vec<CandidateState> = Vec::with_capacity(targets.len());
    for target in &targets {
        let cand = candidates
            .iter_mut()
            .find(|c| c.name() == target.name)
            .ok_or_else(|| anyhow::anyhow!("worktree {} is not removable", target.name))?;
        let mut cand = cand.clone();
        // Being inside the target is fine for rm; we relocate before deleting.
        if cand.is_current {
            cand.block_reasons.retain(|r| r != BLOCK_REASON_CURRENT);
            if cand.block_reasons.is_empty() {
                cand.stage = copse_core::Stage::Scanning;
            }
        }
        selected.push(cand);
    }

    let mut forced_reasons: Vec<(String, Vec<String>)> = Vec::new();
    if opts.force {
        for cand in &mut selected {
            if cand.block_reasons.is_empty() {
                continue;
            }
            forced_reasons.push((cand.name().to_string(), cand.block_reasons.clone()));
            cand.block_reasons.clear();
            cand.stage = copse_core::Stage::Scanning;
        }
    }

    attach_processes(&mut selected)?;

    let cancel = CancelToken::new();
    cancel.install_interrupt_handler();

    for cand in &mut selected {
        if let Err(msg) = load_pull_requests(cand) {
            eprintln!("warning: {}", msg);
        }
    }

    fetch_ci(&proj, &mut selected, &cancel);
    if cancel.is_cancelled() {
        eprintln!("warning: interrupted; nothing was removed");
        return Ok(1);
    }

    let thresholds = Thresholds {
        stale_days: proj.config.tidy.stale_days,
        divergence_commits: proj.config.tidy.divergence_commits,
    };
    for cand in &mut selected {
        classify(cand, &thresholds, compare.workflow, now);
        if cand.classification == Classification::Blocked {
            bail!(
                "cannot remove {}: {}",
                cand.name(),
                cand.block_reasons.join("; ")
            );
        }
    }

    if opts.dry_run {
        let mut stdout = std::io::stdout().lock();
        render_rm_dry_run(&mut stdout, &selected)?;
        return Ok(0);
    }

    let stdin = std::io::stdin();
    let mut reader = stdin.lock();
    let use_color = console::Term::stdout().is_term();

    let mut relocated = false;
    let mut remote_touched = false;
    let mut failures: Vec<String> = Vec::new();

    for cand in &selected {
        if cancel.is_cancelled() {
            break;
        }
        if !relocated
            && is_within(
                &canonicalize_path(&initial_wd),
                &canonicalize_path(&cand.facts.worktree.path),
            )
        {
            std::env::set_current_dir(&proj.root)?;
            relocated = true;
        }

        if cand.classification == Classification::Gray && !opts.force {
            let mut stdout = std::io::stdout().lock();
            let answer =
                prompt_for_candidate(&mut stdout, &mut reader, cand, now, use_color)?;
            drop(stdout);
            if !answer.proceed {
                let why = if answer.quit { "quit selected" } else { "declined" };
                println!("Skipped {}: {}", cand.name(), why);
                if answer.quit {
                    break;
                }
                continue;
            }
        }

        if opts.force {
            if let Some((_, reasons)) =
                forced_reasons.iter().find(|(name, _)| name == cand.name())
            {
                eprintln!(
                    "warning: forcing removal of {}: {}",
                    cand.name(),
                    reasons.join("; ")
                );
            }
        }

        match perform_rm_cleanup(&proj, cand, opts.force) {
            Ok(touched) => remote_touched |= touched,
            Err(err) => failures.push(format!("{}: {}", cand.name(), err)),
        }
    }

    if remote_touched {
        let mut stdout = std::io::stdout().lock();
        let mut sink: gitops::LogSink<'_> = Some(&mut stdout);
        if let Err(err) = gitops::prune_remote(&proj.default_worktree_path, &mut sink) {
            failures.push(format!("remote prune: {}", err));
        }
    }

    if relocated {
        println!(
            "Left the removed worktree; run `cd {}` if your shell is still inside it",
            proj.root.display()
        );
    }

    if failures.is_empty() {
        Ok(0)
    } else {
        for failure in &failures {
            eprintln!("error: {}", failure);
        }
        Ok(1)
    }
}

fn resolve_rm_targets(
    worktrees: &[Worktree],
    proj: &Project,
    args: &[String],
    wd: &Path,
) -> Result<Vec<Worktree>> {
    if args.is_empty() {
        let Some(wt) = find_worktree_containing(worktrees, wd) else {
            bail!("not inside a worktree; specify a target");
        };
        if wt.name == proj.default_worktree {
            bail!("cannot remove the default worktree ({})", wt.name);
        }
        return Ok(vec![wt.clone()]);
    }

    let targets =
        resolve_worktree_args(worktrees, args, wd).map_err(|e| anyhow::anyhow!(e))?;
    for target in &targets {
        if target.name == proj.default_worktree {
            bail!("cannot remove the default worktree ({})", target.name);
        }
    }
    Ok(targets)
}

fn load_pull_requests(cand: &mut CandidateState) -> Result<(), String> {
    if !cand.block_reasons.is_empty() {
        return Ok(());
    }
    match github::query_pull_requests(&cand.facts.worktree.path, &cand.facts.branch) {
        Ok(prs) => {
            cand.prs = prs;
            advance_activity_from_prs(cand);
            Ok(())
        }
        Err(msg) => {
            cand.note_pr_failure(&msg);
            Err(format!("{}: {}", cand.name(), msg))
        }
    }
}

fn fetch_ci(proj: &Project, selected: &mut [CandidateState], cancel: &CancelToken) {
    let repo = match github::resolve_github_repo(proj) {
        Ok(repo) => repo,
        Err(msg) => {
            eprintln!("warning: {}", msg);
            return;
        }
    };

    let mut targets: Vec<CiRequest> = Vec::new();
    for (i, cand) in selected.iter().enumerate() {
        if !cand.block_reasons.is_empty() {
            continue;
        }
        if let Ok(target) =
            github::determine_ci_target(&cand.prs, &cand.facts.branch, &cand.facts.head_hash)
        {
            targets.push(CiRequest {
                reference: target.reference,
                branch: target.branch,
                head: target.head,
                indices: vec![i],
            });
        }
    }
    let requests = pipeline::dedup_ci_requests(targets);
    let workdir = proj.default_worktree_path.clone();
    let priority: Vec<usize> = (0..selected.len()).collect();

    let report = pipeline::run_ci_stage(
        &requests,
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
            github::fetch_ci_target(&repo, &workdir, &target).map_err(|msg| {
                if cancel.is_cancelled() {
                    FetchError::Cancelled
                } else {
                    FetchError::Failed(msg)
                }
            })
        },
        |index, outcome| {
            if let Ok(result) = outcome {
                selected[index].ci = result;
            }
        },
    );

    if !report.cancelled {
        if let Some(summary) = report.warn_summary() {
            eprintln!("warning: {}", summary);
        }
    }
}

fn render_rm_dry_run(out: &mut dyn Write, cands: &[CandidateState]) -> Result<()> {
    let mut needs_remote = false;
    for (i, cand) in cands.iter().enumerate() {
        writeln!(
            out,
            "Will clean up {} (branch {})",
            cand.name(),
            cand.facts.branch
        )?;
        for action in super::tidy::planned_actions(cand) {
            writeln!(out, "  - {}", action)?;
        }
        writeln!(out)?;
        if cand.classification == Classification::Gray {
            writeln!(out, "Worktree requires confirmation:")?;
            for reason in &cand.gray_reasons {
                writeln!(out, "  - {}", reason)?;
            }
            writeln!(out)?;
        }
        if cand.facts.has_remote_branch && cand.facts.remote_matches_head {
            needs_remote = true;
        }
        if i < cands.len() - 1 {
            writeln!(out)?;
        }
    }
    if needs_remote {
        writeln!(out, "Remote maintenance:")?;
        writeln!(out, "- git remote prune origin")?;
    }
    Ok(())
}

/// Cleanup with --force fallbacks: a refused `git worktree remove` falls
/// back to a guarded rm -rf; branch deletion failures degrade to warnings.
fn perform_rm_cleanup(
    proj: &Project,
    cand: &CandidateState,
    force: bool,
) -> Result<bool, String> {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(
        stdout,
        "Cleaning {} (branch {})",
        cand.name(),
        cand.facts.branch
    );
    let mut log: gitops::LogSink<'_> = Some(&mut stdout);

    if let Err(err) = gitops::git_worktree_remove(
        &proj.default_worktree_path,
        &cand.facts.worktree.path,
        &mut log,
    ) {
        if !force {
            return Err(err);
        }
        eprintln!(
            "warning: git worktree remove failed for {}: {}",
            cand.name(),
            err
        );
        eprintln!("warning: falling back to rm -rf for {}", cand.name());
        gitops::rm_rf_worktree(proj, &cand.facts.worktree.path)?;
        if let Err(prune_err) =
            copse_core::git::run(&proj.default_worktree_path, &["worktree", "prune"])
        {
            eprintln!(
                "warning: git worktree prune failed: {}",
                single_line(&prune_err)
            );
        }
    }

    let branch = &cand.facts.branch;
    if branch.is_empty() || branch == "(unknown)" || *branch == proj.config.default_branch {
        if force && *branch == proj.config.default_branch {
            eprintln!(
                "warning: skipped deleting local branch {} (default branch)",
                branch
            );
        }
        return Ok(false);
    }

    let mut remote_touched = false;
    if let Err(err) =
        gitops::git_delete_local_branch(&proj.default_worktree_path, branch, &mut log)
    {
        if !force {
            return Err(err);
        }
        eprintln!("warning: failed to delete local branch {}: {}", branch, err);
    }

    if cand.facts.has_remote_branch && cand.facts.remote_matches_head {
        match gitops::git_delete_remote_branch(&proj.default_worktree_path, branch, &mut log) {
            Ok(()) => remote_touched = true,
            Err(err) => {
                if !force {
                    return Err(err);
                }
                eprintln!(
                    "warning: failed to delete remote branch origin/{}: {}",
                    branch, err
                );
            }
        }
    }

    Ok(remote_touched)
}
