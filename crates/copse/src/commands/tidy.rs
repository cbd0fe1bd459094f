//! The tidy command: clean up merged or stale worktrees
//!
//! Collects candidates, enriches them with PR data, classifies each as
//! safe/gray/blocked, optionally terminates blocking processes, then walks
//! the list cleaning, prompting, or skipping. One candidate's failure marks
//! its row and moves on; the exit code reports any failure at the end.

use std::io::Write;
use std::path::Path;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};

use copse_core::candidate::{CandidateState, Classification, Stage};
use copse_core::classify::{Thresholds, classify};
use copse_core::pr::WorkflowExpectations;
use copse_core::processes::{canonicalize_path, command_label, is_within};
use copse_core::project::Project;

use crate::candidates::{
    advance_activity_from_prs, attach_processes, candidate_row, collect_candidates,
    comparison_context, populate_row, sort_for_display,
};
use crate::commands::current_time;
use crate::github;
use crate::gitops;
use crate::pipeline::{self, CancelToken, FetchError};
use crate::procctl::{self, KillSettings};
use crate::prompt::prompt_for_candidate;
use crate::render::{ColumnLayout, Renderer, RowState, Theme, build_layout};

/// How much confirmation the run demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TidyPolicy {
    Auto,
    Safe,
    All,
    Prompt,
}

impl TidyPolicy {
    fn parse(value: &str) -> Result<TidyPolicy> {
        match value.to_lowercase().as_str() {
            "auto" => Ok(TidyPolicy::Auto),
            "safe" => Ok(TidyPolicy::Safe),
            "all" => Ok(TidyPolicy::All),
            "prompt" => Ok(TidyPolicy::Prompt),
            other => bail!("unknown policy {:?} (expected auto, safe, all, or prompt)", other),
        }
    }
}

#[derive(Debug, Default)]
pub struct TidyOptions {
    pub dry_run: bool,
    pub policy: Option<String>,
    pub safe_alias: bool,
    pub all_alias: bool,
    pub prompt_alias: bool,
    /// --kill with an optional signal value ("true" means flag-only)
    pub kill: Option<String>,
    pub timeout: Option<String>,
}

pub fn run_tidy(opts: &TidyOptions) -> Result<i32> {
    github::ensure_gh_available().map_err(|e| anyhow::anyhow!(e))?;

    let initial_wd = std::env::current_dir()?;
    let proj = Project::discover(&initial_wd)?;
    let policy = resolve_policy(opts, &proj.config.tidy.policy)?;

    let kill_enabled = opts.kill.is_some();
    if opts.timeout.is_some() && !kill_enabled {
        bail!("--timeout requires --kill");
    }
    let kill_cfg = if kill_enabled {
        let spec = opts.kill.as_deref().filter(|s| *s != "true");
        Some(
            procctl::resolve_kill_settings(
                spec,
                opts.timeout.as_deref(),
                proj.config.process.kill_timeout_duration(),
            )
            .map_err(|e| anyhow::anyhow!(e))?,
        )
    } else {
        None
    };

    let now = current_time();
    let compare = comparison_context(&proj);
    let mut candidates = collect_candidates(&proj, &compare, &initial_wd, now)?;
    attach_processes(&mut candidates)?;
    sort_for_display(&mut candidates);

    let mut ui = TidyUi::new(&candidates, now);

    let cancel = CancelToken::new();
    cancel.install_interrupt_handler();

    let thresholds = Thresholds {
        stale_days: proj.config.tidy.stale_days,
        divergence_commits: proj.config.tidy.divergence_commits,
    };

    fetch_pull_requests(
        &mut candidates,
        &mut ui,
        &cancel,
        &thresholds,
        compare.workflow,
        now,
    );
    if cancel.is_cancelled() {
        eprintln!("warning: interrupted; nothing was cleaned");
        return Ok(1);
    }

    classify_all(&mut candidates, &thresholds, compare.workflow, now, &mut ui);

    if let Some(kill_cfg) = &kill_cfg {
        let changed = kill_blocking_processes(
            &mut candidates,
            kill_cfg,
            opts.dry_run,
            &cancel,
            &mut ui,
        )?;
        if changed {
            attach_processes(&mut candidates)?;
            classify_all(&mut candidates, &thresholds, compare.workflow, now, &mut ui);
        }
    }

    if opts.dry_run {
        if ui.interactive() {
            return Ok(0);
        }
        let mut stdout = std::io::stdout().lock();
        render_dry_run(&mut stdout, &candidates, kill_cfg.as_ref())?;
        return Ok(0);
    }

    if !ui.interactive() {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "Plan:")?;
        render_dry_run(&mut stdout, &candidates, kill_cfg.as_ref())?;
        writeln!(stdout)?;
    }

    execute_cleanups(
        &proj,
        &mut candidates,
        policy,
        now,
        &mut ui,
        &initial_wd,
        &cancel,
    )
}

fn resolve_policy(opts: &TidyOptions, config_default: &str) -> Result<TidyPolicy> {
    let mut requested: Vec<TidyPolicy> = Vec::new();
    if let Some(flag) = &opts.policy {
        requested.push(TidyPolicy::parse(flag)?);
    }
    if opts.safe_alias {
        requested.push(TidyPolicy::Safe);
    }
    if opts.all_alias {
        requested.push(TidyPolicy::All);
    }
    if opts.prompt_alias {
        requested.push(TidyPolicy::Prompt);
    }

    match requested.as_slice() {
        [] => TidyPolicy::parse(config_default),
        [first, rest @ ..] => {
            if rest.iter().any(|p| p != first) {
                bail!("conflicting policy flags");
            }
            Ok(*first)
        }
    }
}

/// Renderer plus the row list it paints; Update keeps both in sync.
struct TidyUi {
    renderer: Option<Renderer>,
    rows: Vec<RowState>,
    layout: ColumnLayout,
    now: DateTime<Utc>,
}

impl TidyUi {
    fn new(candidates: &[CandidateState], now: DateTime<Utc>) -> TidyUi {
        let rows: Vec<RowState> = candidates.iter().map(candidate_row).collect();
        match Renderer::try_new(Theme::colored()) {
            Some(mut renderer) => {
                let mut layout = build_layout(&rows, now, Some(renderer.width()));
                layout.color = true;
                renderer.render(&rows, &layout, now);
                TidyUi {
                    renderer: Some(renderer),
                    rows,
                    layout,
                    now,
                }
            }
            None => {
                let layout = build_layout(&rows, now, None);
                TidyUi {
                    renderer: None,
                    rows,
                    layout,
                    now,
                }
            }
        }
    }

    fn interactive(&self) -> bool {
        self.renderer.is_some()
    }

    fn update(&mut self, index: usize, cand: &CandidateState) {
        if let Some(row) = self.rows.get_mut(index) {
            populate_row(cand, row);
        }
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.render(&self.rows, &self.layout, self.now);
        }
    }

    fn add_extra_lines(&mut self, lines: usize) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.add_extra_lines(lines);
        }
    }
}

fn fetch_pull_requests(
    candidates: &mut [CandidateState],
    ui: &mut TidyUi,
    cancel: &CancelToken,
    thresholds: &Thresholds,
    workflow: WorkflowExpectations,
    now: DateTime<Utc>,
) {
    let targets: Vec<(usize, String, std::path::PathBuf, String)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, cand)| cand.block_reasons.is_empty())
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
    let priority: Vec<usize> = (0..candidates.len()).collect();

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
                }
                Err(msg) => {
                    candidates[index].note_pr_failure(&msg);
                }
            }
            classify(&mut candidates[index], thresholds, workflow, now);
            ui.update(index, &candidates[index]);
        },
    );

    if !report.cancelled {
        if let Some(summary) = report.warn_summary() {
            eprintln!("warning: {}", summary);
        }
    }
}

fn classify_all(
    candidates: &mut [CandidateState],
    thresholds: &Thresholds,
    workflow: WorkflowExpectations,
    now: DateTime<Utc>,
    ui: &mut TidyUi,
) {
    for index in 0..candidates.len() {
        classify(&mut candidates[index], thresholds, workflow, now);
        ui.update(index, &candidates[index]);
    }
}

/// Send the configured signal to every process blocking a safe or gray
/// candidate. A still-running survivor turns into a block reason; the
/// unsupported sentinel and operator interrupts abort the whole command.
fn kill_blocking_processes(
    candidates: &mut [CandidateState],
    settings: &KillSettings,
    dry_run: bool,
    cancel: &CancelToken,
    ui: &mut TidyUi,
) -> Result<bool> {
    let targets: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, cand)| {
            cand.classification != Classification::Blocked && !cand.processes.is_empty()
        })
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() || dry_run {
        return Ok(false);
    }

    let interactive = ui.interactive();
    let terminator = procctl::new_terminator();
    let mut changed = false;

    for index in targets {
        let cand = &mut candidates[index];
        if !interactive {
            println!(
                "Killing processes in {} (signal {})",
                cand.name(),
                settings.signal_label
            );
        }
        let outcome = procctl::terminate_worktree_processes(
            &cand.facts.worktree,
            &cand.processes.clone(),
            settings,
            terminator.as_ref(),
            cancel,
        );
        match outcome {
            Ok(()) => {
                if !interactive {
                    println!("  cleared");
                }
                changed = true;
            }
            Err(err) if err.is_unsupported() || err.is_cancelled() => {
                bail!("{}", err);
            }
            Err(err) => {
                let msg = format!("process cleanup failed: {}", err);
                cand.block_reasons.push(msg);
                if !interactive {
                    println!("  failed: {}", err);
                }
            }
        }
        let snapshot = candidates[index].clone();
        ui.update(index, &snapshot);
    }

    Ok(changed)
}

fn render_dry_run(
    out: &mut dyn Write,
    candidates: &[CandidateState],
    kill_plan: Option<&KillSettings>,
) -> Result<()> {
    let safe: Vec<&CandidateState> = candidates
        .iter()
        .filter(|c| c.classification == Classification::Safe)
        .collect();
    let gray: Vec<&CandidateState> = candidates
        .iter()
        .filter(|c| c.classification == Classification::Gray)
        .collect();
    let blocked: Vec<&CandidateState> = candidates
        .iter()
        .filter(|c| c.classification == Classification::Blocked)
        .collect();

    let mut sections = 0;
    if let Some(plan) = kill_plan {
        let mut printed = false;
        for cand in safe.iter().chain(gray.iter()) {
            if cand.processes.is_empty() {
                continue;
            }
            if !printed {
                writeln!(out, "Process cleanup:")?;
                printed = true;
            }
            writeln!(out, "- {}", cand.name())?;
            for proc in &cand.processes {
                writeln!(out, "    {} ({})", command_label(&proc.command), proc.pid)?;
            }
            writeln!(out, "    signal: {}", plan.signal_label)?;
        }
        if printed {
            writeln!(out)?;
        }
    }

    if !safe.is_empty() {
        sections += 1;
        writeln!(out, "Will clean up:")?;
        for cand in &safe {
            writeln!(out, "- {} (branch {})", cand.name(), cand.facts.branch)?;
            for action in planned_actions(cand) {
                writeln!(out, "    {}", action)?;
            }
        }
        writeln!(out)?;
    }
    if !gray.is_empty() {
        sections += 1;
        writeln!(out, "Will prompt for:")?;
        for cand in &gray {
            writeln!(out, "- {} (branch {})", cand.name(), cand.facts.branch)?;
            writeln!(out, "    reasons:")?;
            for reason in &cand.gray_reasons {
                writeln!(out, "      * {}", reason)?;
            }
        }
        writeln!(out)?;
    }
    if !blocked.is_empty() {
        sections += 1;
        writeln!(out, "Will skip:")?;
        for cand in &blocked {
            writeln!(out, "- {} ({})", cand.name(), cand.block_reasons.join("; "))?;
        }
    }
    if sections == 0 {
        writeln!(out, "Nothing to tidy.")?;
    }
    if (!safe.is_empty() || !gray.is_empty()) && sections > 0 {
        writeln!(out)?;
        writeln!(out, "Remote maintenance:")?;
        writeln!(out, "- git remote prune origin")?;
    }
    Ok(())
}

/// What cleanup will do for one candidate, for plans and logs.
pub fn planned_actions(cand: &CandidateState) -> Vec<String> {
    let mut actions = vec![
        format!("remove worktree {}", cand.facts.worktree.path.display()),
        format!("delete local branch {}", cand.facts.branch),
    ];
    if cand.facts.has_remote_branch {
        if cand.facts.remote_matches_head {
            actions.push(format!("delete remote branch origin/{}", cand.facts.branch));
        } else {
            actions.push(format!(
                "skip remote branch origin/{} (tip changed)",
                cand.facts.branch
            ));
        }
    }
    for pr in &cand.prs {
        if pr.is_open() {
            actions.push(format!("close PR #{}", pr.number));
        }
    }
    actions
}

fn should_prompt(class: Classification, policy: TidyPolicy) -> bool {
    match policy {
        TidyPolicy::All | TidyPolicy::Safe => false,
        TidyPolicy::Prompt => true,
        TidyPolicy::Auto => class == Classification::Gray,
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_cleanups(
    proj: &Project,
    candidates: &mut [CandidateState],
    policy: TidyPolicy,
    now: DateTime<Utc>,
    ui: &mut TidyUi,
    initial_wd: &Path,
    cancel: &CancelToken,
) -> Result<i32> {
    let interactive = ui.interactive();
    let stdin = std::io::stdin();
    let mut reader = stdin.lock();

    let mut manual_quit = false;
    let mut relocated = false;
    let mut remote_touched = false;
    let mut failures: Vec<String> = Vec::new();

    for index in 0..candidates.len() {
        if cancel.is_cancelled() {
            set_stage(candidates, index, Stage::Skipped, ui);
            continue;
        }
        match candidates[index].classification {
            Classification::Blocked => {
                set_stage(candidates, index, Stage::Blocked, ui);
                if !interactive {
                    println!(
                        "Skipped {}: {}",
                        candidates[index].name(),
                        candidates[index].block_reasons.join("; ")
                    );
                }
                continue;
            }
            Classification::Safe | Classification::Gray => {}
        }

        if manual_quit {
            set_stage(candidates, index, Stage::Skipped, ui);
            if !interactive {
                println!("Skipped {}: quit selected", candidates[index].name());
            }
            continue;
        }

        if policy == TidyPolicy::Safe
            && candidates[index].classification == Classification::Gray
        {
            set_stage(candidates, index, Stage::Skipped, ui);
            if !interactive {
                println!("Skipped {}: --policy=safe", candidates[index].name());
            }
            continue;
        }

        if should_prompt(candidates[index].classification, policy) {
            let mut stdout = std::io::stdout().lock();
            let answer = prompt_for_candidate(
                &mut stdout,
                &mut reader,
                &candidates[index],
                now,
                interactive,
            )?;
            drop(stdout);
            if interactive {
                ui.add_extra_lines(answer.lines);
            }
            if answer.quit {
                manual_quit = true;
            }
            if !answer.proceed {
                set_stage(candidates, index, Stage::Skipped, ui);
                if !interactive {
                    let why = if answer.quit { "quit selected" } else { "declined" };
                    println!("Skipped {}: {}", candidates[index].name(), why);
                }
                continue;
            }
        }

        // Standing inside the worktree being deleted would wedge git.
        if !relocated
            && is_within(
                &canonicalize_path(initial_wd),
                &canonicalize_path(&candidates[index].facts.worktree.path),
            )
        {
            std::env::set_current_dir(&proj.root)?;
            relocated = true;
        }

        set_stage(candidates, index, Stage::Cleaning, ui);
        match perform_cleanup(proj, &candidates[index], interactive) {
            Ok(touched) => {
                remote_touched |= touched;
                set_stage(candidates, index, Stage::Cleaned, ui);
            }
            Err(err) => {
                failures.push(format!("{}: {}", candidates[index].name(), err));
                set_stage(candidates, index, Stage::Error, ui);
                if !interactive {
                    println!("Failed {}: {}", candidates[index].name(), err);
                }
            }
        }
    }

    if remote_touched {
        let mut stdout = std::io::stdout().lock();
        let mut sink: gitops::LogSink<'_> = if interactive {
            None
        } else {
            Some(&mut stdout)
        };
        if let Err(err) = gitops::prune_remote(&proj.default_worktree_path, &mut sink) {
            failures.push(format!("remote prune: {}", err));
        }
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

fn set_stage(candidates: &mut [CandidateState], index: usize, stage: Stage, ui: &mut TidyUi) {
    candidates[index].stage = stage;
    let snapshot = candidates[index].clone();
    ui.update(index, &snapshot);
}

/// Remove the worktree, delete its branches, close its open PRs.
/// Returns whether a remote ref was touched (callers prune once at the end).
pub fn perform_cleanup(
    proj: &Project,
    cand: &CandidateState,
    interactive: bool,
) -> Result<bool, String> {
    let mut stdout = std::io::stdout().lock();
    let mut log: gitops::LogSink<'_> = if interactive {
        None
    } else {
        Some(&mut stdout)
    };
    if let Some(out) = log.as_deref_mut() {
        let _ = writeln!(
            out,
            "Cleaning {} (branch {})",
            cand.name(),
            cand.facts.branch
        );
    }

    gitops::git_worktree_remove(
        &proj.default_worktree_path,
        &cand.facts.worktree.path,
        &mut log,
    )?;
    gitops::git_delete_local_branch(&proj.default_worktree_path, &cand.facts.branch, &mut log)?;

    let mut remote_touched = false;
    if cand.facts.has_remote_branch {
        if cand.facts.remote_matches_head {
            gitops::git_delete_remote_branch(
                &proj.default_worktree_path,
                &cand.facts.branch,
                &mut log,
            )?;
            remote_touched = true;
        } else if let Some(out) = log.as_deref_mut() {
            let _ = writeln!(
                out,
                "  skipped remote branch origin/{} (tip changed)",
                cand.facts.branch
            );
        }
    }

    for pr in &cand.prs {
        if !pr.is_open() {
            continue;
        }
        github::close_pull_request(&proj.default_worktree_path, &cand.facts.branch, pr.number)?;
        if let Some(out) = log.as_deref_mut() {
            let _ = writeln!(out, "  closed PR #{}", pr.number);
        }
    }

    Ok(remote_touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use copse_core::facts::WorktreeFacts;
    use copse_core::pr::PullRequestInfo;
    use copse_core::project::Worktree;

    fn candidate(name: &str) -> CandidateState {
        let facts = WorktreeFacts {
            worktree: Worktree {
                name: name.to_string(),
                path: format!("/p/{name}").into(),
            },
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
            last_activity: None,
        };
        CandidateState::new(facts, "main".to_string())
    }

    #[test]
    fn test_resolve_policy_aliases_and_conflicts() {
        let mut opts = TidyOptions::default();
        assert_eq!(resolve_policy(&opts, "auto").unwrap(), TidyPolicy::Auto);

        opts.safe_alias = true;
        assert_eq!(resolve_policy(&opts, "auto").unwrap(), TidyPolicy::Safe);

        opts.all_alias = true;
        assert!(resolve_policy(&opts, "auto").is_err());

        let opts = TidyOptions {
            policy: Some("prompt".to_string()),
            prompt_alias: true,
            ..TidyOptions::default()
        };
        assert_eq!(resolve_policy(&opts, "auto").unwrap(), TidyPolicy::Prompt);

        let opts = TidyOptions {
            policy: Some("yolo".to_string()),
            ..TidyOptions::default()
        };
        assert!(resolve_policy(&opts, "auto").is_err());
    }

    #[test]
    fn test_should_prompt_matrix() {
        assert!(!should_prompt(Classification::Safe, TidyPolicy::Auto));
        assert!(should_prompt(Classification::Gray, TidyPolicy::Auto));
        assert!(!should_prompt(Classification::Gray, TidyPolicy::All));
        assert!(!should_prompt(Classification::Gray, TidyPolicy::Safe));
        assert!(should_prompt(Classification::Safe, TidyPolicy::Prompt));
    }

    #[test]
    fn test_planned_actions_remote_variants() {
        let mut cand = candidate("w");
        cand.facts.has_remote_branch = true;
        cand.facts.remote_matches_head = true;
        cand.prs = vec![PullRequestInfo {
            number: 9,
            state: "OPEN".to_string(),
            is_draft: false,
            updated_at: None,
            url: String::new(),
        }];
        let actions = planned_actions(&cand);
        assert!(actions.iter().any(|a| a.starts_with("remove worktree")));
        assert!(actions.contains(&"delete remote branch origin/w".to_string()));
        assert!(actions.contains(&"close PR #9".to_string()));

        cand.facts.remote_matches_head = false;
        let actions = planned_actions(&cand);
        assert!(
            actions.contains(&"skip remote branch origin/w (tip changed)".to_string()),
            "{actions:?}"
        );
    }

    #[test]
    fn test_render_dry_run_sections() {
        let mut safe = candidate("tidy-me");
        safe.classification = Classification::Safe;
        let mut gray = candidate("ask-me");
        gray.classification = Classification::Gray;
        gray.gray_reasons = vec!["stale for 30 days".to_string()];
        let mut blocked = candidate("keep-me");
        blocked.classification = Classification::Blocked;
        blocked.block_reasons = vec!["worktree has uncommitted changes".to_string()];

        let mut out = Vec::new();
        render_dry_run(&mut out, &[safe, gray, blocked], None).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Will clean up:\n- tidy-me"));
        assert!(text.contains("Will prompt for:\n- ask-me"));
        assert!(text.contains("* stale for 30 days"));
        assert!(text.contains("Will skip:\n- keep-me (worktree has uncommitted changes)"));
        assert!(text.contains("git remote prune origin"));
    }

    #[test]
    fn test_render_dry_run_empty() {
        let mut out = Vec::new();
        render_dry_run(&mut out, &[], None).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Nothing to tidy.\n");
    }
}
