//! The kill command: terminate processes running inside worktrees

use anyhow::{Result, bail};

use copse_core::processes::{canonicalize_path, command_label};
use copse_core::project::{Project, list_worktrees};

use crate::candidates::resolve_worktree_args;
use crate::pipeline::CancelToken;
use crate::procctl;

#[derive(Debug, Default)]
pub struct KillOptions {
    pub dry_run: bool,
    pub signal: Option<String>,
    pub timeout: Option<String>,
    pub sigkill: bool,
}

pub fn run_kill(opts: &KillOptions, args: &[String]) -> Result<i32> {
    let wd = std::env::current_dir()?;
    let proj = Project::discover(&wd)?;

    let worktrees = list_worktrees(&proj.root)?;
    let targets =
        resolve_worktree_args(&worktrees, args, &wd).map_err(|e| anyhow::anyhow!(e))?;

    let signal_spec = match (&opts.signal, opts.sigkill) {
        (Some(spec), _) => Some(spec.as_str()),
        (None, true) => Some("9"),
        (None, false) => None,
    };
    let settings = procctl::resolve_kill_settings(
        signal_spec,
        opts.timeout.as_deref(),
        proj.config.process.kill_timeout_duration(),
    )
    .map_err(|e| anyhow::anyhow!(e))?;

    let Some(process_map) =
        procctl::detect_for_targets(&targets).map_err(|e| anyhow::anyhow!(e))?
    else {
        bail!("process detection unsupported on this platform");
    };

    let cancel = CancelToken::new();
    cancel.install_interrupt_handler();
    let terminator = procctl::new_terminator();
    let mut failures: Vec<String> = Vec::new();

    for (i, target) in targets.iter().enumerate() {
        let key = canonicalize_path(&target.path);
        let procs = process_map.get(&key).cloned().unwrap_or_default();

        println!("{}:", target.name);
        if procs.is_empty() {
            println!("  nothing to kill");
            if i < targets.len() - 1 {
                println!();
            }
            continue;
        }

        for proc in &procs {
            println!("  - {} ({})", command_label(&proc.command), proc.pid);
        }
        let action = format!(
            "{} to {} {}",
            settings.signal_label,
            procs.len(),
            if procs.len() == 1 { "process" } else { "processes" }
        );
        if opts.dry_run {
            println!("  would send {}", action);
        } else {
            println!("  sending {}", action);
            match procctl::terminate_worktree_processes(
                target,
                &procs,
                &settings,
                terminator.as_ref(),
                &cancel,
            ) {
                Ok(()) => println!("  cleared"),
                Err(err) => {
                    println!("  error: {}", err);
                    failures.push(format!("{}: {}", target.name, err));
                }
            }
        }

        if i < targets.len() - 1 {
            println!();
        }
    }

    if failures.is_empty() { Ok(0) } else { Ok(1) }
}
