//! copse CLI - personal git-worktree manager

mod candidates;
mod cli;
mod commands;
mod github;
mod gitops;
mod pipeline;
mod procctl;
mod prompt;
mod render;

use std::process::ExitCode;

use cli::Commands;
use commands::tidy::TidyOptions;

fn main() -> ExitCode {
    let cli = cli::parse();

    let result = match cli.command {
        // No subcommand: the dashboard.
        None | Some(Commands::Status) => commands::status::run_status(),
        Some(Commands::Tidy {
            dry_run,
            policy,
            safe,
            all,
            prompt,
            kill,
            timeout,
        }) => commands::tidy::run_tidy(&TidyOptions {
            dry_run,
            policy,
            safe_alias: safe,
            all_alias: all,
            prompt_alias: prompt,
            kill,
            timeout,
        }),
        Some(Commands::Rm {
            targets,
            dry_run,
            force,
        }) => commands::rm::run_rm(
            &commands::rm::RmOptions { dry_run, force },
            &targets,
        ),
        Some(Commands::Kill {
            worktrees,
            dry_run,
            signal,
            timeout,
            sigkill,
        }) => commands::kill::run_kill(
            &commands::kill::KillOptions {
                dry_run,
                signal,
                timeout,
                sigkill,
            },
            &worktrees,
        ),
        Some(Commands::Init) => commands::init::run_init(),
    };

    match result {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}
