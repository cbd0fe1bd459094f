//! CLI argument parsing with clap derive

use clap::{Parser, Subcommand};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// copse - personal git-worktree manager
#[derive(Parser)]
#[command(name = "copse")]
#[command(version = VERSION)]
#[command(about = "Personal git-worktree manager with a live PR/CI dashboard")]
#[command(
    long_about = "copse manages a directory of git worktrees: one project root, a main/ (or master/) default worktree, and one sibling directory per branch.\n\nRunning copse with no subcommand shows the status dashboard: every worktree with its branch, recency, pull-request state, and CI state, updating live as results arrive.\n\ntidy and rm classify each worktree as safe, gray, or blocked before touching anything; kill terminates processes still running inside a worktree."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the status dashboard
    ///
    /// One row per worktree: branch, divergence, recency, PR and CI state.
    Status,

    /// Clean up merged or stale worktrees
    ///
    /// Classifies every worktree, then deletes safe ones and prompts for
    /// ambiguous ones according to the policy.
    #[command(
        long_about = "Clean up merged or stale worktrees.\n\nEach worktree is classified:\n  safe     no unmerged work; deleted without asking\n  gray     something needs a decision (open PR, divergence, staleness)\n  blocked  never deleted (dirty, stashed, detached, shared branch)\n\nPolicies:\n  auto    delete safe, prompt for gray (default)\n  safe    delete safe, skip gray\n  all     delete safe and gray without prompting\n  prompt  prompt for everything"
    )]
    Tidy {
        /// Show actions without deleting anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Tidy policy: auto (default), safe, all, or prompt
        #[arg(long)]
        policy: Option<String>,

        /// Alias for --policy safe
        #[arg(short, long)]
        safe: bool,

        /// Alias for --policy all
        #[arg(short, long)]
        all: bool,

        /// Alias for --policy prompt
        #[arg(short, long)]
        prompt: bool,

        /// Terminate blocking processes before cleanup (optionally pass a signal)
        #[arg(
            short = 'k',
            long,
            num_args = 0..=1,
            default_missing_value = "true",
            value_name = "SIGNAL"
        )]
        kill: Option<String>,

        /// Time to wait for --kill to succeed (e.g. 3s)
        #[arg(long, value_name = "DURATION")]
        timeout: Option<String>,
    },

    /// Remove specific worktrees using tidy safety checks
    #[command(
        long_about = "Remove specific worktrees using the tidy safety checks.\n\nTargets may be worktree names or paths; with no target, the worktree containing the current directory is removed. The default worktree is always refused.\n\n--force clears block reasons (with a warning) and falls back to rm -rf when git refuses to remove the worktree."
    )]
    Rm {
        /// Worktree names or paths
        targets: Vec<String>,

        /// Show actions without deleting anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Skip the confirmation prompt for gray worktrees
        #[arg(short, long)]
        force: bool,
    },

    /// Terminate processes running inside worktrees
    #[command(
        long_about = "Terminate processes running inside worktrees.\n\nLists the processes whose working directory sits inside each target worktree, sends them a signal, and waits for them to exit. Exits non-zero if any process survives the timeout."
    )]
    Kill {
        /// Worktree names or paths
        #[arg(required = true)]
        worktrees: Vec<String>,

        /// Show which processes would be terminated
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Signal to send (numeric or name like TERM, HUP)
        #[arg(short, long, value_name = "SIGNAL")]
        signal: Option<String>,

        /// Time to wait for processes to exit (e.g. 3s)
        #[arg(long, value_name = "DURATION")]
        timeout: Option<String>,

        /// Shorthand for --signal=9
        #[arg(short = '9', long, hide = true)]
        sigkill: bool,
    },

    /// Initialize a copse project in the current directory
    ///
    /// Creates .copse/config.toml with defaults.
    Init,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_kill_flag_optional_value() {
        let cli = Cli::try_parse_from(["copse", "tidy", "--kill"]).unwrap();
        match cli.command {
            Some(Commands::Tidy { kill, .. }) => assert_eq!(kill.as_deref(), Some("true")),
            _ => panic!("expected tidy"),
        }

        let cli = Cli::try_parse_from(["copse", "tidy", "--kill", "9"]).unwrap();
        match cli.command {
            Some(Commands::Tidy { kill, .. }) => assert_eq!(kill.as_deref(), Some("9")),
            _ => panic!("expected tidy"),
        }

        let cli = Cli::try_parse_from(["copse", "tidy"]).unwrap();
        match cli.command {
            Some(Commands::Tidy { kill, .. }) => assert!(kill.is_none()),
            _ => panic!("expected tidy"),
        }
    }

    #[test]
    fn test_no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["copse"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_kill_requires_targets() {
        assert!(Cli::try_parse_from(["copse", "kill"]).is_err());
    }
}
