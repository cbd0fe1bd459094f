//! The init command: mark a directory as a copse project

use anyhow::Result;

use copse_core::project::{ensure_config, resolve_default_worktree};

pub fn run_init() -> Result<i32> {
    let root = std::env::current_dir()?;

    // Use whichever default worktree already exists; "main" when starting
    // from nothing.
    let default_branch = match resolve_default_worktree(&root) {
        Ok((name, _)) => name,
        Err(_) => "main".to_string(),
    };

    let existed = root.join(".copse").join("config.toml").exists();
    let cfg = ensure_config(&root, &default_branch)?;
    if existed {
        println!(
            "Project already initialized (default branch {})",
            cfg.default_branch
        );
    } else {
        println!(
            "Initialized copse project in {} (default branch {})",
            root.display(),
            cfg.default_branch
        );
    }
    Ok(0)
}
