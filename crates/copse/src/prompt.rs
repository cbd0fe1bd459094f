//! The per-candidate confirmation panel for tidy and rm
//!
//! Writes a small fact panel and reads a y/N/q answer from the given
//! reader. Returns how many lines it printed so the live renderer can
//! avoid clobbering the exchange on its next paint.

use std::io::{BufRead, Write};

use chrono::{DateTime, Utc};
use console::Style;

use copse_core::candidate::CandidateState;
use copse_core::git;
use copse_core::processes::{DEFAULT_SUMMARY_LIMIT, summarize_processes};
use copse_core::timefmt;

use crate::candidates::describe_pr_summary;

/// Outcome of one prompt round.
#[derive(Debug, PartialEq, Eq)]
pub struct PromptAnswer {
    pub proceed: bool,
    pub quit: bool,
    /// Lines written to the terminal, prompt and echo included
    pub lines: usize,
}

struct PromptStyles {
    title: Style,
    divider: Style,
    label: Style,
    value: Style,
    reason: Style,
    warn: Style,
    good: Style,
}

impl PromptStyles {
    fn new(color: bool) -> PromptStyles {
        if !color {
            return PromptStyles {
                title: Style::new(),
                divider: Style::new(),
                label: Style::new(),
                value: Style::new(),
                reason: Style::new(),
                warn: Style::new(),
                good: Style::new(),
            };
        }
        PromptStyles {
            title: Style::new().blue().bold(),
            divider: Style::new().dim(),
            label: Style::new().bold(),
            value: Style::new().cyan(),
            reason: Style::new().magenta(),
            warn: Style::new().red().bold(),
            good: Style::new().green().bold(),
        }
    }
}

/// Show the panel and ask "Proceed with cleanup?".
pub fn prompt_for_candidate(
    out: &mut dyn Write,
    reader: &mut dyn BufRead,
    cand: &CandidateState,
    now: DateTime<Utc>,
    interactive: bool,
) -> std::io::Result<PromptAnswer> {
    let styles = PromptStyles::new(interactive);
    let mut panel = String::new();

    let title = format!("{} (branch {})", cand.name(), cand.facts.branch);
    let divider = "-".repeat(title.len().clamp(40, 80));
    panel.push('\n');
    panel.push_str(&format!(
        "{}\n{}\n",
        styles.title.apply_to(&title),
        styles.divider.apply_to(&divider)
    ));

    let field = |panel: &mut String, label: &str, value: String| {
        panel.push_str(&format!(
            "  {:<14} {}\n",
            styles.label.apply_to(label),
            value
        ));
    };
    let bool_value = |v: bool| {
        let text = if v { "yes" } else { "no" };
        if v {
            styles.warn.apply_to(text).to_string()
        } else {
            styles.good.apply_to(text).to_string()
        }
    };

    field(
        &mut panel,
        "PR:",
        styles.value.apply_to(describe_pr_summary(cand)).to_string(),
    );
    field(
        &mut panel,
        "Divergence:",
        styles
            .value
            .apply_to(format!(
                "+{}/-{} vs {}",
                cand.facts.base_ahead, cand.facts.base_behind, cand.compare_label
            ))
            .to_string(),
    );
    field(
        &mut panel,
        "Last activity:",
        styles
            .value
            .apply_to(timefmt::relative(cand.facts.last_activity, now))
            .to_string(),
    );
    field(
        &mut panel,
        "Dirty/Stash:",
        format!(
            "{} / {}",
            bool_value(cand.facts.dirty),
            bool_value(cand.facts.has_stash)
        ),
    );
    field(
        &mut panel,
        "Processes:",
        styles
            .value
            .apply_to(summarize_processes(&cand.processes, DEFAULT_SUMMARY_LIMIT))
            .to_string(),
    );
    field(
        &mut panel,
        "Worktree:",
        styles
            .value
            .apply_to(cand.facts.worktree.path.display().to_string())
            .to_string(),
    );

    if !cand.gray_reasons.is_empty() {
        panel.push_str(&format!("{}\n", styles.label.apply_to("  Reasons:")));
        for reason in &cand.gray_reasons {
            panel.push_str(&format!("    - {}\n", styles.reason.apply_to(reason)));
        }
    } else {
        panel.push('\n');
    }

    // The commit graph is worth a git call when someone is looking at it;
    // scripted runs skip it.
    if interactive {
        if let Some(graph) = recent_commits(cand) {
            panel.push_str(&format!("{}\n", styles.label.apply_to("  Recent commits:")));
            for line in graph.lines() {
                panel.push_str(&format!("    {}\n", line));
            }
        }
    }

    write!(out, "{}", panel)?;
    let prompt = "Proceed with cleanup? [y/N/q]: ";
    write!(out, "{}", styles.label.apply_to(prompt))?;
    out.flush()?;

    let mut resp = String::new();
    let read = reader.read_line(&mut resp);
    writeln!(out)?;
    let lines = panel.matches('\n').count() + 2;
    if let Err(e) = read {
        if e.kind() != std::io::ErrorKind::UnexpectedEof {
            return Err(e);
        }
    }

    let resp = resp.trim().to_lowercase();
    Ok(PromptAnswer {
        proceed: resp == "y" || resp == "yes",
        quit: resp == "q" || resp == "quit",
        lines,
    })
}

fn recent_commits(cand: &CandidateState) -> Option<String> {
    let out = git::run(
        &cand.facts.worktree.path,
        &["log", "--oneline", "--decorate", "-n", "5"],
    )
    .ok()?;
    if out.trim().is_empty() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use copse_core::facts::WorktreeFacts;
    use copse_core::project::Worktree;
    use std::io::BufReader;

    fn candidate(path: &std::path::Path) -> CandidateState {
        let facts = WorktreeFacts {
            worktree: Worktree {
                name: "feature/prompts".to_string(),
                path: path.to_path_buf(),
            },
            branch: "feature/prompts".to_string(),
            head_hash: "abc".to_string(),
            dirty: false,
            has_stash: false,
            operation: None,
            ahead: 0,
            behind: 0,
            base_ahead: 2,
            base_behind: 0,
            unique_commits: 2,
            merged_into_default: false,
            tree_matches_default: false,
            has_remote_branch: false,
            remote_matches_head: false,
            last_activity: Some(Utc::now()),
        };
        let mut cand = CandidateState::new(facts, "main".to_string());
        cand.gray_reasons = vec!["stale".to_string()];
        cand
    }

    #[test]
    fn test_prompt_answers() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path());
        for (input, proceed, quit) in [
            ("y\n", true, false),
            ("yes\n", true, false),
            ("n\n", false, false),
            ("\n", false, false),
            ("q\n", false, true),
        ] {
            let mut out = Vec::new();
            let mut reader = BufReader::new(input.as_bytes());
            let answer =
                prompt_for_candidate(&mut out, &mut reader, &cand, Utc::now(), false).unwrap();
            assert_eq!(answer.proceed, proceed, "input {input:?}");
            assert_eq!(answer.quit, quit, "input {input:?}");
            assert!(answer.lines > 5);
        }
    }

    #[test]
    fn test_prompt_panel_contents() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path());
        let mut out = Vec::new();
        let mut reader = BufReader::new("n\n".as_bytes());
        prompt_for_candidate(&mut out, &mut reader, &cand, Utc::now(), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("feature/prompts (branch feature/prompts)"));
        assert!(text.contains("+2/-0 vs main"));
        assert!(text.contains("- stale"));
        assert!(text.contains("Proceed with cleanup? [y/N/q]:"));
    }

    #[test]
    fn test_prompt_skips_commit_graph_when_not_interactive() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path());
        let mut out = Vec::new();
        let mut reader = BufReader::new("n\n".as_bytes());
        prompt_for_candidate(&mut out, &mut reader, &cand, Utc::now(), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Recent commits:"));
    }

    #[test]
    fn test_prompt_reports_line_count_matching_output() {
        let dir = tempfile::tempdir().unwrap();
        let cand = candidate(dir.path());
        let mut out = Vec::new();
        let mut reader = BufReader::new("n\n".as_bytes());
        let answer =
            prompt_for_candidate(&mut out, &mut reader, &cand, Utc::now(), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        // Panel newlines plus the prompt line and the echo newline.
        assert_eq!(answer.lines, text.matches('\n').count() + 1);
    }
}
