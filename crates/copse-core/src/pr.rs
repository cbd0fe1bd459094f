//! Pull request metadata and the workflow-aware summary shown in prompts
//! and in the dashboard's detail column.

use chrono::{DateTime, Utc};

/// One pull request as reported by the remote provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub number: u64,
    pub state: String,
    pub is_draft: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub url: String,
}

impl PullRequestInfo {
    /// Open regardless of draft status.
    pub fn is_open(&self) -> bool {
        self.state.eq_ignore_ascii_case("open")
    }

    /// Lowercased state with open drafts reported as "draft".
    pub fn state_label(&self) -> String {
        let state = self.state.to_lowercase();
        if self.is_draft && state == "open" {
            return "draft".to_string();
        }
        state
    }
}

/// The PRs currently open for a branch.
pub fn open_pull_requests(prs: &[PullRequestInfo]) -> Vec<&PullRequestInfo> {
    prs.iter().filter(|pr| pr.is_open()).collect()
}

/// Whether the repository's workflow is expected to back unique commits
/// with a pull request. Local-first repositories are not nagged about
/// missing PRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkflowExpectations {
    pub prs_expected: bool,
}

/// Inputs that gate whether a PR summary is worth showing at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrContext {
    pub has_pending_work: bool,
    pub has_unique_commits: bool,
}

/// The PR portion of a candidate's detail column and gray reasoning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrSummary {
    /// Text describing the in-flight operation, when one exists
    pub operation: String,
    /// Text for the dashboard detail column
    pub column: String,
    /// Reason contributed to gray classification, when any
    pub reason: String,
}

/// Summarize pull-request state for a worktree that may carry pending work.
pub fn summarize_pull_request_state(
    ctx: PrContext,
    prs: &[PullRequestInfo],
    workflow: WorkflowExpectations,
) -> PrSummary {
    if !ctx.has_pending_work {
        return PrSummary::default();
    }
    let active = open_pull_requests(prs);
    if !active.is_empty() {
        let text = if active.len() == 1 {
            format!("PR {}", format_single_pr(active[0]))
        } else {
            format_multiple_prs(&active)
        };
        return PrSummary {
            operation: text.clone(),
            column: text,
            reason: String::new(),
        };
    }
    if !ctx.has_unique_commits {
        return PrSummary::default();
    }
    if prs.is_empty() {
        if !workflow.prs_expected {
            return PrSummary::default();
        }
        return PrSummary {
            operation: String::new(),
            column: "No PR".to_string(),
            reason: "No PR".to_string(),
        };
    }
    // Only closed/merged PRs remain, yet unique commits exist on the branch.
    let pr = &prs[0];
    let text = format!(
        "PR #{} {}; unpublished commits",
        pr.number,
        pr.state_label()
    );
    PrSummary {
        operation: text.clone(),
        column: text.clone(),
        reason: text,
    }
}

pub fn format_single_pr(pr: &PullRequestInfo) -> String {
    format!("#{} {}", pr.number, pr.state_label())
}

pub fn format_multiple_prs(prs: &[&PullRequestInfo]) -> String {
    let nums: Vec<String> = prs
        .iter()
        .take(3)
        .map(|pr| format!("#{}", pr.number))
        .collect();
    format!("PR {} multiple", nums.join(", "))
}
