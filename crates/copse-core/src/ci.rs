//! CI state model and run summarization
//!
//! The provider hands over flat run records (check runs or workflow runs);
//! the precedence logic here reduces them to a single state per worktree,
//! keeping the first failing run for label display.

use chrono::{DateTime, Utc};

/// Aggregate CI disposition for one worktree's head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CiState {
    #[default]
    Unknown,
    Success,
    Pending,
    Failure,
    Warning,
    Error,
}

/// One check run or workflow run, retained for the focused worktree's detail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CiRunSummary {
    pub name: String,
    pub status: String,
    pub conclusion: String,
    pub url: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Provider-neutral input record for summarization.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub name: String,
    pub status: String,
    pub conclusion: String,
    pub url: String,
    pub head_sha: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of one CI lookup.
#[derive(Debug, Clone, Default)]
pub struct CiResult {
    pub state: CiState,
    pub failure: Option<CiRunSummary>,
    pub message: String,
}

impl RunRecord {
    fn to_summary(&self) -> CiRunSummary {
        CiRunSummary {
            name: self.name.trim().to_string(),
            status: self.status.to_lowercase(),
            conclusion: self.conclusion.to_lowercase(),
            url: self.url.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Reduce check runs to a single state: failure > pending > success >
/// warning > unknown. Neutral/skipped conclusions count as warnings.
pub fn summarize_check_runs(runs: &[RunRecord]) -> CiResult {
    let mut failure: Option<CiRunSummary> = None;
    let mut has_pending = false;
    let mut has_success = false;
    let mut has_warning = false;

    for run in runs {
        let summary = run.to_summary();
        match summary.status.as_str() {
            "queued" | "in_progress" => {
                has_pending = true;
                continue;
            }
            _ => {}
        }
        match summary.conclusion.as_str() {
            "success" => has_success = true,
            "" | "neutral" | "skipped" => has_warning = true,
            _ => {
                if failure.is_none() {
                    failure = Some(summary);
                }
            }
        }
    }

    if let Some(failure) = failure {
        return CiResult {
            state: CiState::Failure,
            failure: Some(failure),
            message: String::new(),
        };
    }
    let state = if has_pending {
        CiState::Pending
    } else if has_success {
        CiState::Success
    } else if has_warning {
        CiState::Warning
    } else {
        CiState::Unknown
    };
    CiResult {
        state,
        failure: None,
        message: String::new(),
    }
}

/// Reduce workflow runs for a branch, considering only runs for the given
/// head commit when one is known.
pub fn summarize_workflow_runs(runs: &[RunRecord], head: &str) -> CiResult {
    let mut failure: Option<CiRunSummary> = None;
    let mut has_pending = false;
    let mut has_success = false;

    for run in runs {
        if !head.is_empty() && !run.head_sha.eq_ignore_ascii_case(head) {
            continue;
        }
        let summary = run.to_summary();
        match summary.status.as_str() {
            "queued" | "in_progress" => {
                has_pending = true;
                continue;
            }
            _ => {}
        }
        match summary.conclusion.as_str() {
            "success" => has_success = true,
            "failure" | "cancelled" | "timed_out" | "action_required"
            | "startup_failure" | "stale" => {
                if failure.is_none() {
                    failure = Some(summary);
                }
            }
            _ => {}
        }
    }

    if let Some(failure) = failure {
        return CiResult {
            state: CiState::Failure,
            failure: Some(failure),
            message: String::new(),
        };
    }
    let state = if has_pending {
        CiState::Pending
    } else if has_success {
        CiState::Success
    } else {
        CiState::Unknown
    };
    CiResult {
        state,
        failure: None,
        message: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str, conclusion: &str) -> RunRecord {
        RunRecord {
            name: "build".to_string(),
            status: status.to_string(),
            conclusion: conclusion.to_string(),
            ..RunRecord::default()
        }
    }

    #[test]
    fn test_check_runs_failure_wins() {
        let runs = vec![
            record("completed", "success"),
            record("in_progress", ""),
            record("completed", "failure"),
        ];
        let result = summarize_check_runs(&runs);
        assert_eq!(result.state, CiState::Failure);
        assert_eq!(result.failure.unwrap().conclusion, "failure");
    }

    #[test]
    fn test_check_runs_pending_beats_success() {
        let runs = vec![record("completed", "success"), record("queued", "")];
        assert_eq!(summarize_check_runs(&runs).state, CiState::Pending);
    }

    #[test]
    fn test_check_runs_neutral_is_warning() {
        let runs = vec![record("completed", "neutral")];
        assert_eq!(summarize_check_runs(&runs).state, CiState::Warning);
        assert_eq!(summarize_check_runs(&[]).state, CiState::Unknown);
    }

    #[test]
    fn test_workflow_runs_filter_by_head() {
        let mut matching = record("completed", "failure");
        matching.head_sha = "abc123".to_string();
        let mut other = record("completed", "success");
        other.head_sha = "fff999".to_string();

        let result = summarize_workflow_runs(&[other.clone(), matching], "ABC123");
        assert_eq!(result.state, CiState::Failure);

        // With no matching run for the head, nothing is known.
        let result = summarize_workflow_runs(&[other], "abc123");
        assert_eq!(result.state, CiState::Unknown);
    }

    #[test]
    fn test_workflow_runs_unrecognized_conclusion_ignored() {
        let runs = vec![record("completed", "neutral")];
        assert_eq!(summarize_workflow_runs(&runs, "").state, CiState::Unknown);
    }
}
