//! The classification rules engine
//!
//! Pure: reads a candidate's facts, PRs, and process notices; writes its
//! classification, stage, and reason lists. No I/O, no clocks beyond the
//! `now` argument.

use chrono::{DateTime, Utc};

use crate::candidate::{CandidateState, Classification, Stage};
use crate::pr::{self, PrContext, WorkflowExpectations};

/// Tunable thresholds from `[tidy]` config.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub stale_days: i64,
    pub divergence_commits: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            stale_days: 14,
            divergence_commits: 20,
        }
    }
}

/// Derive classification, stage, and gray reasons for one candidate.
///
/// Block reasons were accumulated when facts were gathered; any present
/// means Blocked. Otherwise the candidate is Safe unless something needs an
/// operator's eyes, in which case every applicable reason is listed, in a
/// fixed order, so the prompt shows the whole picture.
pub fn classify(
    cand: &mut CandidateState,
    thresholds: &Thresholds,
    workflow: WorkflowExpectations,
    now: DateTime<Utc>,
) {
    if !cand.block_reasons.is_empty() {
        cand.classification = Classification::Blocked;
        if !cand.stage.is_mutating() {
            cand.stage = Stage::Blocked;
        }
        cand.gray_reasons.clear();
        return;
    }

    let mut reasons: Vec<String> = cand.fetch_reasons.clone();

    // A tree identical to the comparison ref means the work already landed,
    // however it was merged; cherry counts alone cannot see squash merges.
    let needs_decision = cand.facts.unique_commits > 0 && !cand.facts.tree_matches_default;

    if needs_decision {
        reasons.push(format!("commits not merged into {}", cand.compare_label));

        let open = pr::open_pull_requests(&cand.prs);
        if !open.is_empty() {
            for pr in &open {
                reasons.push(format!("PR #{} {}", pr.number, pr.state_label()));
            }
        } else {
            let summary = pr::summarize_pull_request_state(
                PrContext {
                    has_pending_work: cand.has_pending_work(),
                    has_unique_commits: cand.facts.unique_commits > 0,
                },
                &cand.prs,
                workflow,
            );
            if !summary.reason.is_empty() {
                reasons.push(summary.reason);
            }
        }

        if thresholds.divergence_commits > 0 {
            let divergence = cand.facts.base_ahead.abs().max(cand.facts.base_behind.abs());
            if divergence > thresholds.divergence_commits {
                reasons.push(format!(
                    "diverged +{}/-{} from {}",
                    cand.facts.base_ahead, cand.facts.base_behind, cand.compare_label
                ));
            }
        }

        if thresholds.stale_days > 0 {
            if let Some(last) = cand.facts.last_activity {
                let days_old = (now - last).num_hours() / 24;
                if days_old > thresholds.stale_days {
                    reasons.push(format!("stale for {} days", days_old));
                }
            }
        }
    }

    if cand.prs.len() > 1 {
        let all: Vec<&crate::pr::PullRequestInfo> = cand.prs.iter().collect();
        reasons.push(format!(
            "multiple PRs ({})",
            all.iter()
                .take(3)
                .map(|pr| format!("#{}", pr.number))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    if needs_decision && reasons.is_empty() {
        reasons.push("manual review".to_string());
    }

    if reasons.is_empty() {
        cand.gray_reasons.clear();
        cand.classification = Classification::Safe;
        cand.stage = Stage::Ready;
    } else {
        cand.gray_reasons = reasons;
        cand.classification = Classification::Gray;
        cand.stage = Stage::AwaitingInput;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::WorktreeFacts;
    use crate::pr::PullRequestInfo;
    use crate::processes::ProcessInfo;
    use crate::project::Worktree;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    fn candidate() -> CandidateState {
        let wt = Worktree {
            name: "breezy-fern".to_string(),
            path: "/p/breezy-fern".into(),
        };
        let facts = WorktreeFacts {
            worktree: wt,
            branch: "breezy-fern".to_string(),
            head_hash: "abc123".to_string(),
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
            last_activity: Some(now() - Duration::days(1)),
        };
        CandidateState::new(facts, "main".to_string())
    }

    fn open_pr(number: u64) -> PullRequestInfo {
        PullRequestInfo {
            number,
            state: "OPEN".to_string(),
            is_draft: false,
            updated_at: None,
            url: String::new(),
        }
    }

    #[test]
    fn test_no_unique_work_is_safe_with_no_reasons() {
        let mut cand = candidate();
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Safe);
        assert_eq!(cand.stage, Stage::Ready);
        assert!(cand.gray_reasons.is_empty());
    }

    #[test]
    fn test_block_reasons_win_and_clear_gray() {
        let mut cand = candidate();
        cand.facts.unique_commits = 3;
        cand.block_reasons = vec![
            "worktree has uncommitted changes".to_string(),
            "stash entries reference this branch".to_string(),
        ];
        cand.gray_reasons = vec!["leftover".to_string()];
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Blocked);
        assert_eq!(cand.stage, Stage::Blocked);
        assert!(cand.gray_reasons.is_empty());
        assert_eq!(cand.block_reasons.len(), 2);
    }

    #[test]
    fn test_mutating_stage_is_sticky_under_blocked() {
        let mut cand = candidate();
        cand.block_reasons = vec!["detached HEAD".to_string()];
        cand.stage = Stage::Cleaning;
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Blocked);
        assert_eq!(cand.stage, Stage::Cleaning);
    }

    #[test]
    fn test_divergence_boundary_is_strict() {
        let thresholds = Thresholds {
            stale_days: 14,
            divergence_commits: 20,
        };
        let mut cand = candidate();
        cand.facts.unique_commits = 1;
        cand.facts.base_ahead = 20;
        classify(&mut cand, &thresholds, WorkflowExpectations::default(), now());
        assert!(
            !cand.gray_reasons.iter().any(|r| r.starts_with("diverged")),
            "{:?}",
            cand.gray_reasons
        );

        cand.facts.base_ahead = 21;
        classify(&mut cand, &thresholds, WorkflowExpectations::default(), now());
        assert!(cand.gray_reasons.iter().any(|r| r == "diverged +21/-0 from main"));
    }

    #[test]
    fn test_staleness_boundary_is_strict() {
        let thresholds = Thresholds {
            stale_days: 14,
            divergence_commits: 20,
        };
        let mut cand = candidate();
        cand.facts.unique_commits = 1;
        cand.facts.last_activity = Some(now() - Duration::days(14));
        classify(&mut cand, &thresholds, WorkflowExpectations::default(), now());
        assert!(
            !cand.gray_reasons.iter().any(|r| r.starts_with("stale")),
            "{:?}",
            cand.gray_reasons
        );

        cand.facts.last_activity = Some(now() - Duration::days(15));
        classify(&mut cand, &thresholds, WorkflowExpectations::default(), now());
        assert!(cand.gray_reasons.iter().any(|r| r == "stale for 15 days"));
    }

    #[test]
    fn test_tree_match_short_circuits_unmerged_reason() {
        let mut cand = candidate();
        cand.facts.unique_commits = 4;
        cand.facts.tree_matches_default = true;
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Safe);
        assert!(cand.gray_reasons.is_empty());
    }

    #[test]
    fn test_processes_force_gray_even_when_otherwise_safe() {
        let mut cand = candidate();
        cand.set_processes(vec![ProcessInfo {
            pid: 7,
            ppid: 1,
            command: "cargo watch".to_string(),
            cwd: "/p/breezy-fern".to_string(),
        }]);
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Gray);
        assert!(cand.gray_reasons[0].starts_with("processes running:"));
    }

    #[test]
    fn test_unique_commits_alone_still_name_the_comparison_ref() {
        let mut cand = candidate();
        cand.facts.unique_commits = 1;
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Gray);
        assert_eq!(
            cand.gray_reasons,
            vec!["commits not merged into main".to_string()]
        );
    }

    #[test]
    fn test_multiple_prs_listed_even_without_unique_commits() {
        let mut cand = candidate();
        cand.prs = vec![open_pr(1), open_pr(2), open_pr(3), open_pr(4)];
        classify(&mut cand, &Thresholds::default(), WorkflowExpectations::default(), now());
        assert_eq!(cand.classification, Classification::Gray);
        assert!(cand
            .gray_reasons
            .iter()
            .any(|r| r == "multiple PRs (#1, #2, #3)"));
    }

    #[test]
    fn test_no_pr_reason_only_in_remote_first_workflow() {
        let mut cand = candidate();
        cand.facts.unique_commits = 2;
        classify(
            &mut cand,
            &Thresholds::default(),
            WorkflowExpectations { prs_expected: true },
            now(),
        );
        assert!(cand.gray_reasons.iter().any(|r| r == "No PR"));
    }

    #[test]
    fn test_end_to_end_reason_order() {
        let thresholds = Thresholds {
            stale_days: 14,
            divergence_commits: 20,
        };
        let mut cand = candidate();
        cand.facts.unique_commits = 5;
        cand.facts.base_ahead = 25;
        cand.facts.base_behind = 0;
        cand.facts.last_activity = Some(now() - Duration::days(1));
        cand.prs = vec![open_pr(42)];
        classify(&mut cand, &thresholds, WorkflowExpectations { prs_expected: true }, now());

        assert_eq!(cand.classification, Classification::Gray);
        assert_eq!(
            cand.gray_reasons,
            vec![
                "commits not merged into main".to_string(),
                "PR #42 open".to_string(),
                "diverged +25/-0 from main".to_string(),
            ]
        );
    }
}
