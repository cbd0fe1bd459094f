//! The candidate aggregate shared by the dashboard and mutating commands
//!
//! One `CandidateState` per worktree per command run. The owning command's
//! main thread is the only mutator; everything else reads.

use crate::ci::{CiResult, CiState};
use crate::facts::WorktreeFacts;
use crate::pr::PullRequestInfo;
use crate::processes::ProcessInfo;

/// Deletion disposition tiers: delete freely, confirm first, never.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Classification {
    #[default]
    Blocked,
    Safe,
    Gray,
}

/// Lifecycle marker while a command run mutates a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Scanning,
    Ready,
    AwaitingInput,
    Cleaning,
    Cleaned,
    Skipped,
    Blocked,
    Error,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Scanning => "scanning",
            Stage::Ready => "ready",
            Stage::AwaitingInput => "awaiting input",
            Stage::Cleaning => "cleaning",
            Stage::Cleaned => "cleaned",
            Stage::Skipped => "skipped",
            Stage::Blocked => "blocked",
            Stage::Error => "error",
        }
    }

    /// Whether a mutation is underway; re-classification must not clobber it.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Stage::Cleaning | Stage::Cleaned)
    }
}

/// Everything known about one worktree during a command run.
#[derive(Debug, Clone)]
pub struct CandidateState {
    pub facts: WorktreeFacts,
    pub prs: Vec<PullRequestInfo>,
    pub ci: CiResult,
    pub processes: Vec<ProcessInfo>,
    pub classification: Classification,
    pub stage: Stage,
    /// Conditions that forbid deletion outright, accumulated at fact time
    pub block_reasons: Vec<String>,
    /// Reasons an operator must confirm, written by the classifier
    pub gray_reasons: Vec<String>,
    /// Notices contributed outside the classifier (PR lookup failures,
    /// running processes); prepended to gray reasons on every pass
    pub fetch_reasons: Vec<String>,
    /// Operator's working directory lies inside this worktree
    pub is_current: bool,
    /// Other worktrees that have the same branch checked out
    pub shared_with: Vec<String>,
    /// Display name of the comparison ref, for reason text
    pub compare_label: String,
    /// Renderer row index, so updates need not search the row list
    pub row: Option<usize>,
}

impl CandidateState {
    pub fn new(facts: WorktreeFacts, compare_label: String) -> CandidateState {
        CandidateState {
            facts,
            prs: Vec::new(),
            ci: CiResult::default(),
            processes: Vec::new(),
            classification: Classification::Blocked,
            stage: Stage::Scanning,
            block_reasons: Vec::new(),
            gray_reasons: Vec::new(),
            fetch_reasons: Vec::new(),
            is_current: false,
            shared_with: Vec::new(),
            compare_label,
            row: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.facts.worktree.name
    }

    pub fn has_pending_work(&self) -> bool {
        self.facts.has_pending_work()
    }

    pub fn ci_state(&self) -> CiState {
        self.ci.state
    }

    /// Record or replace the processes-running notice in fetch_reasons.
    pub fn set_processes(&mut self, procs: Vec<ProcessInfo>) {
        self.fetch_reasons
            .retain(|reason| !reason.starts_with("processes running:"));
        if procs.is_empty() {
            self.processes = Vec::new();
            return;
        }
        let summary = crate::processes::summarize_processes(
            &procs,
            crate::processes::DEFAULT_SUMMARY_LIMIT,
        );
        if summary != "-" {
            self.fetch_reasons
                .push(format!("processes running: {}", summary));
        }
        self.processes = procs;
    }

    /// Record a failed PR lookup as a confirm-first notice.
    pub fn note_pr_failure(&mut self, message: &str) {
        self.fetch_reasons
            .push(format!("PR lookup failed: {}", message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::WorktreeFacts;
    use crate::project::Worktree;

    fn facts() -> WorktreeFacts {
        let wt = Worktree {
            name: "w".to_string(),
            path: "/w".into(),
        };
        WorktreeFacts {
            worktree: wt,
            branch: "w".to_string(),
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
        }
    }

    #[test]
    fn test_set_processes_replaces_notice() {
        let mut cand = CandidateState::new(facts(), "main".to_string());
        cand.set_processes(vec![ProcessInfo {
            pid: 42,
            ppid: 1,
            command: "nvim".to_string(),
            cwd: "/w".to_string(),
        }]);
        assert_eq!(cand.fetch_reasons.len(), 1);
        assert!(cand.fetch_reasons[0].starts_with("processes running:"));

        // A later scan with no processes clears the notice.
        cand.set_processes(Vec::new());
        assert!(cand.fetch_reasons.is_empty());
        assert!(cand.processes.is_empty());
    }

    #[test]
    fn test_mutating_stages() {
        assert!(Stage::Cleaning.is_mutating());
        assert!(Stage::Cleaned.is_mutating());
        assert!(!Stage::Blocked.is_mutating());
        assert!(!Stage::AwaitingInput.is_mutating());
    }
}
