//! Concurrent PR/CI aggregation pipeline
//!
//! Fans remote lookups out across worker threads, fans results back in over
//! a channel, and applies them on the calling thread in a deterministic
//! priority order (default worktree first, then display order) so the live
//! table never appears to update at random. Lookups sharing a query key are
//! deduplicated and the one result distributed to every member candidate.
//!
//! The calling thread is the only place `apply` runs, so it remains the sole
//! mutator of candidate state and the only writer to the terminal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};

use copse_core::ci::CiResult;
use copse_core::pr::PullRequestInfo;

/// Shared cancellation flag, flipped by the Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Install a Ctrl-C handler driving this token. Installation can fail
    /// (e.g. a second registration); cancellation then simply never fires.
    pub fn install_interrupt_handler(&self) {
        let flag = self.0.clone();
        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        });
    }
}

/// Why a lookup produced nothing.
#[derive(Debug, Clone)]
pub enum FetchError {
    Cancelled,
    Failed(String),
}

/// Holds early results until every higher-priority candidate has been
/// served, so updates hit the table in a stable order regardless of network
/// completion order.
pub struct OrderedBuffer<T> {
    order: Vec<usize>,
    cursor: usize,
    pending: HashMap<usize, T>,
}

impl<T> OrderedBuffer<T> {
    /// `order` lists candidate indices highest priority first.
    pub fn new(order: Vec<usize>) -> OrderedBuffer<T> {
        OrderedBuffer {
            order,
            cursor: 0,
            pending: HashMap::new(),
        }
    }

    /// Insert a result; returns every (index, result) now due, in order.
    pub fn push(&mut self, index: usize, value: T) -> Vec<(usize, T)> {
        self.pending.insert(index, value);
        self.drain_ready()
    }

    fn drain_ready(&mut self) -> Vec<(usize, T)> {
        let mut ready = Vec::new();
        while self.cursor < self.order.len() {
            let due = self.order[self.cursor];
            match self.pending.remove(&due) {
                Some(value) => {
                    ready.push((due, value));
                    self.cursor += 1;
                }
                None => break,
            }
        }
        ready
    }

    /// Results still parked behind a candidate that never reported (its
    /// worker was cancelled before sending). Applied in priority order when
    /// the channel closes, so nothing queued is ever discarded.
    pub fn flush(&mut self) -> Vec<(usize, T)> {
        let mut rest: Vec<(usize, T)> = Vec::new();
        for &idx in &self.order[self.cursor..] {
            if let Some(value) = self.pending.remove(&idx) {
                rest.push((idx, value));
            }
        }
        self.cursor = self.order.len();
        rest
    }
}

/// The priority order for applying results: the default worktree first,
/// then the remaining candidates in their display order.
pub fn priority_order(display_len: usize, default_index: Option<usize>) -> Vec<usize> {
    let mut order = Vec::with_capacity(display_len);
    if let Some(def) = default_index {
        order.push(def);
    }
    for i in 0..display_len {
        if Some(i) != default_index {
            order.push(i);
        }
    }
    order
}

/// What a completed stage reports back to the command.
#[derive(Debug, Default)]
pub struct StageReport {
    /// Per-candidate failures, cancellation excluded
    pub errors: Vec<String>,
    /// Whether cancellation was observed while the stage ran
    pub cancelled: bool,
}

impl StageReport {
    pub fn warn_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// One deduplicated PR lookup and the candidates awaiting its result.
#[derive(Debug, Clone)]
pub struct PrRequest {
    /// Dedup key: the branch name (one project maps to one repo)
    pub branch: String,
    /// Directory to run the lookup from
    pub dir: PathBuf,
    /// Display name used in error aggregation
    pub label: String,
    /// Candidate indices sharing this branch
    pub indices: Vec<usize>,
}

/// Group PR lookups by branch. Candidates with an empty branch are skipped
/// (no lookup is possible); callers label them directly.
pub fn dedup_pr_requests(targets: &[(usize, String, PathBuf, String)]) -> Vec<PrRequest> {
    let mut keyed: Vec<PrRequest> = Vec::new();
    let mut by_branch: HashMap<String, usize> = HashMap::new();
    for (index, branch, dir, label) in targets {
        if branch.is_empty() {
            continue;
        }
        match by_branch.get(branch) {
            Some(&slot) => keyed[slot].indices.push(*index),
            None => {
                by_branch.insert(branch.clone(), keyed.len());
                keyed.push(PrRequest {
                    branch: branch.clone(),
                    dir: dir.clone(),
                    label: label.clone(),
                    indices: vec![*index],
                });
            }
        }
    }
    keyed
}

/// Run all PR lookups concurrently (one thread each; they are cheap) and
/// apply results in priority order on this thread.
pub fn run_pr_stage<F, A>(
    requests: &[PrRequest],
    priority: Vec<usize>,
    cancel: &CancelToken,
    fetch: F,
    mut apply: A,
) -> StageReport
where
    F: Fn(&PrRequest) -> Result<Vec<PullRequestInfo>, FetchError> + Sync,
    A: FnMut(usize, Result<Vec<PullRequestInfo>, String>),
{
    let mut report = StageReport::default();
    if requests.is_empty() {
        report.cancelled = cancel.is_cancelled();
        return report;
    }

    let order: Vec<usize> = priority
        .into_iter()
        .filter(|i| requests.iter().any(|req| req.indices.contains(i)))
        .collect();
    let mut buffer: OrderedBuffer<Result<Vec<PullRequestInfo>, String>> =
        OrderedBuffer::new(order);

    let (tx, rx) = mpsc::channel::<(usize, Result<Vec<PullRequestInfo>, FetchError>)>();

    std::thread::scope(|scope| {
        for (req_idx, request) in requests.iter().enumerate() {
            let tx = tx.clone();
            let fetch = &fetch;
            let cancel = cancel.clone();
            scope.spawn(move || {
                if cancel.is_cancelled() {
                    return;
                }
                let outcome = fetch(request);
                if matches!(outcome, Err(FetchError::Cancelled)) {
                    return;
                }
                let _ = tx.send((req_idx, outcome));
            });
        }
        drop(tx);

        for (req_idx, outcome) in rx {
            let request = &requests[req_idx];
            let shared = match outcome {
                Ok(prs) => Ok(prs),
                Err(FetchError::Cancelled) => continue,
                Err(FetchError::Failed(msg)) => {
                    report
                        .errors
                        .push(format!("{}: {}", request.label, msg.clone()));
                    Err(msg)
                }
            };
            for &index in &request.indices {
                for (due, value) in buffer.push(index, shared.clone()) {
                    apply(due, value);
                }
            }
        }
    });

    for (due, value) in buffer.flush() {
        apply(due, value);
    }
    report.cancelled = cancel.is_cancelled();
    report
}

/// One deduplicated CI lookup.
#[derive(Debug, Clone)]
pub struct CiRequest {
    /// The ref whose checks to read: a PR merge ref when exactly one open
    /// PR exists, else the head commit hash
    pub reference: String,
    pub branch: String,
    pub head: String,
    pub indices: Vec<usize>,
}

impl CiRequest {
    fn key(&self) -> String {
        format!("{}|{}", self.reference, self.branch)
    }
}

/// Group CI lookups by (ref, branch).
pub fn dedup_ci_requests(targets: Vec<CiRequest>) -> Vec<CiRequest> {
    let mut keyed: Vec<CiRequest> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for target in targets {
        match by_key.get(&target.key()) {
            Some(&slot) => keyed[slot].indices.extend(target.indices),
            None => {
                by_key.insert(target.key(), keyed.len());
                keyed.push(target);
            }
        }
    }
    keyed
}

/// Width of the CI worker pool: check-run queries are the expensive ones.
pub const CI_CONCURRENCY: usize = 4;

/// Run CI lookups on a bounded worker pool and apply results in priority
/// order on this thread.
pub fn run_ci_stage<F, A>(
    requests: &[CiRequest],
    priority: Vec<usize>,
    width: usize,
    cancel: &CancelToken,
    fetch: F,
    mut apply: A,
) -> StageReport
where
    F: Fn(&CiRequest) -> Result<CiResult, FetchError> + Sync,
    A: FnMut(usize, Result<CiResult, String>),
{
    let mut report = StageReport::default();
    if requests.is_empty() {
        report.cancelled = cancel.is_cancelled();
        return report;
    }

    let order: Vec<usize> = priority
        .into_iter()
        .filter(|i| requests.iter().any(|req| req.indices.contains(i)))
        .collect();
    let mut buffer: OrderedBuffer<Result<CiResult, String>> = OrderedBuffer::new(order);

    let (tx, rx) = mpsc::channel::<(usize, Result<CiResult, FetchError>)>();
    let next_job = AtomicUsize::new(0);
    let width = width.max(1).min(requests.len());

    std::thread::scope(|scope| {
        for _ in 0..width {
            let tx = tx.clone();
            let fetch = &fetch;
            let next_job = &next_job;
            let cancel = cancel.clone();
            scope.spawn(move || {
                loop {
                    let job = next_job.fetch_add(1, Ordering::SeqCst);
                    if job >= requests.len() || cancel.is_cancelled() {
                        return;
                    }
                    let outcome = fetch(&requests[job]);
                    if matches!(outcome, Err(FetchError::Cancelled)) {
                        continue;
                    }
                    if tx.send((job, outcome)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(tx);

        for (req_idx, outcome) in rx {
            let request = &requests[req_idx];
            let shared = match outcome {
                Ok(result) => Ok(result),
                Err(FetchError::Cancelled) => continue,
                Err(FetchError::Failed(msg)) => {
                    report.errors.push(msg.clone());
                    Err(msg)
                }
            };
            for &index in &request.indices {
                for (due, value) in buffer.push(index, shared.clone()) {
                    apply(due, value);
                }
            }
        }
    });

    for (due, value) in buffer.flush() {
        apply(due, value);
    }
    report.cancelled = cancel.is_cancelled();
    report
}

pub const PR_PENDING_LABEL: &str = "PR: pending";
pub const PR_INTERRUPTED_LABEL: &str = "PR: interrupted";
pub const CI_INTERRUPTED_LABEL: &str = "CI: interrupted";

/// After a cancelled PR stage, convert every still-loading label into an
/// explicit interrupted marker. A stale "loading" is indistinguishable from
/// a hang, so this is correctness, not cosmetics.
pub fn mark_pr_interrupted(
    labels: &mut [String],
    mut on_update: impl FnMut(usize),
) {
    for (i, label) in labels.iter_mut().enumerate() {
        if label.is_empty() || label == PR_PENDING_LABEL {
            *label = PR_INTERRUPTED_LABEL.to_string();
            on_update(i);
        }
    }
}

/// Same sweep for CI labels, which start out empty rather than "pending".
pub fn mark_ci_interrupted(
    labels: &mut [String],
    mut on_update: impl FnMut(usize),
) {
    for (i, label) in labels.iter_mut().enumerate() {
        if label.is_empty() {
            *label = CI_INTERRUPTED_LABEL.to_string();
            on_update(i);
        }
    }
}
