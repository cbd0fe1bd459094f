//! Process termination controller
//!
//! Signal every process blocking a worktree, then poll the enumerator until
//! they are gone or a deadline passes. A survivor is a hard failure for that
//! worktree (callers must not delete a directory something is still running
//! in) but never stops other worktrees from being attempted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use copse_core::error::single_line;
use copse_core::processes::{
    self, DEFAULT_SUMMARY_LIMIT, ProcessInfo, canonicalize_path, command_label,
    summarize_processes,
};
use copse_core::project::Worktree;

use crate::pipeline::CancelToken;

/// Signal choice and how long to wait for processes to exit.
#[derive(Debug, Clone)]
pub struct KillSettings {
    pub signal: i32,
    pub signal_label: String,
    pub timeout: Duration,
}

/// Build settings from CLI flags, falling back to config defaults.
pub fn resolve_kill_settings(
    signal_spec: Option<&str>,
    timeout_spec: Option<&str>,
    default_timeout: Duration,
) -> Result<KillSettings, String> {
    let mut signal = DEFAULT_KILL_SIGNAL;
    if let Some(spec) = signal_spec {
        if !spec.is_empty() && spec != "true" {
            signal = parse_signal(spec)?;
        }
    }

    let mut timeout = default_timeout;
    if timeout.is_zero() {
        timeout = Duration::from_secs(3);
    }
    if let Some(spec) = timeout_spec {
        if !spec.trim().is_empty() {
            let parsed = copse_core::config::parse_duration(spec).map_err(|_| {
                format!("invalid --timeout value {:?} (examples: 1s, 500ms)", spec)
            })?;
            if parsed.is_zero() {
                return Err("timeout must be positive".to_string());
            }
            timeout = parsed;
        }
    }

    Ok(KillSettings {
        signal,
        signal_label: describe_signal(signal),
        timeout,
    })
}

const DEFAULT_KILL_SIGNAL: i32 = libc::SIGTERM;

const SIGNAL_NAMES: &[(&str, i32)] = &[
    ("SIGHUP", libc::SIGHUP),
    ("SIGINT", libc::SIGINT),
    ("SIGQUIT", libc::SIGQUIT),
    ("SIGKILL", libc::SIGKILL),
    ("SIGUSR1", libc::SIGUSR1),
    ("SIGUSR2", libc::SIGUSR2),
    ("SIGTERM", libc::SIGTERM),
];

/// Accept numeric signals or names with or without the SIG prefix.
pub fn parse_signal(spec: &str) -> Result<i32, String> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err("missing signal".to_string());
    }
    if let Ok(n) = spec.parse::<i32>() {
        if n <= 0 {
            return Err(format!("signal must be positive (got {})", n));
        }
        return Ok(n);
    }
    let mut name = spec.to_uppercase();
    if !name.starts_with("SIG") {
        name = format!("SIG{}", name);
    }
    SIGNAL_NAMES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, sig)| *sig)
        .ok_or_else(|| format!("unknown signal {:?}", spec))
}

/// "SIGTERM (15)"-style label for logs and prompts.
pub fn describe_signal(signal: i32) -> String {
    match SIGNAL_NAMES.iter().find(|(_, sig)| *sig == signal) {
        Some((name, _)) => format!("{} ({})", name, signal),
        None => format!("signal {}", signal),
    }
}

/// Delivery of one signal to one process; swapped out in tests.
pub trait ProcessTerminator {
    fn terminate(&self, proc: &ProcessInfo, signal: i32) -> Result<(), String>;
}

/// Sends real signals.
pub struct RealTerminator;

impl ProcessTerminator for RealTerminator {
    #[cfg(unix)]
    fn terminate(&self, proc: &ProcessInfo, signal: i32) -> Result<(), String> {
        let rc = unsafe { libc::kill(proc.pid, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().to_string())
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, _proc: &ProcessInfo, _signal: i32) -> Result<(), String> {
        Err("signals unsupported on this platform".to_string())
    }
}

/// Removes pids from the JSON process table backing the enumeration test
/// seam, simulating immediate exit.
pub struct TestTerminator {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ProcessTerminator for TestTerminator {
    fn terminate(&self, proc: &ProcessInfo, _signal: i32) -> Result<(), String> {
        let _guard = self.lock.lock().unwrap();
        let data = std::fs::read_to_string(&self.path).map_err(|e| e.to_string())?;
        let mut procs: Vec<ProcessInfo> = if data.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&data).map_err(|e| e.to_string())?
        };
        procs.retain(|p| p.pid != proc.pid);
        let updated = serde_json::to_string(&procs).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, updated).map_err(|e| e.to_string())
    }
}

/// Real signals normally; the file-backed fake when the test seam is set.
pub fn new_terminator() -> Box<dyn ProcessTerminator> {
    match processes::test_data_file_path() {
        Some(path) => Box::new(TestTerminator {
            path,
            lock: Mutex::new(()),
        }),
        None => Box::new(RealTerminator),
    }
}

/// How a termination attempt ended.
#[derive(Debug)]
pub enum KillError {
    /// Enumeration is unsupported; the whole feature must fail loudly
    Unsupported,
    /// Operator interrupt while polling
    Cancelled,
    /// One or more signals could not be delivered
    Signal(String),
    /// Fact gathering during the poll failed
    Enumerate(String),
    /// Processes survived past the deadline
    StillRunning { summary: String, timeout: Duration },
}

impl std::fmt::Display for KillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillError::Unsupported => {
                write!(f, "process detection unsupported on this platform")
            }
            KillError::Cancelled => write!(f, "interrupted"),
            KillError::Signal(msg) => write!(f, "{}", msg),
            KillError::Enumerate(msg) => write!(f, "{}", msg),
            KillError::StillRunning { summary, timeout } => write!(
                f,
                "processes still running after {:?}: {}",
                timeout, summary
            ),
        }
    }
}

impl KillError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, KillError::Cancelled)
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, KillError::Unsupported)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signal every blocking process, then poll until the worktree is clear or
/// the deadline passes. Per-pid signal failures are collected but do not
/// stop the remaining pids from being attempted.
pub fn terminate_worktree_processes(
    wt: &Worktree,
    procs: &[ProcessInfo],
    settings: &KillSettings,
    terminator: &dyn ProcessTerminator,
    cancel: &CancelToken,
) -> Result<(), KillError> {
    let mut failures: Vec<String> = Vec::new();
    for proc in procs {
        if let Err(e) = terminator.terminate(proc, settings.signal) {
            failures.push(format!("{} ({}): {}", command_label(&proc.command), proc.pid, e));
        }
    }
    if !failures.is_empty() {
        return Err(KillError::Signal(failures.join("; ")));
    }

    let remaining = wait_for_process_exit(wt, settings.timeout, cancel)?;
    if !remaining.is_empty() {
        let mut summary = summarize_processes(&remaining, DEFAULT_SUMMARY_LIMIT);
        if summary == "-" {
            summary = format!("{} process(es)", remaining.len());
        }
        return Err(KillError::StillRunning {
            summary,
            timeout: settings.timeout,
        });
    }
    Ok(())
}

/// Re-enumerate the worktree's processes on a short interval until none
/// remain or the deadline passes; returns whatever survived.
fn wait_for_process_exit(
    wt: &Worktree,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<Vec<ProcessInfo>, KillError> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(KillError::Cancelled);
        }
        let scan = processes::detect_worktree_processes(std::slice::from_ref(wt))
            .map_err(|e| KillError::Enumerate(single_line(&e)))?;
        if !scan.supported {
            return Err(KillError::Unsupported);
        }
        let key = canonicalize_path(&wt.path);
        let current = scan.by_root.get(&key).cloned().unwrap_or_default();
        if current.is_empty() {
            return Ok(Vec::new());
        }
        if Instant::now() >= deadline {
            return Ok(current);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Processes blocking each target worktree, keyed by canonical root.
pub fn detect_for_targets(
    targets: &[Worktree],
) -> Result<Option<HashMap<PathBuf, Vec<ProcessInfo>>>, String> {
    let scan = processes::detect_worktree_processes(targets).map_err(|e| single_line(&e))?;
    if !scan.supported {
        return Ok(None);
    }
    Ok(Some(scan.by_root))
}
