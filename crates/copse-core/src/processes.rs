//! Process enumeration and worktree association
//!
//! Lists processes owned by the current user with their working directory,
//! so commands can tell which worktrees have something running inside them.
//! Linux reads /proc directly; other platforms report the unsupported
//! sentinel so callers degrade the feature instead of seeing zero processes.
//! Tests inject process tables through COPSE_PROCESS_TEST_DATA(_FILE).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CopseError;
use crate::project::Worktree;

pub const TEST_DATA_ENV: &str = "COPSE_PROCESS_TEST_DATA";
pub const TEST_DATA_FILE_ENV: &str = "COPSE_PROCESS_TEST_DATA_FILE";

const COMMAND_FALLBACK: &str = "process";

/// One process owned by the invoking user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: i32,
    #[serde(default)]
    pub ppid: i32,
    pub command: String,
    pub cwd: String,
}

/// List this user's processes, or the unsupported sentinel.
pub fn list() -> Result<Vec<ProcessInfo>, CopseError> {
    if let Some(procs) = from_test_data()? {
        return Ok(procs);
    }
    list_native()
}

/// The file path backing COPSE_PROCESS_TEST_DATA_FILE, if any.
/// The test terminator rewrites this file to simulate process exit.
pub fn test_data_file_path() -> Option<PathBuf> {
    std::env::var_os(TEST_DATA_FILE_ENV).map(PathBuf::from)
}

fn from_test_data() -> Result<Option<Vec<ProcessInfo>>, CopseError> {
    if let Some(path) = test_data_file_path() {
        let data = std::fs::read_to_string(&path).map_err(|e| {
            CopseError::ProcessTestData(format!("read {}: {}", path.display(), e))
        })?;
        return decode_test_data(&data).map(Some);
    }
    if let Ok(data) = std::env::var(TEST_DATA_ENV) {
        if !data.is_empty() {
            return decode_test_data(&data).map(Some);
        }
    }
    Ok(None)
}

fn decode_test_data(data: &str) -> Result<Vec<ProcessInfo>, CopseError> {
    serde_json::from_str(data).map_err(|e| CopseError::ProcessTestData(e.to_string()))
}

#[cfg(target_os = "linux")]
fn list_native() -> Result<Vec<ProcessInfo>, CopseError> {
    let uid = unsafe { libc::getuid() };
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CopseError::ProcessUnsupported);
        }
        Err(e) => return Err(e.into()),
    };

    let mut procs = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };
        let Some(meta) = read_proc_metadata(&entry.path()) else {
            continue;
        };
        if meta.uid != uid {
            continue;
        }
        let Ok(cwd) = std::fs::read_link(entry.path().join("cwd")) else {
            continue;
        };
        let cwd = cwd.to_string_lossy().to_string();
        let cwd = cwd.strip_suffix(" (deleted)").unwrap_or(&cwd).to_string();
        if cwd.is_empty() {
            continue;
        }

        let command = read_proc_command(&entry.path());
        procs.push(ProcessInfo {
            pid,
            ppid: meta.ppid,
            command: sanitize_command(command, pid),
            cwd,
        });
    }
    Ok(procs)
}

#[cfg(target_os = "linux")]
struct ProcMetadata {
    uid: libc::uid_t,
    ppid: i32,
}

#[cfg(target_os = "linux")]
fn read_proc_metadata(proc_dir: &Path) -> Option<ProcMetadata> {
    let status = std::fs::read_to_string(proc_dir.join("status")).ok()?;
    let mut uid: Option<libc::uid_t> = None;
    let mut ppid = 0;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next()?.parse().ok();
        } else if let Some(rest) = line.strip_prefix("PPid:") {
            ppid = rest.trim().parse().unwrap_or(0);
        }
    }
    Some(ProcMetadata { uid: uid?, ppid })
}

#[cfg(target_os = "linux")]
fn read_proc_command(proc_dir: &Path) -> String {
    if let Ok(comm) = std::fs::read_to_string(proc_dir.join("comm")) {
        let comm = comm.trim();
        if !comm.is_empty() {
            return comm.to_string();
        }
    }
    if let Ok(cmdline) = std::fs::read(proc_dir.join("cmdline")) {
        if let Some(first) = cmdline.split(|b| *b == 0).next() {
            return String::from_utf8_lossy(first).trim().to_string();
        }
    }
    String::new()
}

#[cfg(not(target_os = "linux"))]
fn list_native() -> Result<Vec<ProcessInfo>, CopseError> {
    Err(CopseError::ProcessUnsupported)
}

fn sanitize_command(cmd: String, pid: i32) -> String {
    if cmd.is_empty() {
        return format!("{}-{}", COMMAND_FALLBACK, pid);
    }
    cmd
}

/// Resolve a path for containment comparisons: absolute, symlinks followed.
pub fn canonicalize_path(path: &Path) -> PathBuf {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    std::fs::canonicalize(&abs).unwrap_or(abs)
}

/// Whether `child` resolves to a location under `parent` (or equals it).
pub fn is_within(child: &Path, parent: &Path) -> bool {
    child.starts_with(parent)
}

/// Processes grouped by the worktree whose root contains their cwd.
#[derive(Debug, Default)]
pub struct ProcessScan {
    /// False when enumeration is unsupported; by_root is empty then.
    pub supported: bool,
    pub by_root: HashMap<PathBuf, Vec<ProcessInfo>>,
}

/// Associate running processes with the given worktrees. The unsupported
/// sentinel becomes `supported: false` rather than an error.
pub fn detect_worktree_processes(worktrees: &[Worktree]) -> Result<ProcessScan, CopseError> {
    let procs = match list() {
        Ok(procs) => procs,
        Err(e) if e.is_unsupported() => {
            return Ok(ProcessScan {
                supported: false,
                by_root: HashMap::new(),
            });
        }
        Err(e) => return Err(e),
    };

    let roots: Vec<PathBuf> = worktrees
        .iter()
        .map(|wt| canonicalize_path(&wt.path))
        .collect();

    let mut by_root: HashMap<PathBuf, Vec<ProcessInfo>> = HashMap::new();
    for proc in procs {
        let cwd = canonicalize_path(Path::new(proc.cwd.trim()));
        for root in &roots {
            if is_within(&cwd, root) {
                by_root.entry(root.clone()).or_default().push(proc.clone());
            }
        }
    }

    let self_pid = std::process::id() as i32;
    let parent_pid = parent_pid();
    by_root.retain(|_, group| {
        *group = prune_process_list(std::mem::take(group), self_pid, parent_pid);
        if group.is_empty() {
            return false;
        }
        group.sort_by(|a, b| {
            let (ca, cb) = (command_label(&a.command), command_label(&b.command));
            ca.cmp(&cb).then(a.pid.cmp(&b.pid))
        });
        true
    });

    Ok(ProcessScan {
        supported: true,
        by_root,
    })
}

/// Drop our own process tree and collapse children that share their
/// parent's command (a shell and its forked shell count once).
pub fn prune_process_list(
    procs: Vec<ProcessInfo>,
    self_pid: i32,
    parent_pid: i32,
) -> Vec<ProcessInfo> {
    let filtered: Vec<ProcessInfo> = procs
        .into_iter()
        .filter(|p| p.pid != self_pid && p.pid != parent_pid)
        .collect();
    if filtered.is_empty() {
        return filtered;
    }

    let pid_index: HashMap<i32, usize> =
        filtered.iter().enumerate().map(|(i, p)| (p.pid, i)).collect();
    let mut keep = vec![true; filtered.len()];
    for (i, proc) in filtered.iter().enumerate() {
        if let Some(&parent_idx) = pid_index.get(&proc.ppid) {
            let parent = &filtered[parent_idx];
            if command_label(&parent.command).eq_ignore_ascii_case(&command_label(&proc.command))
            {
                keep[i] = false;
            }
        }
    }

    filtered
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

pub const DEFAULT_SUMMARY_LIMIT: usize = 80;
const MIN_SUMMARY_ENTRIES: usize = 3;

/// One-line summary like "cargo (412), nvim (377), + 2 more", bounded by a
/// character budget but always showing at least three entries.
pub fn summarize_processes(procs: &[ProcessInfo], limit: usize) -> String {
    let procs = prune_process_list(procs.to_vec(), std::process::id() as i32, parent_pid());
    if procs.is_empty() {
        return "-".to_string();
    }
    let limit = if limit == 0 { DEFAULT_SUMMARY_LIMIT } else { limit };

    let mut sorted = procs;
    sorted.sort_by(|a, b| {
        let (ca, cb) = (command_label(&a.command), command_label(&b.command));
        ca.cmp(&cb).then(a.pid.cmp(&b.pid))
    });

    let entries: Vec<String> = sorted
        .iter()
        .map(|p| format!("{} ({})", command_label(&p.command), p.pid))
        .collect();
    let required = MIN_SUMMARY_ENTRIES.min(entries.len());

    let mut out = String::new();
    let mut shown = 0;
    for entry in &entries {
        let sep = if shown > 0 { ", " } else { "" };
        let projected = out.len() + sep.len() + entry.len();
        let forced = shown < required;
        if !forced && projected > limit {
            break;
        }
        out.push_str(sep);
        out.push_str(entry);
        shown += 1;
    }

    let remaining = entries.len() - shown;
    if remaining > 0 {
        if shown > 0 {
            out.push_str(", ");
        }
        out.push_str(&format!("+ {} more", remaining));
    }
    out
}

#[cfg(unix)]
fn parent_pid() -> i32 {
    unsafe { libc::getppid() }
}

#[cfg(not(unix))]
fn parent_pid() -> i32 {
    0
}

/// The basename of a command line's first word.
pub fn command_label(cmd: &str) -> String {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return COMMAND_FALLBACK.to_string();
    }
    let first = cmd.split_whitespace().next().unwrap_or(cmd);
    Path::new(first)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: i32, ppid: i32, command: &str, cwd: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            ppid,
            command: command.to_string(),
            cwd: cwd.to_string(),
        }
    }

    #[test]
    fn test_command_label() {
        assert_eq!(command_label("/usr/bin/nvim --headless"), "nvim");
        assert_eq!(command_label("cargo build"), "cargo");
        assert_eq!(command_label("   "), "process");
    }

    #[test]
    fn test_prune_drops_self_and_parent() {
        let procs = vec![
            proc(100, 1, "zsh", "/w"),
            proc(200, 1, "nvim", "/w"),
            proc(300, 1, "cargo", "/w"),
        ];
        let pruned = prune_process_list(procs, 100, 300);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].pid, 200);
    }

    #[test]
    fn test_prune_collapses_same_command_children() {
        let procs = vec![
            proc(10, 1, "zsh", "/w"),
            proc(11, 10, "zsh", "/w"),
            proc(12, 10, "cargo", "/w"),
        ];
        let pruned = prune_process_list(procs, 0, 0);
        let pids: Vec<i32> = pruned.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![10, 12]);
    }

    #[test]
    fn test_summarize_orders_and_truncates() {
        let procs = vec![
            proc(2, 1, "zsh", "/w"),
            proc(1, 1, "cargo build", "/w"),
        ];
        assert_eq!(summarize_processes(&procs, 0), "cargo (1), zsh (2)");
        assert_eq!(summarize_processes(&[], 0), "-");
    }

    #[test]
    fn test_summarize_appends_more_marker() {
        let procs: Vec<ProcessInfo> = (1..=6)
            .map(|i| proc(i, 0, &format!("verbose-command-{i}"), "/w"))
            .collect();
        let summary = summarize_processes(&procs, 40);
        assert!(summary.contains("+ "), "{summary}");
        assert!(summary.contains("more"), "{summary}");
        // Budget never squeezes the forced minimum away.
        assert!(summary.matches('(').count() >= 3, "{summary}");
    }

    #[test]
    fn test_decode_test_data() {
        let data = r#"[{"pid": 5, "ppid": 1, "command": "sleep 100", "cwd": "/tmp/w"}]"#;
        let procs = decode_test_data(data).unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].command, "sleep 100");
        assert!(decode_test_data("not json").is_err());
    }

    #[test]
    fn test_is_within() {
        assert!(is_within(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(is_within(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!is_within(Path::new("/a/bc"), Path::new("/a/b")));
        assert!(!is_within(Path::new("/x"), Path::new("/a")));
    }
}
