//! PR and CI metadata via the GitHub CLI
//!
//! All remote knowledge arrives through `gh`: pull requests per branch,
//! check runs per commit or PR merge ref, and workflow runs as a fallback
//! when a repository has no check runs. Responses are decoded here and
//! reduced to the provider-neutral types copse-core defines.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use copse_core::Project;
use copse_core::ci::{CiResult, CiState, RunRecord, summarize_check_runs, summarize_workflow_runs};
use copse_core::git;
use copse_core::pr::{PullRequestInfo, open_pull_requests};
use copse_core::timefmt;

/// The GitHub repository a project's remote points at.
#[derive(Debug, Clone)]
pub struct GithubRepo {
    pub owner: String,
    pub name: String,
}

impl GithubRepo {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Resolve owner/name from the project's configured CI remote.
pub fn resolve_github_repo(proj: &Project) -> Result<GithubRepo, String> {
    let remote = proj.config.ci.remote_name();
    let url = git::remote_url(&proj.default_worktree_path, remote)
        .map_err(|e| copse_core::single_line(&e))?;
    let (owner, name) =
        git::parse_github_remote(&url).map_err(|e| copse_core::single_line(&e))?;
    Ok(GithubRepo { owner, name })
}

/// Verify the gh CLI is reachable before a command depends on it.
pub fn ensure_gh_available() -> Result<(), String> {
    match Command::new("gh").arg("--version").output() {
        Ok(out) if out.status.success() => Ok(()),
        Ok(_) => Err("gh CLI required: `gh --version` failed".to_string()),
        Err(e) => Err(format!("gh CLI required: {}", e)),
    }
}

/// Run gh and return stdout, with stderr folded into the error message.
fn run_gh(dir: Option<&Path>, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("gh");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|e| format!("gh {}: {}", args.join(" "), e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let msg = stderr.trim();
        let msg = if msg.is_empty() {
            format!("exit status {}", output.status.code().unwrap_or(-1))
        } else {
            msg.to_string()
        };
        return Err(format!("gh {}: {}", args.join(" "), msg));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[derive(Deserialize)]
struct GhPullRequest {
    number: u64,
    state: String,
    #[serde(rename = "isDraft", default)]
    is_draft: bool,
    #[serde(rename = "updatedAt", default)]
    updated_at: String,
    #[serde(default)]
    url: String,
}

/// All PRs whose head is the given branch, newest state included.
pub fn query_pull_requests(dir: &Path, branch: &str) -> Result<Vec<PullRequestInfo>, String> {
    if branch.is_empty() {
        return Ok(Vec::new());
    }
    let out = run_gh(
        Some(dir),
        &[
            "pr",
            "list",
            "--head",
            branch,
            "--state",
            "all",
            "--limit",
            "5",
            "--json",
            "number,state,isDraft,updatedAt,url",
        ],
    )?;
    let raw: Vec<GhPullRequest> = serde_json::from_str(&out).map_err(|e| e.to_string())?;
    Ok(raw
        .into_iter()
        .map(|pr| PullRequestInfo {
            number: pr.number,
            state: pr.state,
            is_draft: pr.is_draft,
            updated_at: parse_time(&pr.updated_at),
            url: pr.url,
        })
        .collect())
}

/// Close a PR with a breadcrumb comment naming the branch.
pub fn close_pull_request(dir: &Path, branch: &str, number: u64) -> Result<(), String> {
    let comment = format!("Closed via copse tidy (branch {})", branch);
    run_gh(
        Some(dir),
        &["pr", "close", &number.to_string(), "--comment", &comment],
    )
    .map(|_| ())
    .map_err(|e| format!("gh pr close #{}: {}", number, e))
}

/// The ref a CI lookup should target, plus context for fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiTarget {
    pub reference: String,
    pub branch: String,
    pub head: String,
}

/// Exactly one open PR → its merge ref (checks GitHub actually ran);
/// anything else → the head commit.
pub fn determine_ci_target(
    prs: &[PullRequestInfo],
    branch: &str,
    head: &str,
) -> Result<CiTarget, String> {
    let open = open_pull_requests(prs);
    if open.len() == 1 {
        return Ok(CiTarget {
            reference: format!("refs/pull/{}/merge", open[0].number),
            branch: branch.to_string(),
            head: head.to_string(),
        });
    }
    if head.is_empty() {
        return Err("commit unknown".to_string());
    }
    Ok(CiTarget {
        reference: head.to_string(),
        branch: branch.to_string(),
        head: head.to_string(),
    })
}

#[derive(Deserialize)]
struct GhCheckRunsResponse {
    #[serde(default)]
    check_runs: Vec<GhCheckRun>,
}

#[derive(Deserialize)]
struct GhCheckRun {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    details_url: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
}

#[derive(Deserialize)]
struct GhWorkflowRun {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(rename = "headSha", default)]
    head_sha: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "createdAt", default)]
    created_at: String,
    #[serde(rename = "updatedAt", default)]
    updated_at: String,
}

/// Fetch CI state for a target: check runs first, then the workflow-run
/// fallback when none exist and a branch is known.
pub fn fetch_ci_target(
    repo: &GithubRepo,
    workdir: &Path,
    target: &CiTarget,
) -> Result<CiResult, String> {
    let path = format!(
        "repos/{}/commits/{}/check-runs",
        repo.slug(),
        escape_path_segment(&target.reference)
    );
    let out = run_gh(Some(workdir), &["api", &path])?;
    let resp: GhCheckRunsResponse = serde_json::from_str(&out).map_err(|e| e.to_string())?;
    if !resp.check_runs.is_empty() {
        let records: Vec<RunRecord> = resp.check_runs.iter().map(check_run_record).collect();
        return Ok(summarize_check_runs(&records));
    }
    if target.branch.is_empty() {
        return Ok(CiResult {
            state: CiState::Unknown,
            ..CiResult::default()
        });
    }
    fetch_workflow_fallback(repo, workdir, target)
}

fn fetch_workflow_fallback(
    repo: &GithubRepo,
    workdir: &Path,
    target: &CiTarget,
) -> Result<CiResult, String> {
    let slug = repo.slug();
    let out = run_gh(
        Some(workdir),
        &[
            "run",
            "list",
            "--branch",
            &target.branch,
            "--limit",
            "5",
            "--json",
            "name,status,conclusion,headSha,url,createdAt,updatedAt",
            "--repo",
            &slug,
        ],
    )?;
    let runs: Vec<GhWorkflowRun> = serde_json::from_str(&out).map_err(|e| e.to_string())?;
    let records: Vec<RunRecord> = runs.iter().map(workflow_run_record).collect();
    Ok(summarize_workflow_runs(&records, &target.head))
}

fn check_run_record(run: &GhCheckRun) -> RunRecord {
    RunRecord {
        name: run.name.clone(),
        status: run.status.clone(),
        conclusion: run.conclusion.clone().unwrap_or_default(),
        url: run
            .html_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| run.details_url.clone())
            .unwrap_or_default(),
        head_sha: String::new(),
        started_at: run.started_at.as_deref().and_then(parse_time_str),
        completed_at: run.completed_at.as_deref().and_then(parse_time_str),
    }
}

fn workflow_run_record(run: &GhWorkflowRun) -> RunRecord {
    RunRecord {
        name: run.name.clone(),
        status: run.status.clone(),
        conclusion: run.conclusion.clone().unwrap_or_default(),
        url: run.url.clone(),
        head_sha: run.head_sha.clone(),
        started_at: parse_time_str(&run.created_at),
        completed_at: parse_time_str(&run.updated_at),
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    parse_time_str(value)
}

fn parse_time_str(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Percent-encode one URL path segment; merge refs carry slashes.
pub fn escape_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Turn a CI result into the dashboard's compact detail label.
pub fn ci_label(result: &CiResult, now: DateTime<Utc>) -> String {
    match result.state {
        CiState::Success => "CI✓".to_string(),
        CiState::Pending => "CI◷".to_string(),
        CiState::Warning => "CI!".to_string(),
        CiState::Failure => {
            let Some(failure) = &result.failure else {
                return "CI✗".to_string();
            };
            let mut label = if failure.name.is_empty() {
                "CI✗".to_string()
            } else {
                format!("CI✗ {}", failure.name)
            };
            if let Some(completed) = failure.completed_at {
                label = format!("{} ({})", label, timefmt::relative(Some(completed), now));
            }
            label
        }
        CiState::Error => error_label(&result.message),
        CiState::Unknown => {
            if result.message.trim().is_empty() {
                String::new()
            } else {
                error_label(&result.message)
            }
        }
    }
}

/// "CI? <reason>" labels for lookups that failed rather than concluded.
pub fn error_label(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        return "CI?".to_string();
    }
    if message.starts_with("CI") {
        return message.to_string();
    }
    format!("CI? {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

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
    fn test_determine_ci_target_prefers_single_open_pr_merge_ref() {
        let target = determine_ci_target(&[open_pr(42)], "topic", "abc123").unwrap();
        assert_eq!(target.reference, "refs/pull/42/merge");
        assert_eq!(target.head, "abc123");
    }

    #[test]
    fn test_determine_ci_target_falls_back_to_head() {
        let target = determine_ci_target(&[open_pr(1), open_pr(2)], "topic", "abc123").unwrap();
        assert_eq!(target.reference, "abc123");
        assert!(determine_ci_target(&[], "topic", "").is_err());
    }

    #[test]
    fn test_escape_path_segment() {
        assert_eq!(
            escape_path_segment("refs/pull/42/merge"),
            "refs%2Fpull%2F42%2Fmerge"
        );
        assert_eq!(escape_path_segment("abc123"), "abc123");
    }

    #[test]
    fn test_parse_check_runs_response() {
        let body = r#"{
            "total_count": 2,
            "check_runs": [
                {"name": "build", "status": "completed", "conclusion": "failure",
                 "html_url": "", "details_url": "https://example.test/d",
                 "started_at": "2024-03-14T10:00:00Z", "completed_at": "2024-03-14T10:05:00Z"},
                {"name": "lint", "status": "completed", "conclusion": "success"}
            ]
        }"#;
        let resp: GhCheckRunsResponse = serde_json::from_str(body).unwrap();
        let records: Vec<RunRecord> = resp.check_runs.iter().map(check_run_record).collect();
        assert_eq!(records[0].url, "https://example.test/d");
        let result = summarize_check_runs(&records);
        assert_eq!(result.state, CiState::Failure);
        assert_eq!(result.failure.as_ref().unwrap().name, "build");
    }

    #[test]
    fn test_parse_workflow_runs_null_conclusion() {
        let body = r#"[
            {"name": "ci", "status": "in_progress", "conclusion": null,
             "headSha": "abc", "url": "u", "createdAt": "2024-03-14T10:00:00Z",
             "updatedAt": "2024-03-14T10:01:00Z"}
        ]"#;
        let runs: Vec<GhWorkflowRun> = serde_json::from_str(body).unwrap();
        let records: Vec<RunRecord> = runs.iter().map(workflow_run_record).collect();
        assert_eq!(summarize_workflow_runs(&records, "abc").state, CiState::Pending);
    }

    #[test]
    fn test_ci_label_variants() {
        let now = Utc.with_ymd_and_hms(2024, 3, 14, 15, 0, 0).unwrap();
        let success = CiResult {
            state: CiState::Success,
            ..CiResult::default()
        };
        assert_eq!(ci_label(&success, now), "CI✓");

        let failure = CiResult {
            state: CiState::Failure,
            failure: Some(copse_core::ci::CiRunSummary {
                name: "build".to_string(),
                completed_at: Some(now - chrono::Duration::days(2)),
                ..copse_core::ci::CiRunSummary::default()
            }),
            message: String::new(),
        };
        assert_eq!(ci_label(&failure, now), "CI✗ build (2 days ago)");

        let unknown = CiResult::default();
        assert_eq!(ci_label(&unknown, now), "");
    }

    #[test]
    fn test_error_label() {
        assert_eq!(error_label(""), "CI?");
        assert_eq!(error_label("remote missing"), "CI? remote missing");
        assert_eq!(error_label("CI? already prefixed"), "CI? already prefixed");
    }
}
