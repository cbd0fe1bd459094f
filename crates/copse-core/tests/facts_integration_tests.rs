//! Integration tests for git fact gathering and classification
//!
//! Builds real repositories in temp directories and checks that the facts
//! copse-core extracts drive classification the way the safety rules
//! promise, including the squash-merge tree-match edge case.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;

use copse_core::candidate::{CandidateState, Classification};
use copse_core::classify::{Thresholds, classify};
use copse_core::config::Config;
use copse_core::facts::{self, GatherOptions};
use copse_core::git;
use copse_core::pr::WorkflowExpectations;
use copse_core::project::{Project, Worktree};

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "copse-test")
        .env("GIT_AUTHOR_EMAIL", "copse@example.com")
        .env("GIT_COMMITTER_NAME", "copse-test")
        .env("GIT_COMMITTER_EMAIL", "copse@example.com")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn write_file(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write file");
}

/// A project root with a main/ repo and one linked worktree on `branch`.
struct Fixture {
    _temp: tempfile::TempDir,
    root: PathBuf,
    main: PathBuf,
    feature: PathBuf,
    branch: String,
}

fn setup(branch: &str) -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();
    let main = root.join("main");
    std::fs::create_dir_all(&main).unwrap();
    run_git(&main, &["init", "-b", "main"]);
    write_file(&main.join("README.md"), "hello\n");
    run_git(&main, &["add", "README.md"]);
    run_git(&main, &["commit", "-m", "initial commit"]);

    let feature = root.join(branch);
    let feature_str = feature.to_string_lossy().to_string();
    run_git(&main, &["worktree", "add", "-b", branch, &feature_str, "main"]);

    std::fs::create_dir_all(root.join(".copse")).unwrap();

    Fixture {
        _temp: temp,
        root,
        main,
        feature,
        branch: branch.to_string(),
    }
}

fn project(fixture: &Fixture) -> Project {
    Project {
        root: fixture.root.clone(),
        config_path: fixture.root.join(".copse/config.toml"),
        config: Config::default_for("main"),
        default_worktree: "main".to_string(),
        default_worktree_path: fixture.main.clone(),
    }
}

fn gather(fixture: &Fixture) -> facts::WorktreeFacts {
    let proj = project(fixture);
    let wt = Worktree {
        name: fixture.branch.clone(),
        path: fixture.feature.clone(),
    };
    facts::gather(&proj, &wt, "main", &GatherOptions::full()).expect("gather facts")
}

fn classified(fixture: &Fixture) -> CandidateState {
    let mut cand = CandidateState::new(gather(fixture), "main".to_string());
    if cand.facts.dirty {
        cand.block_reasons
            .push("worktree has uncommitted changes".to_string());
    }
    if cand.facts.has_stash {
        cand.block_reasons
            .push("stash entries reference this branch".to_string());
    }
    classify(
        &mut cand,
        &Thresholds::default(),
        WorkflowExpectations::default(),
        Utc::now(),
    );
    cand
}

#[test]
fn clean_branch_with_no_unique_commits_is_safe() {
    let fixture = setup("quiet-meadow");
    let facts = gather(&fixture);
    assert_eq!(facts.branch, "quiet-meadow");
    assert!(!facts.dirty);
    assert_eq!(facts.unique_commits, 0);

    let cand = classified(&fixture);
    assert_eq!(cand.classification, Classification::Safe);
    assert!(cand.gray_reasons.is_empty());
}

#[test]
fn unique_commits_classify_gray_with_unmerged_reason() {
    let fixture = setup("busy-creek");
    write_file(&fixture.feature.join("work.txt"), "one\n");
    run_git(&fixture.feature, &["add", "work.txt"]);
    run_git(&fixture.feature, &["commit", "-m", "start work"]);

    let facts = gather(&fixture);
    assert_eq!(facts.unique_commits, 1);
    assert!(!facts.tree_matches_default);

    let cand = classified(&fixture);
    assert_eq!(cand.classification, Classification::Gray);
    assert!(
        cand.gray_reasons
            .contains(&"commits not merged into main".to_string()),
        "{:?}",
        cand.gray_reasons
    );
}

#[test]
fn dirty_worktree_is_blocked() {
    let fixture = setup("muddy-bank");
    write_file(&fixture.feature.join("scratch.txt"), "wip\n");

    let facts = gather(&fixture);
    assert!(facts.dirty);

    let cand = classified(&fixture);
    assert_eq!(cand.classification, Classification::Blocked);
}

#[test]
fn squash_merged_branch_counts_as_no_unique_work() {
    let fixture = setup("squashed-fern");
    // Two commits so the squash result is patch-distinct from each.
    write_file(&fixture.feature.join("a.txt"), "a\n");
    run_git(&fixture.feature, &["add", "a.txt"]);
    run_git(&fixture.feature, &["commit", "-m", "first half"]);
    write_file(&fixture.feature.join("b.txt"), "b\n");
    run_git(&fixture.feature, &["add", "b.txt"]);
    run_git(&fixture.feature, &["commit", "-m", "second half"]);

    run_git(&fixture.main, &["merge", "--squash", "squashed-fern"]);
    run_git(&fixture.main, &["commit", "-m", "squash-merge squashed-fern"]);

    let facts = gather(&fixture);
    // The branch is not an ancestor of main, so cherry still counts its
    // commits, but the trees are byte-identical.
    assert!(facts.unique_commits > 0);
    assert!(facts.tree_matches_default);
    assert!(!facts.merged_into_default);

    let cand = classified(&fixture);
    assert_eq!(
        cand.classification,
        Classification::Safe,
        "{:?}",
        cand.gray_reasons
    );
}

#[test]
fn stash_entries_are_detected_per_branch() {
    let fixture = setup("stashed-pond");
    write_file(&fixture.feature.join("notes.txt"), "draft\n");
    run_git(&fixture.feature, &["add", "notes.txt"]);
    run_git(&fixture.feature, &["stash", "push"]);

    let facts = gather(&fixture);
    assert!(facts.has_stash);
    assert!(!facts.dirty, "stash push leaves the tree clean");

    let cand = classified(&fixture);
    assert_eq!(cand.classification, Classification::Blocked);
}

#[test]
fn cherry_equivalent_commits_count_as_merged() {
    let fixture = setup("picked-grove");
    write_file(&fixture.feature.join("patch.txt"), "same change\n");
    run_git(&fixture.feature, &["add", "patch.txt"]);
    run_git(&fixture.feature, &["commit", "-m", "the change"]);

    // Land the identical patch on main under a different hash.
    let head = git::run(&fixture.feature, &["rev-parse", "HEAD"]).unwrap();
    run_git(&fixture.main, &["cherry-pick", &head]);

    let facts = gather(&fixture);
    assert_eq!(facts.unique_commits, 0, "cherry-equivalent work is merged");
}

#[test]
fn merged_branch_is_ancestor_and_safe() {
    let fixture = setup("landed-birch");
    write_file(&fixture.feature.join("done.txt"), "done\n");
    run_git(&fixture.feature, &["add", "done.txt"]);
    run_git(&fixture.feature, &["commit", "-m", "finish"]);
    run_git(&fixture.main, &["merge", "landed-birch"]);

    let facts = gather(&fixture);
    assert_eq!(facts.unique_commits, 0);
    assert!(facts.merged_into_default);

    let cand = classified(&fixture);
    assert_eq!(cand.classification, Classification::Safe);
}

#[test]
fn comparison_ref_is_local_when_no_remote_exists() {
    let fixture = setup("lonely-pine");
    let (reference, mode) = git::comparison_ref(&fixture.main, "origin", "main").unwrap();
    assert_eq!(reference, "main");
    assert_eq!(mode, git::SyncMode::LocalFirst);
}

#[test]
fn worktree_operation_reports_merge_in_progress() {
    let fixture = setup("conflicted-elm");
    // Conflicting edits to the same file on both sides.
    write_file(&fixture.main.join("README.md"), "main version\n");
    run_git(&fixture.main, &["commit", "-am", "main edit"]);
    write_file(&fixture.feature.join("README.md"), "feature version\n");
    run_git(&fixture.feature, &["commit", "-am", "feature edit"]);

    let merge = Command::new("git")
        .arg("-C")
        .arg(&fixture.feature)
        .args(["merge", "main"])
        .output()
        .expect("run git merge");
    assert!(!merge.status.success(), "merge should conflict");

    let op = git::worktree_operation(&fixture.feature).unwrap();
    assert_eq!(op, Some(git::Operation::Merging));
}
