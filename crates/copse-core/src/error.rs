//! Error types for copse operations

use thiserror::Error;

/// Core error type for copse operations
#[derive(Error, Debug)]
pub enum CopseError {
    /// No .copse directory found walking up from the working directory
    #[error("run `copse init` to create a project in this directory")]
    ProjectNotFound,

    /// Neither main/ nor master/ exists under the project root
    #[error("default worktree missing; expected a main/ or master/ directory")]
    DefaultWorktreeMissing,

    /// Both main/ and master/ exist simultaneously
    #[error("ambiguous default worktree; found both main/ and master/")]
    DefaultWorktreeConflict,

    /// Config omitted the required default branch
    #[error("config.default_branch must be set")]
    MissingDefaultBranch,

    /// Tidy policy is not one of the recognized values
    #[error("config.tidy.policy must be auto, safe, all, or prompt")]
    InvalidTidyPolicy,

    /// Kill timeout failed to parse or is non-positive
    #[error("config.process.kill_timeout must be a positive duration (e.g. 3s)")]
    InvalidProcessTimeout,

    /// A git invocation failed; the message carries trimmed stderr
    #[error("git {command}: {message}")]
    Git { command: String, message: String },

    /// Git produced output we could not interpret
    #[error("unexpected output from `git {command}`: {output}")]
    GitParse { command: String, output: String },

    /// Process enumeration is not available on this platform.
    /// A sentinel condition, not a failure: callers degrade the feature.
    #[error("process detection unsupported on this platform")]
    ProcessUnsupported,

    /// Process test data from the environment was malformed
    #[error("parse copse process test data: {0}")]
    ProcessTestData(String),

    /// Configuration file parse failure
    #[error("parse {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CopseError {
    /// Whether this error is the platform-unsupported sentinel.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CopseError::ProcessUnsupported)
    }
}

/// Collapse an error's display into a single line for column output.
pub fn single_line(err: &impl std::fmt::Display) -> String {
    let msg = err.to_string();
    let msg = msg.replace("\r\n", "\n");
    msg.trim().replace('\n', "; ")
}
