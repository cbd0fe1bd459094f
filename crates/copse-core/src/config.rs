//! Project configuration stored in .copse/config.toml

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CopseError;

/// User-editable settings for a copse project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Branch that counts as the protected default (merge target)
    #[serde(default)]
    pub default_branch: String,

    /// Tidy behavior
    #[serde(default)]
    pub tidy: TidyConfig,

    /// Process handling behavior
    #[serde(default)]
    pub process: ProcessConfig,

    /// CI metadata discovery
    #[serde(default)]
    pub ci: CiConfig,
}

/// Governs `copse tidy` classification thresholds and the default policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TidyConfig {
    #[serde(default)]
    pub policy: String,

    #[serde(default)]
    pub stale_days: i64,

    #[serde(default)]
    pub divergence_commits: i64,
}

impl TidyConfig {
    fn apply_defaults(&mut self) {
        if self.policy.is_empty() {
            self.policy = "auto".to_string();
        } else {
            self.policy = self.policy.to_lowercase();
        }
        if self.stale_days <= 0 {
            self.stale_days = 14;
        }
        if self.divergence_commits <= 0 {
            self.divergence_commits = 20;
        }
    }

    pub fn validate(&self) -> Result<(), CopseError> {
        match self.policy.as_str() {
            "auto" | "safe" | "all" | "prompt" => Ok(()),
            _ => Err(CopseError::InvalidTidyPolicy),
        }
    }
}

/// Configures process termination behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcessConfig {
    #[serde(default)]
    pub kill_timeout: String,
}

impl ProcessConfig {
    fn apply_defaults(&mut self) {
        if self.kill_timeout.trim().is_empty() {
            self.kill_timeout = "3s".to_string();
        }
    }

    pub fn validate(&self) -> Result<(), CopseError> {
        if self.kill_timeout.trim().is_empty() {
            return Ok(());
        }
        match parse_duration(&self.kill_timeout) {
            Ok(d) if !d.is_zero() => Ok(()),
            _ => Err(CopseError::InvalidProcessTimeout),
        }
    }

    /// The configured timeout, or the 3s default when unset/invalid.
    pub fn kill_timeout_duration(&self) -> Duration {
        match parse_duration(&self.kill_timeout) {
            Ok(d) if !d.is_zero() => d,
            _ => Duration::from_secs(3),
        }
    }
}

/// Configures how copse discovers GitHub CI metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CiConfig {
    #[serde(default)]
    pub remote: String,
}

impl CiConfig {
    fn apply_defaults(&mut self) {
        self.remote = self.remote.trim().to_string();
        if self.remote.is_empty() {
            self.remote = "origin".to_string();
        }
    }

    /// The configured remote, defaulting to "origin".
    pub fn remote_name(&self) -> &str {
        if self.remote.trim().is_empty() {
            "origin"
        } else {
            &self.remote
        }
    }
}

impl Config {
    /// Baseline configuration for a project.
    pub fn default_for(default_branch: &str) -> Config {
        let branch = if default_branch.is_empty() {
            "main"
        } else {
            default_branch
        };
        let mut cfg = Config {
            default_branch: branch.to_string(),
            tidy: TidyConfig::default(),
            process: ProcessConfig::default(),
            ci: CiConfig::default(),
        };
        cfg.apply_defaults();
        cfg
    }

    fn apply_defaults(&mut self) {
        self.tidy.apply_defaults();
        self.process.apply_defaults();
        self.ci.apply_defaults();
    }

    pub fn validate(&self) -> Result<(), CopseError> {
        if self.default_branch.is_empty() {
            return Err(CopseError::MissingDefaultBranch);
        }
        self.tidy.validate()?;
        self.process.validate()?;
        Ok(())
    }

    /// Read configuration from disk. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config, CopseError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Config::default_for("main"));
            }
            Err(e) => return Err(e.into()),
        };

        let mut cfg: Config =
            toml::from_str(&data).map_err(|e| CopseError::ConfigParse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write configuration to disk, creating parent directories as needed.
    pub fn save(path: &Path, cfg: &Config) -> Result<(), CopseError> {
        cfg.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string_pretty(cfg).map_err(|e| CopseError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// Parse a compact duration like "3s", "500ms", or "2m".
pub fn parse_duration(spec: &str) -> Result<Duration, CopseError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(CopseError::InvalidProcessTimeout);
    }
    let (number, unit) = match spec.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => spec.split_at(idx),
        None => (spec, "s"),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| CopseError::InvalidProcessTimeout)?;
    if value < 0.0 || !value.is_finite() {
        return Err(CopseError::InvalidProcessTimeout);
    }
    let millis = match unit.trim() {
        "ms" => value,
        "s" | "" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(CopseError::InvalidProcessTimeout),
    };
    Ok(Duration::from_millis(millis.round() as u64))
}
