//! Capability policy: what each mode may do, and which writes, patches and
//! commands are allowed.
//!
//! Loaded once at process start from YAML and shared as `Arc<Policy>`.
//! Everything here is a pure function of the loaded document.

pub mod pattern;

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, PolicyError};
pub use pattern::GlobPattern;

/// A named capability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Advisor,
    Operator,
    Autopilot,
    Sovereign,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advisor => "advisor",
            Self::Operator => "operator",
            Self::Autopilot => "autopilot",
            Self::Sovereign => "sovereign",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advisor" => Ok(Self::Advisor),
            "operator" => Ok(Self::Operator),
            "autopilot" => Ok(Self::Autopilot),
            "sovereign" => Ok(Self::Sovereign),
            other => Err(PolicyError::UnknownMode(other.to_string())),
        }
    }
}

/// Privileged actions a mode is allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModeCapabilities {
    pub can_write_repo: bool,
    pub can_open_pr: bool,
    pub can_merge: bool,
    pub can_deploy: bool,
}

/// Which downstream release steps a run would be permitted to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseGates {
    pub open_pr: bool,
    pub merge: bool,
    pub deploy: bool,
}

// ── YAML document ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolicyDocument {
    modes: BTreeMap<Mode, ModeCapabilities>,
    repo: RepoSection,
    guards: GuardsSection,
    sandbox: SandboxSection,
    quality: QualitySection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RepoSection {
    allow_write_globs: Vec<String>,
    deny_write_globs: Vec<String>,
}

impl Default for RepoSection {
    fn default() -> Self {
        Self {
            allow_write_globs: vec!["**/*".to_string()],
            deny_write_globs: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GuardsSection {
    forbidden_regex: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SandboxSection {
    allow_commands: Vec<String>,
    step_timeout_seconds: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            allow_commands: Vec::new(),
            step_timeout_seconds: 900,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct QualitySection {
    min_confidence_for_merge: f64,
    min_confidence_for_deploy: f64,
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            min_confidence_for_merge: 0.78,
            min_confidence_for_deploy: 0.82,
        }
    }
}

// ── Policy ──────────────────────────────────────────────────────────────

/// Loaded capability policy.
#[derive(Debug, Clone)]
pub struct Policy {
    modes: BTreeMap<Mode, ModeCapabilities>,
    allow_write: Vec<GlobPattern>,
    deny_write: Vec<GlobPattern>,
    forbidden: Vec<Regex>,
    allow_commands: Vec<String>,
    step_timeout: Duration,
    min_confidence_for_merge: f64,
    min_confidence_for_deploy: f64,
}

impl Policy {
    /// Load a policy from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let policy = Self::parse(&raw, &path.display().to_string())?;
        info!(
            path = %path.display(),
            modes = policy.modes.len(),
            "Policy loaded"
        );
        Ok(policy)
    }

    /// Parse a policy from YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Self::parse(raw, "<inline policy>")
    }

    fn parse(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        // An empty document is a valid, empty policy.
        let doc: PolicyDocument = if raw.trim().is_empty() {
            PolicyDocument::default()
        } else {
            serde_yml::from_str(raw).map_err(|e| ConfigError::ParseError {
                path: origin.to_string(),
                message: e.to_string(),
            })?
        };

        let compile_globs = |key: &str, globs: &[String]| {
            globs
                .iter()
                .map(|g| {
                    GlobPattern::new(g).map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("{g}: {e}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let allow_write = compile_globs("repo.allow_write_globs", &doc.repo.allow_write_globs)?;
        let deny_write = compile_globs("repo.deny_write_globs", &doc.repo.deny_write_globs)?;

        let forbidden = doc
            .guards
            .forbidden_regex
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidValue {
                    key: "guards.forbidden_regex".to_string(),
                    message: format!("{p}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            modes: doc.modes,
            allow_write,
            deny_write,
            forbidden,
            allow_commands: doc.sandbox.allow_commands,
            step_timeout: Duration::from_secs(doc.sandbox.step_timeout_seconds),
            min_confidence_for_merge: doc.quality.min_confidence_for_merge,
            min_confidence_for_deploy: doc.quality.min_confidence_for_deploy,
        })
    }

    /// Capabilities for a mode name.
    pub fn capabilities_for(&self, mode: &str) -> Result<ModeCapabilities, PolicyError> {
        let parsed: Mode = mode.parse()?;
        self.modes
            .get(&parsed)
            .copied()
            .ok_or_else(|| PolicyError::UnknownMode(mode.to_string()))
    }

    /// Whether a repository-relative path may be written. Deny patterns win.
    pub fn is_path_writable(&self, relative_path: &str) -> bool {
        if self.deny_write.iter().any(|p| p.matches(relative_path)) {
            return false;
        }
        self.allow_write.iter().any(|p| p.matches(relative_path))
    }

    /// Check patch text against the forbidden-content guards.
    pub fn is_patch_allowed(&self, patch_text: &str) -> (bool, String) {
        for rx in &self.forbidden {
            if rx.is_match(patch_text) {
                return (false, format!("Forbidden pattern matched: {}", rx.as_str()));
            }
        }
        (true, "ok".to_string())
    }

    /// Exact-string allow-list check for sandbox commands.
    pub fn is_command_allowed(&self, command: &str) -> bool {
        self.allow_commands.iter().any(|c| c == command)
    }

    /// Timeout applied to every command the worker runs.
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    pub fn min_confidence_for_merge(&self) -> f64 {
        self.min_confidence_for_merge
    }

    pub fn min_confidence_for_deploy(&self) -> f64 {
        self.min_confidence_for_deploy
    }

    /// Combine mode capabilities with the confidence thresholds.
    pub fn release_gates(&self, caps: &ModeCapabilities, confidence: f64) -> ReleaseGates {
        ReleaseGates {
            open_pr: caps.can_open_pr,
            merge: caps.can_merge && confidence >= self.min_confidence_for_merge,
            deploy: caps.can_deploy && confidence >= self.min_confidence_for_deploy,
        }
    }
}
