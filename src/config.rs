//! Process configuration, read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::LlmConfig;

/// Settings shared by the `serve` and `worker` commands.
#[derive(Debug, Clone)]
pub struct Config {
    /// Capability policy YAML.
    pub policy_path: PathBuf,
    /// Run ledger database file.
    pub db_path: PathBuf,
    /// Job queue directory.
    pub jobs_dir: PathBuf,
    /// HTTP listen address.
    pub bind: SocketAddr,
    /// Worker sleep between empty polls.
    pub poll_interval: Duration,
    /// Sandbox probe run by the worker when the policy allows it.
    pub probe_command: String,
    /// Ask the LLM for plans instead of using the static one.
    pub llm_planning: bool,
    /// First configured LLM backend, if any.
    pub llm: Option<LlmConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy_path: PathBuf::from("./policy/policy.yaml"),
            db_path: PathBuf::from("./storage/sovereign.db"),
            jobs_dir: PathBuf::from("./storage/jobs"),
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            poll_interval: Duration::from_millis(1000),
            probe_command: "node -v".to_string(),
            llm_planning: false,
            llm: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = match get("SOVEREIGN_BIND") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "SOVEREIGN_BIND".to_string(),
                message: format!("{raw}: {e}"),
            })?,
            None => defaults.bind,
        };

        let poll_interval = match get("SOVEREIGN_POLL_INTERVAL_MS") {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: "SOVEREIGN_POLL_INTERVAL_MS".to_string(),
                    message: format!("{raw}: {e}"),
                })?;
                Duration::from_millis(ms)
            }
            None => defaults.poll_interval,
        };

        let llm_planning = match get("SOVEREIGN_LLM_PLANNING") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "SOVEREIGN_LLM_PLANNING".to_string(),
                message: format!("{raw}: expected true or false"),
            })?,
            None => defaults.llm_planning,
        };

        Ok(Self {
            policy_path: get("POLICY_PATH").map(PathBuf::from).unwrap_or(defaults.policy_path),
            db_path: get("DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            jobs_dir: get("JOBS_DIR").map(PathBuf::from).unwrap_or(defaults.jobs_dir),
            bind,
            poll_interval,
            probe_command: get("SOVEREIGN_PROBE_COMMAND").unwrap_or(defaults.probe_command),
            llm_planning,
            llm: LlmConfig::from_lookup(&lookup),
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
