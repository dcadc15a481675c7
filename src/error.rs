//! Error types for the sovereign operator.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Capability policy errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Unknown mode: {0}")]
    UnknownMode(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// File-backed job queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed job {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Command execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("No LLM API key configured. Set OPENAI_API_KEY or MISTRAL_API_KEY or GEMINI_API_KEY.")]
    NotConfigured,
}

/// Intake (request submission) errors.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Unknown mode: {0}")]
    InvalidMode(String),

    #[error("{0}")]
    Database(#[from] DatabaseError),

    #[error("{0}")]
    Queue(#[from] QueueError),
}

impl From<PolicyError> for IntakeError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::UnknownMode(mode) => Self::InvalidMode(mode),
        }
    }
}
