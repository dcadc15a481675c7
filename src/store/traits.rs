//! `Ledger` trait: the async interface over threads, messages and runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::policy::Mode;
use crate::worker::state::RunStatus;

/// Author of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    System,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Assistant => "assistant",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thread {
    pub id: String,
    pub created_at: String,
}

/// An appended thread message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// One execution attempt of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub id: Uuid,
    pub thread_id: String,
    pub mode: Mode,
    pub status: RunStatus,
    pub confidence: Option<f64>,
    pub summary: Option<String>,
    pub created_at: String,
}

/// Persistent record of threads, messages and runs.
///
/// Each write method commits in a single transaction. Timestamps are
/// caller-supplied UTC ISO-8601 strings.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create the thread if absent and append a user message.
    async fn record_user_message(
        &self,
        thread_id: &str,
        content: &str,
        now: &str,
    ) -> Result<(), DatabaseError>;

    /// Insert a run with status `queued`.
    async fn create_run(
        &self,
        run_id: Uuid,
        thread_id: &str,
        mode: Mode,
        now: &str,
    ) -> Result<(), DatabaseError>;

    /// Set the status; confidence and summary are only overwritten when given.
    async fn update_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        confidence: Option<f64>,
        summary: Option<&str>,
    ) -> Result<(), DatabaseError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, DatabaseError>;

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, DatabaseError>;

    /// Messages of a thread, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, DatabaseError>;

    /// Runs of a thread, oldest first.
    async fn list_runs(&self, thread_id: &str) -> Result<Vec<Run>, DatabaseError>;
}
