//! Request intake: validate, record, enqueue.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::IntakeError;
use crate::policy::{Mode, Policy};
use crate::queue::{Job, JobQueue};
use crate::store::Ledger;
use crate::worker::state::RunStatus;

/// Worker steps announced to the client for every accepted request.
pub const NEXT_ACTIONS: [&str; 5] = [
    "worker:plan",
    "worker:apply_patch (if allowed)",
    "worker:sandbox_test",
    "worker:open_pr (if allowed)",
    "worker:merge_deploy (sovereign + policy thresholds)",
];

fn default_mode() -> String {
    "operator".to_string()
}

/// Body of `POST /v1/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub repo_path: String,
    pub message: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Acknowledgement of an accepted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub run_id: Uuid,
    pub mode: String,
    pub status: RunStatus,
    pub next_actions: Vec<String>,
    pub note: String,
}

/// Turns chat requests into ledger rows and queued jobs.
#[derive(Clone)]
pub struct IntakeService {
    policy: Arc<Policy>,
    ledger: Arc<dyn Ledger>,
    queue: JobQueue,
}

impl IntakeService {
    pub fn new(policy: Arc<Policy>, ledger: Arc<dyn Ledger>, queue: JobQueue) -> Self {
        Self {
            policy,
            ledger,
            queue,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Accept a request. Nothing is written when the mode is unknown.
    pub async fn submit(&self, req: ChatRequest, now: &str) -> Result<ChatResponse, IntakeError> {
        self.policy.capabilities_for(&req.mode)?;
        let mode: Mode = req.mode.parse()?;

        let thread_id = req
            .thread_id
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let run_id = Uuid::new_v4();

        self.ledger
            .record_user_message(&thread_id, &req.message, now)
            .await?;
        self.ledger.create_run(run_id, &thread_id, mode, now).await?;
        self.queue
            .enqueue(&Job {
                run_id,
                thread_id: thread_id.clone(),
                repo_path: req.repo_path,
                message: req.message,
                mode: req.mode.clone(),
            })
            .await?;

        info!(run_id = %run_id, thread_id = %thread_id, mode = %req.mode, "Run queued");

        Ok(ChatResponse {
            thread_id,
            run_id,
            mode: req.mode,
            status: RunStatus::Queued,
            next_actions: NEXT_ACTIONS.iter().map(|s| s.to_string()).collect(),
            note: format!("Job queued. Poll GET /v1/runs/{run_id} for status."),
        })
    }
}
