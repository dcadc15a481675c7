//! Run state machine.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted by intake, waiting in the queue.
    Queued,
    /// Picked up by the worker.
    Running,
    /// Routine finished; a patch-generation step is still required.
    NeedsLlm,
    /// A gated step failed or the job was rejected.
    Failed,
    /// Run completed end to end.
    Done,
}

impl RunStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        use RunStatus::*;

        matches!(
            (self, target),
            // Rejected before start (unknown mode, unreadable payload)
            (Queued, Running) | (Queued, Failed) |
            (Running, NeedsLlm) | (Running, Failed) | (Running, Done)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NeedsLlm | Self::Failed | Self::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::NeedsLlm => "needs_llm",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "needs_llm" => Ok(Self::NeedsLlm),
            "failed" => Ok(Self::Failed),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RunStatus,
    pub to: RunStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Worker-side view of a run while its job is being processed.
///
/// Guards the monotonic status progression before anything is written to
/// the ledger.
#[derive(Debug, Clone)]
pub struct RunTracker {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub transitions: Vec<StateTransition>,
}

impl RunTracker {
    /// Track a run that intake left in `queued`.
    pub fn queued(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Queued,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new status.
    pub fn transition_to(
        &mut self,
        new_status: RunStatus,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition run {} from {} to {}",
                self.run_id, self.status, new_status
            ));
        }

        self.transitions.push(StateTransition {
            from: self.status,
            to: new_status,
            timestamp: Utc::now(),
            reason,
        });
        self.status = new_status;
        Ok(())
    }

    /// Statuses visited so far, e.g. `queued -> running -> needs_llm`.
    pub fn history(&self) -> String {
        let start = self.transitions.first().map_or(self.status, |t| t.from);
        self.transitions
            .iter()
            .fold(start.to_string(), |acc, t| format!("{acc} -> {}", t.to))
    }
}
