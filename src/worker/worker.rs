//! The job-processing loop.
//!
//! Exactly one worker may consume a queue directory: jobs are claimed by
//! reading the oldest file and deleting it afterwards, with no lock in
//! between. A worker killed mid-job leaves its run at `running`.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, ToolError};
use crate::policy::{ModeCapabilities, Policy};
use crate::queue::{Job, JobQueue, QueuedJob};
use crate::store::Ledger;
use crate::tools::shell::tail_chars;
use crate::tools::{CommandOutput, CommandRunner, VersionControl};
use crate::worker::plan::Planner;
use crate::worker::state::{RunStatus, RunTracker};

/// Note committed to the target repository.
pub const DIAGNOSTIC_FILE: &str = "DIAGNOSTIC.md";

pub const COMMIT_MESSAGE: &str = "sovereign: add diagnostic plan";

/// Summary of a run that finished the routine.
pub const NEEDS_LLM_SUMMARY: &str =
    "Plan recorded and branch prepared; ready for a real patch via LLM.";

/// Characters of command output kept in a failure summary.
const OUTPUT_TAIL_CHARS: usize = 4000;

const WRITE_CONFIDENCE: f64 = 0.55;
const READ_ONLY_CONFIDENCE: f64 = 0.40;

/// Shared dependencies for the worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub policy: Arc<Policy>,
    pub ledger: Arc<dyn Ledger>,
    pub queue: JobQueue,
    pub runner: Arc<dyn CommandRunner>,
    pub vcs: Arc<dyn VersionControl>,
    pub planner: Arc<dyn Planner>,
    /// Sandbox probe, run only when the policy allows it.
    pub probe_command: String,
    pub poll_interval: Duration,
}

/// How a started run ended.
#[derive(Debug, Clone, PartialEq)]
enum RunOutcome {
    NeedsLlm { confidence: f64 },
    Failed { summary: String },
}

impl RunOutcome {
    fn failed(summary: impl Into<String>) -> Self {
        Self::Failed {
            summary: summary.into(),
        }
    }
}

/// Single-threaded consumer of the job queue.
pub struct Worker {
    deps: WorkerDeps,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            deps,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the returned flag to stop [`Worker::run`] after the current job.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Poll the queue until the shutdown flag is set.
    pub async fn run(&self) {
        info!(
            "Worker started, polling {} every {:?}",
            self.deps.queue.dir().display(),
            self.deps.poll_interval
        );

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Worker shutting down");
                return;
            }

            match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Worker iteration failed"),
            }
            tokio::time::sleep(self.deps.poll_interval).await;
        }
    }

    /// Process the oldest job, if any. Returns whether a job was consumed.
    ///
    /// The job file is removed whatever the outcome; ledger or queue errors
    /// are returned after that.
    pub async fn run_once(&self) -> Result<bool, Error> {
        let Some(queued) = self.deps.queue.peek_oldest().await? else {
            return Ok(false);
        };

        let result = self.process(&queued).await;
        self.deps.queue.dequeue(&queued).await?;
        result?;
        Ok(true)
    }

    async fn process(&self, queued: &QueuedJob) -> Result<(), Error> {
        let job = match self.deps.queue.read(queued).await {
            Ok(job) => job,
            Err(e) => {
                warn!(path = %queued.path.display(), error = %e, "Dropping unreadable job");
                if let Some(run_id) = queued.run_id_hint() {
                    let summary = format!("Unreadable job payload: {e}");
                    self.deps
                        .ledger
                        .update_run(run_id, RunStatus::Failed, None, Some(&summary))
                        .await?;
                }
                return Ok(());
            }
        };

        let mut tracker = RunTracker::queued(job.run_id);

        let caps = match self.deps.policy.capabilities_for(&job.mode) {
            Ok(caps) => caps,
            Err(e) => {
                warn!(run_id = %job.run_id, error = %e, "Rejecting job");
                return self
                    .record(&mut tracker, RunStatus::Failed, None, Some("Unknown mode"))
                    .await;
            }
        };

        self.record(&mut tracker, RunStatus::Running, None, None)
            .await?;
        info!(run_id = %job.run_id, mode = %job.mode, repo = %job.repo_path, "Run started");

        match self.execute(&job, caps).await {
            RunOutcome::NeedsLlm { confidence } => {
                self.record(
                    &mut tracker,
                    RunStatus::NeedsLlm,
                    Some(confidence),
                    Some(NEEDS_LLM_SUMMARY),
                )
                .await
            }
            RunOutcome::Failed { summary } => {
                warn!(run_id = %job.run_id, "Run failed");
                self.record(&mut tracker, RunStatus::Failed, None, Some(&summary))
                    .await
            }
        }
    }

    /// Plan, write the diagnostic note, probe the sandbox.
    async fn execute(&self, job: &Job, caps: ModeCapabilities) -> RunOutcome {
        let policy = &self.deps.policy;
        let repo = Path::new(&job.repo_path);
        let timeout = policy.step_timeout();

        let plan = self.deps.planner.plan(&job.message).await;
        debug!(run_id = %job.run_id, steps = plan.len(), "Plan ready");

        if caps.can_write_repo {
            let note = render_diagnostic(job.run_id, &job.message, &plan);

            let (allowed, reason) = policy.is_patch_allowed(&note);
            if !allowed {
                return RunOutcome::failed(format!("policy denied: {reason}"));
            }

            let branch = branch_name(job.run_id);
            let out = into_output(self.deps.vcs.create_branch(repo, &branch, timeout).await);
            if !out.success() {
                return RunOutcome::failed(format!(
                    "git branch failed: {}",
                    tail_chars(&out.output, OUTPUT_TAIL_CHARS)
                ));
            }
            info!(run_id = %job.run_id, branch = %branch, "Branch created");

            if let Err(e) = tokio::fs::write(repo.join(DIAGNOSTIC_FILE), &note).await {
                return RunOutcome::failed(format!("writing {DIAGNOSTIC_FILE} failed: {e}"));
            }

            let out = into_output(
                self.deps
                    .vcs
                    .commit_file(repo, DIAGNOSTIC_FILE, COMMIT_MESSAGE, timeout)
                    .await,
            );
            if !out.success() {
                return RunOutcome::failed(format!(
                    "git commit failed: {}",
                    tail_chars(&out.output, OUTPUT_TAIL_CHARS)
                ));
            }
        }

        let probe = &self.deps.probe_command;
        if policy.is_command_allowed(probe) {
            let out = into_output(self.deps.runner.run(probe, repo, timeout).await);
            if !out.success() {
                warn!(run_id = %job.run_id, timed_out = out.is_timeout(), "Sandbox command failed");
                return RunOutcome::failed(format!(
                    "sandbox failed: {}",
                    tail_chars(&out.output, OUTPUT_TAIL_CHARS)
                ));
            }
            debug!(run_id = %job.run_id, probe = %probe, "Sandbox probe passed");
        } else {
            debug!(run_id = %job.run_id, probe = %probe, "Sandbox probe not allowed, skipping");
        }

        let confidence = if caps.can_write_repo {
            WRITE_CONFIDENCE
        } else {
            READ_ONLY_CONFIDENCE
        };

        let gates = policy.release_gates(&caps, confidence);
        info!(
            run_id = %job.run_id,
            confidence,
            open_pr = gates.open_pr,
            merge = gates.merge,
            deploy = gates.deploy,
            "Release gates evaluated"
        );

        RunOutcome::NeedsLlm { confidence }
    }

    /// Apply a status change to the tracker, then to the ledger.
    async fn record(
        &self,
        tracker: &mut RunTracker,
        status: RunStatus,
        confidence: Option<f64>,
        summary: Option<&str>,
    ) -> Result<(), Error> {
        if let Err(reason) = tracker.transition_to(status, summary.map(str::to_string)) {
            warn!(run_id = %tracker.run_id, %reason, "Skipping status update");
            return Ok(());
        }
        self.deps
            .ledger
            .update_run(tracker.run_id, status, confidence, summary)
            .await?;
        debug!(run_id = %tracker.run_id, %status, "Run status updated");

        if status.is_terminal() {
            info!(run_id = %tracker.run_id, history = %tracker.history(), "Run finished");
        }
        Ok(())
    }
}

/// `sovereign/<first 8 chars of the run id>`.
pub fn branch_name(run_id: Uuid) -> String {
    let id = run_id.to_string();
    format!("sovereign/{}", &id[..8])
}

/// Markdown note recording the request and its plan.
pub fn render_diagnostic(run_id: Uuid, message: &str, plan: &[String]) -> String {
    let mut note = String::from("# Sovereign diagnostic\n\n");
    note.push_str(&format!("Run: {run_id}\n\n"));
    note.push_str("Request:\n\n");
    for line in message.lines() {
        note.push_str("> ");
        note.push_str(line);
        note.push('\n');
    }
    if message.is_empty() {
        note.push_str(">\n");
    }
    note.push_str("\nPlan:\n\n");
    for step in plan {
        note.push_str(&format!("- {step}\n"));
    }
    note
}

/// A command that never ran counts as a failed one, its error as output.
fn into_output(result: Result<CommandOutput, ToolError>) -> CommandOutput {
    result.unwrap_or_else(|e| CommandOutput {
        exit_code: -1,
        output: e.to_string(),
    })
}
