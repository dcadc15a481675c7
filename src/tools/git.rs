//! Version-control adapter used by the worker for branch and commit steps.
//!
//! Commands go through a [`CommandRunner`] so they share its timeout and
//! output capture, and so tests can substitute a fake.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::tools::shell::{CommandOutput, CommandRunner, shell_quote};

/// Branch and commit operations on a working tree.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Create and check out `branch` at the current HEAD.
    async fn create_branch(
        &self,
        repo: &Path,
        branch: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError>;

    /// Stage `rel_path` and commit it with `message`.
    async fn commit_file(
        &self,
        repo: &Path,
        rel_path: &str,
        message: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError>;
}

/// `git` CLI driven through a shell runner.
#[derive(Clone)]
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
}

impl GitCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl VersionControl for GitCli {
    #[instrument(skip_all, fields(branch))]
    async fn create_branch(
        &self,
        repo: &Path,
        branch: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        debug!(branch, "creating and checking out new branch");
        let cmd = format!("git checkout -b {}", shell_quote(branch));
        self.runner.run(&cmd, repo, timeout).await
    }

    #[instrument(skip_all, fields(path = rel_path))]
    async fn commit_file(
        &self,
        repo: &Path,
        rel_path: &str,
        message: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        let cmd = format!(
            "git add {} && git commit -m {}",
            shell_quote(rel_path),
            shell_quote(message)
        );
        self.runner.run(&cmd, repo, timeout).await
    }
}
