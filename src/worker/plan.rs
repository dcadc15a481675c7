//! Plan producers for the worker routine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::llm::LlmProvider;

const PLAN_SYSTEM_PROMPT: &str = "You plan changes to a code repository. \
Answer with a short list of concrete steps, one per line, no preamble.";

/// Produces the ordered list of steps recorded for a run.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, message: &str) -> Vec<String>;
}

/// The fixed three-step plan.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticPlanner;

impl StaticPlanner {
    pub fn steps() -> Vec<String> {
        vec![
            "Reproduce the reported problem and pin down its root cause".to_string(),
            "Prepare a minimal patch confined to the allowed paths".to_string(),
            "Run the sandbox checks and report the outcome".to_string(),
        ]
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _message: &str) -> Vec<String> {
        Self::steps()
    }
}

/// Asks the LLM for a plan; any failure yields the static plan.
pub struct LlmPlanner {
    llm: Arc<dyn LlmProvider>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, message: &str) -> Vec<String> {
        match self.llm.complete(PLAN_SYSTEM_PROMPT, message).await {
            Ok(completion) => {
                let steps = parse_steps(&completion.text);
                if steps.is_empty() {
                    warn!(provider = %completion.provider, "Empty plan from LLM, using static plan");
                    return StaticPlanner::steps();
                }
                debug!(provider = %completion.provider, steps = steps.len(), "Plan from LLM");
                steps
            }
            Err(e) => {
                debug!(error = %e, "LLM planning unavailable, using static plan");
                StaticPlanner::steps()
            }
        }
    }
}

/// One step per non-empty line, with list markers stripped.
fn parse_steps(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return rest.trim();
    }
    // "1." / "2)" style numbering
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}
