//! Worker side of the pipeline.
//!
//! - `state`: run status machine (queued → running → needs_llm/failed/done)
//! - `plan`: plan producers (static, or LLM-backed with fallback)
//! - `worker`: the polling loop and the gated per-job routine

pub mod plan;
pub mod state;
pub mod worker;

pub use plan::{LlmPlanner, Planner, StaticPlanner};
pub use state::{RunStatus, RunTracker};
pub use worker::{Worker, WorkerDeps};
