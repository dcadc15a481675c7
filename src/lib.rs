//! Sovereign operator: a policy-gated job pipeline.
//!
//! Requests come in over HTTP, are recorded in a run ledger and queued as
//! files; a single worker picks them up and runs a fixed routine whose
//! privileged steps are gated by a YAML capability policy.

pub mod config;
pub mod error;
pub mod intake;
pub mod llm;
pub mod policy;
pub mod queue;
pub mod server;
pub mod store;
pub mod tools;
pub mod worker;
