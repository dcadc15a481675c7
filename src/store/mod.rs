//! Run ledger: libSQL-backed storage for threads, messages and runs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlLedger;
pub use traits::{Ledger, Message, Role, Run, Thread};
