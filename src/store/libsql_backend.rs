//! libSQL backend for the async `Ledger` implementation.
//!
//! Supports a local file (WAL journal, shared between the API and worker
//! processes) and in-memory databases for tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::policy::Mode;
use crate::store::migrations;
use crate::store::traits::{Ledger, Message, Role, Run, Thread};
use crate::worker::state::RunStatus;

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// libSQL ledger backend.
///
/// A single connection is reused for all operations. Every statement in
/// this process runs under `lock`, so a reader never shares the connection
/// with an open write transaction and only sees committed rows.
/// Cross-process writers are serialized by SQLite itself.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    lock: Mutex<()>,
}

impl LibSqlLedger {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        pragma(&conn, "PRAGMA journal_mode=WAL").await?;
        pragma(&conn, &format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}")).await?;

        let ledger = Self {
            db: Arc::new(db),
            conn,
            lock: Mutex::new(()),
        };
        migrations::run_migrations(&ledger.conn).await?;
        info!(path = %path.display(), "Ledger opened");
        Ok(ledger)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let ledger = Self {
            db: Arc::new(db),
            conn,
            lock: Mutex::new(()),
        };
        migrations::run_migrations(&ledger.conn).await?;
        Ok(ledger)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Run a PRAGMA that reports its new value as a row.
async fn pragma(conn: &Connection, sql: &str) -> Result<(), DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Pool(format!("{sql}: {e}")))?;
    while let Ok(Some(_)) = rows.next().await {}
    Ok(())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<f64>` to libsql Value.
fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

const RUN_COLUMNS: &str = "id, thread_id, mode, status, confidence, summary, created_at";

const MESSAGE_COLUMNS: &str = "id, thread_id, role, content, created_at";

/// Map a libsql Row to a Run.
///
/// Column order matches RUN_COLUMNS.
fn row_to_run(row: &libsql::Row) -> Result<Run, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("run row parse: {e}"));

    let id_str: String = row.get(0).map_err(read)?;
    let mode_str: String = row.get(2).map_err(read)?;
    let status_str: String = row.get(3).map_err(read)?;

    Ok(Run {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Query(format!("run id {id_str}: {e}")))?,
        thread_id: row.get(1).map_err(read)?,
        mode: mode_str
            .parse::<Mode>()
            .map_err(|e| DatabaseError::Query(format!("run {id_str}: {e}")))?,
        status: status_str
            .parse::<RunStatus>()
            .map_err(|e| DatabaseError::Query(format!("run {id_str}: {e}")))?,
        confidence: row.get::<f64>(4).ok(),
        summary: row.get::<String>(5).ok(),
        created_at: row.get(6).map_err(read)?,
    })
}

/// Map a libsql Row to a Message.
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("message row parse: {e}"));

    let role_str: String = row.get(2).map_err(read)?;
    Ok(Message {
        id: row.get(0).map_err(read)?,
        thread_id: row.get(1).map_err(read)?,
        role: Role::parse(&role_str)
            .ok_or_else(|| DatabaseError::Query(format!("unknown message role: {role_str}")))?,
        content: row.get(3).map_err(read)?,
        created_at: row.get(4).map_err(read)?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Ledger for LibSqlLedger {
    async fn record_user_message(
        &self,
        thread_id: &str,
        content: &str,
        now: &str,
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("record_user_message: {e}")))?;

        tx.execute(
            "INSERT OR IGNORE INTO threads (id, created_at) VALUES (?1, ?2)",
            params![thread_id, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_user_message thread: {e}")))?;

        tx.execute(
            "INSERT INTO messages (thread_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![thread_id, Role::User.as_str(), content, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_user_message message: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("record_user_message commit: {e}")))?;

        debug!(thread_id, "User message recorded");
        Ok(())
    }

    async fn create_run(
        &self,
        run_id: Uuid,
        thread_id: &str,
        mode: Mode,
        now: &str,
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("create_run: {e}")))?;

        tx.execute(
            "INSERT INTO runs (id, thread_id, mode, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id.to_string(),
                thread_id,
                mode.as_str(),
                RunStatus::Queued.as_str(),
                now
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_run: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("create_run commit: {e}")))?;

        debug!(run_id = %run_id, mode = %mode, "Run created");
        Ok(())
    }

    async fn update_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        confidence: Option<f64>,
        summary: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("update_run: {e}")))?;

        tx.execute(
            "UPDATE runs SET status = ?1, confidence = COALESCE(?2, confidence), summary = COALESCE(?3, summary) WHERE id = ?4",
            params![
                status.as_str(),
                opt_real(confidence),
                opt_text(summary),
                run_id.to_string()
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_run: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("update_run commit: {e}")))?;

        debug!(run_id = %run_id, status = %status, "Run updated");
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![run_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_run: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_run: {e}"))),
        }
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT id, created_at FROM threads WHERE id = ?1",
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_thread: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(Thread {
                id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_thread row parse: {e}")))?,
                created_at: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("get_thread row parse: {e}")))?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_thread: {e}"))),
        }
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<Message>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE thread_id = ?1 ORDER BY id ASC"
                ),
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?
        {
            messages.push(row_to_message(&row)?);
        }
        Ok(messages)
    }

    async fn list_runs(&self, thread_id: &str) -> Result<Vec<Run>, DatabaseError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM runs WHERE thread_id = ?1 ORDER BY created_at ASC, rowid ASC"
                ),
                params![thread_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?
        {
            match row_to_run(&row) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!("Skipping run row: {e}"),
            }
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-03-01T10:00:00+00:00";
    const T1: &str = "2026-03-01T10:05:00+00:00";

    async fn test_db() -> LibSqlLedger {
        LibSqlLedger::new_memory().await.unwrap()
    }

    async fn count(db: &LibSqlLedger, table: &str) -> i64 {
        let mut rows = db
            .conn()
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    #[tokio::test]
    async fn record_user_message_creates_thread_once() {
        let db = test_db().await;
        db.record_user_message("t-1", "fix bug", T0).await.unwrap();
        db.record_user_message("t-1", "and add tests", T1).await.unwrap();

        assert_eq!(count(&db, "threads").await, 1);
        let thread = db.get_thread("t-1").await.unwrap().unwrap();
        // The thread keeps its first timestamp.
        assert_eq!(thread.created_at, T0);

        let messages = db.list_messages("t-1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "fix bug");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "and add tests");
        assert!(messages[0].id < messages[1].id);
    }

    #[tokio::test]
    async fn create_run_starts_queued() {
        let db = test_db().await;
        let run_id = Uuid::new_v4();
        db.create_run(run_id, "t-1", Mode::Operator, T0).await.unwrap();

        let run = db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.thread_id, "t-1");
        assert_eq!(run.mode, Mode::Operator);
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.confidence, None);
        assert_eq!(run.summary, None);
        assert_eq!(run.created_at, T0);
    }

    #[tokio::test]
    async fn duplicate_run_id_is_rejected() {
        let db = test_db().await;
        let run_id = Uuid::new_v4();
        db.create_run(run_id, "t-1", Mode::Advisor, T0).await.unwrap();
        let err = db.create_run(run_id, "t-1", Mode::Advisor, T0).await;
        assert!(err.is_err());
        assert_eq!(count(&db, "runs").await, 1);
    }

    #[tokio::test]
    async fn update_run_coalesces_optional_fields() {
        let db = test_db().await;
        let run_id = Uuid::new_v4();
        db.create_run(run_id, "t-1", Mode::Operator, T0).await.unwrap();

        db.update_run(run_id, RunStatus::Running, Some(0.55), Some("first"))
            .await
            .unwrap();
        db.update_run(run_id, RunStatus::NeedsLlm, None, None)
            .await
            .unwrap();

        let run = db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::NeedsLlm);
        assert_eq!(run.confidence, Some(0.55));
        assert_eq!(run.summary.as_deref(), Some("first"));

        db.update_run(run_id, RunStatus::Failed, Some(0.125), Some("second"))
            .await
            .unwrap();
        let run = db.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.confidence, Some(0.125));
        assert_eq!(run.summary.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn update_unknown_run_is_a_noop() {
        let db = test_db().await;
        db.update_run(Uuid::new_v4(), RunStatus::Failed, None, Some("gone"))
            .await
            .unwrap();
        assert_eq!(count(&db, "runs").await, 0);
    }

    #[tokio::test]
    async fn missing_rows_return_none() {
        let db = test_db().await;
        assert!(db.get_run(Uuid::new_v4()).await.unwrap().is_none());
        assert!(db.get_thread("nope").await.unwrap().is_none());
        assert!(db.list_messages("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_runs_in_creation_order() {
        let db = test_db().await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        db.create_run(first, "t-1", Mode::Advisor, T0).await.unwrap();
        db.create_run(second, "t-1", Mode::Sovereign, T1).await.unwrap();
        db.create_run(Uuid::new_v4(), "t-2", Mode::Advisor, T0)
            .await
            .unwrap();

        let runs = db.list_runs("t-1").await.unwrap();
        let ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(runs[1].mode, Mode::Sovereign);
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialized() {
        let db = Arc::new(test_db().await);
        let mut handles = Vec::new();
        for i in 0..16 {
            let db = Arc::clone(&db);
            handles.push(tokio::spawn(async move {
                let thread = format!("t-{}", i % 4);
                db.record_user_message(&thread, "hello", T0).await.unwrap();
                db.create_run(Uuid::new_v4(), &thread, Mode::Operator, T0)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(count(&db, "threads").await, 4);
        assert_eq!(count(&db, "messages").await, 16);
        assert_eq!(count(&db, "runs").await, 16);
    }

    #[tokio::test]
    async fn file_ledger_uses_wal_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("sovereign.db");
        let run_id = Uuid::new_v4();

        {
            let db = LibSqlLedger::new_local(&path).await.unwrap();
            db.create_run(run_id, "t-1", Mode::Operator, T0).await.unwrap();

            let mut rows = db.conn().query("PRAGMA journal_mode", ()).await.unwrap();
            let mode: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
            assert_eq!(mode.to_lowercase(), "wal");
        }

        assert!(path.exists());
        let reopened = LibSqlLedger::new_local(&path).await.unwrap();
        let run = reopened.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn readers_never_see_an_open_write_transaction() {
        use std::time::Duration;

        let db = test_db().await;
        let run_id = Uuid::new_v4();

        let guard = db.lock.lock().await;
        let tx = db.conn().transaction().await.unwrap();
        tx.execute(
            "INSERT INTO threads (id, created_at) VALUES (?1, ?2)",
            params!["t-1", T0],
        )
        .await
        .unwrap();
        tx.execute(
            "INSERT INTO runs (id, thread_id, mode, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id.to_string(), "t-1", "operator", "queued", T0],
        )
        .await
        .unwrap();

        let wait = Duration::from_millis(100);
        assert!(tokio::time::timeout(wait, db.get_run(run_id)).await.is_err());
        assert!(tokio::time::timeout(wait, db.get_thread("t-1")).await.is_err());
        assert!(tokio::time::timeout(wait, db.list_runs("t-1")).await.is_err());
        assert!(tokio::time::timeout(wait, db.list_messages("t-1")).await.is_err());

        tx.rollback().await.unwrap();
        drop(guard);

        assert!(db.get_run(run_id).await.unwrap().is_none());
        assert!(db.get_thread("t-1").await.unwrap().is_none());
        assert!(db.list_runs("t-1").await.unwrap().is_empty());
    }
}
