//! libSQL backend for `TaskStore`.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{TaskStore, TaskUpdate};
use crate::tasks::model::{Task, TaskStatus, TaskType};

/// Column list shared by every SELECT, in `row_to_task` order.
const TASK_COLUMNS: &str = "id, type, params, status, result, error, created_at, updated_at";

/// libSQL task store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlTaskStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTaskStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Task database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run one UPDATE, optionally guarded on the current status. Returns the
    /// re-read row, or `None` when nothing matched.
    async fn apply_update(
        &self,
        id: &str,
        expected: Option<TaskStatus>,
        update: TaskUpdate,
    ) -> Result<Option<Task>, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET
                    status = COALESCE(?1, status),
                    result = COALESCE(?2, result),
                    error = COALESCE(?3, error),
                    updated_at = ?4
                 WHERE id = ?5 AND (?6 IS NULL OR status = ?6)",
                params![
                    opt_text(update.status.as_ref().map(TaskStatus::as_str)),
                    opt_real(update.result),
                    opt_text(update.error.as_deref()),
                    now,
                    id,
                    opt_text(expected.as_ref().map(TaskStatus::as_str)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update: {e}")))?;

        if changed == 0 {
            debug!(task_id = %id, expected = ?expected, "No task matched update");
            return Ok(None);
        }

        debug!(task_id = %id, status = ?update.status, "Task updated in DB");
        self.find_by_id(id).await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a Task. Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("task row parse: {e}"));

    let id: String = row.get(0).map_err(read)?;
    let type_str: String = row.get(1).map_err(read)?;
    let params_str: String = row.get(2).map_err(read)?;
    let status_str: String = row.get(3).map_err(read)?;
    let result = match row.get_value(4).map_err(read)? {
        libsql::Value::Null => None,
        libsql::Value::Real(v) => Some(v),
        libsql::Value::Integer(v) => Some(v as f64),
        other => {
            return Err(DatabaseError::Query(format!(
                "task {id}: result column holds {other:?}"
            )));
        }
    };
    let error = match row.get_value(5).map_err(read)? {
        libsql::Value::Null => None,
        libsql::Value::Text(v) => Some(v),
        other => {
            return Err(DatabaseError::Query(format!(
                "task {id}: error column holds {other:?}"
            )));
        }
    };
    let created_str: String = row.get(6).map_err(read)?;
    let updated_str: String = row.get(7).map_err(read)?;

    let task_type: TaskType = type_str
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("task {id}: {e}")))?;
    let status: TaskStatus = status_str
        .parse()
        .map_err(|e| DatabaseError::Serialization(format!("task {id}: {e}")))?;
    let params: Vec<f64> = serde_json::from_str(&params_str)
        .map_err(|e| DatabaseError::Serialization(format!("task {id} params: {e}")))?;

    Ok(Task {
        id,
        task_type,
        params,
        status,
        result,
        error,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

#[async_trait]
impl TaskStore for LibSqlTaskStore {
    async fn create(
        &self,
        id: &str,
        task_type: TaskType,
        params: &[f64],
    ) -> Result<Task, DatabaseError> {
        let task = Task::new(id, task_type, params.to_vec());
        let params_json = serde_json::to_string(&task.params)
            .map_err(|e| DatabaseError::Serialization(format!("create params: {e}")))?;
        let created = task.created_at.to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO tasks (id, type, params, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id,
                    task_type.as_str(),
                    params_json,
                    task.status.as_str(),
                    created,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create: {e}")))?;

        debug!(task_id = %id, task_type = %task_type, "Task inserted into DB");
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_id: {e}"))),
        }
    }

    async fn find_all(&self) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_all: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_all: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        Ok(tasks)
    }

    async fn update(&self, id: &str, update: TaskUpdate) -> Result<Option<Task>, DatabaseError> {
        self.apply_update(id, None, update).await
    }

    async fn update_if_status(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Option<Task>, DatabaseError> {
        self.apply_update(id, Some(expected), update).await
    }
}
