use crate::ai::rate_limit::WindowStore;
use crate::analysis::readiness::compute_counts;
use crate::error::ReadinessError;
use crate::models::work_item::{ReleaseCounts, WorkItemRow};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_SCHEMA_VERSION: i64 = 3;
pub const DB_FILE_NAME: &str = "build_readiness.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str = "release_id, wi_id, wi_type, title, state, severity, tags, acceptance_criteria, description, dev_notes, qa_notes, score, missing, review_evidence, created_at";

pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 3 {
        apply_migration_3(conn)?;
        version = 3;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        log::warn!("database schema v{version} is newer than supported v{DB_SCHEMA_VERSION}");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS build_readiness (
            release_id TEXT NOT NULL,
            wi_id INTEGER NOT NULL,
            wi_type TEXT NOT NULL,
            title TEXT NOT NULL,
            state TEXT NOT NULL,
            tags TEXT,
            acceptance_criteria TEXT,
            description TEXT,
            dev_notes TEXT,
            qa_notes TEXT,
            score TEXT,
            missing TEXT,
            review_evidence TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (release_id, wi_id)
        );

        CREATE INDEX IF NOT EXISTS idx_build_readiness_release ON build_readiness(release_id);
        ",
    )
}

// Severity arrived after the first schema; older files lack the column.
fn apply_migration_2(conn: &Connection) -> rusqlite::Result<()> {
    add_column_if_missing(conn, "build_readiness", "severity", "TEXT")
}

// Single-row table holding the last admitted generation call, shared by
// every process that opens this file.
fn apply_migration_3(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rate_limit (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_request_ms INTEGER NOT NULL
        );
        ",
    )
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, column_type: &str) -> rusqlite::Result<()> {
    let present: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
        params![table, column],
        |row| row.get(0),
    )?;

    if !present {
        log::info!("adding column {table}.{column}");
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} {column_type}"), [])?;
    }

    Ok(())
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

pub fn get_db_connection(db_path: &Path) -> Result<Connection, ReadinessError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            ReadinessError::StorageUnavailable(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }

    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    initialize_schema(&conn)?;
    Ok(conn)
}

fn validate_rows(release_id: &str, rows: &[WorkItemRow]) -> Result<(), ReadinessError> {
    if release_id.trim().is_empty() {
        return Err(ReadinessError::InvalidRow("release_id must not be empty".to_string()));
    }

    for row in rows {
        if row.release_id != release_id {
            return Err(ReadinessError::InvalidRow(format!(
                "work item {} belongs to release '{}', expected '{release_id}'",
                row.wi_id, row.release_id
            )));
        }
        if row.wi_id <= 0 {
            return Err(ReadinessError::InvalidRow(format!(
                "work item id must be positive, got {}",
                row.wi_id
            )));
        }
        if row.wi_type.trim().is_empty() {
            return Err(ReadinessError::InvalidRow(format!(
                "work item {} has an empty type",
                row.wi_id
            )));
        }
    }

    Ok(())
}

/// Replaces the whole snapshot of `release_id` in one transaction and returns
/// the number of distinct rows stored. Repeated IDs in `rows` collapse to the
/// last occurrence.
pub fn replace_release_rows(
    conn: &mut Connection,
    release_id: &str,
    rows: &[WorkItemRow],
) -> Result<usize, ReadinessError> {
    validate_rows(release_id, rows)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let removed = tx.execute(
        "DELETE FROM build_readiness WHERE release_id = ?1",
        params![release_id],
    )?;

    {
        let mut insert = tx.prepare(
            "
            INSERT INTO build_readiness (
                release_id, wi_id, wi_type, title, state, severity, tags,
                acceptance_criteria, description, dev_notes, qa_notes,
                score, missing, review_evidence, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, datetime('now'))
            ON CONFLICT(release_id, wi_id) DO UPDATE SET
                wi_type = excluded.wi_type,
                title = excluded.title,
                state = excluded.state,
                severity = excluded.severity,
                tags = excluded.tags,
                acceptance_criteria = excluded.acceptance_criteria,
                description = excluded.description,
                dev_notes = excluded.dev_notes,
                qa_notes = excluded.qa_notes,
                score = excluded.score,
                missing = excluded.missing,
                review_evidence = excluded.review_evidence,
                created_at = excluded.created_at
            ",
        )?;

        for row in rows {
            insert.execute(params![
                row.release_id,
                row.wi_id,
                row.wi_type,
                row.title,
                row.state,
                row.severity.as_deref(),
                row.tags.as_deref(),
                row.acceptance_criteria.as_deref(),
                row.description.as_deref(),
                row.dev_notes.as_deref(),
                row.qa_notes.as_deref(),
                row.score.as_deref(),
                row.missing.as_deref(),
                row.review_evidence.as_deref(),
            ])?;
        }
    }

    tx.commit()?;

    let stored = rows.iter().map(|row| row.wi_id).collect::<HashSet<_>>().len();
    if stored < rows.len() {
        log::warn!(
            "release {release_id}: {} duplicate work item ids collapsed",
            rows.len() - stored
        );
    }
    log::info!("release {release_id}: replaced {removed} rows with {stored}");

    Ok(stored)
}

/// Snapshot ordered by type, then ID. Unknown releases yield an empty vector.
pub fn get_release_rows(conn: &Connection, release_id: &str) -> Result<Vec<WorkItemRow>, ReadinessError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM build_readiness WHERE release_id = ?1 ORDER BY wi_type, wi_id"
    ))?;

    let rows = stmt
        .query_map(params![release_id], |row| {
            Ok(WorkItemRow {
                release_id: row.get(0)?,
                wi_id: row.get(1)?,
                wi_type: row.get(2)?,
                title: row.get(3)?,
                state: row.get(4)?,
                severity: row.get(5)?,
                tags: row.get(6)?,
                acceptance_criteria: row.get(7)?,
                description: row.get(8)?,
                dev_notes: row.get(9)?,
                qa_notes: row.get(10)?,
                score: row.get(11)?,
                missing: row.get(12)?,
                review_evidence: row.get(13)?,
                created_at: row.get(14)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    log::debug!("release {release_id}: read {} rows", rows.len());
    Ok(rows)
}

pub fn get_release_counts(conn: &Connection, release_id: &str) -> Result<ReleaseCounts, ReadinessError> {
    let rows = get_release_rows(conn, release_id)?;
    Ok(compute_counts(&rows))
}

/// Rate window persisted in the database file, so separate CLI runs against
/// the same data directory share one gate.
#[derive(Debug, Clone)]
pub struct SqliteWindowStore {
    db_path: PathBuf,
}

impl SqliteWindowStore {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }
}

impl WindowStore for SqliteWindowStore {
    fn claim_if(&self, now_millis: i64, admit: &dyn Fn(Option<i64>) -> bool) -> Result<Option<i64>, ReadinessError> {
        let mut conn = get_db_connection(&self.db_path)?;
        claim_rate_window(&mut conn, now_millis, admit)
    }
}

pub fn claim_rate_window(
    conn: &mut Connection,
    now_millis: i64,
    admit: &dyn Fn(Option<i64>) -> bool,
) -> Result<Option<i64>, ReadinessError> {
    // Immediate takes the write lock up front, so two processes cannot both
    // read an open window.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let previous: Option<i64> = tx
        .query_row("SELECT last_request_ms FROM rate_limit WHERE id = 1", [], |row| row.get(0))
        .optional()?;

    if admit(previous) {
        tx.execute(
            "INSERT INTO rate_limit (id, last_request_ms) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_request_ms = excluded.last_request_ms",
            params![now_millis],
        )?;
    }

    tx.commit()?;
    Ok(previous)
}
