//! SyncRun lifecycle. Terminal-status vocabulary is `{running, success,
//! partial, failed}` — see DESIGN.md open-question (a) for why `completed`
//! is reserved for `Transfer`/`Job` instead.

use crate::error::CoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub provider: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub status: String,
    pub files_downloaded: i64,
    pub files_deleted: i64,
    pub files_skipped: i64,
    pub files_failed: i64,
    pub bytes_transferred: i64,
    pub error_message: Option<String>,
}

fn row_to_sync_run(row: &Row) -> rusqlite::Result<SyncRun> {
    Ok(SyncRun {
        id: row.get("id")?,
        provider: row.get("provider")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        status: row.get("status")?,
        files_downloaded: row.get("files_downloaded")?,
        files_deleted: row.get("files_deleted")?,
        files_skipped: row.get("files_skipped")?,
        files_failed: row.get("files_failed")?,
        bytes_transferred: row.get("bytes_transferred")?,
        error_message: row.get("error_message")?,
    })
}

/// Insert a new run with `status=running`. Fails the caller's operation if
/// this write fails per spec §4.6 step 2.
pub fn start(conn: &Connection, provider: &str) -> Result<SyncRun, CoreError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sync_runs (id, provider, start_time, status) VALUES (?1, ?2, ?3, 'running')",
        params![id, provider, now],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| CoreError::Other(anyhow::anyhow!("sync run not found after insert")))
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<SyncRun>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM sync_runs WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_sync_run)?;
    Ok(rows.next().transpose()?)
}

pub fn latest_for_provider(conn: &Connection, provider: &str) -> Result<Option<SyncRun>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM sync_runs WHERE provider = ?1 ORDER BY start_time DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![provider], row_to_sync_run)?;
    Ok(rows.next().transpose()?)
}

/// Write the terminal status exactly once. Calling this twice on the same
/// run is a caller bug, not guarded here (the sync manager owns the run's
/// lifecycle and never calls this twice per run).
#[allow(clippy::too_many_arguments)]
pub fn finalize(
    conn: &Connection,
    id: &str,
    status: SyncStatus,
    files_downloaded: i64,
    files_deleted: i64,
    files_skipped: i64,
    files_failed: i64,
    bytes_transferred: i64,
    error_message: Option<&str>,
) -> Result<(), CoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE sync_runs SET
           end_time = ?1, status = ?2, files_downloaded = ?3, files_deleted = ?4,
           files_skipped = ?5, files_failed = ?6, bytes_transferred = ?7, error_message = ?8
         WHERE id = ?9",
        params![
            now,
            status.as_str(),
            files_downloaded,
            files_deleted,
            files_skipped,
            files_failed,
            bytes_transferred,
            error_message,
            id
        ],
    )?;
    Ok(())
}

pub fn fail(conn: &Connection, id: &str, error_message: &str) -> Result<(), CoreError> {
    finalize(conn, id, SyncStatus::Failed, 0, 0, 0, 0, 0, Some(error_message))
}
