//! Scheduled/completed background task descriptors.

use crate::error::CoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub provider: Option<String>,
    pub cron_expression: Option<String>,
    pub status: String,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get("id")?,
        job_type: row.get("job_type")?,
        provider: row.get("provider")?,
        cron_expression: row.get("cron_expression")?,
        status: row.get("status")?,
        last_run_at: row.get("last_run_at")?,
        next_run_at: row.get("next_run_at")?,
    })
}

pub fn create(
    conn: &Connection,
    job_type: &str,
    provider: Option<&str>,
    cron_expression: Option<&str>,
) -> Result<Job, CoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO jobs (id, job_type, provider, cron_expression, status) VALUES (?1, ?2, ?3, ?4, 'idle')",
        params![id, job_type, provider, cron_expression],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| CoreError::Other(anyhow::anyhow!("job not found after insert")))
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Job>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_job)?;
    Ok(rows.next().transpose()?)
}

/// Ordered by next-run ascending for listings; NULLs (one-shot/completed
/// jobs) sort last.
pub fn list_by_next_run(conn: &Connection) -> Result<Vec<Job>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs ORDER BY (next_run_at IS NULL), next_run_at ASC",
    )?;
    let rows = stmt.query_map([], row_to_job)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn mark_run(
    conn: &Connection,
    id: &str,
    status: &str,
    next_run_at: Option<&str>,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE jobs SET status = ?1, last_run_at = datetime('now'), next_run_at = ?2 WHERE id = ?3",
        params![status, next_run_at, id],
    )?;
    Ok(())
}
