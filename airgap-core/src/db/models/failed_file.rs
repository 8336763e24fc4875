//! Dead-letter queue. Keyed at write-time by `(provider, file_path,
//! resolved=false)` via the partial unique index created in migration v1.

use crate::error::CoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFileRecord {
    pub id: String,
    pub provider: String,
    pub file_path: String,
    pub url: Option<String>,
    pub dest_path: Option<String>,
    pub checksum: Option<String>,
    pub expected_size: Option<i64>,
    pub error: String,
    pub retry_count: i64,
    pub resolved: bool,
    pub failed_at: String,
}

fn row_to_failed_file(row: &Row) -> rusqlite::Result<FailedFileRecord> {
    Ok(FailedFileRecord {
        id: row.get("id")?,
        provider: row.get("provider")?,
        file_path: row.get("file_path")?,
        url: row.get("url")?,
        dest_path: row.get("dest_path")?,
        checksum: row.get("checksum")?,
        expected_size: row.get("expected_size")?,
        error: row.get("error")?,
        retry_count: row.get("retry_count")?,
        resolved: row.get::<_, i64>("resolved")? != 0,
        failed_at: row.get("failed_at")?,
    })
}

/// Record a failure for `(provider, file_path)`. If an unresolved row for
/// this key already exists, update it in place (increment retry count,
/// refresh error/timestamp, overwrite url/dest/checksum/size only when the
/// new value is non-empty) in a single atomic statement — safe under
/// concurrent sync operations because the store is single-writer.
#[allow(clippy::too_many_arguments)]
pub fn record_failure(
    conn: &Connection,
    provider: &str,
    file_path: &str,
    url: Option<&str>,
    dest_path: Option<&str>,
    checksum: Option<&str>,
    expected_size: Option<i64>,
    error: &str,
) -> Result<(), CoreError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO failed_files (id, provider, file_path, url, dest_path, checksum, expected_size, error, retry_count, resolved, failed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 0, ?9)
         ON CONFLICT(provider, file_path) WHERE resolved = 0 DO UPDATE SET
           url = COALESCE(NULLIF(excluded.url, ''), failed_files.url),
           dest_path = COALESCE(NULLIF(excluded.dest_path, ''), failed_files.dest_path),
           checksum = COALESCE(NULLIF(excluded.checksum, ''), failed_files.checksum),
           expected_size = COALESCE(excluded.expected_size, failed_files.expected_size),
           error = excluded.error,
           retry_count = failed_files.retry_count + 1,
           failed_at = excluded.failed_at",
        params![id, provider, file_path, url, dest_path, checksum, expected_size, error, now],
    )?;
    Ok(())
}

pub fn list_unresolved(conn: &Connection, provider: &str) -> Result<Vec<FailedFileRecord>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM failed_files WHERE provider = ?1 AND resolved = 0 ORDER BY failed_at DESC",
    )?;
    let rows = stmt.query_map(params![provider], row_to_failed_file)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn count_unresolved(conn: &Connection, provider: &str) -> Result<i64, CoreError> {
    conn.query_row(
        "SELECT COUNT(*) FROM failed_files WHERE provider = ?1 AND resolved = 0",
        params![provider],
        |row| row.get(0),
    )
    .map_err(CoreError::from)
}

/// Mark resolved, hiding the row from normal listings.
pub fn resolve(conn: &Connection, id: &str) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE failed_files SET resolved = 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE failed_files (
                id TEXT PRIMARY KEY, provider TEXT NOT NULL, file_path TEXT NOT NULL,
                url TEXT, dest_path TEXT, checksum TEXT, expected_size INTEGER,
                error TEXT NOT NULL, retry_count INTEGER NOT NULL DEFAULT 1,
                resolved INTEGER NOT NULL DEFAULT 0, failed_at TEXT NOT NULL);
             CREATE UNIQUE INDEX idx_ff_key ON failed_files(provider, file_path) WHERE resolved = 0;",
        )
        .unwrap();
        conn
    }

    #[test]
    fn repeated_failure_coalesces_and_increments_retry() {
        let conn = setup();
        record_failure(&conn, "epel", "a.rpm", Some("http://x"), None, None, None, "timeout").unwrap();
        record_failure(&conn, "epel", "a.rpm", None, None, None, None, "timeout again").unwrap();

        let rows = list_unresolved(&conn, "epel").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].retry_count, 2);
        assert_eq!(rows[0].error, "timeout again");
        assert_eq!(rows[0].url.as_deref(), Some("http://x"));
    }

    #[test]
    fn resolve_hides_from_listing() {
        let conn = setup();
        record_failure(&conn, "epel", "a.rpm", None, None, None, None, "boom").unwrap();
        let row = &list_unresolved(&conn, "epel").unwrap()[0];
        resolve(&conn, &row.id).unwrap();
        assert_eq!(list_unresolved(&conn, "epel").unwrap().len(), 0);
    }

    #[test]
    fn resolved_failure_creates_new_unresolved_row_on_refail() {
        let conn = setup();
        record_failure(&conn, "epel", "a.rpm", None, None, None, None, "boom").unwrap();
        let row = &list_unresolved(&conn, "epel").unwrap()[0];
        resolve(&conn, &row.id).unwrap();

        record_failure(&conn, "epel", "a.rpm", None, None, None, None, "boom again").unwrap();
        let rows = list_unresolved(&conn, "epel").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].retry_count, 1);
    }
}
