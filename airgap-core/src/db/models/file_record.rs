use crate::error::CoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub provider: String,
    pub path: String,
    pub size: i64,
    pub sha256: String,
    pub last_modified: String,
    pub last_verified: String,
    pub sync_run_id: Option<String>,
}

fn row_to_file_record(row: &Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get("id")?,
        provider: row.get("provider")?,
        path: row.get("path")?,
        size: row.get("size")?,
        sha256: row.get("sha256")?,
        last_modified: row.get("last_modified")?,
        last_verified: row.get("last_verified")?,
        sync_run_id: row.get("sync_run_id")?,
    })
}

pub fn find_by_key(
    conn: &Connection,
    provider: &str,
    path: &str,
) -> Result<Option<FileRecord>, CoreError> {
    let mut stmt =
        conn.prepare("SELECT * FROM file_records WHERE provider = ?1 AND path = ?2")?;
    let mut rows = stmt.query_map(params![provider, path], row_to_file_record)?;
    Ok(rows.next().transpose()?)
}

pub fn list_by_provider(conn: &Connection, provider: &str) -> Result<Vec<FileRecord>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM file_records WHERE provider = ?1 ORDER BY path")?;
    let rows = stmt.query_map(params![provider], row_to_file_record)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn provider_stats(conn: &Connection, provider: &str) -> Result<(i64, i64), CoreError> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM file_records WHERE provider = ?1",
        params![provider],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .map_err(CoreError::from)
}

/// Insert-or-replace on the `(provider, path)` key. Re-upserting identical
/// fields leaves exactly one row and preserves its id.
pub fn upsert(
    conn: &Connection,
    provider: &str,
    path: &str,
    size: i64,
    sha256: &str,
    last_modified: &str,
    sync_run_id: Option<&str>,
) -> Result<FileRecord, CoreError> {
    let existing = find_by_key(conn, provider, path)?;
    let now = chrono::Utc::now().to_rfc3339();

    let id = existing.as_ref().map(|r| r.id.clone()).unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO file_records (id, provider, path, size, sha256, last_modified, last_verified, sync_run_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(provider, path) DO UPDATE SET
           size = excluded.size,
           sha256 = excluded.sha256,
           last_modified = excluded.last_modified,
           last_verified = excluded.last_verified,
           sync_run_id = excluded.sync_run_id",
        params![id, provider, path, size, sha256, last_modified, now, sync_run_id],
    )?;

    find_by_key(conn, provider, path)?
        .ok_or_else(|| CoreError::Other(anyhow::anyhow!("upserted file_record not found")))
}

pub fn delete(conn: &Connection, provider: &str, path: &str) -> Result<bool, CoreError> {
    let changes = conn.execute(
        "DELETE FROM file_records WHERE provider = ?1 AND path = ?2",
        params![provider, path],
    )?;
    Ok(changes > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE file_records (
                id TEXT PRIMARY KEY, provider TEXT NOT NULL, path TEXT NOT NULL,
                size INTEGER NOT NULL, sha256 TEXT NOT NULL, last_modified TEXT NOT NULL,
                last_verified TEXT NOT NULL, sync_run_id TEXT, UNIQUE(provider, path));",
        )
        .unwrap();
        conn
    }

    #[test]
    fn upsert_twice_keeps_one_row_and_same_id() {
        let conn = setup();
        let first = upsert(&conn, "epel", "a/b.rpm", 100, "deadbeef", "2024-01-01", None).unwrap();
        let second =
            upsert(&conn, "epel", "a/b.rpm", 100, "deadbeef", "2024-01-01", None).unwrap();
        assert_eq!(first.id, second.id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_records", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upsert_updates_fields_on_redownload() {
        let conn = setup();
        upsert(&conn, "epel", "a/b.rpm", 100, "aaaa", "2024-01-01", None).unwrap();
        let updated = upsert(&conn, "epel", "a/b.rpm", 200, "bbbb", "2024-02-01", Some("run-1")).unwrap();
        assert_eq!(updated.size, 200);
        assert_eq!(updated.sha256, "bbbb");
        assert_eq!(updated.sync_run_id.as_deref(), Some("run-1"));
    }
}
