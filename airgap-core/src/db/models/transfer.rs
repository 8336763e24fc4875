//! Transfer and TransferArchive — provenance of export/import operations.

use crate::error::CoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Export,
    Import,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Export => "export",
            TransferDirection::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub direction: String,
    pub status: String,
    pub dir_path: String,
    pub archive_count: i64,
    pub total_size: i64,
    pub manifest_sha256: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

fn row_to_transfer(row: &Row) -> rusqlite::Result<Transfer> {
    Ok(Transfer {
        id: row.get("id")?,
        direction: row.get("direction")?,
        status: row.get("status")?,
        dir_path: row.get("dir_path")?,
        archive_count: row.get("archive_count")?,
        total_size: row.get("total_size")?,
        manifest_sha256: row.get("manifest_sha256")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

pub fn start(conn: &Connection, direction: TransferDirection, dir_path: &str) -> Result<Transfer, CoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO transfers (id, direction, status, dir_path) VALUES (?1, ?2, 'running', ?3)",
        params![id, direction.as_str(), dir_path],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| CoreError::Other(anyhow::anyhow!("transfer not found after insert")))
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Transfer>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM transfers WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_transfer)?;
    Ok(rows.next().transpose()?)
}

pub fn complete(
    conn: &Connection,
    id: &str,
    status: &str,
    archive_count: i64,
    total_size: i64,
    manifest_sha256: Option<&str>,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE transfers SET status = ?1, archive_count = ?2, total_size = ?3, manifest_sha256 = ?4, completed_at = datetime('now') WHERE id = ?5",
        params![status, archive_count, total_size, manifest_sha256, id],
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferArchive {
    pub id: String,
    pub transfer_id: String,
    pub source_path: String,
    pub name: String,
    pub size: i64,
    pub sha256: String,
    pub validated: bool,
    pub validated_at: Option<String>,
}

fn row_to_archive(row: &Row) -> rusqlite::Result<TransferArchive> {
    Ok(TransferArchive {
        id: row.get("id")?,
        transfer_id: row.get("transfer_id")?,
        source_path: row.get("source_path")?,
        name: row.get("name")?,
        size: row.get("size")?,
        sha256: row.get("sha256")?,
        validated: row.get::<_, i64>("validated")? != 0,
        validated_at: row.get("validated_at")?,
    })
}

/// Has this exact archive (by source path, name, digest) already been
/// validated successfully? The key for skip-if-validated.
pub fn was_validated(
    conn: &Connection,
    source_path: &str,
    name: &str,
    sha256: &str,
) -> Result<bool, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT validated FROM transfer_archives WHERE source_path = ?1 AND name = ?2 AND sha256 = ?3",
    )?;
    let mut rows = stmt.query_map(params![source_path, name, sha256], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(rows.next().transpose()?.unwrap_or(0) != 0)
}

pub fn record_validated(
    conn: &Connection,
    transfer_id: &str,
    source_path: &str,
    name: &str,
    size: i64,
    sha256: &str,
) -> Result<TransferArchive, CoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO transfer_archives (id, transfer_id, source_path, name, size, sha256, validated, validated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, datetime('now'))
         ON CONFLICT(source_path, name, sha256) DO UPDATE SET
           transfer_id = excluded.transfer_id, validated = 1, validated_at = excluded.validated_at",
        params![id, transfer_id, source_path, name, size, sha256],
    )?;
    let mut stmt = conn.prepare(
        "SELECT * FROM transfer_archives WHERE source_path = ?1 AND name = ?2 AND sha256 = ?3",
    )?;
    let mut rows = stmt.query_map(params![source_path, name, sha256], row_to_archive)?;
    rows.next()
        .transpose()?
        .ok_or_else(|| CoreError::Other(anyhow::anyhow!("transfer_archive not found after insert")))
}
