//! Versioned schema migrations.
//!
//! A `migrations` table records the highest applied version. Each version's
//! statements run inside a single transaction; the recorded version
//! monotonically increases, generalizing the teacher's ad hoc
//! `PRAGMA table_info`-guarded `ALTER TABLE` migrations into an explicit,
//! numbered scheme.

use crate::db::connection::DbPool;
use rusqlite::Connection;

const MIGRATIONS: &[(&i64, &str)] = &[
    (&1, V1_INITIAL),
    (&2, V2_TRANSFER_ARCHIVES),
    (&3, V3_PROVIDER_CONFIGS),
    (&4, V4_FAILED_FILE_COLUMNS),
];

const V1_INITIAL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_runs (
  id TEXT PRIMARY KEY,
  provider TEXT NOT NULL,
  start_time TEXT NOT NULL,
  end_time TEXT,
  status TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running','success','partial','failed')),
  files_downloaded INTEGER NOT NULL DEFAULT 0,
  files_deleted INTEGER NOT NULL DEFAULT 0,
  files_skipped INTEGER NOT NULL DEFAULT 0,
  files_failed INTEGER NOT NULL DEFAULT 0,
  bytes_transferred INTEGER NOT NULL DEFAULT 0,
  error_message TEXT
);

CREATE TABLE IF NOT EXISTS file_records (
  id TEXT PRIMARY KEY,
  provider TEXT NOT NULL,
  path TEXT NOT NULL,
  size INTEGER NOT NULL,
  sha256 TEXT NOT NULL,
  last_modified TEXT NOT NULL,
  last_verified TEXT NOT NULL,
  sync_run_id TEXT REFERENCES sync_runs(id) ON DELETE SET NULL,
  UNIQUE(provider, path)
);

CREATE TABLE IF NOT EXISTS jobs (
  id TEXT PRIMARY KEY,
  job_type TEXT NOT NULL,
  provider TEXT,
  cron_expression TEXT,
  status TEXT NOT NULL DEFAULT 'idle',
  last_run_at TEXT,
  next_run_at TEXT
);

CREATE TABLE IF NOT EXISTS transfers (
  id TEXT PRIMARY KEY,
  direction TEXT NOT NULL CHECK(direction IN ('export','import')),
  status TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running','completed','failed')),
  dir_path TEXT NOT NULL,
  archive_count INTEGER NOT NULL DEFAULT 0,
  total_size INTEGER NOT NULL DEFAULT 0,
  manifest_sha256 TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  completed_at TEXT
);

CREATE TABLE IF NOT EXISTS failed_files (
  id TEXT PRIMARY KEY,
  provider TEXT NOT NULL,
  file_path TEXT NOT NULL,
  url TEXT,
  checksum TEXT,
  error TEXT NOT NULL,
  retry_count INTEGER NOT NULL DEFAULT 1,
  resolved INTEGER NOT NULL DEFAULT 0,
  failed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_failed_files_unresolved_key
  ON failed_files(provider, file_path)
  WHERE resolved = 0;

CREATE INDEX IF NOT EXISTS idx_file_records_provider ON file_records(provider);
CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs(next_run_at);
"#;

const V2_TRANSFER_ARCHIVES: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_archives (
  id TEXT PRIMARY KEY,
  transfer_id TEXT NOT NULL REFERENCES transfers(id) ON DELETE CASCADE,
  source_path TEXT NOT NULL,
  name TEXT NOT NULL,
  size INTEGER NOT NULL,
  sha256 TEXT NOT NULL,
  validated INTEGER NOT NULL DEFAULT 0,
  validated_at TEXT,
  UNIQUE(source_path, name, sha256)
);
"#;

const V3_PROVIDER_CONFIGS: &str = r#"
CREATE TABLE IF NOT EXISTS provider_configs (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  type TEXT NOT NULL,
  enabled INTEGER NOT NULL DEFAULT 1,
  config_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const V4_FAILED_FILE_COLUMNS: &str = r#"
ALTER TABLE failed_files ADD COLUMN dest_path TEXT;
ALTER TABLE failed_files ADD COLUMN expected_size INTEGER;
"#;

fn current_version(conn: &Connection) -> anyhow::Result<i64> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (version INTEGER NOT NULL PRIMARY KEY, applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
    )?;
    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM migrations", [], |r| r.get(0))
        .unwrap_or(0);
    Ok(version)
}

/// Apply every migration newer than the recorded version, each in its own transaction.
pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    let mut version = current_version(&conn)?;
    tracing::info!(current_version = version, "starting schema migration");

    for (v, statements) in MIGRATIONS {
        let v = **v;
        if v <= version {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(statements)?;
        tx.execute("INSERT INTO migrations (version) VALUES (?1)", [v])?;
        tx.commit()?;
        version = v;
        tracing::info!(version, "applied migration");
    }

    tracing::info!(version, "schema migration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2d2::Pool;
    use r2d2_sqlite::SqliteConnectionManager;

    fn memory_pool() -> DbPool {
        let manager = SqliteConnectionManager::memory();
        Pool::builder().max_size(1).build(manager).unwrap()
    }

    #[test]
    fn migrate_is_idempotent() {
        let pool = memory_pool();
        migrate(&pool).unwrap();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 4);
    }

    #[test]
    fn v4_columns_exist() {
        let pool = memory_pool();
        migrate(&pool).unwrap();
        let conn = pool.get().unwrap();
        let mut stmt = conn.prepare("PRAGMA table_info(failed_files)").unwrap();
        let columns: Vec<String> = stmt
            .query_map([], |r| r.get::<_, String>(1))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert!(columns.contains(&"dest_path".to_string()));
        assert!(columns.contains(&"expected_size".to_string()));
    }
}
