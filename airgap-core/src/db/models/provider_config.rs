//! A provider's declarative config, seeded once from an external config
//! file on first run, then the database is authoritative.

use crate::error::CoreError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    pub r#type: String,
    pub enabled: bool,
    pub config_json: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProviderConfig {
    /// Parse `config_json` and project the `enabled` flag into the map so
    /// downstream code can read it uniformly regardless of whether the
    /// stored blob already had one.
    pub fn hydrated_config(&self) -> Result<Value, CoreError> {
        let mut value: Value = serde_json::from_str(&self.config_json)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("enabled".to_string(), Value::Bool(self.enabled));
        }
        Ok(value)
    }
}

fn row_to_provider_config(row: &Row) -> rusqlite::Result<ProviderConfig> {
    Ok(ProviderConfig {
        id: row.get("id")?,
        name: row.get("name")?,
        r#type: row.get("type")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        config_json: row.get("config_json")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn list_all(conn: &Connection) -> Result<Vec<ProviderConfig>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM provider_configs ORDER BY name")?;
    let rows = stmt.query_map([], row_to_provider_config)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn list_enabled(conn: &Connection) -> Result<Vec<ProviderConfig>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM provider_configs WHERE enabled = 1 ORDER BY name")?;
    let rows = stmt.query_map([], row_to_provider_config)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<ProviderConfig>, CoreError> {
    let mut stmt = conn.prepare("SELECT * FROM provider_configs WHERE name = ?1")?;
    let mut rows = stmt.query_map(params![name], row_to_provider_config)?;
    Ok(rows.next().transpose()?)
}

pub fn is_seeded(conn: &Connection) -> Result<bool, CoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM provider_configs", [], |r| r.get(0))?;
    Ok(count > 0)
}

/// Seed provider configs from an external source on first run only. A
/// no-op when the table is already non-empty.
pub fn seed(
    conn: &Connection,
    entries: &[(&str, &str, bool, &str)],
) -> Result<usize, CoreError> {
    if is_seeded(conn)? {
        return Ok(0);
    }
    let mut inserted = 0;
    for (name, type_tag, enabled, config_json) in entries {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO provider_configs (id, name, type, enabled, config_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, type_tag, *enabled as i64, config_json],
        )?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Update a config's JSON blob and/or enabled flag, bumping `updated_at`.
pub fn update(
    conn: &Connection,
    name: &str,
    enabled: Option<bool>,
    config_json: Option<&str>,
) -> Result<Option<ProviderConfig>, CoreError> {
    if find_by_name(conn, name)?.is_none() {
        return Ok(None);
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(enabled) = enabled {
        sets.push("enabled = ?");
        values.push(Box::new(enabled as i64));
    }
    if let Some(cfg) = config_json {
        sets.push("config_json = ?");
        values.push(Box::new(cfg.to_string()));
    }
    sets.push("updated_at = datetime('now')");
    values.push(Box::new(name.to_string()));

    let sql = format!("UPDATE provider_configs SET {} WHERE name = ?", sets.join(", "));
    let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&sql, params.as_slice())?;

    find_by_name(conn, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE provider_configs (
                id TEXT PRIMARY KEY, name TEXT NOT NULL UNIQUE, type TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1, config_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')));",
        )
        .unwrap();
        conn
    }

    #[test]
    fn seed_is_noop_on_second_call() {
        let conn = setup();
        let first = seed(&conn, &[("epel", "epel_mirror", true, "{}")]).unwrap();
        assert_eq!(first, 1);
        let second = seed(&conn, &[("epel", "epel_mirror", true, "{}")]).unwrap();
        assert_eq!(second, 0);
        assert_eq!(list_all(&conn).unwrap().len(), 1);
    }

    #[test]
    fn hydrated_config_projects_enabled_flag() {
        let conn = setup();
        seed(&conn, &[("epel", "epel_mirror", false, r#"{"mirror_url":"https://x"}"#)]).unwrap();
        let cfg = find_by_name(&conn, "epel").unwrap().unwrap();
        let hydrated = cfg.hydrated_config().unwrap();
        assert_eq!(hydrated["enabled"], false);
        assert_eq!(hydrated["mirror_url"], "https://x");
    }
}
