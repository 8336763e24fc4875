//! Configuration management for the one-shot sync CLI.
//!
//! Loads configuration from a TOML file with CLI-flag overrides applied by
//! the caller; falls back to [`Config::default`] when no file is given.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub sync: SyncConfig,
    pub log: LogConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier recorded on transfer manifests as `source_host`
    /// when the local hostname cannot be resolved.
    #[serde(default = "default_agent_id")]
    pub id: String,

    /// Root directory holding per-provider content and the SQLite store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite database path; defaults under `data_dir` when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Compression algorithm used by transfer export (zstd, gzip, none)
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Archive split size in bytes for transfer export
    #[serde(default = "default_split_bytes")]
    pub split_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Number of concurrent download workers
    #[serde(default = "default_worker_count")]
    pub worker_count: i64,
}

fn default_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "airgap-agent".to_string())
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/airgap-agent/data")
}

fn default_compression() -> String {
    "zstd".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_split_bytes() -> u64 {
    4 * 1024 * 1024 * 1024 // 4GiB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_count() -> i64 {
    4
}

impl Config {
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.agent
            .db_path
            .clone()
            .unwrap_or_else(|| self.agent.data_dir.join("airgap.db"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig {
                id: default_agent_id(),
                data_dir: default_data_dir(),
                db_path: None,
            },
            sync: SyncConfig {
                compression: default_compression(),
                compression_level: default_compression_level(),
                split_bytes: default_split_bytes(),
            },
            log: LogConfig {
                level: default_log_level(),
            },
            performance: PerformanceConfig {
                worker_count: default_worker_count(),
            },
        }
    }
}
