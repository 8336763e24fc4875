//! Environment-sourced configuration for the daemon, following the
//! teacher's `AppConfig::from_env` shape.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_level: String,
    pub worker_count: i64,
    pub sync_all_cron: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = std::env::var("AIRGAP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/airgap-syncd/data"));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8900),
            db_path: std::env::var("AIRGAP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("airgap.db")),
            data_dir,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            sync_all_cron: std::env::var("SYNC_ALL_CRON").ok(),
        }
    }
}
