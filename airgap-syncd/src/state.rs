use crate::config::AppConfig;
use airgap_core::db::DbPool;
use airgap_core::provider::{Provider, ProviderFactory};
use airgap_core::sync::SyncManager;
use airgap_core::CoreError;
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub sync_manager: Arc<SyncManager>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let sync_manager = Arc::new(
            SyncManager::new(db.clone(), config.data_dir.clone())
                .with_worker_count(config.worker_count),
        );
        AppState { db, config, sync_manager }
    }
}

/// No concrete provider implementations ship with the core engine — only
/// the contract (`airgap_core::provider::Provider`). Operators deploying a
/// concrete content type register a factory for it; until one is wired in,
/// every configured provider type is rejected with a clear error rather
/// than silently ignored.
pub fn unregistered_provider_factory() -> ProviderFactory {
    Arc::new(|type_tag, _data_dir, _raw| -> Result<Arc<dyn Provider>, CoreError> {
        Err(CoreError::Invalid(format!(
            "no provider implementation registered for type {type_tag:?}"
        )))
    })
}
