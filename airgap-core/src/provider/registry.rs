//! In-memory registry of configured providers, guarded by a read-write lock.
//!
//! Grounded on the teacher's `ws/agent_registry.rs` `AgentRegistry`
//! (`DashMap`-backed, exclusive-registration discipline), generalized here
//! to `tokio::sync::RwLock<HashMap<_, _>>` since provider reconfiguration is
//! an infrequent exclusive-lock event rather than a per-connection hot path.

use crate::error::CoreError;
use crate::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry {
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }

    pub async fn all(&self) -> Vec<(String, Arc<dyn Provider>)> {
        self.providers
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Rebuilds the registry atomically from the caller's perspective: the
    /// write lock is held for the whole swap, so readers see either the old
    /// or the new set, never a partial one.
    pub async fn replace(&self, new_providers: HashMap<String, Arc<dyn Provider>>) {
        let mut guard = self.providers.write().await;
        *guard = new_providers;
    }

    pub async fn require(&self, name: &str) -> Result<Arc<dyn Provider>, CoreError> {
        self.get(name)
            .await
            .ok_or_else(|| CoreError::NotFound(format!("unknown provider: {name}")))
    }
}
