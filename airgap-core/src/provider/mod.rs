//! The interface each content source implements. The sync manager never
//! does upstream I/O directly — all upstream interaction is
//! provider-encapsulated, which is the polymorphism seam: new content types
//! add a provider, nothing else changes.
//!
//! Implemented as a trait object (`Arc<dyn Provider>`); providers are a
//! closed variant set registered by `type` tag, grounded on the teacher's
//! `type` tag fields on its `Server`/config-like rows (`models/server.rs`,
//! `models/settings.rs`).

pub mod registry;

use crate::error::CoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Download,
    Update,
    Delete,
    Skip,
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncAction {
    pub kind: ActionKind,
    pub path: String,
    pub local_path: Option<PathBuf>,
    pub url: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    pub total_bytes: u64,
}

impl SyncPlan {
    pub fn skip_count(&self) -> u64 {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Skip)
            .count() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub checked: u64,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub type ValidationProgressSetter = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn type_tag(&self) -> &str;

    fn configure(&mut self, raw: Value) -> Result<(), CoreError>;

    async fn plan(&self) -> Result<SyncPlan, CoreError>;

    async fn validate(&self) -> Result<ValidationReport, CoreError>;

    /// Optional hook so the sync manager can report per-file progress
    /// during validation; a no-op default for providers that don't
    /// support it.
    fn set_validation_progress(&mut self, _setter: ValidationProgressSetter) {}
}

pub type ProviderFactory =
    Arc<dyn Fn(&str, &std::path::Path, Value) -> Result<Arc<dyn Provider>, CoreError> + Send + Sync>;
