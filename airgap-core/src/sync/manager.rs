//! The hub: drives a provider through plan -> fetch -> reconcile, persisting
//! outcomes and exposing live progress.
//!
//! Grounded on the teacher's `services/agent_orchestrator.rs` plan/dispatch/
//! reconcile loop over per-server backup jobs with a weighted pool, and its
//! `ws/agent_registry.rs` exclusive-registration discipline generalized to
//! [`crate::provider::registry::ProviderRegistry`].

use crate::db::models::{failed_file, file_record, sync_run};
use crate::db::models::sync_run::SyncStatus;
use crate::db::DbPool;
use crate::download::client::{DownloadClient, DownloadRequest};
use crate::download::pool::DownloadPool;
use crate::error::CoreError;
use crate::progress::{Phase, ProgressTracker};
use crate::provider::registry::ProviderRegistry;
use crate::provider::{ActionKind, Provider, ProviderFactory, SyncPlan};
use crate::sync::scan::{self, ScanReport};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const DEFAULT_WORKERS: i64 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub provider: String,
    pub status: String,
    pub files_downloaded: i64,
    pub files_deleted: i64,
    pub files_skipped: i64,
    pub files_failed: i64,
    pub bytes_transferred: i64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
    pub file_count: i64,
    pub total_size: i64,
    pub last_sync_time: Option<String>,
    pub last_sync_status: Option<String>,
    pub failed_file_count: i64,
}

pub struct SyncManager {
    pool: DbPool,
    data_dir: PathBuf,
    registry: Arc<ProviderRegistry>,
    active_tracker: RwLock<Arc<ProgressTracker>>,
    worker_count: i64,
}

impl SyncManager {
    pub fn new(pool: DbPool, data_dir: PathBuf) -> Self {
        SyncManager {
            pool,
            data_dir,
            registry: Arc::new(ProviderRegistry::new()),
            active_tracker: RwLock::new(Arc::new(ProgressTracker::new())),
            worker_count: DEFAULT_WORKERS,
        }
    }

    pub fn with_worker_count(mut self, workers: i64) -> Self {
        self.worker_count = workers;
        self
    }

    pub async fn active_tracker(&self) -> Arc<ProgressTracker> {
        self.active_tracker.read().await.clone()
    }

    /// Rebuilds the in-memory provider registry from `ProviderConfig` rows.
    /// Takes the registry's exclusive write lock; disabled or unparseable
    /// configs are dropped with a warning.
    pub async fn reconfigure_providers(&self, factory: ProviderFactory) -> Result<usize, CoreError> {
        let conn = self.pool.get().map_err(|e| CoreError::Other(e.into()))?;
        let configs = crate::db::models::provider_config::list_enabled(&conn)?;
        drop(conn);

        let mut built = HashMap::new();
        for cfg in &configs {
            let raw = match cfg.hydrated_config() {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(provider = %cfg.name, error = %e, "dropping provider with unparseable config");
                    continue;
                }
            };
            match factory(&cfg.r#type, &self.data_dir, raw) {
                Ok(provider) => {
                    built.insert(cfg.name.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(provider = %cfg.name, error = %e, "dropping provider that failed to build");
                }
            }
        }

        let count = built.len();
        self.registry.replace(built).await;
        Ok(count)
    }

    pub async fn sync_one(
        &self,
        provider_name: &str,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Result<SyncReport, CoreError> {
        let provider = self.registry.require(provider_name).await?;

        let tracker = Arc::new(ProgressTracker::new());
        *self.active_tracker.write().await = tracker.clone();
        tracker.set_phase(Phase::Planning, format!("planning sync for {provider_name}"));

        let conn = self.pool.get().map_err(|e| CoreError::Other(e.into()))?;
        let run = sync_run::start(&conn, provider_name)?;

        let plan = match provider.plan().await {
            Ok(plan) => plan,
            Err(e) => {
                sync_run::fail(&conn, &run.id, &e.to_string())?;
                tracker.set_phase(Phase::Failed, e.to_string());
                return Ok(SyncReport {
                    provider: provider_name.to_string(),
                    status: SyncStatus::Failed.as_str().to_string(),
                    files_downloaded: 0,
                    files_deleted: 0,
                    files_skipped: 0,
                    files_failed: 0,
                    bytes_transferred: 0,
                    error: Some(e.to_string()),
                });
            }
        };

        let skip_count = plan.skip_count();
        tracker.set_totals(plan.actions.len() as u64, plan.total_bytes, skip_count);
        tracker.set_phase(Phase::Downloading, "downloading".to_string());

        if dry_run {
            let (downloaded, updated, deleted, skipped) = count_actions(&plan);
            sync_run::finalize(
                &conn,
                &run.id,
                SyncStatus::Success,
                0,
                deleted,
                skipped,
                0,
                0,
                None,
            )?;
            tracker.set_phase(Phase::Complete, "dry run complete".to_string());
            return Ok(SyncReport {
                provider: provider_name.to_string(),
                status: SyncStatus::Success.as_str().to_string(),
                files_downloaded: downloaded + updated,
                files_deleted: deleted,
                files_skipped: skipped,
                files_failed: 0,
                bytes_transferred: 0,
                error: None,
            });
        }

        let download_actions: Vec<_> = plan
            .actions
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::Download | ActionKind::Update))
            .collect();

        let jobs: Vec<DownloadRequest> = download_actions
            .iter()
            .map(|a| DownloadRequest {
                url: a.url.clone().unwrap_or_default(),
                dest: a
                    .local_path
                    .clone()
                    .unwrap_or_else(|| self.data_dir.join(provider_name).join(&a.path)),
                expected_sha256: a.checksum.clone(),
                expected_size: a.size,
                retries: Some(3),
                headers: Vec::new(),
            })
            .collect();

        let tracker_progress = tracker.clone();
        let tracker_complete = tracker.clone();
        let download_pool = DownloadPool::new(DownloadClient::new(), self.worker_count)
            .with_progress_hook(Arc::new(move |dest, seen, total| {
                tracker_progress.report_file_progress(&dest.to_string_lossy(), seen, total);
            }))
            .with_complete_hook(Arc::new(move |dest, size, success, error| {
                tracker_complete.report_completion(&dest.to_string_lossy(), size, success, error);
            }));

        let results = download_pool.execute(jobs, cancel.clone()).await;
        let results_by_dest: HashMap<PathBuf, _> =
            results.into_iter().map(|r| (r.job.dest.clone(), r)).collect();

        let mut files_downloaded = 0i64;
        let mut files_deleted = 0i64;
        let mut files_skipped = 0i64;
        let mut files_failed = 0i64;
        let mut bytes_transferred = 0i64;

        for action in &plan.actions {
            match action.kind {
                ActionKind::Download | ActionKind::Update => {
                    let dest = action
                        .local_path
                        .clone()
                        .unwrap_or_else(|| self.data_dir.join(provider_name).join(&action.path));
                    match results_by_dest.get(&dest) {
                        Some(result) if result.success => {
                            if let Some(outcome) = &result.download_result {
                                file_record::upsert(
                                    &conn,
                                    provider_name,
                                    &action.path,
                                    outcome.size as i64,
                                    &outcome.sha256,
                                    &chrono::Utc::now().to_rfc3339(),
                                    Some(&run.id),
                                )?;
                                bytes_transferred += outcome.size as i64;
                                files_downloaded += 1;
                            }
                        }
                        Some(result) => {
                            files_failed += 1;
                            failed_file::record_failure(
                                &conn,
                                provider_name,
                                &action.path,
                                action.url.as_deref(),
                                dest.to_str(),
                                action.checksum.as_deref(),
                                action.size.map(|s| s as i64),
                                result.error.as_deref().unwrap_or("download failed"),
                            )?;
                        }
                        None => {
                            files_failed += 1;
                            failed_file::record_failure(
                                &conn,
                                provider_name,
                                &action.path,
                                action.url.as_deref(),
                                dest.to_str(),
                                action.checksum.as_deref(),
                                action.size.map(|s| s as i64),
                                "no download result produced",
                            )?;
                        }
                    }
                }
                ActionKind::Delete => {
                    let dest = action
                        .local_path
                        .clone()
                        .unwrap_or_else(|| self.data_dir.join(provider_name).join(&action.path));
                    std::fs::remove_file(&dest).ok();
                    file_record::delete(&conn, provider_name, &action.path)?;
                    files_deleted += 1;
                }
                ActionKind::Skip => {
                    files_skipped += 1;
                }
            }
        }

        let status = if files_failed == 0 {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        };
        sync_run::finalize(
            &conn,
            &run.id,
            status,
            files_downloaded,
            files_deleted,
            files_skipped,
            files_failed,
            bytes_transferred,
            None,
        )?;

        tracker.set_phase(
            if files_failed == 0 { Phase::Complete } else { Phase::Failed },
            format!("sync finished: {files_downloaded} downloaded, {files_failed} failed"),
        );

        Ok(SyncReport {
            provider: provider_name.to_string(),
            status: status.as_str().to_string(),
            files_downloaded,
            files_deleted,
            files_skipped,
            files_failed,
            bytes_transferred,
            error: None,
        })
    }

    /// Iterates enabled providers, continuing past per-provider errors;
    /// checks cancellation between providers.
    pub async fn sync_all(&self, cancel: CancellationToken) -> Vec<Result<SyncReport, CoreError>> {
        let names = self.registry.names().await;
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            if cancel.is_cancelled() {
                reports.push(Err(CoreError::Cancelled));
                break;
            }
            reports.push(self.sync_one(&name, false, cancel.clone()).await);
        }
        reports
    }

    pub async fn scan_local(&self, provider_name: &str) -> Result<ScanReport, CoreError> {
        let conn = self.pool.get().map_err(|e| CoreError::Other(e.into()))?;
        let root = self.data_dir.join(provider_name);
        scan::scan_local(&conn, provider_name, &root)
    }

    pub async fn status(&self) -> Result<Vec<ProviderStatus>, CoreError> {
        let conn = self.pool.get().map_err(|e| CoreError::Other(e.into()))?;
        let configs = crate::db::models::provider_config::list_all(&conn)?;
        let mut out = Vec::with_capacity(configs.len());
        for cfg in configs {
            let (file_count, total_size) = file_record::provider_stats(&conn, &cfg.name)?;
            let last_run = sync_run::latest_for_provider(&conn, &cfg.name)?;
            let failed_file_count = failed_file::count_unresolved(&conn, &cfg.name)?;
            out.push(ProviderStatus {
                name: cfg.name.clone(),
                enabled: cfg.enabled,
                file_count,
                total_size,
                last_sync_time: last_run.as_ref().map(|r| r.start_time.clone()),
                last_sync_status: last_run.as_ref().map(|r| r.status.clone()),
                failed_file_count,
            });
        }
        Ok(out)
    }
}

fn count_actions(plan: &SyncPlan) -> (i64, i64, i64, i64) {
    let mut downloaded = 0i64;
    let mut updated = 0i64;
    let mut deleted = 0i64;
    let mut skipped = 0i64;
    for action in &plan.actions {
        match action.kind {
            ActionKind::Download => downloaded += 1,
            ActionKind::Update => updated += 1,
            ActionKind::Delete => deleted += 1,
            ActionKind::Skip => skipped += 1,
        }
    }
    (downloaded, updated, deleted, skipped)
}
