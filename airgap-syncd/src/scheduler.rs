//! Periodic `SyncAll`/per-provider scheduling, following the teacher's
//! `BackupScheduler` shape: a `Mutex<JobScheduler>` guarding `tokio-cron-scheduler`
//! jobs built from persisted rows plus an optional global cron from config.

use crate::state::AppState;
use airgap_core::db::models::job;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

pub struct SyncScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
}

impl SyncScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(SyncScheduler {
            scheduler: Mutex::new(scheduler),
            state,
        })
    }

    async fn schedule_provider(&self, provider: &str, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();
        let provider = provider.to_string();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            let provider = provider.clone();
            Box::pin(async move {
                tracing::info!(provider = %provider, "starting scheduled sync");
                if let Err(e) = state
                    .sync_manager
                    .sync_one(&provider, false, CancellationToken::new())
                    .await
                {
                    tracing::error!(provider = %provider, error = %e, "scheduled sync failed");
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        Ok(())
    }

    async fn schedule_sync_all(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            Box::pin(async move {
                tracing::info!("starting scheduled sync-all");
                let reports = state.sync_manager.sync_all(CancellationToken::new()).await;
                let failed = reports.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    tracing::warn!(failed, "scheduled sync-all had failing providers");
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        Ok(())
    }

    /// Reads persisted per-provider `Job` rows with a cron expression and the
    /// optional global `sync_all_cron`, registering each. Disabled or
    /// cron-less rows are skipped, matching the teacher's `init_schedules`.
    pub async fn init_schedules(&self) -> anyhow::Result<()> {
        let pool = self.state.db.clone();
        let jobs = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            job::list_by_next_run(&conn)
        })
        .await??;

        let mut count = 0;
        for j in jobs {
            if j.status == "idle" {
                if let (Some(provider), Some(cron)) = (&j.provider, &j.cron_expression) {
                    if let Err(e) = self.schedule_provider(provider, cron).await {
                        tracing::error!(job_id = %j.id, provider = %provider, error = %e, "failed to schedule job");
                    } else {
                        count += 1;
                    }
                }
            }
        }

        if let Some(cron) = &self.state.config.sync_all_cron {
            self.schedule_sync_all(cron).await?;
            count += 1;
        }

        tracing::info!(count, "cron schedules initialized");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
