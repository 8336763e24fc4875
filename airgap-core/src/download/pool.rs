//! Bounded-concurrency batch executor over the download client.
//!
//! Grounded on the teacher's weighted-semaphore concurrency pattern in
//! `backup-agent/src/executor/mod.rs` (`concurrency_weight()`, a bounded
//! `tokio::sync::Semaphore`, a periodic progress-broadcast task), generalized
//! into a reusable, index-ordered pool. The index-based result reordering is
//! additionally grounded on the `DownloadJob`/`WorkerDeps` split in
//! `other_examples/56bff3b9_mmogr-gglib__crates-gglib-download-src-manager-worker.rs.rs`.

use crate::download::client::{DownloadClient, DownloadOutcome, DownloadRequest};
use crate::error::CoreError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub type ProgressHook = Arc<dyn Fn(&std::path::Path, u64, u64) + Send + Sync>;
pub type CompleteHook = Arc<dyn Fn(&std::path::Path, u64, bool, Option<String>) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: DownloadRequest,
    pub success: bool,
    pub error: Option<String>,
    pub download_result: Option<DownloadOutcome>,
}

pub struct DownloadPool {
    client: DownloadClient,
    workers: usize,
    on_progress: Option<ProgressHook>,
    on_complete: Option<CompleteHook>,
}

impl DownloadPool {
    pub fn new(client: DownloadClient, workers: i64) -> Self {
        DownloadPool {
            client,
            workers: if workers < 1 { 1 } else { workers as usize },
            on_progress: None,
            on_complete: None,
        }
    }

    pub fn with_progress_hook(mut self, hook: ProgressHook) -> Self {
        self.on_progress = Some(hook);
        self
    }

    pub fn with_complete_hook(mut self, hook: CompleteHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    /// Returns one result per input job, in input order, after every worker
    /// has finished. An empty batch returns immediately.
    pub async fn execute(
        &self,
        jobs: Vec<DownloadRequest>,
        cancel: CancellationToken,
    ) -> Vec<JobResult> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut slots: Vec<Option<JobResult>> = (0..total).map(|_| None).collect();
        let mut handles = Vec::with_capacity(total);

        for (index, job) in jobs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let cancel = cancel.clone();
            let on_progress = self.on_progress.clone();
            let on_complete = self.on_complete.clone();

            handles.push(tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return (index, cancelled_result(job));
                }

                let _permit = tokio::select! {
                    permit = semaphore.acquire() => permit.expect("semaphore not closed"),
                    _ = cancel.cancelled() => return (index, cancelled_result(job)),
                };

                let dest = job.dest.clone();
                let progress_cb: Option<crate::download::client::ProgressCallback> =
                    on_progress.clone().map(|hook| {
                        let dest = dest.clone();
                        Arc::new(move |seen: u64, total: u64| hook(&dest, seen, total))
                            as crate::download::client::ProgressCallback
                    });

                let result = client.fetch(&job, &cancel, progress_cb).await;
                let job_result = match result {
                    Ok(outcome) => {
                        if let Some(hook) = &on_complete {
                            hook(&dest, outcome.size, true, None);
                        }
                        JobResult {
                            job,
                            success: true,
                            error: None,
                            download_result: Some(outcome),
                        }
                    }
                    Err(e) => {
                        let message = e.to_string();
                        if let Some(hook) = &on_complete {
                            hook(&dest, 0, false, Some(message.clone()));
                        }
                        JobResult {
                            job,
                            success: false,
                            error: Some(message),
                            download_result: None,
                        }
                    }
                };
                (index, job_result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((index, result)) => slots[index] = Some(result),
                Err(_) => {}
            }
        }

        slots.into_iter().flatten().collect()
    }
}

fn cancelled_result(job: DownloadRequest) -> JobResult {
    JobResult {
        job,
        success: false,
        error: Some(CoreError::Cancelled.to_string()),
        download_result: None,
    }
}
