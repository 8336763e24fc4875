//! Concurrency-safe progress snapshot model feeding a streaming event channel.
//!
//! Grounded on `backup-agent/src/transfer/progress.rs` (bytes/sec, ETA and
//! percent derivation) and the periodic-broadcast/active-file-map pattern in
//! `backup-agent/src/executor/mod.rs`. The "close-and-replace" wait channel
//! (spec §4.7/§9) generalizes the teacher's `broadcast::channel` fan-out
//! (`backup-agent/src/ws/mod.rs`) into a single `Notify` handle that gets
//! swapped out on every update, so N observers wake once per update with no
//! per-observer bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

const MAX_EVENTS: usize = 20;
const FILE_UPDATE_THROTTLE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Downloading,
    Complete,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveFileProgress {
    pub path: String,
    pub bytes_so_far: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub path: String,
    pub success: bool,
    pub error: Option<String>,
}

struct Inner {
    phase: Phase,
    total_files: u64,
    completed_files: u64,
    failed_files: u64,
    skipped_files: u64,
    total_bytes: u64,
    downloaded_bytes: u64,
    active_files: HashMap<String, ActiveFileProgress>,
    events: VecDeque<CompletionEvent>,
    retry_count: u64,
    message: String,
    started_at: Instant,
    last_file_signal: HashMap<String, Instant>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            phase: Phase::Planning,
            total_files: 0,
            completed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            total_bytes: 0,
            downloaded_bytes: 0,
            active_files: HashMap::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
            retry_count: 0,
            message: String::new(),
            started_at: Instant::now(),
            last_file_signal: HashMap::new(),
        }
    }
}

/// A value-copy of tracker state suitable for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub skipped_files: u64,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub percent: f64,
    pub bytes_per_second: f64,
    pub eta_seconds: Option<u64>,
    pub elapsed_seconds: f64,
    pub active_files: Vec<ActiveFileProgress>,
    pub recent_events: Vec<CompletionEvent>,
    pub retry_count: u64,
    pub message: String,
}

/// Holds the whole snapshot under one lock; every mutator signals exactly once.
pub struct ProgressTracker {
    inner: Mutex<Inner>,
    notify: Mutex<Arc<Notify>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        ProgressTracker {
            inner: Mutex::new(Inner::new()),
            notify: Mutex::new(Arc::new(Notify::new())),
        }
    }

    fn signal(&self) {
        let old = {
            let mut slot = self.notify.lock().unwrap();
            let fresh = Arc::new(Notify::new());
            std::mem::replace(&mut *slot, fresh)
        };
        old.notify_waiters();
    }

    /// Closed on the next update. Consumers re-acquire the channel (call
    /// `wait` again) after each wake.
    pub async fn wait(&self) {
        let notify = self.notify.lock().unwrap().clone();
        notify.notified().await;
    }

    pub fn set_phase(&self, phase: Phase, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.phase = phase;
        inner.message = message.into();
        drop(inner);
        self.signal();
    }

    pub fn set_totals(&self, total_files: u64, total_bytes: u64, skipped_files: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_files = total_files;
        inner.total_bytes = total_bytes;
        inner.skipped_files = skipped_files;
        drop(inner);
        self.signal();
    }

    /// Throttled to <=1 notification every 250ms per file; the latest value
    /// is always retained even when the signal is skipped, so polling reads
    /// via `snapshot()` stay fresh regardless of notification churn.
    pub fn report_file_progress(&self, path: &str, bytes_so_far: u64, total: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.active_files.insert(
            path.to_string(),
            ActiveFileProgress {
                path: path.to_string(),
                bytes_so_far,
                total,
            },
        );

        let now = Instant::now();
        let should_signal = match inner.last_file_signal.get(path) {
            Some(last) => now.duration_since(*last) >= FILE_UPDATE_THROTTLE,
            None => true,
        };
        if should_signal {
            inner.last_file_signal.insert(path.to_string(), now);
        }
        drop(inner);
        if should_signal {
            self.signal();
        }
    }

    pub fn report_completion(&self, path: &str, bytes: u64, success: bool, error: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.active_files.remove(path);
        if success {
            inner.completed_files += 1;
            inner.downloaded_bytes += bytes;
        } else {
            inner.failed_files += 1;
        }
        inner.events.push_front(CompletionEvent {
            path: path.to_string(),
            success,
            error,
        });
        inner.events.truncate(MAX_EVENTS);
        drop(inner);
        self.signal();
    }

    pub fn record_retry(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.retry_count += 1;
        drop(inner);
        self.signal();
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();
        let elapsed = inner.started_at.elapsed().as_secs_f64();
        let denom = inner.total_files.saturating_sub(inner.skipped_files);
        let numerator = inner.completed_files + inner.failed_files;
        let percent = if denom == 0 {
            100.0
        } else {
            (numerator as f64 / denom as f64 * 100.0).min(100.0)
        };

        let bytes_per_second = if elapsed > 0.0 {
            inner.downloaded_bytes as f64 / elapsed
        } else {
            0.0
        };

        let eta_seconds = if bytes_per_second > 0.0 && inner.total_bytes > inner.downloaded_bytes {
            Some(((inner.total_bytes - inner.downloaded_bytes) as f64 / bytes_per_second) as u64)
        } else {
            None
        };

        let mut active_files: Vec<_> = inner.active_files.values().cloned().collect();
        active_files.sort_by(|a, b| a.path.cmp(&b.path));

        Snapshot {
            phase: inner.phase,
            total_files: inner.total_files,
            completed_files: inner.completed_files,
            failed_files: inner.failed_files,
            skipped_files: inner.skipped_files,
            total_bytes: inner.total_bytes,
            downloaded_bytes: inner.downloaded_bytes,
            percent,
            bytes_per_second,
            eta_seconds,
            elapsed_seconds: elapsed,
            active_files,
            recent_events: inner.events.iter().cloned().collect(),
            retry_count: inner.retry_count,
            message: inner.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_100_when_all_skipped() {
        let tracker = ProgressTracker::new();
        tracker.set_totals(5, 0, 5);
        assert_eq!(tracker.snapshot().percent, 100.0);
    }

    #[test]
    fn percent_tracks_completed_and_failed() {
        let tracker = ProgressTracker::new();
        tracker.set_totals(4, 400, 0);
        tracker.report_completion("a", 100, true, None);
        tracker.report_completion("b", 0, false, Some("boom".into()));
        let snap = tracker.snapshot();
        assert_eq!(snap.percent, 50.0);
        assert_eq!(snap.completed_files, 1);
        assert_eq!(snap.failed_files, 1);
    }

    #[test]
    fn active_files_sorted_by_path() {
        let tracker = ProgressTracker::new();
        tracker.report_file_progress("zeta", 1, 10);
        tracker.report_file_progress("alpha", 2, 10);
        let snap = tracker.snapshot();
        let paths: Vec<_> = snap.active_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["alpha", "zeta"]);
    }

    #[test]
    fn event_log_caps_at_twenty_most_recent_first() {
        let tracker = ProgressTracker::new();
        for i in 0..25 {
            tracker.report_completion(&format!("file-{i}"), 1, true, None);
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.recent_events.len(), 20);
        assert_eq!(snap.recent_events[0].path, "file-24");
    }

    #[tokio::test]
    async fn wait_resolves_on_next_update() {
        let tracker = Arc::new(ProgressTracker::new());
        let waiter = tracker.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.set_phase(Phase::Downloading, "starting");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should resolve after an update")
            .unwrap();
    }
}
