pub mod client;
pub mod pool;
pub mod progress_stream;

pub use client::{DownloadClient, DownloadOutcome, DownloadRequest, ProgressCallback};
pub use pool::{DownloadPool, JobResult};
