//! Byte-counting wrapper around a response body stream.
//!
//! Grounded on `backup-agent/src/transfer/progress_stream.rs`'s `ProgressStream`
//! wrapper around a `ReaderStream`: forwards bytes unchanged while invoking a
//! callback with the accumulated total.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

pub struct ProgressStream<S> {
    inner: S,
    seen: u64,
    total: u64,
    on_progress: Option<ProgressFn>,
}

impl<S> ProgressStream<S> {
    /// `seen_so_far` seeds the running total for a resumed download, whose
    /// bytes before the resume point never pass through this stream.
    pub fn new(inner: S, seen_so_far: u64, total: u64, on_progress: Option<ProgressFn>) -> Self {
        ProgressStream {
            inner,
            seen: seen_so_far,
            total,
            on_progress,
        }
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.seen += chunk.len() as u64;
                if let Some(cb) = &self.on_progress {
                    cb(self.seen, self.total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn forwards_bytes_and_reports_running_total() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"hel")), Ok(Bytes::from_static(b"lo!"))];
        let inner = stream::iter(chunks);
        let last_seen = Arc::new(AtomicU64::new(0));
        let tracked = last_seen.clone();
        let cb: ProgressFn = Arc::new(move |seen, _total| {
            tracked.store(seen, Ordering::SeqCst);
        });

        let mut wrapped = ProgressStream::new(inner, 0, 6, Some(cb));
        let mut collected = Vec::new();
        while let Some(item) = futures_util::StreamExt::next(&mut wrapped).await {
            collected.extend_from_slice(&item.unwrap());
        }

        assert_eq!(collected, b"hello!");
        assert_eq!(last_seen.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn resumed_download_seeds_the_running_total() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"!"))];
        let inner = stream::iter(chunks);
        let last_seen = Arc::new(AtomicU64::new(0));
        let tracked = last_seen.clone();
        let cb: ProgressFn = Arc::new(move |seen, _total| {
            tracked.store(seen, Ordering::SeqCst);
        });

        let mut wrapped = ProgressStream::new(inner, 5, 6, Some(cb));
        while futures_util::StreamExt::next(&mut wrapped).await.is_some() {}

        assert_eq!(last_seen.load(Ordering::SeqCst), 6);
    }
}
