//! Downloader boundary.
//!
//! A downloader streams the bytes of one URL into a [`DownloadSink`]: an optional header
//! with the expected length, the body chunks in order, then exactly one completion. The
//! sink forwards everything to the parse worker of the session that created it, so chunks
//! are never parsed on the transport's own threads.

mod error;
mod memory;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use url::Url;

pub use self::error::DownloadError;
pub use self::memory::{MemoryDownloader, MemorySource};

/// Lifecycle of a downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    NotStarted,
    Started,
    Paused,
    Completed,
    Stopped,
}

/// Messages from a downloader to its session.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Header { expected_length: Option<u64> },
    Data { chunk: Bytes, progress: f32 },
    Complete(Option<DownloadError>),
}

const UNKNOWN_LENGTH: u64 = u64::MAX;

/// Callback side handed to a downloader. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DownloadSink {
    tx: Sender<DownloadEvent>,
    received: Arc<AtomicU64>,
    expected: Arc<AtomicU64>,
}

impl DownloadSink {
    /// Create a sink and the receiving end of its events.
    pub fn channel() -> (Self, Receiver<DownloadEvent>) {
        let (tx, rx) = unbounded();
        let sink = Self {
            tx,
            received: Arc::new(AtomicU64::new(0)),
            expected: Arc::new(AtomicU64::new(UNKNOWN_LENGTH)),
        };
        (sink, rx)
    }

    /// Report the expected body length. Returns false when the session is gone.
    pub fn header(&self, expected_length: Option<u64>) -> bool {
        self.expected
            .store(expected_length.unwrap_or(UNKNOWN_LENGTH), Ordering::Relaxed);
        self.tx
            .send(DownloadEvent::Header { expected_length })
            .is_ok()
    }

    /// Deliver the next body chunk. Returns the download progress in `[0, 1]` (zero while
    /// the length is unknown), or `None` when the session is gone.
    pub fn data(&self, chunk: Bytes) -> Option<f32> {
        let received = self
            .received
            .fetch_add(chunk.len() as u64, Ordering::Relaxed)
            + chunk.len() as u64;
        let progress = self.progress_at(received);
        self.tx
            .send(DownloadEvent::Data { chunk, progress })
            .ok()
            .map(|()| progress)
    }

    /// Finish the download, with an error unless it succeeded.
    pub fn complete(&self, error: Option<DownloadError>) {
        let _ = self.tx.send(DownloadEvent::Complete(error));
    }

    /// Body bytes delivered so far.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> f32 {
        self.progress_at(self.received())
    }

    fn progress_at(&self, received: u64) -> f32 {
        match self.expected.load(Ordering::Relaxed) {
            UNKNOWN_LENGTH | 0 => 0.0,
            expected => (received as f64 / expected as f64).min(1.0) as f32,
        }
    }
}

/// A streaming download of one URL.
pub trait Downloader: Send {
    /// Begin the download, or resume it after [`Downloader::pause`].
    fn start(&mut self);
    fn pause(&mut self);
    /// Cancel the download. Idempotent; the sink receives a `Cancelled` completion.
    fn stop(&mut self);
    fn state(&self) -> DownloadState;
}

/// Creates the downloader for each URL the driver loads.
pub trait DownloaderFactory: Send + Sync {
    fn create(&self, url: &Url, sink: DownloadSink) -> Box<dyn Downloader>;
}

impl<F> DownloaderFactory for F
where
    F: Fn(&Url, DownloadSink) -> Box<dyn Downloader> + Send + Sync,
{
    fn create(&self, url: &Url, sink: DownloadSink) -> Box<dyn Downloader> {
        self(url, sink)
    }
}
