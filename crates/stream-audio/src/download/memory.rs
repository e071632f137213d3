//! Downloader that serves an in-memory byte buffer, optionally throttled.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use super::{DownloadError, DownloadSink, DownloadState, Downloader, DownloaderFactory};

/// Factory serving the same bytes for every URL.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
    chunk_size: usize,
    chunk_interval: Option<Duration>,
    announce_length: bool,
    fail_after: Option<(usize, DownloadError)>,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            chunk_size: 4096,
            chunk_interval: None,
            announce_length: true,
            fail_after: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Wait this long before every chunk.
    pub fn with_chunk_interval(mut self, interval: Duration) -> Self {
        self.chunk_interval = Some(interval);
        self
    }

    /// Do not report the body length up front.
    pub fn without_length(mut self) -> Self {
        self.announce_length = false;
        self
    }

    /// Deliver `bytes` bytes, then complete with `error`.
    pub fn with_failure_after(mut self, bytes: usize, error: DownloadError) -> Self {
        self.fail_after = Some((bytes, error));
        self
    }
}

impl DownloaderFactory for MemorySource {
    fn create(&self, url: &Url, sink: DownloadSink) -> Box<dyn Downloader> {
        debug!(%url, bytes = self.data.len(), "memory downloader created");
        Box::new(MemoryDownloader::new(self.clone(), sink))
    }
}

enum Control {
    Pause,
    Resume,
    Stop,
}

/// Feeds a [`MemorySource`] into a sink from a worker thread.
pub struct MemoryDownloader {
    source: Option<MemorySource>,
    sink: DownloadSink,
    state: Arc<Mutex<DownloadState>>,
    control: Option<Sender<Control>>,
}

impl MemoryDownloader {
    pub fn new(source: MemorySource, sink: DownloadSink) -> Self {
        Self {
            source: Some(source),
            sink,
            state: Arc::new(Mutex::new(DownloadState::NotStarted)),
            control: None,
        }
    }

    fn send(&self, control: Control) {
        if let Some(tx) = &self.control {
            let _ = tx.send(control);
        }
    }
}

impl Downloader for MemoryDownloader {
    fn start(&mut self) {
        let mut state = self.state.lock();
        match *state {
            DownloadState::NotStarted => {
                let Some(source) = self.source.take() else {
                    return;
                };
                let (tx, rx) = unbounded();
                self.control = Some(tx);
                *state = DownloadState::Started;
                let sink = self.sink.clone();
                let shared = Arc::clone(&self.state);
                thread::spawn(move || feed(source, sink, rx, shared));
            }
            DownloadState::Paused => {
                *state = DownloadState::Started;
                drop(state);
                self.send(Control::Resume);
            }
            _ => {}
        }
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        if *state == DownloadState::Started {
            *state = DownloadState::Paused;
            drop(state);
            self.send(Control::Pause);
        }
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        match *state {
            DownloadState::Started | DownloadState::Paused => {
                *state = DownloadState::Stopped;
                drop(state);
                self.send(Control::Stop);
            }
            DownloadState::NotStarted => *state = DownloadState::Stopped,
            _ => {}
        }
    }

    fn state(&self) -> DownloadState {
        *self.state.lock()
    }
}

impl Drop for MemoryDownloader {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Step {
    Continue,
    Stop,
}

/// Applies pending control messages, blocking while paused.
fn poll_control(rx: &Receiver<Control>, wait: Option<Duration>) -> Step {
    let mut paused = false;
    loop {
        let msg = if paused {
            rx.recv().map_err(|_| ())
        } else if let Some(wait) = wait {
            match rx.recv_timeout(wait) {
                Ok(msg) => Ok(msg),
                Err(RecvTimeoutError::Timeout) => return Step::Continue,
                Err(RecvTimeoutError::Disconnected) => Err(()),
            }
        } else {
            match rx.try_recv() {
                Ok(msg) => Ok(msg),
                Err(TryRecvError::Empty) => return Step::Continue,
                Err(TryRecvError::Disconnected) => Err(()),
            }
        };
        match msg {
            Ok(Control::Pause) => paused = true,
            Ok(Control::Resume) => paused = false,
            Ok(Control::Stop) | Err(()) => return Step::Stop,
        }
    }
}

fn feed(
    source: MemorySource,
    sink: DownloadSink,
    rx: Receiver<Control>,
    state: Arc<Mutex<DownloadState>>,
) {
    let limit = source
        .fail_after
        .as_ref()
        .map_or(source.data.len(), |(bytes, _)| (*bytes).min(source.data.len()));
    let expected = source.announce_length.then_some(source.data.len() as u64);
    if !sink.header(expected) {
        return;
    }

    let mut offset = 0;
    while offset < limit {
        if let Step::Stop = poll_control(&rx, source.chunk_interval) {
            debug!(offset, "memory download stopped");
            sink.complete(Some(DownloadError::Cancelled));
            return;
        }
        let end = (offset + source.chunk_size).min(limit);
        trace!(offset, end, "memory chunk");
        if sink.data(source.data.slice(offset..end)).is_none() {
            return;
        }
        offset = end;
    }

    match source.fail_after {
        Some((_, error)) => {
            *state.lock() = DownloadState::Stopped;
            sink.complete(Some(error));
        }
        None => {
            *state.lock() = DownloadState::Completed;
            sink.complete(None);
        }
    }
}
