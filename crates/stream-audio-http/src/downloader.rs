//! Streaming HTTP downloader with retry and `Range` resume.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use stream_audio::{DownloadError, DownloadSink, DownloadState, Downloader, DownloaderFactory};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::settings::HttpSettings;

type DownloadResult<T> = Result<T, DownloadError>;

#[derive(Debug, Clone)]
enum RuntimeRef {
    Handle(Handle),
    Owned(Arc<Runtime>),
}

impl RuntimeRef {
    fn handle(&self) -> &Handle {
        match self {
            RuntimeRef::Handle(handle) => handle,
            RuntimeRef::Owned(runtime) => runtime.handle(),
        }
    }
}

/// Creates an [`HttpDownloader`] per URL, sharing one client and runtime.
#[derive(Debug, Clone)]
pub struct HttpDownloaderFactory {
    client: Client,
    settings: HttpSettings,
    runtime: RuntimeRef,
}

impl HttpDownloaderFactory {
    /// Use the current tokio runtime, or start a private one when called outside of tokio.
    pub fn new(settings: HttpSettings) -> DownloadResult<Self> {
        let runtime = match Handle::try_current() {
            Ok(handle) => RuntimeRef::Handle(handle),
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("stream-audio-http")
                    .enable_all()
                    .build()
                    .map_err(|e| DownloadError::from(e).with_context("starting http runtime"))?;
                RuntimeRef::Owned(Arc::new(runtime))
            }
        };
        Self::with_runtime_ref(settings, runtime)
    }

    /// Spawn downloads on `handle`.
    pub fn with_handle(settings: HttpSettings, handle: Handle) -> DownloadResult<Self> {
        Self::with_runtime_ref(settings, RuntimeRef::Handle(handle))
    }

    fn with_runtime_ref(settings: HttpSettings, runtime: RuntimeRef) -> DownloadResult<Self> {
        let client = build_client(&settings)?;
        Ok(Self {
            client,
            settings,
            runtime,
        })
    }
}

impl DownloaderFactory for HttpDownloaderFactory {
    fn create(&self, url: &Url, sink: DownloadSink) -> Box<dyn Downloader> {
        Box::new(HttpDownloader {
            task: Some(Task {
                client: self.client.clone(),
                settings: self.settings.clone(),
                url: url.clone(),
                sink,
            }),
            runtime: self.runtime.clone(),
            state: Arc::new(Mutex::new(DownloadState::NotStarted)),
            cancel: CancellationToken::new(),
            paused: watch::channel(false).0,
        })
    }
}

fn build_client(settings: &HttpSettings) -> DownloadResult<Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::msg(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DownloadError::msg(format!("invalid header value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    let mut builder = Client::builder().default_headers(headers);
    if let Some(user_agent) = &settings.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    builder
        .build()
        .map_err(|e| DownloadError::msg(e.to_string()).with_context("building http client"))
}

/// One URL fetched on a tokio task.
pub struct HttpDownloader {
    /// Taken when the download starts.
    task: Option<Task>,
    runtime: RuntimeRef,
    state: Arc<Mutex<DownloadState>>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl Downloader for HttpDownloader {
    fn start(&mut self) {
        let mut state = self.state.lock();
        match *state {
            DownloadState::NotStarted => {
                let Some(task) = self.task.take() else {
                    return;
                };
                *state = DownloadState::Started;
                let shared = Arc::clone(&self.state);
                let cancel = self.cancel.clone();
                let paused = self.paused.subscribe();
                self.runtime
                    .handle()
                    .spawn(async move { task.run(cancel, paused, shared).await });
            }
            DownloadState::Paused => {
                *state = DownloadState::Started;
                self.paused.send_replace(false);
            }
            _ => {}
        }
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        if *state == DownloadState::Started {
            *state = DownloadState::Paused;
            self.paused.send_replace(true);
        }
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if matches!(
            *state,
            DownloadState::NotStarted | DownloadState::Started | DownloadState::Paused
        ) {
            *state = DownloadState::Stopped;
            self.cancel.cancel();
        }
    }

    fn state(&self) -> DownloadState {
        *self.state.lock()
    }
}

impl Drop for HttpDownloader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Task {
    client: Client,
    settings: HttpSettings,
    url: Url,
    sink: DownloadSink,
}

/// Progress of the body across attempts.
#[derive(Debug, Default)]
struct Cursor {
    /// Body bytes delivered to the sink.
    offset: u64,
    header_sent: bool,
}

impl Task {
    async fn run(
        self,
        cancel: CancellationToken,
        paused: watch::Receiver<bool>,
        state: Arc<Mutex<DownloadState>>,
    ) {
        info!(url = %self.url, "http download started");
        let result = self.download(&cancel, paused).await;
        match result {
            Ok(()) => {
                info!(url = %self.url, bytes = self.sink.received(), "http download complete");
                *state.lock() = DownloadState::Completed;
                self.sink.complete(None);
            }
            Err(e) if e.is_cancelled() => {
                debug!(url = %self.url, "http download cancelled");
                self.sink.complete(Some(e));
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "http download failed");
                *state.lock() = DownloadState::Stopped;
                self.sink.complete(Some(e));
            }
        }
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        mut paused: watch::Receiver<bool>,
    ) -> DownloadResult<()> {
        let mut cursor = Cursor::default();
        let mut failures = 0;
        let mut delay = self.settings.retry_base_delay;

        loop {
            let before = cursor.offset;
            let error = match self.attempt(&mut cursor, cancel, &mut paused).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => e,
            };
            if cursor.offset > before {
                failures = 0;
                delay = self.settings.retry_base_delay;
            }
            failures += 1;
            debug!(
                url = %self.url,
                attempt = failures,
                max_attempts = self.settings.max_retries + 1,
                offset = cursor.offset,
                "download attempt failed: {}",
                error
            );
            if !is_retryable(&error) || failures > self.settings.max_retries {
                return Err(error);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(self.settings.max_retry_delay);
        }
    }

    /// One request, resuming at `cursor.offset`. Returns once the body ended.
    async fn attempt(
        &self,
        cursor: &mut Cursor,
        cancel: &CancellationToken,
        paused: &mut watch::Receiver<bool>,
    ) -> DownloadResult<()> {
        let mut request = self.client.get(self.url.clone());
        if cursor.offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", cursor.offset));
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = timeout(self.settings.request_timeout, request.send()) => response,
        };
        let response = response
            .map_err(|_| DownloadError::timeout(self.url.as_str()))?
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http(status.as_u16(), self.url.as_str()));
        }
        // A server ignoring the range resends the body from the start.
        let mut skip = if status == StatusCode::PARTIAL_CONTENT {
            0
        } else {
            cursor.offset
        };
        if !cursor.header_sent {
            let expected = if status == StatusCode::PARTIAL_CONTENT {
                response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total)
            } else {
                response.content_length()
            };
            debug!(url = %self.url, ?expected, "http response headers");
            if !self.sink.header(expected) {
                return Err(DownloadError::Cancelled);
            }
            cursor.header_sent = true;
        }

        let mut body = response.bytes_stream();
        loop {
            if *paused.borrow() {
                wait_resumed(paused, cancel).await?;
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = timeout(self.settings.idle_timeout, body.next()) => next,
            };
            let chunk = match next {
                Err(_) => return Err(DownloadError::timeout(self.url.as_str())),
                Ok(None) => return Ok(()),
                Ok(Some(chunk)) => chunk.map_err(|e| self.request_error(e))?,
            };
            let Some(chunk) = skip_prefix(chunk, &mut skip) else {
                continue;
            };
            trace!(offset = cursor.offset, len = chunk.len(), "http chunk");
            let len = chunk.len() as u64;
            if self.sink.data(chunk).is_none() {
                return Err(DownloadError::Cancelled);
            }
            cursor.offset += len;
        }
    }

    fn request_error(&self, error: reqwest::Error) -> DownloadError {
        if error.is_timeout() {
            DownloadError::timeout(self.url.as_str())
        } else {
            DownloadError::msg(error.to_string()).with_context("http request")
        }
    }
}

async fn wait_resumed(
    paused: &mut watch::Receiver<bool>,
    cancel: &CancellationToken,
) -> DownloadResult<()> {
    while *paused.borrow_and_update() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            changed = paused.changed() => {
                if changed.is_err() {
                    return Err(DownloadError::Cancelled);
                }
            }
        }
    }
    Ok(())
}

fn skip_prefix(chunk: Bytes, skip: &mut u64) -> Option<Bytes> {
    if *skip == 0 {
        return Some(chunk);
    }
    let len = chunk.len() as u64;
    if len <= *skip {
        *skip -= len;
        return None;
    }
    let start = *skip as usize;
    *skip = 0;
    Some(chunk.slice(start..))
}

/// Total length from `Content-Range: bytes 100-199/1000`.
fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

fn is_retryable(error: &DownloadError) -> bool {
    match error {
        DownloadError::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
        DownloadError::Timeout(_) | DownloadError::Io(_) | DownloadError::Message(_) => true,
        DownloadError::Context { source, .. } => is_retryable(source),
        DownloadError::Cancelled => false,
    }
}
