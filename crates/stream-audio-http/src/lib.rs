//! HTTP downloader for `stream-audio`.
//!
//! [`HttpDownloaderFactory`] plugs into [`stream_audio::Streamer`]: each URL is fetched
//! with `reqwest` on a `tokio` runtime and its body chunks are pushed into the session's
//! [`DownloadSink`](stream_audio::DownloadSink) as they arrive. Transient failures are
//! retried with exponential backoff, resuming from the received offset with a `Range`
//! request.

mod downloader;
mod settings;

pub use crate::downloader::{HttpDownloader, HttpDownloaderFactory};
pub use crate::settings::HttpSettings;
