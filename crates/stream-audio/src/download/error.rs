//! Download error type shared by every downloader implementation.

use std::io;
use std::sync::Arc;

/// Errors reported by a downloader through [`DownloadSink::complete`](super::DownloadSink::complete).
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// The download was stopped by the caller. Not a failure.
    #[error("download cancelled")]
    Cancelled,

    /// The server answered with a non-success status.
    #[error("HTTP error: {status} for {url}")]
    Http { status: u16, url: String },

    #[error("request timeout for {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Extra context around a lower-level download error.
    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    pub fn msg(msg: impl Into<String>) -> Self {
        DownloadError::Message(msg.into())
    }

    pub fn http(status: u16, url: impl Into<String>) -> Self {
        DownloadError::Http {
            status,
            url: url.into(),
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        DownloadError::Timeout(url.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        DownloadError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// True when the download ended because it was stopped, looking through context layers.
    pub fn is_cancelled(&self) -> bool {
        match self {
            DownloadError::Cancelled => true,
            DownloadError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl From<io::Error> for DownloadError {
    fn from(err: io::Error) -> Self {
        DownloadError::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_seen_through_context() {
        let err = DownloadError::Cancelled.with_context("fetching body");
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "fetching body: download cancelled");
        assert!(!DownloadError::http(404, "http://x/a.mp3").is_cancelled());
    }
}
