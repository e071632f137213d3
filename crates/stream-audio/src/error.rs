//! Driver-level error categories.

use std::sync::Arc;

use crate::graph::GraphError;
use crate::parser::ParserError;
use crate::reader::ReaderError;

/// Fatal failure of the current playback attempt, reported through
/// [`StreamerObserver::on_playback_failed`](crate::StreamerObserver::on_playback_failed).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Unsupported container or malformed stream.
    #[error("stream format error: {0}")]
    Format(#[from] ParserError),

    /// Converter creation or decoding failed.
    #[error("converter error: {0}")]
    Converter(#[source] Arc<ReaderError>),

    #[error("output graph error: {0}")]
    Graph(#[from] GraphError),
}

impl From<ReaderError> for StreamError {
    fn from(err: ReaderError) -> Self {
        StreamError::Converter(Arc::new(err))
    }
}

/// Why a seek request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeekError {
    #[error("no stream loaded")]
    NoStream,

    /// The stream's format or duration is not known yet.
    #[error("stream not ready for seeking")]
    NotReady,
}
