//! Progressive audio streaming.
//!
//! Bytes arrive from a [`Downloader`], are demuxed into packets by a [`Parser`] while the
//! download is still running, converted to the output format by a [`Reader`], and
//! scheduled into an [`OutputGraph`] by the [`Streamer`]. This file only wires modules and
//! re-exports.

pub mod download;
pub mod effects;
pub mod graph;
pub mod parser;
pub mod reader;

mod error;
mod events;
mod settings;
mod streamer;
mod types;

pub use crate::download::{
    DownloadError, DownloadEvent, DownloadSink, DownloadState, Downloader, DownloaderFactory,
    MemoryDownloader, MemorySource,
};
pub use crate::effects::{AudioProcessor, Balance, Gain, ProcessingChain, TimePitch};
pub use crate::error::{SeekError, StreamError};
pub use crate::events::{PlaybackState, StreamerEvent, StreamerObserver};
pub use crate::graph::{GraphError, MemoryGraph, OutputGraph};
pub use crate::parser::{
    FileType, ParseFailureKind, ParseReport, ParsedStream, Parser, ParserError, ParserOptions,
    StreamFormat,
};
pub use crate::reader::{Reader, ReaderError};
pub use crate::settings::{EndBehavior, ResamplingQuality, StreamerSettings};
pub use crate::streamer::{Streamer, StreamerBuilder};
pub use crate::types::{AudioSpec, PcmBuffer};

#[cfg(feature = "rodio")]
pub use crate::graph::RodioGraph;
