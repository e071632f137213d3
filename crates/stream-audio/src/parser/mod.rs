//! Progressive packet parser.
//!
//! [`Parser`] accepts the downloaded byte stream in arbitrary chunks and demuxes it into
//! packets as soon as whole packets are available, publishing format metadata along the
//! way. Bytes that do not yet form a whole packet stay buffered until the next call.
//!
//! Design notes:
//! - The parser is the single writer of its [`ParsedStream`]. It is not `Sync`-shared: the
//!   driver moves it onto a dedicated parse worker so chunks are parsed strictly in order.
//! - Failures are sticky. Once a parse call fails, every later call reports the same error.
//! - [`Parser::finish`] marks the stream complete; readers use that flag to tell
//!   "not enough data yet" apart from end of stream.

mod adts;
mod format;
mod input;
mod mpeg;
mod probe;
mod store;
mod wave;

use tracing::{debug, trace, warn};

pub use self::format::{FileType, FormatId, PcmEncoding, StreamFormat};
pub use self::store::{Packet, PacketDescription, ParseInfo, ParsedStream};

use self::input::Input;
use self::probe::Probe;
use self::store::StreamWriter;

/// Result type used by the parser.
pub type ParserResult<T> = Result<T, ParserError>;

/// Why a parse call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailureKind {
    #[error("malformed {0} header")]
    MalformedHeader(&'static str),

    #[error("unsupported sample encoding (format tag {tag:#06x}, {bits} bits)")]
    UnsupportedEncoding { tag: u16, bits: u16 },

    #[error("stream ended inside the {0} header")]
    TruncatedHeader(&'static str),
}

/// Parser errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    /// The parser could not be created with the given options.
    #[error("stream could not be opened: {0}")]
    StreamCouldNotOpen(&'static str),

    /// The stream is not one of the enabled container families.
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("parse failure: {0}")]
    ParseFailure(#[from] ParseFailureKind),
}

/// Parser configuration.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Container families accepted by this parser.
    /// Default: all supported families.
    pub file_types: Vec<FileType>,

    /// How many leading bytes may be scanned for an audio sync word before the stream is
    /// rejected as unsupported.
    /// Default: 64 KiB.
    pub max_probe_bytes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            file_types: FileType::ALL.to_vec(),
            max_probe_bytes: 64 * 1024,
        }
    }
}

impl ParserOptions {
    pub fn with_file_types(mut self, file_types: impl IntoIterator<Item = FileType>) -> Self {
        self.file_types = file_types.into_iter().collect();
        self
    }

    pub fn with_max_probe_bytes(mut self, bytes: usize) -> Self {
        self.max_probe_bytes = bytes;
        self
    }
}

/// What a single parse call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub new_packets: usize,
    /// The duration estimate grew.
    pub duration_changed: bool,
    /// A data format is known (readers can be created).
    pub format_ready: bool,
}

/// A container-specific demuxer driven by [`Parser`].
pub(crate) trait Demux {
    /// Consume as many whole packets from `input` as possible.
    ///
    /// With `finishing` set no more bytes will arrive: incomplete trailing data is dropped.
    fn demux(
        &mut self,
        input: &mut Input,
        out: &mut StreamWriter<'_>,
        finishing: bool,
    ) -> ParserResult<()>;
}

#[derive(Debug)]
enum Demuxer {
    Probe(Probe),
    Mpeg(mpeg::MpegDemuxer),
    Adts(adts::AdtsDemuxer),
    Wave(wave::WaveDemuxer),
}

impl Demuxer {
    fn for_file_type(file_type: FileType) -> Self {
        match file_type {
            FileType::Mp3 => Demuxer::Mpeg(Default::default()),
            FileType::Adts => Demuxer::Adts(Default::default()),
            FileType::Wave => Demuxer::Wave(Default::default()),
        }
    }
}

/// Progressive demuxer for one stream.
#[derive(Debug)]
pub struct Parser {
    options: ParserOptions,
    stream: ParsedStream,
    input: Input,
    demuxer: Demuxer,
    content_length: Option<u64>,
    bytes_parsed: u64,
    failed: Option<ParserError>,
}

impl Parser {
    /// Create a parser for a new stream.
    pub fn open(options: ParserOptions) -> ParserResult<Self> {
        if options.file_types.is_empty() {
            return Err(ParserError::StreamCouldNotOpen(
                "no container families enabled",
            ));
        }
        if options.max_probe_bytes == 0 {
            return Err(ParserError::StreamCouldNotOpen("probe window is empty"));
        }
        Ok(Self {
            options,
            stream: ParsedStream::new(),
            input: Input::default(),
            demuxer: Demuxer::Probe(Probe::default()),
            content_length: None,
            bytes_parsed: 0,
            failed: None,
        })
    }

    /// Shared read handle onto the packet store and metadata.
    pub fn stream(&self) -> ParsedStream {
        self.stream.clone()
    }

    /// Expected total length of the download, used to estimate totals when the container
    /// does not announce them.
    pub fn set_content_length(&mut self, length: Option<u64>) {
        self.content_length = length;
    }

    pub fn bytes_parsed(&self) -> u64 {
        self.bytes_parsed
    }

    /// Parse the next chunk of the stream.
    pub fn parse(&mut self, bytes: &[u8]) -> ParserResult<ParseReport> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        trace!(len = bytes.len(), offset = self.bytes_parsed, "parser: chunk");
        self.bytes_parsed += bytes.len() as u64;
        self.input.push(bytes);
        let result = self.run(false);
        result.map_err(|e| {
            warn!(error = %e, offset = self.bytes_parsed, "parser: failed");
            self.fail(e)
        })
    }

    /// Mark the end of the byte stream. Trailing partial packets are dropped and the stream
    /// becomes complete, even when this call reports an error.
    pub fn finish(&mut self) -> ParserResult<ParseReport> {
        if let Some(err) = self.failed.clone() {
            self.stream.writer().mark_complete();
            return Err(err);
        }
        let result = self.run(true);
        if result.is_err() {
            self.stream.writer().mark_complete();
        }
        // Expected after a cancelled download; callers log real failures.
        result.map_err(|e| {
            debug!(error = %e, offset = self.bytes_parsed, "parser: stream ended unparsed");
            self.fail(e)
        })
    }

    fn fail(&mut self, err: ParserError) -> ParserError {
        self.failed = Some(err.clone());
        err
    }

    fn run(&mut self, finishing: bool) -> ParserResult<ParseReport> {
        let mut out = self.stream.writer();
        let before = out.packet_count();

        loop {
            let detected = match &mut self.demuxer {
                Demuxer::Probe(probe) => {
                    match probe.detect(&mut self.input, &self.options, finishing)? {
                        Some(file_type) => file_type,
                        None => break,
                    }
                }
                Demuxer::Mpeg(d) => {
                    d.demux(&mut self.input, &mut out, finishing)?;
                    break;
                }
                Demuxer::Adts(d) => {
                    d.demux(&mut self.input, &mut out, finishing)?;
                    break;
                }
                Demuxer::Wave(d) => {
                    d.demux(&mut self.input, &mut out, finishing)?;
                    break;
                }
            };
            debug!(file_type = %detected, offset = self.input.offset(), "parser: container detected");
            out.set_file_type(detected);
            self.demuxer = Demuxer::for_file_type(detected);
        }

        let new_packets = out.packet_count() - before;
        let state = out.state_mut();
        state.apply_length_estimate(self.content_length);
        let duration_changed = state.refresh_duration();
        if finishing {
            out.mark_complete();
        }
        drop(out);

        Ok(ParseReport {
            new_packets,
            duration_changed,
            format_ready: self.stream.data_format().is_some(),
        })
    }
}
