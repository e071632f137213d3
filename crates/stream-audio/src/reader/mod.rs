//! Format-converting reader over a [`ParsedStream`].
//!
//! The reader owns the packet cursor and a converter. On every [`Reader::read`] the
//! converter pulls packets through the [`PacketSupplier`] capability; the reader answers
//! each pull from whatever has been parsed so far:
//!
//! - cursor at or past the last parsed packet, parse incomplete: [`Supply::NotEnoughData`];
//! - cursor at or past the last parsed packet, parse complete: [`Supply::EndOfStream`];
//! - otherwise a batch of packets copied into a per-reader scratch buffer.
//!
//! The newest parsed packet is only handed out once a later packet exists, so a read never
//! indexes past the frontier of the store.

mod converter;
mod resample;

use tracing::{debug, error};

use crate::parser::{Packet, PacketDescription, ParsedStream};
use crate::settings::ResamplingQuality;
use crate::types::{AudioSpec, PcmBuffer};

use self::converter::{Converter, PCM_BATCH_FRAMES};

/// Result type used by the reader.
pub type ReaderResult<T> = Result<T, ReaderError>;

/// Failures inside the converter.
#[derive(Debug, thiserror::Error)]
pub enum ConverterError {
    #[error("codec error: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    #[error("resampler construction failed: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),

    #[error("unsupported conversion: {0}")]
    Unsupported(&'static str),
}

/// Reader errors and read outcomes.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// The parser has not published a data format yet.
    #[error("data format is not known yet")]
    MissingDataFormat,

    #[error("converter creation failed: {0}")]
    ConverterCreationFailed(#[source] ConverterError),

    /// Every packet of a completely parsed stream has been read.
    #[error("reached end of file")]
    ReachedEndOfFile,

    /// No packets are available yet; retry after more data has been parsed.
    #[error("not enough data")]
    NotEnoughData,

    #[error("converter failed: {0}")]
    ConverterFailed(#[source] ConverterError),
}

impl ReaderError {
    /// True for the outcomes that are normal flow control rather than failures.
    pub fn is_signal(&self) -> bool {
        matches!(self, ReaderError::NotEnoughData | ReaderError::ReachedEndOfFile)
    }
}

/// Packets handed to the converter in one pull.
#[derive(Debug, Clone, Copy)]
pub struct PacketBatch<'a> {
    /// Concatenated payloads.
    pub data: &'a [u8],
    /// Per-packet framing with offsets relative to `data`; empty for linear PCM.
    pub descriptions: &'a [PacketDescription],
    pub packets: usize,
}

/// Answer to a converter pull.
#[derive(Debug)]
pub enum Supply<'a> {
    Packets(PacketBatch<'a>),
    NotEnoughData,
    EndOfStream,
}

/// Capability the converter pulls source packets through.
pub trait PacketSupplier {
    /// Supply at most `max_packets` packets (at least one when any are supplied).
    fn supply_packets(&mut self, max_packets: usize) -> Supply<'_>;
}

/// Reusable packet copy buffer, sized once per reader.
#[derive(Debug)]
struct PacketScratch {
    data: Vec<u8>,
    descriptions: Vec<PacketDescription>,
    packets: usize,
}

impl PacketScratch {
    fn with_capacity(bytes: usize, packets: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            descriptions: Vec::with_capacity(packets),
            packets: 0,
        }
    }

    fn fill(&mut self, packets: &[Packet]) {
        self.data.clear();
        self.descriptions.clear();
        for packet in packets {
            if let Some(description) = packet.description {
                self.descriptions.push(PacketDescription {
                    byte_offset: self.data.len() as u64,
                    byte_size: packet.payload.len() as u32,
                    frames_in_packet: description.frames_in_packet,
                });
            }
            self.data.extend_from_slice(&packet.payload);
        }
        self.packets = packets.len();
    }

    fn batch(&self) -> PacketBatch<'_> {
        PacketBatch {
            data: &self.data,
            descriptions: &self.descriptions,
            packets: self.packets,
        }
    }
}

enum Fetch {
    Copied(usize),
    NotEnoughData,
    EndOfStream,
}

/// The reader's side of the pull protocol: the packet cursor over the shared store.
struct StoreCursor<'a> {
    stream: &'a ParsedStream,
    current_packet: &'a mut usize,
    scratch: &'a mut PacketScratch,
}

impl PacketSupplier for StoreCursor<'_> {
    fn supply_packets(&mut self, max_packets: usize) -> Supply<'_> {
        let start = *self.current_packet;
        let scratch = &mut *self.scratch;
        let fetch = self.stream.with_packets(|packets, complete| {
            let count = packets.len();
            if start.saturating_add(1) >= count {
                return if complete {
                    Fetch::EndOfStream
                } else {
                    Fetch::NotEnoughData
                };
            }
            let end = start.saturating_add(max_packets.max(1)).min(count - 1);
            scratch.fill(&packets[start..end]);
            Fetch::Copied(end - start)
        });

        match fetch {
            Fetch::Copied(n) => {
                *self.current_packet += n;
                Supply::Packets(self.scratch.batch())
            }
            Fetch::NotEnoughData => Supply::NotEnoughData,
            Fetch::EndOfStream => Supply::EndOfStream,
        }
    }
}

/// Produces destination-format PCM from a parsed stream.
pub struct Reader {
    stream: ParsedStream,
    output: AudioSpec,
    current_packet: usize,
    scratch: PacketScratch,
    converter: Converter,
}

impl Reader {
    /// Create a reader once the stream's data format is known.
    pub fn new(
        stream: ParsedStream,
        output: AudioSpec,
        quality: ResamplingQuality,
    ) -> ReaderResult<Self> {
        let format = stream.data_format().ok_or(ReaderError::MissingDataFormat)?;
        let converter = Converter::new(format, stream.magic_cookie(), output, quality)
            .map_err(|e| {
                error!(error = %e, "reader: converter creation failed");
                ReaderError::ConverterCreationFailed(e)
            })?;
        let scratch_bytes = format
            .bytes_per_packet
            .map_or(16 * 1024, |b| b as usize * PCM_BATCH_FRAMES);
        Ok(Self {
            stream,
            output,
            current_packet: 0,
            scratch: PacketScratch::with_capacity(scratch_bytes, PCM_BATCH_FRAMES),
            converter,
        })
    }

    /// Read up to `frames` frames.
    ///
    /// Returns a full buffer, or a shorter one when the stream stopped short of `frames`;
    /// returns [`ReaderError::NotEnoughData`] or [`ReaderError::ReachedEndOfFile`] only when
    /// no frame at all could be produced.
    pub fn read(&mut self, frames: usize) -> ReaderResult<PcmBuffer> {
        let mut pcm = Vec::with_capacity(frames * usize::from(self.output.channels));
        let mut cursor = StoreCursor {
            stream: &self.stream,
            current_packet: &mut self.current_packet,
            scratch: &mut self.scratch,
        };
        match self.converter.fill(frames, &mut cursor, &mut pcm) {
            Ok(()) => {}
            Err(e) if e.is_signal() && !pcm.is_empty() => {}
            Err(e) => {
                if !e.is_signal() {
                    error!(error = %e, packet = self.current_packet, "reader: read failed");
                }
                return Err(e);
            }
        }
        Ok(PcmBuffer::new(pcm, self.output))
    }

    /// Reposition the packet cursor. Bounds are not checked here; reads past the parsed
    /// frontier report `NotEnoughData` or `ReachedEndOfFile`.
    pub fn seek(&mut self, packet: u64) {
        let packet = usize::try_from(packet).unwrap_or(usize::MAX);
        debug!(from = self.current_packet, to = packet, "reader: seek");
        self.current_packet = packet;
        self.converter.reset();
    }

    pub fn current_packet(&self) -> u64 {
        self.current_packet as u64
    }

    pub fn output_spec(&self) -> AudioSpec {
        self.output
    }

    pub fn stream(&self) -> &ParsedStream {
        &self.stream
    }
}
