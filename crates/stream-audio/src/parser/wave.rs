//! RIFF/WAVE with linear PCM.
//!
//! Chunks before `data` are walked (and skipped unless they are `fmt `). Inside `data` every
//! `block_align` bytes form one packet of one frame; packets are zero-copy slices of the
//! received chunk. Bytes after the `data` chunk are ignored.

use bytes::Bytes;
use tracing::debug;

use super::format::{FormatId, PcmEncoding, StreamFormat};
use super::input::Input;
use super::store::{Packet, StreamWriter};
use super::{Demux, ParseFailureKind, ParserError, ParserResult};

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_IEEE_FLOAT: u16 = 0x0003;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Data chunk sizes that mean "unknown" in streamed WAV files.
const UNKNOWN_SIZES: [u32; 2] = [0, u32::MAX];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WaveFormat {
    encoding: PcmEncoding,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
}

impl WaveFormat {
    fn parse(body: &[u8]) -> ParserResult<Self> {
        if body.len() < 16 {
            return Err(ParseFailureKind::MalformedHeader("wav fmt").into());
        }
        let u16_at = |at: usize| u16::from_le_bytes([body[at], body[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);

        let mut tag = u16_at(0);
        let channels = u16_at(2);
        let sample_rate = u32_at(4);
        let byte_rate = u32_at(8);
        let block_align = u16_at(12);
        let bits = u16_at(14);
        if tag == FORMAT_EXTENSIBLE {
            if body.len() < 26 {
                return Err(ParseFailureKind::MalformedHeader("wav extensible fmt").into());
            }
            tag = u16_at(24);
        }

        let encoding = match (tag, bits) {
            (FORMAT_PCM, 8) => PcmEncoding::U8,
            (FORMAT_PCM, 16) => PcmEncoding::S16Le,
            (FORMAT_PCM, 24) => PcmEncoding::S24Le,
            (FORMAT_PCM, 32) => PcmEncoding::S32Le,
            (FORMAT_IEEE_FLOAT, 32) => PcmEncoding::F32Le,
            (FORMAT_IEEE_FLOAT, 64) => PcmEncoding::F64Le,
            (tag, bits) => {
                return Err(ParseFailureKind::UnsupportedEncoding { tag, bits }.into());
            }
        };
        if channels == 0
            || sample_rate == 0
            || u32::from(block_align) != u32::from(channels) * u32::from(bits / 8)
        {
            return Err(ParseFailureKind::MalformedHeader("wav fmt").into());
        }
        Ok(Self {
            encoding,
            channels,
            sample_rate,
            byte_rate,
            block_align,
        })
    }

    fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channel_count: self.channels,
            bits_per_channel: Some(self.encoding.bits()),
            frames_per_packet: 1,
            format_id: FormatId::LinearPcm(self.encoding),
            bytes_per_packet: Some(u32::from(self.block_align)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RiffHeader,
    ChunkHeader,
    Format { size: usize },
    /// Inside `data`; `remaining` is `None` when the chunk size is unknown.
    Data { remaining: Option<u64> },
    Trailer,
}

#[derive(Debug)]
pub(crate) struct WaveDemuxer {
    state: State,
    format: Option<WaveFormat>,
}

impl Default for WaveDemuxer {
    fn default() -> Self {
        Self {
            state: State::RiffHeader,
            format: None,
        }
    }
}

impl WaveDemuxer {
    fn emit_packets(
        format: &WaveFormat,
        remaining: &mut Option<u64>,
        input: &mut Input,
        out: &mut StreamWriter<'_>,
    ) {
        let align = usize::from(format.block_align);
        let mut available = input.len() / align;
        if let Some(left) = remaining {
            available = available.min((*left / align as u64) as usize);
        }
        if available == 0 {
            return;
        }
        let span: Bytes = input.take(available * align);
        for i in 0..available {
            let payload = span.slice(i * align..(i + 1) * align);
            out.push_packet(
                Packet {
                    payload,
                    description: None,
                },
                align,
            );
        }
        if let Some(left) = remaining {
            *left -= (available * align) as u64;
        }
    }
}

impl Demux for WaveDemuxer {
    fn demux(
        &mut self,
        input: &mut Input,
        out: &mut StreamWriter<'_>,
        finishing: bool,
    ) -> ParserResult<()> {
        loop {
            match self.state {
                State::RiffHeader => {
                    if input.peek(12).is_none() {
                        break;
                    }
                    input.advance(12);
                    self.state = State::ChunkHeader;
                }
                State::ChunkHeader => {
                    let Some(head) = input.peek(8) else { break };
                    let id = [head[0], head[1], head[2], head[3]];
                    let size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
                    input.advance(8);
                    match &id {
                        b"fmt " => {
                            self.state = State::Format {
                                size: size as usize + (size as usize & 1),
                            }
                        }
                        b"data" => {
                            let Some(format) = self.format else {
                                return Err(
                                    ParseFailureKind::MalformedHeader("wav data before fmt").into()
                                );
                            };
                            let remaining = if UNKNOWN_SIZES.contains(&size) {
                                None
                            } else {
                                Some(u64::from(size))
                            };
                            if let Some(bytes) = remaining {
                                out.set_byte_count(bytes);
                                out.announce_packet_count(bytes / u64::from(format.block_align));
                            }
                            debug!(
                                offset = input.offset(),
                                size = ?remaining,
                                "wav: data chunk"
                            );
                            out.set_data_offset(input.offset());
                            out.set_data_format(format.stream_format());
                            out.mark_ready();
                            self.state = State::Data { remaining };
                        }
                        other => {
                            debug!(
                                chunk = %String::from_utf8_lossy(other),
                                size,
                                "wav: skipping chunk"
                            );
                            input.skip(u64::from(size) + u64::from(size & 1));
                        }
                    }
                }
                State::Format { size } => {
                    let Some(body) = input.peek(size) else { break };
                    let format = WaveFormat::parse(body)?;
                    debug!(
                        sample_rate = format.sample_rate,
                        channels = format.channels,
                        encoding = ?format.encoding,
                        "wav: stream format"
                    );
                    out.set_file_format(format.stream_format());
                    out.set_bit_rate(format.byte_rate.saturating_mul(8));
                    self.format = Some(format);
                    input.advance(size);
                    self.state = State::ChunkHeader;
                }
                State::Data { mut remaining } => {
                    let Some(format) = self.format else { break };
                    Self::emit_packets(&format, &mut remaining, input, out);
                    let align = u64::from(format.block_align);
                    self.state = match remaining {
                        Some(left) if left < align => State::Trailer,
                        _ => State::Data { remaining },
                    };
                    if matches!(self.state, State::Data { .. }) {
                        break;
                    }
                }
                State::Trailer => {
                    input.clear();
                    break;
                }
            }
        }

        if finishing {
            if self.format.is_none() || matches!(self.state, State::RiffHeader) {
                return Err(ParserError::ParseFailure(ParseFailureKind::TruncatedHeader(
                    "wav",
                )));
            }
            input.clear();
        }
        Ok(())
    }
}
