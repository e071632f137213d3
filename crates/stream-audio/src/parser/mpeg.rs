//! MPEG audio Layer III framing.
//!
//! Frames are located by their 11-bit sync word. Until the first frame is confirmed by a
//! second, compatible header directly after it, every candidate is treated as a possible
//! false sync. Afterwards only headers compatible with the first one are accepted, which
//! keeps the published format fixed for the rest of the stream. A Xing/Info or VBRI frame
//! at the start announces the total frame count and is not stored as an audio packet.

use tracing::debug;

use super::format::{FormatId, StreamFormat};
use super::input::Input;
use super::store::{Packet, PacketDescription, StreamWriter};
use super::{Demux, ParserResult};

const BITRATES_V1: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MpegVersion {
    V1,
    V2,
    V2_5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) version: MpegVersion,
    pub(crate) bitrate_kbps: u32,
    pub(crate) sample_rate: u32,
    pub(crate) padding: bool,
    pub(crate) protected: bool,
    pub(crate) mono: bool,
}

impl FrameHeader {
    /// Parse a Layer III header from the first four bytes of `b`.
    pub(crate) fn parse(b: &[u8]) -> Option<Self> {
        let b = b.get(..4)?;
        if b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (b[1] >> 3) & 0x03 {
            0 => MpegVersion::V2_5,
            2 => MpegVersion::V2,
            3 => MpegVersion::V1,
            _ => return None,
        };
        // Layer III only.
        if (b[1] >> 1) & 0x03 != 0x01 {
            return None;
        }
        let bitrate_index = usize::from(b[2] >> 4);
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::V1 => BITRATES_V1[bitrate_index],
            MpegVersion::V2 | MpegVersion::V2_5 => BITRATES_V2[bitrate_index],
        };
        let base_rate = match (b[2] >> 2) & 0x03 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::V1 => base_rate,
            MpegVersion::V2 => base_rate / 2,
            MpegVersion::V2_5 => base_rate / 4,
        };
        if b[3] & 0x03 == 0x02 {
            return None;
        }
        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding: (b[2] >> 1) & 0x01 == 1,
            protected: b[1] & 0x01 == 0,
            mono: b[3] >> 6 == 0x03,
        })
    }

    pub(crate) fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::V1 => 1152,
            MpegVersion::V2 | MpegVersion::V2_5 => 576,
        }
    }

    pub(crate) fn frame_len(&self) -> usize {
        let coefficient = self.samples_per_frame() / 8;
        let len = coefficient * self.bitrate_kbps * 1000 / self.sample_rate;
        (len + u32::from(self.padding)) as usize
    }

    pub(crate) fn channels(&self) -> u16 {
        if self.mono {
            1
        } else {
            2
        }
    }

    fn side_info_len(&self) -> usize {
        match (self.version, self.mono) {
            (MpegVersion::V1, false) => 32,
            (MpegVersion::V1, true) => 17,
            (_, false) => 17,
            (_, true) => 9,
        }
    }

    /// Same stream parameters: version, sample rate and channel layout.
    pub(crate) fn is_compatible(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.sample_rate == other.sample_rate
            && self.mono == other.mono
    }

    fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channel_count: self.channels(),
            bits_per_channel: None,
            frames_per_packet: self.samples_per_frame(),
            format_id: FormatId::MpegLayer3,
            bytes_per_packet: None,
        }
    }
}

/// Totals announced by a Xing/Info or VBRI header frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VbrInfo {
    pub(crate) frames: Option<u32>,
    pub(crate) bytes: Option<u32>,
}

fn be_u32(b: &[u8], at: usize) -> Option<u32> {
    let raw = b.get(at..at + 4)?;
    Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn parse_vbr_header(frame: &[u8], header: &FrameHeader) -> Option<VbrInfo> {
    let xing_at = 4 + if header.protected { 2 } else { 0 } + header.side_info_len();
    if let Some(tag) = frame.get(xing_at..xing_at + 4) {
        if tag == b"Xing" || tag == b"Info" {
            let flags = be_u32(frame, xing_at + 4)?;
            let mut at = xing_at + 8;
            let mut info = VbrInfo {
                frames: None,
                bytes: None,
            };
            if flags & 0x01 != 0 {
                info.frames = be_u32(frame, at);
                at += 4;
            }
            if flags & 0x02 != 0 {
                info.bytes = be_u32(frame, at);
            }
            return Some(info);
        }
    }
    if frame.get(36..40) == Some(b"VBRI") {
        return Some(VbrInfo {
            bytes: be_u32(frame, 46),
            frames: be_u32(frame, 50),
        });
    }
    None
}

#[derive(Debug, Default)]
pub(crate) struct MpegDemuxer {
    reference: Option<FrameHeader>,
}

impl MpegDemuxer {
    fn establish(&mut self, header: FrameHeader, offset: u64, out: &mut StreamWriter<'_>) {
        let format = header.stream_format();
        debug!(
            sample_rate = header.sample_rate,
            channels = header.channels(),
            bitrate_kbps = header.bitrate_kbps,
            offset,
            "mp3: stream format established"
        );
        out.set_file_format(format);
        out.set_data_format(format);
        out.set_data_offset(offset);
        out.set_bit_rate(header.bitrate_kbps * 1000);
        out.mark_ready();
        self.reference = Some(header);
    }
}

impl Demux for MpegDemuxer {
    fn demux(
        &mut self,
        input: &mut Input,
        out: &mut StreamWriter<'_>,
        finishing: bool,
    ) -> ParserResult<()> {
        loop {
            let Some(head) = input.peek(4) else {
                if finishing {
                    input.clear();
                }
                return Ok(());
            };
            let header = match FrameHeader::parse(head) {
                Some(h) if self.reference.map_or(true, |r| r.is_compatible(&h)) => h,
                _ => {
                    input.advance(1);
                    continue;
                }
            };

            let len = header.frame_len();
            if input.len() < len {
                if finishing {
                    // Truncated final frame.
                    input.clear();
                }
                return Ok(());
            }

            if self.reference.is_none() {
                match input.peek(len + 4) {
                    Some(bytes) => {
                        let confirmed = FrameHeader::parse(&bytes[len..])
                            .is_some_and(|next| header.is_compatible(&next));
                        if !confirmed {
                            input.advance(1);
                            continue;
                        }
                    }
                    None if !finishing => return Ok(()),
                    None => {}
                }

                self.establish(header, input.offset(), out);
                if let Some(vbr) = parse_vbr_header(&input.as_slice()[..len], &header) {
                    debug!(frames = ?vbr.frames, bytes = ?vbr.bytes, "mp3: vbr header");
                    if let Some(frames) = vbr.frames {
                        out.announce_packet_count(u64::from(frames));
                    }
                    if let Some(bytes) = vbr.bytes {
                        out.set_byte_count(u64::from(bytes));
                        if let Some(frames) = vbr.frames.filter(|f| *f > 0) {
                            let seconds = f64::from(frames) * f64::from(header.samples_per_frame())
                                / f64::from(header.sample_rate);
                            out.set_bit_rate((f64::from(bytes) * 8.0 / seconds) as u32);
                        }
                    }
                    input.advance(len);
                    continue;
                }
            }

            let byte_offset = input.offset();
            let payload = input.take(len);
            out.push_packet(
                Packet {
                    payload,
                    description: Some(PacketDescription {
                        byte_offset,
                        byte_size: len as u32,
                        frames_in_packet: header.samples_per_frame(),
                    }),
                },
                len,
            );
        }
    }
}
