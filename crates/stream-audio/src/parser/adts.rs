//! AAC in ADTS framing.
//!
//! Each ADTS frame carries a 7-byte header (9 with CRC). Packets store the raw AAC payload
//! without the header; the decoder is configured from an AudioSpecificConfig derived from
//! the first header.

use bytes::Bytes;
use tracing::debug;

use super::format::{FormatId, StreamFormat};
use super::input::Input;
use super::store::{Packet, PacketDescription, StreamWriter};
use super::{Demux, ParserResult};

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

pub(crate) const FRAMES_PER_BLOCK: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    pub(crate) object_type: u8,
    pub(crate) sample_rate_index: u8,
    pub(crate) channel_config: u8,
    pub(crate) frame_len: usize,
    pub(crate) header_len: usize,
    pub(crate) raw_blocks: u8,
}

impl AdtsHeader {
    pub(crate) fn parse(b: &[u8]) -> Option<Self> {
        let b = b.get(..7)?;
        if b[0] != 0xFF || b[1] & 0xF6 != 0xF0 {
            return None;
        }
        let protection_absent = b[1] & 0x01 == 1;
        let profile = b[2] >> 6;
        let sample_rate_index = (b[2] >> 2) & 0x0F;
        if usize::from(sample_rate_index) >= SAMPLE_RATES.len() {
            return None;
        }
        let channel_config = ((b[2] & 0x01) << 2) | (b[3] >> 6);
        // Channel configuration 0 needs an in-band program config element.
        if channel_config == 0 {
            return None;
        }
        let frame_len = (usize::from(b[3] & 0x03) << 11)
            | (usize::from(b[4]) << 3)
            | usize::from(b[5] >> 5);
        let header_len = if protection_absent { 7 } else { 9 };
        if frame_len <= header_len {
            return None;
        }
        Some(Self {
            object_type: profile + 1,
            sample_rate_index,
            channel_config,
            frame_len,
            header_len,
            raw_blocks: b[6] & 0x03,
        })
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[usize::from(self.sample_rate_index)]
    }

    pub(crate) fn channels(&self) -> u16 {
        match self.channel_config {
            7 => 8,
            n => u16::from(n),
        }
    }

    pub(crate) fn frames(&self) -> u32 {
        FRAMES_PER_BLOCK * (u32::from(self.raw_blocks) + 1)
    }

    pub(crate) fn is_compatible(&self, other: &AdtsHeader) -> bool {
        self.object_type == other.object_type
            && self.sample_rate_index == other.sample_rate_index
            && self.channel_config == other.channel_config
    }

    /// Two-byte MPEG-4 AudioSpecificConfig for this stream.
    pub(crate) fn audio_specific_config(&self) -> [u8; 2] {
        [
            (self.object_type << 3) | (self.sample_rate_index >> 1),
            ((self.sample_rate_index & 0x01) << 7) | (self.channel_config << 3),
        ]
    }
}

#[derive(Debug, Default)]
pub(crate) struct AdtsDemuxer {
    reference: Option<AdtsHeader>,
}

impl AdtsDemuxer {
    fn establish(&mut self, header: AdtsHeader, offset: u64, out: &mut StreamWriter<'_>) {
        let format = StreamFormat {
            sample_rate: header.sample_rate(),
            channel_count: header.channels(),
            bits_per_channel: None,
            frames_per_packet: FRAMES_PER_BLOCK,
            format_id: FormatId::Aac {
                object_type: header.object_type,
            },
            bytes_per_packet: None,
        };
        debug!(
            sample_rate = format.sample_rate,
            channels = format.channel_count,
            object_type = header.object_type,
            offset,
            "adts: stream format established"
        );
        out.set_file_format(format);
        out.set_data_format(format);
        out.set_magic_cookie(Bytes::copy_from_slice(&header.audio_specific_config()));
        out.set_data_offset(offset);
        out.mark_ready();
        self.reference = Some(header);
    }
}

impl Demux for AdtsDemuxer {
    fn demux(
        &mut self,
        input: &mut Input,
        out: &mut StreamWriter<'_>,
        finishing: bool,
    ) -> ParserResult<()> {
        loop {
            let Some(head) = input.peek(7) else {
                if finishing {
                    input.clear();
                }
                return Ok(());
            };
            let header = match AdtsHeader::parse(head) {
                Some(h) if self.reference.map_or(true, |r| r.is_compatible(&h)) => h,
                _ => {
                    input.advance(1);
                    continue;
                }
            };
            if input.len() < header.frame_len {
                if finishing {
                    input.clear();
                }
                return Ok(());
            }

            if self.reference.is_none() {
                match input.peek(header.frame_len + 7) {
                    Some(bytes) => {
                        let confirmed = AdtsHeader::parse(&bytes[header.frame_len..])
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
            }

            input.advance(header.header_len);
            let payload_len = header.frame_len - header.header_len;
            let byte_offset = input.offset();
            let payload = input.take(payload_len);
            out.push_packet(
                Packet {
                    payload,
                    description: Some(PacketDescription {
                        byte_offset,
                        byte_size: payload_len as u32,
                        frames_in_packet: header.frames(),
                    }),
                },
                header.frame_len,
            );
        }
    }
}
