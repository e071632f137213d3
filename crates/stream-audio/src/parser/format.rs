//! Stream format descriptors discovered by the parser.

use std::fmt;

/// Container families the parser can demux.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// MPEG-1/2/2.5 Layer III elementary stream, optionally behind an ID3v2 tag.
    Mp3,
    /// AAC in ADTS framing.
    Adts,
    /// RIFF/WAVE with linear PCM.
    Wave,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Mp3, FileType::Adts, FileType::Wave];
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Mp3 => "mp3",
            FileType::Adts => "aac/adts",
            FileType::Wave => "wav",
        };
        f.write_str(name)
    }
}

/// Sample encoding of linear PCM packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmEncoding {
    U8,
    S16Le,
    S24Le,
    S32Le,
    F32Le,
    F64Le,
}

impl PcmEncoding {
    pub fn bits(self) -> u16 {
        match self {
            PcmEncoding::U8 => 8,
            PcmEncoding::S16Le => 16,
            PcmEncoding::S24Le => 24,
            PcmEncoding::S32Le | PcmEncoding::F32Le => 32,
            PcmEncoding::F64Le => 64,
        }
    }
}

/// Codec tag of a [`StreamFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatId {
    LinearPcm(PcmEncoding),
    MpegLayer3,
    /// AAC with the MPEG-4 audio object type taken from the ADTS profile.
    Aac { object_type: u8 },
}

impl FormatId {
    pub fn is_pcm(&self) -> bool {
        matches!(self, FormatId::LinearPcm(_))
    }
}

/// Format of the packets in a stream.
///
/// Once the parser publishes a data format it never changes for the rest of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bits_per_channel: Option<u16>,
    pub frames_per_packet: u32,
    pub format_id: FormatId,
    /// Fixed packet size, known for linear PCM only.
    pub bytes_per_packet: Option<u32>,
}

impl StreamFormat {
    pub fn is_pcm(&self) -> bool {
        self.format_id.is_pcm()
    }

    /// Seconds of audio carried by one packet.
    pub fn packet_duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        f64::from(self.frames_per_packet) / f64::from(self.sample_rate)
    }
}
