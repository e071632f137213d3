//! Append-only packet store shared between the parse worker and the reader.
//!
//! The parser is the single writer; readers hold a cloned [`ParsedStream`] handle and only
//! ever read packets below a length snapshot taken under the lock, so a reader never
//! observes a torn append.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{RwLock, RwLockWriteGuard};

use super::format::{FileType, StreamFormat};

/// Location and framing of one compressed packet in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescription {
    /// Absolute offset of the payload in the downloaded stream.
    pub byte_offset: u64,
    pub byte_size: u32,
    pub frames_in_packet: u32,
}

/// One demuxed packet. Immutable once appended.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Bytes,
    /// Present for compressed formats; linear PCM packets carry none.
    pub description: Option<PacketDescription>,
}

/// Stream metadata collected while parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseInfo {
    /// Total audio data bytes, if announced by the container or derivable from the
    /// download length.
    pub byte_count: Option<u64>,
    /// Packet count announced by metadata or estimated from the download length.
    /// Only ever revised upward.
    pub announced_packet_count: Option<u64>,
    /// Offset of the first audio byte in the stream.
    pub data_offset: Option<u64>,
    pub bit_rate: Option<u32>,
    pub ready_to_produce_packets: bool,
}

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    file_type: Option<FileType>,
    file_format: Option<StreamFormat>,
    data_format: Option<StreamFormat>,
    magic_cookie: Option<Bytes>,
    info: ParseInfo,
    /// Announced count came from container metadata rather than an estimate.
    count_from_metadata: bool,
    packets: Vec<Packet>,
    /// Raw stream bytes consumed by packets, framing headers included.
    packet_bytes: u64,
    complete: bool,
    duration_secs: f64,
}

impl StreamState {
    fn total_packet_count(&self) -> u64 {
        let observed = self.packets.len() as u64;
        self.info
            .announced_packet_count
            .map_or(observed, |announced| announced.max(observed))
    }

    fn total_frame_count(&self) -> Option<u64> {
        let format = self.data_format?;
        Some(self.total_packet_count() * u64::from(format.frames_per_packet))
    }

    /// Estimate totals from the expected download length when no metadata announced them.
    pub(crate) fn apply_length_estimate(&mut self, content_length: Option<u64>) {
        let (Some(length), Some(data_offset)) = (content_length, self.info.data_offset) else {
            return;
        };
        let audio_bytes = length.saturating_sub(data_offset);
        if self.info.byte_count.is_none() {
            self.info.byte_count = Some(audio_bytes);
        }
        if self.count_from_metadata || self.packets.is_empty() {
            return;
        }
        let mean = self.packet_bytes as f64 / self.packets.len() as f64;
        if mean <= 0.0 {
            return;
        }
        let estimate = (audio_bytes as f64 / mean).round() as u64;
        if self.info.announced_packet_count.map_or(true, |c| estimate > c) {
            self.info.announced_packet_count = Some(estimate);
        }
    }

    /// Recompute the duration; it only ever grows. Returns true when it changed.
    pub(crate) fn refresh_duration(&mut self) -> bool {
        let (Some(format), Some(frames)) = (self.data_format, self.total_frame_count()) else {
            return false;
        };
        if format.sample_rate == 0 {
            return false;
        }
        let duration = frames as f64 / f64::from(format.sample_rate);
        if duration > self.duration_secs {
            self.duration_secs = duration;
            return true;
        }
        false
    }
}

/// Read handle onto the parser's packet store and metadata.
///
/// Cloning is cheap; all clones observe the same store.
#[derive(Debug, Clone, Default)]
pub struct ParsedStream {
    state: Arc<RwLock<StreamState>>,
}

impl ParsedStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn writer(&self) -> StreamWriter<'_> {
        StreamWriter {
            state: self.state.write(),
        }
    }

    /// Run `f` over the current packet list and the completion flag under one read lock.
    pub(crate) fn with_packets<R>(&self, f: impl FnOnce(&[Packet], bool) -> R) -> R {
        let state = self.state.read();
        f(&state.packets, state.complete)
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.state.read().file_type
    }

    pub fn file_format(&self) -> Option<StreamFormat> {
        self.state.read().file_format
    }

    pub fn data_format(&self) -> Option<StreamFormat> {
        self.state.read().data_format
    }

    /// Codec configuration bytes (AAC AudioSpecificConfig), when the format needs them.
    pub fn magic_cookie(&self) -> Option<Bytes> {
        self.state.read().magic_cookie.clone()
    }

    pub fn info(&self) -> ParseInfo {
        self.state.read().info.clone()
    }

    /// Number of packets parsed so far.
    pub fn packet_count(&self) -> usize {
        self.state.read().packets.len()
    }

    /// `max(announced packet count, parsed packet count)`.
    pub fn total_packet_count(&self) -> u64 {
        self.state.read().total_packet_count()
    }

    pub fn total_frame_count(&self) -> Option<u64> {
        self.state.read().total_frame_count()
    }

    pub fn packet(&self, index: usize) -> Option<Packet> {
        self.state.read().packets.get(index).cloned()
    }

    /// True once the download ended and every byte has been parsed.
    pub fn is_complete(&self) -> bool {
        self.state.read().complete
    }

    /// Best duration estimate so far. Never decreases.
    pub fn duration(&self) -> Option<Duration> {
        let secs = self.state.read().duration_secs;
        (secs > 0.0).then(|| Duration::from_secs_f64(secs))
    }

    /// Frame index for a playback time, scaled against the current duration estimate.
    pub fn frame_offset(&self, time: Duration) -> Option<u64> {
        let state = self.state.read();
        let frames = state.total_frame_count()?;
        if state.duration_secs <= 0.0 {
            return None;
        }
        let ratio = time.as_secs_f64() / state.duration_secs;
        Some((frames as f64 * ratio).floor() as u64)
    }

    pub fn packet_offset(&self, frame: u64) -> Option<u64> {
        let format = self.state.read().data_format?;
        if format.frames_per_packet == 0 {
            return None;
        }
        Some(frame / u64::from(format.frames_per_packet))
    }

    /// Playback time at which `packet` starts.
    pub fn packet_time(&self, packet: u64) -> Option<Duration> {
        let format = self.state.read().data_format?;
        if format.sample_rate == 0 {
            return None;
        }
        let frames = packet * u64::from(format.frames_per_packet);
        Some(Duration::from_secs_f64(
            frames as f64 / f64::from(format.sample_rate),
        ))
    }
}

/// Exclusive write access used by the demuxers during one parse call.
pub(crate) struct StreamWriter<'a> {
    state: RwLockWriteGuard<'a, StreamState>,
}

impl StreamWriter<'_> {
    pub(crate) fn state_mut(&mut self) -> &mut StreamState {
        &mut *self.state
    }

    pub(crate) fn set_file_type(&mut self, file_type: FileType) {
        self.state.file_type = Some(file_type);
    }

    pub(crate) fn set_file_format(&mut self, format: StreamFormat) {
        if self.state.file_format.is_none() {
            self.state.file_format = Some(format);
        }
    }

    /// Publish the data format. Later calls are ignored: the format is immutable.
    pub(crate) fn set_data_format(&mut self, format: StreamFormat) {
        if self.state.data_format.is_none() {
            self.state.data_format = Some(format);
        }
    }

    pub(crate) fn set_magic_cookie(&mut self, cookie: Bytes) {
        self.state.magic_cookie = Some(cookie);
    }

    pub(crate) fn set_data_offset(&mut self, offset: u64) {
        self.state.info.data_offset = Some(offset);
    }

    pub(crate) fn set_bit_rate(&mut self, bit_rate: u32) {
        self.state.info.bit_rate = Some(bit_rate);
    }

    pub(crate) fn set_byte_count(&mut self, bytes: u64) {
        self.state.info.byte_count = Some(bytes);
    }

    pub(crate) fn announce_packet_count(&mut self, count: u64) {
        self.state.count_from_metadata = true;
        let current = self.state.info.announced_packet_count.unwrap_or(0);
        self.state.info.announced_packet_count = Some(current.max(count));
    }

    pub(crate) fn mark_ready(&mut self) {
        self.state.info.ready_to_produce_packets = true;
    }

    pub(crate) fn push_packet(&mut self, packet: Packet, raw_len: usize) {
        self.state.packet_bytes += raw_len as u64;
        self.state.packets.push(packet);
    }

    pub(crate) fn packet_count(&self) -> usize {
        self.state.packets.len()
    }

    pub(crate) fn mark_complete(&mut self) {
        self.state.complete = true;
    }
}
