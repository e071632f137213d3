//! Packet-to-PCM conversion: symphonia decoding, channel mapping and resampling.
//!
//! The converter pulls packets through a [`PacketSupplier`] until it has produced the
//! requested number of destination frames. Decoded frames beyond the request stay in
//! `pending` for the next call.

use bytes::Bytes;
use symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_AAC, CODEC_TYPE_MP3,
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE,
    CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet as CodecPacket;
use tracing::{debug, warn};

use super::resample::Resampler;
use super::{ConverterError, PacketBatch, PacketSupplier, ReaderError, Supply};
use crate::parser::{FormatId, PcmEncoding, StreamFormat};
use crate::settings::ResamplingQuality;
use crate::types::AudioSpec;

/// Largest linear PCM batch handed to the decoder in one packet.
pub(crate) const PCM_BATCH_FRAMES: usize = 4096;
/// Compressed packets requested per supplier call.
const COMPRESSED_BATCH: usize = 4;

fn codec_type(format_id: FormatId) -> CodecType {
    match format_id {
        FormatId::LinearPcm(PcmEncoding::U8) => CODEC_TYPE_PCM_U8,
        FormatId::LinearPcm(PcmEncoding::S16Le) => CODEC_TYPE_PCM_S16LE,
        FormatId::LinearPcm(PcmEncoding::S24Le) => CODEC_TYPE_PCM_S24LE,
        FormatId::LinearPcm(PcmEncoding::S32Le) => CODEC_TYPE_PCM_S32LE,
        FormatId::LinearPcm(PcmEncoding::F32Le) => CODEC_TYPE_PCM_F32LE,
        FormatId::LinearPcm(PcmEncoding::F64Le) => CODEC_TYPE_PCM_F64LE,
        FormatId::MpegLayer3 => CODEC_TYPE_MP3,
        FormatId::Aac { .. } => CODEC_TYPE_AAC,
    }
}

/// Mix or duplicate interleaved frames from `from` channels to `to` channels.
fn map_channels(input: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    out.clear();
    if from == to {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            out.extend((0..to).map(|ch| frame[ch % from]));
        }
    }
}

pub(crate) struct Converter {
    decoder: Box<dyn Decoder>,
    source: StreamFormat,
    output: AudioSpec,
    sample_buf: Option<(SampleBuffer<f32>, SignalSpec, usize)>,
    mapped: Vec<f32>,
    resampler: Option<Resampler>,
    /// Converted output-format samples not handed out yet.
    pending: Vec<f32>,
    /// End of stream was reached and the resampler tail has been drained.
    flushed: bool,
    ts: u64,
}

impl Converter {
    pub(crate) fn new(
        source: StreamFormat,
        magic_cookie: Option<Bytes>,
        output: AudioSpec,
        quality: ResamplingQuality,
    ) -> Result<Self, ConverterError> {
        if output.channels == 0 || output.sample_rate == 0 {
            return Err(ConverterError::Unsupported("empty output format"));
        }
        if source.channel_count == 0 || source.channel_count > 32 {
            return Err(ConverterError::Unsupported("source channel count"));
        }

        let channel_mask = Channels::from_bits_truncate(
            (1u64 << source.channel_count).wrapping_sub(1) as u32,
        );
        let mut params = CodecParameters::new();
        params
            .for_codec(codec_type(source.format_id))
            .with_sample_rate(source.sample_rate)
            .with_channels(channel_mask);
        if let Some(bits) = source.bits_per_channel {
            params
                .with_bits_per_sample(u32::from(bits))
                .with_bits_per_coded_sample(u32::from(bits));
        }
        if source.is_pcm() {
            params.with_max_frames_per_packet(PCM_BATCH_FRAMES as u64);
        } else {
            params.with_max_frames_per_packet(u64::from(source.frames_per_packet));
        }
        if let Some(cookie) = magic_cookie {
            params.with_extra_data(cookie.to_vec().into_boxed_slice());
        }

        let decoder =
            symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

        let resampler = if source.sample_rate != output.sample_rate {
            Some(Resampler::new(
                source.sample_rate,
                output.sample_rate,
                usize::from(output.channels),
                quality,
            )?)
        } else {
            None
        };

        debug!(
            codec = ?source.format_id,
            from_rate = source.sample_rate,
            from_channels = source.channel_count,
            to_rate = output.sample_rate,
            to_channels = output.channels,
            resampling = resampler.is_some(),
            "converter created"
        );

        Ok(Self {
            decoder,
            source,
            output,
            sample_buf: None,
            mapped: Vec::new(),
            resampler,
            pending: Vec::new(),
            flushed: false,
            ts: 0,
        })
    }

    /// Append up to `frames` output frames to `out`, pulling packets from `input`.
    ///
    /// Returns the first signal that stopped the fill before `frames` were produced.
    pub(crate) fn fill(
        &mut self,
        frames: usize,
        input: &mut dyn PacketSupplier,
        out: &mut Vec<f32>,
    ) -> Result<(), ReaderError> {
        let channels = usize::from(self.output.channels);
        let wanted = frames * channels;
        loop {
            let take = (wanted - out.len()).min(self.pending.len());
            out.extend(self.pending.drain(..take));
            if out.len() >= wanted {
                return Ok(());
            }

            let missing = (wanted - out.len()) / channels;
            match input.supply_packets(self.packets_wanted(missing)) {
                Supply::Packets(batch) => self
                    .decode_batch(&batch)
                    .map_err(ReaderError::ConverterFailed)?,
                Supply::NotEnoughData => return Err(ReaderError::NotEnoughData),
                Supply::EndOfStream => {
                    if self.flushed {
                        return Err(ReaderError::ReachedEndOfFile);
                    }
                    self.flushed = true;
                    if let Some(resampler) = &mut self.resampler {
                        resampler
                            .flush(&mut self.pending)
                            .map_err(ReaderError::ConverterFailed)?;
                    }
                }
            }
        }
    }

    /// Drop decoder state and buffered output; used when the packet cursor jumps.
    pub(crate) fn reset(&mut self) {
        self.decoder.reset();
        self.pending.clear();
        self.flushed = false;
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }

    fn packets_wanted(&self, missing_frames: usize) -> usize {
        let source_frames = (missing_frames as u64 * u64::from(self.source.sample_rate))
            .div_ceil(u64::from(self.output.sample_rate)) as usize;
        let per_packet = self.source.frames_per_packet.max(1) as usize;
        let packets = source_frames.div_ceil(per_packet).max(1);
        if self.source.is_pcm() {
            packets.min((PCM_BATCH_FRAMES / per_packet).max(1))
        } else {
            packets.min(COMPRESSED_BATCH)
        }
    }

    fn decode_batch(&mut self, batch: &PacketBatch<'_>) -> Result<(), ConverterError> {
        if batch.descriptions.is_empty() {
            let bytes_per_packet = self.source.bytes_per_packet.unwrap_or(1).max(1) as usize;
            let frames = (batch.data.len() / bytes_per_packet) as u64
                * u64::from(self.source.frames_per_packet);
            return self.decode(batch.data, frames);
        }
        for description in batch.descriptions {
            let start = description.byte_offset as usize;
            let end = start + description.byte_size as usize;
            let Some(payload) = batch.data.get(start..end) else {
                return Err(ConverterError::Unsupported("packet description out of range"));
            };
            self.decode(payload, u64::from(description.frames_in_packet))?;
        }
        Ok(())
    }

    fn decode(&mut self, payload: &[u8], frames: u64) -> Result<(), ConverterError> {
        let packet = CodecPacket::new_from_slice(0, self.ts, frames, payload);
        self.ts += frames;

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(reason, ts = packet.ts(), "converter: skipping undecodable packet");
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                debug!("converter: decoder reset required");
                self.decoder.reset();
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        if decoded.frames() == 0 {
            return Ok(());
        }

        let spec = *decoded.spec();
        let capacity = decoded.capacity();
        let reusable = matches!(
            &self.sample_buf,
            Some((_, s, cap)) if *s == spec && *cap >= capacity
        );
        if !reusable {
            self.sample_buf = Some((SampleBuffer::new(capacity as u64, spec), spec, capacity));
        }
        let Some((sample_buf, _, _)) = self.sample_buf.as_mut() else {
            return Ok(());
        };
        sample_buf.copy_interleaved_ref(decoded);

        map_channels(
            sample_buf.samples(),
            spec.channels.count(),
            usize::from(self.output.channels),
            &mut self.mapped,
        );
        match &mut self.resampler {
            Some(resampler) => resampler.push(&self.mapped, &mut self.pending)?,
            None => self.pending.extend_from_slice(&self.mapped),
        }
        Ok(())
    }
}
