//! Small value types shared by the reader, the output graph and the processing chain.

use std::time::Duration;

/// Basic PCM specification: the destination/read format produced by the
/// [`Reader`](crate::Reader) and consumed by an [`OutputGraph`](crate::OutputGraph).
///
/// Samples are always `f32`, interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSpec {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Playback duration of `frames` frames in this spec.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self::new(44_100, 2)
    }
}

/// A buffer of interleaved `f32` PCM in a fixed [`AudioSpec`].
///
/// Invariant: `pcm.len()` is a multiple of `spec.channels`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pcm: Vec<f32>,
    spec: AudioSpec,
}

impl PcmBuffer {
    /// Wrap interleaved samples. Trailing samples that do not form a whole frame are dropped.
    pub fn new(mut pcm: Vec<f32>, spec: AudioSpec) -> Self {
        let channels = usize::from(spec.channels.max(1));
        pcm.truncate(pcm.len() - pcm.len() % channels);
        Self { pcm, spec }
    }

    pub fn silence(frames: usize, spec: AudioSpec) -> Self {
        Self::new(vec![0.0; frames * usize::from(spec.channels)], spec)
    }

    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.pcm.len() / usize::from(self.spec.channels.max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.spec.frames_to_duration(self.frames() as u64)
    }

    pub fn samples(&self) -> &[f32] {
        &self.pcm
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.pcm
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.pcm
    }
}
