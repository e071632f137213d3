//! Live processing stages applied to each buffer before it reaches the output graph.
//!
//! A [`ProcessingChain`] is an ordered list of named stages handed to the
//! [`Streamer`](crate::Streamer) at construction. Stage parameters are atomics shared by
//! clones of the stage, so the caller keeps a clone and adjusts it while audio plays.
//!
//! Stages run when a buffer is scheduled, not when it is rendered. A parameter change is
//! heard once the buffers already queued in the output graph have played: up to
//! `max_queued_buffers * read_buffer_size` frames (about 0.74 s with default settings).
//! Lower either setting for a more responsive chain.

mod time_pitch;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::types::PcmBuffer;

pub use self::time_pitch::TimePitch;

/// Processor over a buffer of interleaved `f32` PCM.
///
/// A stage may replace the buffer with one of a different length (time stretching); the
/// spec must stay the same.
pub trait AudioProcessor: Send + Sync {
    fn process(&self, buffer: &mut PcmBuffer) -> Result<(), String>;

    /// Forget buffered history. Called when playback jumps to another position.
    fn reset(&self) {}
}

/// Ordered, named processing stages.
#[derive(Clone, Default)]
pub struct ProcessingChain {
    stages: Vec<(String, Arc<dyn AudioProcessor>)>,
}

impl fmt::Debug for ProcessingChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|(name, _)| name))
            .finish()
    }
}

impl ProcessingChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn with_stage(mut self, name: impl Into<String>, stage: impl AudioProcessor + 'static) -> Self {
        self.stages.push((name.into(), Arc::new(stage)));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, stage: Arc<dyn AudioProcessor>) {
        self.stages.push((name.into(), stage));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    pub fn stage(&self, name: &str) -> Option<Arc<dyn AudioProcessor>> {
        self.stages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, stage)| Arc::clone(stage))
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order. A failing stage is logged and skipped.
    pub fn process(&self, buffer: &mut PcmBuffer) {
        for (name, stage) in &self.stages {
            if let Err(e) = stage.process(buffer) {
                warn!(stage = %name, error = %e, "processing stage failed");
            }
        }
    }

    pub fn reset(&self) {
        for (_, stage) in &self.stages {
            stage.reset();
        }
    }
}

fn load(value: &AtomicU32) -> f32 {
    f32::from_bits(value.load(Ordering::Relaxed))
}

fn store(value: &AtomicU32, v: f32) {
    value.store(v.to_bits(), Ordering::Relaxed);
}

/// Linear gain. Clones share the same level.
#[derive(Debug, Clone)]
pub struct Gain {
    level: Arc<AtomicU32>,
}

impl Gain {
    pub fn new(level: f32) -> Self {
        Self {
            level: Arc::new(AtomicU32::new(level.max(0.0).to_bits())),
        }
    }

    pub fn level(&self) -> f32 {
        load(&self.level)
    }

    pub fn set_level(&self, level: f32) {
        store(&self.level, level.max(0.0));
    }
}

impl AudioProcessor for Gain {
    fn process(&self, buffer: &mut PcmBuffer) -> Result<(), String> {
        let level = self.level();
        if level != 1.0 {
            buffer.samples_mut().iter_mut().for_each(|s| *s *= level);
        }
        Ok(())
    }
}

/// Stereo balance in `[-1, 1]`; negative attenuates the right channel.
#[derive(Debug, Clone)]
pub struct Balance {
    pan: Arc<AtomicU32>,
}

impl Balance {
    pub fn new(pan: f32) -> Self {
        Self {
            pan: Arc::new(AtomicU32::new(pan.clamp(-1.0, 1.0).to_bits())),
        }
    }

    pub fn pan(&self) -> f32 {
        load(&self.pan)
    }

    pub fn set_pan(&self, pan: f32) {
        store(&self.pan, pan.clamp(-1.0, 1.0));
    }
}

impl AudioProcessor for Balance {
    fn process(&self, buffer: &mut PcmBuffer) -> Result<(), String> {
        let spec = buffer.spec();
        if spec.channels != 2 {
            return Err(format!("balance needs stereo, got {} channels", spec.channels));
        }
        let pan = self.pan();
        let left = (1.0 - pan).min(1.0);
        let right = (1.0 + pan).min(1.0);
        for frame in buffer.samples_mut().chunks_exact_mut(2) {
            frame[0] *= left;
            frame[1] *= right;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioSpec;

    const STEREO: AudioSpec = AudioSpec::new(48_000, 2);

    #[test]
    fn gain_is_adjustable_through_clones() {
        let gain = Gain::new(1.0);
        let chain = ProcessingChain::new().with_stage("gain", gain.clone());
        gain.set_level(0.5);

        let mut buf = PcmBuffer::new(vec![1.0, -1.0], STEREO);
        chain.process(&mut buf);
        assert_eq!(buf.samples(), &[0.5, -0.5]);
    }

    #[test]
    fn stages_run_in_order() {
        let chain = ProcessingChain::new()
            .with_stage("balance", Balance::new(-1.0))
            .with_stage("gain", Gain::new(2.0));
        assert_eq!(chain.names().collect::<Vec<_>>(), ["balance", "gain"]);

        let mut buf = PcmBuffer::new(vec![0.25, 0.25], STEREO);
        chain.process(&mut buf);
        assert_eq!(buf.samples(), &[0.5, 0.0]);
    }

    #[test]
    fn failing_stage_is_skipped() {
        let chain = ProcessingChain::new()
            .with_stage("balance", Balance::new(0.5))
            .with_stage("gain", Gain::new(0.5));
        let mut buf = PcmBuffer::new(vec![1.0, 1.0], AudioSpec::new(48_000, 1));
        chain.process(&mut buf);
        assert_eq!(buf.samples(), &[0.5, 0.5]);
    }
}
