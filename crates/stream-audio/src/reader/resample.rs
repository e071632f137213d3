//! Sample-rate conversion with `rubato`, fed with interleaved PCM of a fixed channel count.
//!
//! The resampler's own delay is trimmed from the start of the output and the output is cut
//! to `round(frames_in * ratio)` on flush, so a stream of N input frames always yields the
//! same number of output frames regardless of chunking.

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as _, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

use super::ConverterError;
use crate::settings::ResamplingQuality;

/// Input frames per resampler call.
const CHUNK_FRAMES: usize = 1024;

enum Inner {
    Fast(FastFixedIn<f32>),
    High(SincFixedIn<f32>),
}

impl Inner {
    fn input_frames_next(&self) -> usize {
        match self {
            Inner::Fast(r) => r.input_frames_next(),
            Inner::High(r) => r.input_frames_next(),
        }
    }

    fn output_delay(&self) -> usize {
        match self {
            Inner::Fast(r) => r.output_delay(),
            Inner::High(r) => r.output_delay(),
        }
    }

    fn process(&mut self, input: &[&[f32]]) -> Result<Vec<Vec<f32>>, ConverterError> {
        Ok(match self {
            Inner::Fast(r) => r.process(input, None)?,
            Inner::High(r) => r.process(input, None)?,
        })
    }

    fn process_partial(
        &mut self,
        input: Option<&[&[f32]]>,
    ) -> Result<Vec<Vec<f32>>, ConverterError> {
        Ok(match self {
            Inner::Fast(r) => r.process_partial(input, None)?,
            Inner::High(r) => r.process_partial(input, None)?,
        })
    }

    fn reset(&mut self) {
        match self {
            Inner::Fast(r) => r.reset(),
            Inner::High(r) => r.reset(),
        }
    }
}

pub(crate) struct Resampler {
    inner: Inner,
    ratio: f64,
    channels: usize,
    /// Planar input waiting for a full chunk.
    input: Vec<Vec<f32>>,
    frames_in: u64,
    frames_out: u64,
    /// Leading output frames still to drop (resampler delay).
    skip: usize,
}

impl Resampler {
    pub(crate) fn new(
        from_rate: u32,
        to_rate: u32,
        channels: usize,
        quality: ResamplingQuality,
    ) -> Result<Self, ConverterError> {
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let inner = match quality {
            ResamplingQuality::Fast => Inner::Fast(FastFixedIn::new(
                ratio,
                1.0,
                PolynomialDegree::Cubic,
                CHUNK_FRAMES,
                channels,
            )?),
            ResamplingQuality::High => {
                let params = SincInterpolationParameters {
                    sinc_len: 128,
                    f_cutoff: 0.95,
                    interpolation: SincInterpolationType::Linear,
                    oversampling_factor: 128,
                    window: WindowFunction::BlackmanHarris2,
                };
                Inner::High(SincFixedIn::new(
                    ratio,
                    1.0,
                    params,
                    CHUNK_FRAMES,
                    channels,
                )?)
            }
        };
        let skip = inner.output_delay();
        Ok(Self {
            inner,
            ratio,
            channels,
            input: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            frames_in: 0,
            frames_out: 0,
            skip,
        })
    }

    /// Queue interleaved frames and append every completed chunk to `out`.
    pub(crate) fn push(&mut self, interleaved: &[f32], out: &mut Vec<f32>) -> Result<(), ConverterError> {
        for frame in interleaved.chunks_exact(self.channels) {
            for (plane, sample) in self.input.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }
        self.frames_in += (interleaved.len() / self.channels) as u64;

        loop {
            let needed = self.inner.input_frames_next();
            if self.input[0].len() < needed {
                return Ok(());
            }
            let chunk: Vec<&[f32]> = self.input.iter().map(|plane| &plane[..needed]).collect();
            let planes = self.inner.process(&chunk)?;
            for plane in &mut self.input {
                plane.drain(..needed);
            }
            self.emit(&planes, None, out);
        }
    }

    /// Drain buffered input and the resampler delay at end of stream.
    pub(crate) fn flush(&mut self, out: &mut Vec<f32>) -> Result<(), ConverterError> {
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        if !self.input[0].is_empty() {
            let chunk: Vec<&[f32]> = self.input.iter().map(Vec::as_slice).collect();
            let planes = self.inner.process_partial(Some(&chunk))?;
            self.emit(&planes, Some(expected), out);
        }
        for plane in &mut self.input {
            plane.clear();
        }
        while self.frames_out < expected {
            let planes = self.inner.process_partial(None)?;
            if planes.first().map_or(true, Vec::is_empty) {
                break;
            }
            self.emit(&planes, Some(expected), out);
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.inner.reset();
        for plane in &mut self.input {
            plane.clear();
        }
        self.frames_in = 0;
        self.frames_out = 0;
        self.skip = self.inner.output_delay();
    }

    fn emit(&mut self, planes: &[Vec<f32>], limit: Option<u64>, out: &mut Vec<f32>) {
        let frames = planes.first().map_or(0, Vec::len);
        for i in 0..frames {
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            if limit.is_some_and(|l| self.frames_out >= l) {
                return;
            }
            for plane in planes {
                out.push(plane[i]);
            }
            self.frames_out += 1;
        }
    }
}
