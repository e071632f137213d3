//! Independent pitch and tempo control.
//!
//! Tempo is changed by WSOLA (waveform-similarity overlap-add): windows of the input are
//! re-spaced in time, each one aligned with the waveform the previous window left off, so
//! the pitch stays put. A pitch shift by ratio `p` stretches the tempo by `p` first and then
//! resamples by `1 / p` with `rubato`, which restores the length and moves the pitch.

use std::fmt;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use parking_lot::Mutex;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::debug;

use super::{load, store, AudioProcessor};
use crate::types::{AudioSpec, PcmBuffer};

/// WSOLA window length.
const WINDOW_SECS: f64 = 0.02;
/// Input frames per resampler call.
const RESAMPLE_CHUNK: usize = 256;

/// WSOLA time stretcher over interleaved frames.
struct Wsola {
    channels: usize,
    /// Periodic Hann window; two copies half a window apart sum to one.
    window: Vec<f32>,
    hop: usize,
    /// Search radius around the nominal analysis position.
    tolerance: usize,
    /// Output length over input length.
    stretch: f64,
    input: Vec<f32>,
    /// Where the next analysis window should start, in frames into `input`.
    nominal: f64,
    /// Input frame that continues the previous window seamlessly.
    natural: Option<usize>,
    /// Windowed second half of the previous window, waiting to be overlapped.
    tail: Vec<f32>,
    mono: Vec<f32>,
}

impl Wsola {
    fn new(sample_rate: u32, channels: usize) -> Self {
        let len = ((f64::from(sample_rate) * WINDOW_SECS) as usize).max(64) & !1;
        let window = (0..len)
            .map(|i| {
                let phase = std::f32::consts::TAU * i as f32 / len as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        let hop = len / 2;
        Self {
            channels,
            window,
            hop,
            tolerance: len / 4,
            stretch: 1.0,
            input: Vec::new(),
            nominal: 0.0,
            natural: None,
            tail: vec![0.0; hop * channels],
            mono: Vec::new(),
        }
    }

    fn set_stretch(&mut self, stretch: f64) {
        self.stretch = stretch;
    }

    fn reset(&mut self) {
        self.input.clear();
        self.nominal = 0.0;
        self.natural = None;
        self.tail.iter_mut().for_each(|s| *s = 0.0);
    }

    /// Append `samples` and emit every complete hop of stretched output.
    fn process(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        self.input.extend_from_slice(samples);
        let len = self.window.len();
        let analysis_hop = self.hop as f64 / self.stretch;

        loop {
            let available = self.input.len() / self.channels;
            let nominal = self.nominal.round() as usize;
            let start = match self.natural {
                None => {
                    if available < nominal + len {
                        break;
                    }
                    nominal
                }
                Some(natural) => {
                    let lo = nominal.saturating_sub(self.tolerance);
                    let hi = nominal + self.tolerance;
                    if available < (hi + len).max(natural + len) {
                        break;
                    }
                    self.best_match(natural, nominal, lo, hi)
                }
            };
            self.overlap_add(start, out);
            let natural = start + self.hop;
            self.nominal += analysis_hop;

            // No later window starts before this frame.
            let keep_from = (self.nominal.round() as usize)
                .saturating_sub(self.tolerance)
                .min(natural);
            self.input.drain(..keep_from * self.channels);
            self.nominal -= keep_from as f64;
            self.natural = Some(natural - keep_from);
        }
    }

    /// Candidate start in `lo..=hi` whose opening half best matches the continuation of
    /// the previous window.
    fn best_match(&mut self, natural: usize, nominal: usize, lo: usize, hi: usize) -> usize {
        let base = lo.min(natural);
        let end = (hi + self.hop).max(natural + self.hop);
        self.mono.clear();
        self.mono.extend(
            self.input[base * self.channels..end * self.channels]
                .chunks_exact(self.channels)
                .map(|frame| frame.iter().sum::<f32>()),
        );

        let template = &self.mono[natural - base..natural - base + self.hop];
        let score = |start: usize| {
            let candidate = &self.mono[start - base..start - base + self.hop];
            let (dot, energy) = template
                .iter()
                .zip(candidate)
                .step_by(2)
                .fold((0.0f32, 0.0f32), |(dot, energy), (t, c)| {
                    (dot + t * c, energy + c * c)
                });
            dot / (energy.sqrt() + 1e-9)
        };

        let mut best = nominal.clamp(lo, hi);
        let mut best_score = score(best);
        for start in lo..=hi {
            let s = score(start);
            if s > best_score {
                best = start;
                best_score = s;
            }
        }
        best
    }

    fn overlap_add(&mut self, start: usize, out: &mut Vec<f32>) {
        let ch = self.channels;
        let len = self.window.len();
        let frame = &self.input[start * ch..(start + len) * ch];
        for i in 0..self.hop {
            let w = self.window[i];
            for c in 0..ch {
                out.push(self.tail[i * ch + c] + w * frame[i * ch + c]);
            }
        }
        for i in self.hop..len {
            let w = self.window[i];
            for c in 0..ch {
                self.tail[(i - self.hop) * ch + c] = w * frame[i * ch + c];
            }
        }
    }
}

struct Engine {
    spec: AudioSpec,
    stretcher: Wsola,
    resampler: FastFixedIn<f32>,
    pitch_ratio: f64,
    stretched: Vec<f32>,
    /// Planar stretched input waiting for a full resampler chunk.
    planar: Vec<Vec<f32>>,
}

impl Engine {
    fn new(spec: AudioSpec, pitch_ratio: f64) -> Result<Self, String> {
        let channels = usize::from(spec.channels.max(1));
        let mut resampler = FastFixedIn::new(
            1.0,
            TimePitch::MAX_PITCH_RATIO,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            channels,
        )
        .map_err(|e| e.to_string())?;
        resampler
            .set_resample_ratio(1.0 / pitch_ratio, false)
            .map_err(|e| e.to_string())?;
        debug!(
            sample_rate = spec.sample_rate,
            channels, pitch_ratio, "time-pitch: engine created"
        );
        Ok(Self {
            spec,
            stretcher: Wsola::new(spec.sample_rate, channels),
            resampler,
            pitch_ratio,
            stretched: Vec::new(),
            planar: vec![Vec::with_capacity(RESAMPLE_CHUNK * 2); channels],
        })
    }

    fn process(&mut self, samples: &[f32], pitch_ratio: f64, rate: f64) -> Result<Vec<f32>, String> {
        if pitch_ratio != self.pitch_ratio {
            self.resampler
                .set_resample_ratio(1.0 / pitch_ratio, true)
                .map_err(|e| e.to_string())?;
            self.pitch_ratio = pitch_ratio;
        }
        self.stretcher.set_stretch(pitch_ratio / rate);

        self.stretched.clear();
        self.stretcher.process(samples, &mut self.stretched);
        let channels = self.planar.len();
        for frame in self.stretched.chunks_exact(channels) {
            for (plane, sample) in self.planar.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }

        let mut out = Vec::with_capacity(samples.len());
        loop {
            let needed = self.resampler.input_frames_next();
            if self.planar[0].len() < needed {
                break;
            }
            let chunk: Vec<&[f32]> = self.planar.iter().map(|plane| &plane[..needed]).collect();
            let planes = self
                .resampler
                .process(chunk.as_slice(), None)
                .map_err(|e| e.to_string())?;
            for plane in &mut self.planar {
                plane.drain(..needed);
            }
            let frames = planes.first().map_or(0, Vec::len);
            for i in 0..frames {
                out.extend(planes.iter().map(|plane| plane[i]));
            }
        }
        Ok(out)
    }

    fn reset(&mut self) {
        self.stretcher.reset();
        self.resampler.reset();
        self.planar.iter_mut().for_each(Vec::clear);
    }
}

/// Pitch shift in cents and tempo as a rate multiplier, adjustable independently while
/// playing. Clones share parameters and processing state.
///
/// Neutral settings (0 cents, rate 1) pass buffers through untouched. Otherwise the stage
/// holds back about one window of audio, which is lost when the stream ends.
#[derive(Clone)]
pub struct TimePitch {
    cents: Arc<AtomicU32>,
    rate: Arc<AtomicU32>,
    engine: Arc<Mutex<Option<Engine>>>,
}

impl fmt::Debug for TimePitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimePitch")
            .field("pitch", &self.pitch())
            .field("rate", &self.rate())
            .finish()
    }
}

impl Default for TimePitch {
    fn default() -> Self {
        Self::new()
    }
}

impl TimePitch {
    /// Two octaves either way.
    pub const MAX_PITCH_CENTS: f32 = 2400.0;
    pub const MIN_RATE: f32 = 0.25;
    pub const MAX_RATE: f32 = 4.0;
    const MAX_PITCH_RATIO: f64 = 4.0;

    pub fn new() -> Self {
        Self {
            cents: Arc::new(AtomicU32::new(0.0f32.to_bits())),
            rate: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            engine: Arc::new(Mutex::new(None)),
        }
    }

    /// Pitch shift in cents (100 per semitone).
    pub fn pitch(&self) -> f32 {
        load(&self.cents)
    }

    pub fn set_pitch(&self, cents: f32) {
        let cents = if cents.is_finite() { cents } else { 0.0 };
        store(
            &self.cents,
            cents.clamp(-Self::MAX_PITCH_CENTS, Self::MAX_PITCH_CENTS),
        );
    }

    /// Tempo multiplier: 2.0 plays twice as fast at the same pitch.
    pub fn rate(&self) -> f32 {
        load(&self.rate)
    }

    pub fn set_rate(&self, rate: f32) {
        let rate = if rate.is_finite() { rate } else { 1.0 };
        store(&self.rate, rate.clamp(Self::MIN_RATE, Self::MAX_RATE));
    }
}

impl AudioProcessor for TimePitch {
    fn process(&self, buffer: &mut PcmBuffer) -> Result<(), String> {
        let cents = self.pitch();
        let rate = self.rate();
        let mut state = self.engine.lock();
        if cents == 0.0 && rate == 1.0 {
            if state.take().is_some() {
                debug!("time-pitch: bypassed");
            }
            return Ok(());
        }

        let spec = buffer.spec();
        let pitch_ratio = 2f64.powf(f64::from(cents) / 1200.0);
        if state.as_ref().map_or(true, |engine| engine.spec != spec) {
            *state = Some(Engine::new(spec, pitch_ratio)?);
        }
        let Some(engine) = state.as_mut() else {
            return Ok(());
        };
        let out = engine.process(buffer.samples(), pitch_ratio, f64::from(rate))?;
        *buffer = PcmBuffer::new(out, spec);
        Ok(())
    }

    fn reset(&self) {
        if let Some(engine) = self.engine.lock().as_mut() {
            engine.reset();
        }
    }
}
