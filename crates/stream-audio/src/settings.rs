//! Settings for the playback driver.
//!
//! Transport settings live with the downloader implementation (`stream-audio-http`);
//! container settings live in [`ParserOptions`].

use std::time::Duration;

use crate::parser::ParserOptions;
use crate::types::AudioSpec;

/// Resampling quality levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplingQuality {
    /// Cubic polynomial interpolation. Cheap; fine for speech and tests.
    #[default]
    Fast,
    /// Windowed sinc interpolation.
    High,
}

/// What happens when playback reaches the end of the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndBehavior {
    /// Stop where the track ended.
    Stop,
    /// Seek back to the start, then stop.
    #[default]
    RewindAndStop,
    /// Seek back to the start and keep playing.
    Loop,
}

/// Settings for [`Streamer`](crate::Streamer).
#[derive(Debug, Clone)]
pub struct StreamerSettings {
    // ----------------------------
    // Output format
    // ----------------------------
    /// Destination format handed to the output graph.
    /// Default: 44.1 kHz stereo.
    pub output_spec: AudioSpec,

    /// Frames requested from the reader per tick.
    /// Default: 8192 frames.
    pub read_buffer_size: usize,

    /// Resampling quality when the stream rate differs from `output_spec`.
    /// Default: `Fast`.
    pub resampling_quality: ResamplingQuality,

    // ----------------------------
    // Scheduling
    // ----------------------------
    /// Timer period. `None` derives half of one read buffer's playback duration.
    pub tick_interval: Option<Duration>,

    /// Upper bound on buffers queued in the output graph; ticks skip reading above it.
    /// Default: 4.
    pub max_queued_buffers: usize,

    /// End of track handling.
    /// Default: `RewindAndStop`.
    pub end_behavior: EndBehavior,

    // ----------------------------
    // UX
    // ----------------------------
    /// Length of the silence ramp around play and seek. Zero disables it.
    /// Default: 300 ms.
    pub fade_duration: Duration,

    /// Options for the per-URL parser.
    pub parser: ParserOptions,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            output_spec: AudioSpec::default(),
            read_buffer_size: 8192,
            resampling_quality: ResamplingQuality::default(),
            tick_interval: None,
            max_queued_buffers: 4,
            end_behavior: EndBehavior::default(),
            fade_duration: Duration::from_millis(300),
            parser: ParserOptions::default(),
        }
    }
}

impl StreamerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_spec(mut self, spec: AudioSpec) -> Self {
        self.output_spec = spec;
        self
    }

    pub fn with_read_buffer_size(mut self, frames: usize) -> Self {
        self.read_buffer_size = frames.max(1);
        self
    }

    pub fn with_resampling_quality(mut self, quality: ResamplingQuality) -> Self {
        self.resampling_quality = quality;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn with_max_queued_buffers(mut self, buffers: usize) -> Self {
        self.max_queued_buffers = buffers.max(1);
        self
    }

    pub fn with_end_behavior(mut self, behavior: EndBehavior) -> Self {
        self.end_behavior = behavior;
        self
    }

    pub fn with_fade_duration(mut self, fade: Duration) -> Self {
        self.fade_duration = fade;
        self
    }

    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.parser = options;
        self
    }

    /// Effective timer period.
    pub fn effective_tick_interval(&self) -> Duration {
        self.tick_interval.unwrap_or_else(|| {
            self.output_spec
                .frames_to_duration(self.read_buffer_size as u64)
                / 2
        })
    }
}
