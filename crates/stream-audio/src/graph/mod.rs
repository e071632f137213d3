//! Output audio graph boundary.
//!
//! An output graph has an engine (started, stopped or paused as a whole) and one source
//! node that plays scheduled buffers in FIFO order. The source node's render clock counts
//! the frames it has played since it was last stopped; stopping the node also drops its
//! queue. The driver derives the current playback time from this clock.

mod memory;
#[cfg(feature = "rodio")]
mod rodio;

use std::time::Duration;

use crate::types::{AudioSpec, PcmBuffer};

pub use self::memory::MemoryGraph;
#[cfg(feature = "rodio")]
pub use self::rodio::RodioGraph;

/// Output graph errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("output device unavailable: {0}")]
    Device(String),

    #[error("output graph was shut down")]
    Closed,
}

/// Consumed interface of the platform output graph.
pub trait OutputGraph: Send {
    /// Fixed format of scheduled buffers.
    fn spec(&self) -> AudioSpec;

    fn start(&mut self) -> Result<(), GraphError>;
    fn stop(&mut self);
    fn pause(&mut self);
    fn is_running(&self) -> bool;

    fn play_source(&mut self);
    fn pause_source(&mut self);
    /// Stop the source node: drops queued buffers and zeroes the render clock.
    fn stop_source(&mut self);
    fn is_source_playing(&self) -> bool;

    /// Queue a buffer behind those already scheduled.
    fn schedule(&mut self, buffer: PcmBuffer);
    /// Buffers scheduled but not completely played.
    fn queued_buffers(&self) -> usize;

    /// Time the source node has played since it last started from a stop, or `None` when it
    /// has not played since.
    fn render_time(&self) -> Option<Duration>;

    fn gain(&self) -> f32;
    fn set_gain(&mut self, gain: f32);

    /// Varispeed playback rate multiplier; pitch follows the rate. Returns false when the
    /// graph cannot change its rate.
    fn set_rate(&mut self, _rate: f32) -> bool {
        false
    }
}
