//! Headless output graph with a virtual render clock.
//!
//! Nothing plays on its own: [`MemoryGraph::advance`] renders frames from the queue and
//! captures them. Clones share state, so a test can keep a handle while the driver owns
//! another.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{GraphError, OutputGraph};
use crate::types::{AudioSpec, PcmBuffer};

#[derive(Debug)]
struct State {
    spec: AudioSpec,
    running: bool,
    playing: bool,
    queue: VecDeque<PcmBuffer>,
    /// Frames of the front buffer already rendered.
    front_offset: usize,
    /// Frames rendered since the last source stop.
    rendered: u64,
    /// The source played since the last stop.
    clock_started: bool,
    gain: f32,
    rate: f32,
    /// Rendered samples with gain applied.
    output: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct MemoryGraph {
    state: Arc<Mutex<State>>,
}

impl MemoryGraph {
    pub fn new(spec: AudioSpec) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                spec,
                running: false,
                playing: false,
                queue: VecDeque::new(),
                front_offset: 0,
                rendered: 0,
                clock_started: false,
                gain: 1.0,
                rate: 1.0,
                output: Vec::new(),
            })),
        }
    }

    /// Render `elapsed` wall time worth of frames (scaled by the rate). Returns frames rendered.
    pub fn advance(&self, elapsed: Duration) -> usize {
        let frames = {
            let state = self.state.lock();
            (elapsed.as_secs_f64() * f64::from(state.spec.sample_rate) * f64::from(state.rate))
                .round() as usize
        };
        self.render_frames(frames)
    }

    /// Render up to `frames` frames. Stops early when the queue runs dry.
    pub fn render_frames(&self, frames: usize) -> usize {
        let mut state = self.state.lock();
        if !state.running || !state.playing {
            return 0;
        }
        let channels = usize::from(state.spec.channels);
        let mut rendered = 0;
        while rendered < frames {
            let Some(front) = state.queue.front() else { break };
            let offset = state.front_offset;
            let take = (front.frames() - offset).min(frames - rendered);
            let gain = state.gain;
            let samples: Vec<f32> = front.samples()[offset * channels..(offset + take) * channels]
                .iter()
                .map(|s| s * gain)
                .collect();
            let finished = offset + take == front.frames();
            state.output.extend_from_slice(&samples);
            if finished {
                state.queue.pop_front();
                state.front_offset = 0;
            } else {
                state.front_offset += take;
            }
            rendered += take;
        }
        state.rendered += rendered as u64;
        rendered
    }

    /// Drain the captured output.
    pub fn take_output(&self) -> Vec<f32> {
        std::mem::take(&mut self.state.lock().output)
    }

    pub fn rate(&self) -> f32 {
        self.state.lock().rate
    }
}

impl OutputGraph for MemoryGraph {
    fn spec(&self) -> AudioSpec {
        self.state.lock().spec
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.state.lock().running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        state.playing = false;
    }

    fn pause(&mut self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn play_source(&mut self) {
        let mut state = self.state.lock();
        state.playing = true;
        state.clock_started = true;
    }

    fn pause_source(&mut self) {
        self.state.lock().playing = false;
    }

    fn stop_source(&mut self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.queue.clear();
        state.front_offset = 0;
        state.rendered = 0;
        state.clock_started = false;
    }

    fn is_source_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn schedule(&mut self, buffer: PcmBuffer) {
        if !buffer.is_empty() {
            self.state.lock().queue.push_back(buffer);
        }
    }

    fn queued_buffers(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn render_time(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .clock_started
            .then(|| state.spec.frames_to_duration(state.rendered))
    }

    fn gain(&self) -> f32 {
        self.state.lock().gain
    }

    fn set_gain(&mut self, gain: f32) {
        self.state.lock().gain = gain;
    }

    fn set_rate(&mut self, rate: f32) -> bool {
        self.state.lock().rate = rate.max(0.0);
        true
    }
}
