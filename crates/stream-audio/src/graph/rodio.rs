//! Output graph on the default audio device through `rodio`.
//!
//! `rodio::OutputStream` must stay on the thread that opened it, so a holder thread owns
//! it for the lifetime of the graph and hands back a `Sink` bound to its mixer. Each
//! scheduled buffer is wrapped in a counting source; the shared counter is the render clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamBuilder, Sink, Source};
use tracing::{debug, warn};

use super::{GraphError, OutputGraph};
use crate::types::{AudioSpec, PcmBuffer};

/// Source wrapper counting every sample it yields.
struct Counted {
    inner: SamplesBuffer,
    played: Arc<AtomicU64>,
}

impl Iterator for Counted {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next()?;
        self.played.fetch_add(1, Ordering::Relaxed);
        Some(sample)
    }
}

impl Source for Counted {
    fn current_span_len(&self) -> Option<usize> {
        self.inner.current_span_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

pub struct RodioGraph {
    spec: AudioSpec,
    sink: Sink,
    played: Arc<AtomicU64>,
    running: bool,
    playing: bool,
    clock_started: bool,
    shutdown: Sender<()>,
}

impl RodioGraph {
    /// Open the default output device.
    pub fn open_default(spec: AudioSpec) -> Result<Self, GraphError> {
        let (sink_tx, sink_rx) = bounded::<Result<Sink, GraphError>>(1);
        let (shutdown, shutdown_rx) = bounded::<()>(1);

        thread::Builder::new()
            .name("rodio-output".into())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = sink_tx.send(Err(GraphError::Device(e.to_string())));
                        return;
                    }
                };
                let sink = Sink::connect_new(stream.mixer());
                sink.pause();
                if sink_tx.send(Ok(sink)).is_err() {
                    return;
                }
                // Keep the stream alive until the graph is dropped.
                let _ = shutdown_rx.recv();
                debug!("rodio output stream closed");
                drop(stream);
            })
            .map_err(|e| GraphError::Device(e.to_string()))?;

        let sink = sink_rx.recv().map_err(|_| GraphError::Closed)??;
        Ok(Self {
            spec,
            sink,
            played: Arc::new(AtomicU64::new(0)),
            running: false,
            playing: false,
            clock_started: false,
            shutdown,
        })
    }
}

impl Drop for RodioGraph {
    fn drop(&mut self) {
        self.sink.stop();
        let _ = self.shutdown.try_send(());
    }
}

impl OutputGraph for RodioGraph {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn start(&mut self) -> Result<(), GraphError> {
        self.running = true;
        if self.playing {
            self.sink.play();
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_source();
        self.running = false;
    }

    fn pause(&mut self) {
        self.sink.pause();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn play_source(&mut self) {
        if !self.running {
            warn!("rodio graph: play requested while the engine is stopped");
        }
        self.playing = true;
        self.clock_started = true;
        self.sink.play();
    }

    fn pause_source(&mut self) {
        self.playing = false;
        self.sink.pause();
    }

    fn stop_source(&mut self) {
        self.playing = false;
        self.clock_started = false;
        // Clearing also pauses the sink.
        self.sink.clear();
        self.played.store(0, Ordering::Relaxed);
    }

    fn is_source_playing(&self) -> bool {
        self.playing
    }

    fn schedule(&mut self, buffer: PcmBuffer) {
        let spec = buffer.spec();
        let inner = SamplesBuffer::new(spec.channels, spec.sample_rate, buffer.into_samples());
        self.sink.append(Counted {
            inner,
            played: Arc::clone(&self.played),
        });
    }

    fn queued_buffers(&self) -> usize {
        self.sink.len()
    }

    fn render_time(&self) -> Option<Duration> {
        if !self.clock_started {
            return None;
        }
        let samples = self.played.load(Ordering::Relaxed);
        let frames = samples / u64::from(self.spec.channels.max(1));
        Some(self.spec.frames_to_duration(frames))
    }

    fn gain(&self) -> f32 {
        self.sink.volume()
    }

    fn set_gain(&mut self, gain: f32) {
        self.sink.set_volume(gain);
    }

    /// Sink speed resamples on output, so pitch moves with the rate.
    fn set_rate(&mut self, rate: f32) -> bool {
        self.sink.set_speed(rate);
        true
    }
}
