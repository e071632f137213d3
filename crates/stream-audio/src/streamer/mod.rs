//! Playback driver.
//!
//! The [`Streamer`] owns one session per URL: a downloader, a parse worker fed by it, the
//! parsed stream, and a reader created once the data format is known. A timer pulls one
//! buffer per tick from the reader into the output graph, tracks the playback time and
//! drives the [`PlaybackState`] machine. All driver state sits behind one lock, so a seek
//! never interleaves with a tick.
//!
//! ```no_run
//! use stream_audio::{AudioSpec, MemoryGraph, MemorySource, Streamer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = MemoryGraph::new(AudioSpec::default());
//! let streamer = Streamer::builder(graph, MemorySource::new(std::fs::read("song.mp3")?)).build()?;
//! streamer.set_url("memory://song.mp3".parse()?)?;
//! streamer.play();
//! # Ok(())
//! # }
//! ```

mod driver;
mod timeline;
mod worker;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded};
use parking_lot::Mutex;
use url::Url;

use self::driver::Core;
use self::worker::Scheduler;
use crate::download::DownloaderFactory;
use crate::effects::ProcessingChain;
use crate::error::{SeekError, StreamError};
use crate::events::{PlaybackState, StreamerObserver};
use crate::graph::OutputGraph;
use crate::parser::ParsedStream;
use crate::settings::StreamerSettings;

pub(crate) struct Shared {
    core: Mutex<Core>,
}

impl Shared {
    fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        f(&mut *self.core.lock())
    }
}

/// Configures and builds a [`Streamer`].
pub struct StreamerBuilder {
    graph: Box<dyn OutputGraph>,
    factory: Arc<dyn DownloaderFactory>,
    settings: StreamerSettings,
    chain: ProcessingChain,
    observer: Arc<dyn StreamerObserver>,
    timer: bool,
}

impl StreamerBuilder {
    pub fn settings(mut self, settings: StreamerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stages applied to every buffer before it is scheduled.
    pub fn processing_chain(mut self, chain: ProcessingChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StreamerObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Do not spawn the timer thread; the caller drives [`Streamer::tick`].
    pub fn manual_ticks(mut self) -> Self {
        self.timer = false;
        self
    }

    pub fn build(self) -> io::Result<Streamer> {
        let Self {
            graph,
            factory,
            settings,
            chain,
            observer,
            timer,
        } = self;
        let (notices, notices_rx) = unbounded();
        worker::spawn_notifier(observer, notices_rx)?;

        let interval = settings.effective_tick_interval();
        let shared = Arc::new_cyclic(|weak| Shared {
            core: Mutex::new(Core::new(
                settings,
                graph,
                chain,
                factory,
                notices,
                weak.clone(),
            )),
        });
        let scheduler = if timer {
            Some(Scheduler::spawn(Arc::downgrade(&shared), interval)?)
        } else {
            None
        };
        Ok(Streamer { shared, scheduler })
    }
}

/// Streams, decodes and plays one URL at a time.
pub struct Streamer {
    shared: Arc<Shared>,
    scheduler: Option<Scheduler>,
}

impl Streamer {
    pub fn builder(
        graph: impl OutputGraph + 'static,
        factory: impl DownloaderFactory + 'static,
    ) -> StreamerBuilder {
        StreamerBuilder {
            graph: Box::new(graph),
            factory: Arc::new(factory),
            settings: StreamerSettings::default(),
            chain: ProcessingChain::default(),
            observer: Arc::new(()),
            timer: true,
        }
    }

    /// Replace the current stream: stops playback, discards the parsed data and starts
    /// downloading `url`. Playback does not start until [`Streamer::play`].
    pub fn set_url(&self, url: Url) -> Result<(), StreamError> {
        self.shared.with_core(|core| core.load(url))
    }

    pub fn url(&self) -> Option<Url> {
        self.shared.with_core(|core| core.url())
    }

    pub fn play(&self) {
        self.shared.with_core(|core| core.play());
    }

    pub fn pause(&self) {
        self.shared.with_core(|core| core.pause());
    }

    /// Stop playback and cancel the download. Idempotent.
    pub fn stop(&self) {
        self.shared.with_core(|core| core.stop());
    }

    /// Jump to `time`, aligned down to a packet boundary.
    ///
    /// Needs the stream's format and a duration estimate. Playback continues if it was
    /// running.
    pub fn seek(&self, time: Duration) -> Result<(), SeekError> {
        self.shared.with_core(|core| core.seek(time))
    }

    /// Run one scheduling step. Called by the timer thread unless built with
    /// [`StreamerBuilder::manual_ticks`].
    pub fn tick(&self) {
        self.shared.with_core(|core| core.tick());
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.with_core(|core| core.state())
    }

    pub fn is_download_active(&self) -> bool {
        self.shared.with_core(|core| core.is_download_active())
    }

    pub fn current_time(&self) -> Option<Duration> {
        self.shared.with_core(|core| core.current_time())
    }

    /// Best duration estimate so far; never decreases within one URL.
    pub fn duration(&self) -> Option<Duration> {
        self.shared.with_core(|core| core.duration())
    }

    /// Parsed data of the current URL.
    pub fn stream(&self) -> Option<ParsedStream> {
        self.shared.with_core(|core| core.stream())
    }

    pub fn volume(&self) -> f32 {
        self.shared.with_core(|core| core.volume())
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.with_core(|core| core.set_volume(volume));
    }

    /// Varispeed playback rate of the output graph: pitch follows the rate. Returns false
    /// when the graph cannot change it. For tempo without a pitch change, add a
    /// [`TimePitch`](crate::effects::TimePitch) stage to the processing chain.
    pub fn set_rate(&self, rate: f32) -> bool {
        self.shared.with_core(|core| core.set_rate(rate))
    }

    /// Block until every notification produced so far reached the observer.
    ///
    /// Must not be called from an observer callback.
    pub fn flush_notifications(&self) {
        let (done, wait) = bounded(1);
        if self.shared.with_core(|core| core.barrier(done)) {
            let _ = wait.recv();
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.scheduler.take();
        self.shared.with_core(|core| core.shutdown());
    }
}
