//! Driver state machine. Every method runs under the streamer lock.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};
use url::Url;

use super::timeline::Timeline;
use super::{worker, Shared};
use crate::download::{DownloadError, DownloadSink, Downloader, DownloaderFactory};
use crate::effects::ProcessingChain;
use crate::error::{SeekError, StreamError};
use crate::events::{PlaybackState, StreamerEvent};
use crate::graph::OutputGraph;
use crate::parser::{ParseReport, ParsedStream, Parser, ParserError, ParserResult};
use crate::reader::{Reader, ReaderError};
use crate::settings::{EndBehavior, StreamerSettings};

/// Work for the notification thread.
pub(super) enum Notice {
    Event(StreamerEvent),
    /// Acknowledged once every earlier notice was delivered.
    Barrier(Sender<()>),
}

struct Fade {
    restore_gain: f32,
    due: Instant,
}

/// Everything that lives for one URL.
struct Session {
    id: u64,
    url: Url,
    stream: ParsedStream,
    /// Created once the data format is known.
    reader: Option<Reader>,
    downloader: Box<dyn Downloader>,
    /// A fatal error was reported; later failures of this session are not.
    failed: bool,
}

pub(super) struct Core {
    settings: StreamerSettings,
    graph: Box<dyn OutputGraph>,
    chain: ProcessingChain,
    factory: Arc<dyn DownloaderFactory>,
    notices: Sender<Notice>,
    shared: Weak<Shared>,

    state: PlaybackState,
    session: Option<Session>,
    next_session: u64,
    /// Last duration reported to observers.
    duration: Option<Duration>,
    /// Media time at which the render clock last restarted from zero.
    time_offset: Duration,
    timeline: Timeline,
    /// The reader reported the end of the stream; nothing more to schedule.
    scheduling_complete: bool,
    download_active: bool,
    fade: Option<Fade>,
}

impl Core {
    pub(super) fn new(
        settings: StreamerSettings,
        graph: Box<dyn OutputGraph>,
        chain: ProcessingChain,
        factory: Arc<dyn DownloaderFactory>,
        notices: Sender<Notice>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            settings,
            graph,
            chain,
            factory,
            notices,
            shared,
            state: PlaybackState::Stopped,
            session: None,
            next_session: 0,
            duration: None,
            time_offset: Duration::ZERO,
            timeline: Timeline::default(),
            scheduling_complete: false,
            download_active: false,
            fade: None,
        }
    }

    // ----------------------------
    // Notifications
    // ----------------------------

    fn emit(&self, event: StreamerEvent) {
        let _ = self.notices.send(Notice::Event(event));
    }

    pub(super) fn barrier(&self, done: Sender<()>) -> bool {
        self.notices.send(Notice::Barrier(done)).is_ok()
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        info!(from = ?self.state, to = ?state, "streamer: state changed");
        self.state = state;
        self.emit(StreamerEvent::StateChanged(state));
    }

    // ----------------------------
    // Accessors
    // ----------------------------

    pub(super) fn state(&self) -> PlaybackState {
        self.state
    }

    pub(super) fn url(&self) -> Option<Url> {
        self.session.as_ref().map(|s| s.url.clone())
    }

    pub(super) fn stream(&self) -> Option<ParsedStream> {
        self.session.as_ref().map(|s| s.stream.clone())
    }

    pub(super) fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub(super) fn is_download_active(&self) -> bool {
        self.download_active
    }

    /// Seek offset plus the media played by the render clock. `None` until a reader exists.
    pub(super) fn current_time(&self) -> Option<Duration> {
        self.session.as_ref()?.reader.as_ref()?;
        let rendered = self.graph.render_time().unwrap_or_default();
        Some(self.time_offset + self.timeline.media_time(rendered))
    }

    pub(super) fn volume(&self) -> f32 {
        self.fade
            .as_ref()
            .map_or_else(|| self.graph.gain(), |fade| fade.restore_gain)
    }

    pub(super) fn set_volume(&mut self, volume: f32) {
        let volume = volume.max(0.0);
        match self.fade.as_mut() {
            Some(fade) => fade.restore_gain = volume,
            None => self.graph.set_gain(volume),
        }
    }

    pub(super) fn set_rate(&mut self, rate: f32) -> bool {
        if !(rate.is_finite() && rate > 0.0) {
            return false;
        }
        self.graph.set_rate(rate)
    }

    // ----------------------------
    // Session lifecycle
    // ----------------------------

    /// Tear down the current session and start downloading `url`.
    pub(super) fn load(&mut self, url: Url) -> Result<(), StreamError> {
        self.reset();
        info!(%url, "streamer: loading");

        let parser = match Parser::open(self.settings.parser.clone()) {
            Ok(parser) => parser,
            Err(e) => {
                error!(%url, error = %e, "streamer: parser could not open");
                let err = StreamError::from(e);
                self.emit(StreamerEvent::PlaybackFailed {
                    error: err.clone(),
                    url,
                });
                return Err(err);
            }
        };

        self.next_session += 1;
        let id = self.next_session;
        let stream = parser.stream();
        let (sink, events) = DownloadSink::channel();
        let mut downloader = self.factory.create(&url, sink);
        worker::spawn_parse_worker(self.shared.clone(), id, parser, events);
        downloader.start();
        self.download_active = true;

        self.session = Some(Session {
            id,
            url,
            stream,
            reader: None,
            downloader,
            failed: false,
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.stop();
        if let Some(session) = self.session.take() {
            debug!(session = session.id, "streamer: session closed");
        }
        self.duration = None;
        self.time_offset = Duration::ZERO;
        self.scheduling_complete = false;
        self.download_active = false;
    }

    pub(super) fn shutdown(&mut self) {
        self.reset();
    }

    /// URL of session `id` while it is current and has not failed.
    fn live_url(&self, id: u64) -> Option<Url> {
        self.session
            .as_ref()
            .filter(|s| s.id == id && !s.failed)
            .map(|s| s.url.clone())
    }

    fn ensure_reader(&mut self) {
        let spec = self.graph.spec();
        let quality = self.settings.resampling_quality;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.reader.is_some() || session.stream.data_format().is_none() {
            return;
        }
        match Reader::new(session.stream.clone(), spec, quality) {
            Ok(reader) => {
                debug!(session = session.id, "streamer: reader created");
                session.reader = Some(reader);
            }
            Err(e) => self.fail_playback(e.into()),
        }
    }

    /// Report the parser's duration estimate when it grew. Equal values are not reported.
    fn refresh_duration(&mut self) {
        let Some(duration) = self.session.as_ref().and_then(|s| s.stream.duration()) else {
            return;
        };
        if self.duration.is_some_and(|old| duration <= old) {
            return;
        }
        debug!(?duration, "streamer: duration updated");
        self.duration = Some(duration);
        self.emit(StreamerEvent::DurationUpdated(duration));
    }

    fn fail_playback(&mut self, error: StreamError) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.failed {
            return;
        }
        session.failed = true;
        session.downloader.stop();
        let url = session.url.clone();
        error!(%url, %error, "streamer: playback failed");
        self.download_active = false;
        self.emit(StreamerEvent::PlaybackFailed { error, url });
        self.stop();
    }

    // ----------------------------
    // Parse worker callbacks
    // ----------------------------

    pub(super) fn on_parsed(&mut self, id: u64, result: ParserResult<ParseReport>, progress: f32) {
        let Some(url) = self.live_url(id) else {
            return;
        };
        self.emit(StreamerEvent::DownloadProgress { progress, url });
        match result {
            Ok(report) => {
                if report.format_ready {
                    self.ensure_reader();
                }
                if report.duration_changed {
                    self.refresh_duration();
                }
            }
            Err(e) => self.fail_playback(e.into()),
        }
    }

    pub(super) fn on_download_complete(
        &mut self,
        id: u64,
        error: Option<DownloadError>,
        finished: ParserResult<ParseReport>,
    ) {
        let Some(url) = self.live_url(id) else {
            return;
        };
        self.download_active = false;

        let cancelled = match error {
            Some(error) if !error.is_cancelled() => {
                error!(%url, %error, "streamer: download failed");
                if let Some(session) = self.session.as_mut() {
                    session.failed = true;
                }
                self.emit(StreamerEvent::DownloadFailed { error, url });
                self.stop();
                return;
            }
            Some(_) => {
                debug!(%url, "streamer: download cancelled");
                true
            }
            None => {
                info!(%url, "streamer: download complete");
                false
            }
        };

        match finished {
            Ok(_) => {
                self.ensure_reader();
                self.refresh_duration();
                let has_reader = self.session.as_ref().is_some_and(|s| s.reader.is_some());
                if !has_reader && !cancelled {
                    self.fail_playback(
                        ParserError::UnsupportedFileType("stream carried no audio packets".into())
                            .into(),
                    );
                    return;
                }
            }
            Err(e) if cancelled => debug!(error = %e, "streamer: partial stream ended"),
            Err(e) => {
                self.fail_playback(e.into());
                return;
            }
        }
        if self.state == PlaybackState::Buffering {
            self.resume_from_buffering();
        }
    }

    // ----------------------------
    // Transport
    // ----------------------------

    pub(super) fn play(&mut self) {
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
            return;
        }
        if self.session.is_none() {
            warn!("streamer: play without a url");
            return;
        }
        if !self.graph.is_running() {
            if let Err(e) = self.graph.start() {
                self.fail_playback(e.into());
                return;
            }
        }
        self.begin_fade();
        self.graph.play_source();
        self.set_state(PlaybackState::Playing);
    }

    pub(super) fn pause(&mut self) {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
            return;
        }
        self.graph.pause_source();
        self.set_state(PlaybackState::Paused);
    }

    /// Cancel the download and halt the graph. The reader is realigned with the played
    /// position, since buffers queued in the graph are dropped.
    pub(super) fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.downloader.stop();
        }
        self.download_active = false;

        let position = self.current_time();
        if let Some(fade) = self.fade.take() {
            self.graph.set_gain(fade.restore_gain);
        }
        self.graph.stop_source();
        self.graph.stop();
        self.restart_clock();
        if let Some(position) = position {
            if self.reposition(position).is_err() {
                self.time_offset = position;
            }
        }
        self.scheduling_complete = false;
        self.set_state(PlaybackState::Stopped);
    }

    /// Point the reader at the packet containing `time`. Returns the packet's start time.
    fn reposition(&mut self, time: Duration) -> Result<Duration, SeekError> {
        let session = self.session.as_mut().ok_or(SeekError::NoStream)?;
        let reader = session.reader.as_mut().ok_or(SeekError::NotReady)?;
        let stream = &session.stream;

        let frame = stream.frame_offset(time).ok_or(SeekError::NotReady)?;
        let packet = stream
            .packet_offset(frame)
            .ok_or(SeekError::NotReady)?
            .min(stream.total_packet_count());
        let aligned = stream.packet_time(packet).ok_or(SeekError::NotReady)?;
        reader.seek(packet);
        debug!(session = session.id, requested = ?time, packet, ?aligned, "streamer: repositioned");

        self.time_offset = aligned;
        self.scheduling_complete = false;
        Ok(aligned)
    }

    pub(super) fn seek(&mut self, time: Duration) -> Result<(), SeekError> {
        let aligned = self.reposition(time)?;
        info!(?time, ?aligned, "streamer: seek");

        let was_playing = self.graph.is_source_playing();
        self.begin_fade();
        self.graph.stop_source();
        self.restart_clock();
        if was_playing {
            self.graph.play_source();
        }
        self.emit(StreamerEvent::CurrentTimeUpdated(aligned));
        Ok(())
    }

    /// The render clock restarted from zero and queued audio is gone.
    fn restart_clock(&mut self) {
        self.timeline.clear();
        self.chain.reset();
    }

    fn begin_fade(&mut self) {
        let fade = self.settings.fade_duration;
        if fade.is_zero() {
            return;
        }
        let restore_gain = self.volume();
        self.graph.set_gain(0.0);
        self.fade = Some(Fade {
            restore_gain,
            due: Instant::now() + fade,
        });
    }

    fn restore_fade_if_due(&mut self) {
        if self.fade.as_ref().is_some_and(|f| Instant::now() >= f.due) {
            if let Some(fade) = self.fade.take() {
                self.graph.set_gain(fade.restore_gain);
            }
        }
    }

    // ----------------------------
    // Tick
    // ----------------------------

    pub(super) fn tick(&mut self) {
        self.restore_fade_if_due();
        if let Some(rendered) = self.graph.render_time() {
            self.timeline.compact(rendered);
        }
        if matches!(self.state, PlaybackState::Playing | PlaybackState::Buffering) {
            self.schedule_next_buffer();
            self.check_end_of_track();
        }
        if self.graph.is_running() && self.graph.is_source_playing() {
            if let Some(time) = self.current_time() {
                self.emit(StreamerEvent::CurrentTimeUpdated(time));
            }
        }
    }

    fn schedule_next_buffer(&mut self) {
        if self.scheduling_complete
            || self.graph.queued_buffers() >= self.settings.max_queued_buffers.max(1)
        {
            return;
        }
        let frames = self.settings.read_buffer_size;
        let outcome = match self.session.as_mut().and_then(|s| s.reader.as_mut()) {
            Some(reader) => reader.read(frames),
            None => Err(ReaderError::NotEnoughData),
        };
        match outcome {
            Ok(mut buffer) => {
                let media = buffer.duration();
                self.chain.process(&mut buffer);
                self.timeline.push(buffer.duration(), media);
                self.graph.schedule(buffer);
                if self.state == PlaybackState::Buffering {
                    self.resume_from_buffering();
                }
            }
            Err(ReaderError::NotEnoughData) => self.starve(),
            Err(ReaderError::ReachedEndOfFile) => {
                debug!("streamer: reader reached end of stream");
                self.scheduling_complete = true;
                if self.state == PlaybackState::Buffering {
                    self.resume_from_buffering();
                }
            }
            Err(e) => self.fail_playback(e.into()),
        }
    }

    /// The reader has nothing yet. Buffer while the download can still deliver; the source
    /// is paused once the queued audio has run out.
    fn starve(&mut self) {
        if !self.download_active {
            return;
        }
        if self.state == PlaybackState::Playing {
            debug!("streamer: buffering");
            self.set_state(PlaybackState::Buffering);
        }
        if self.graph.queued_buffers() == 0 && self.graph.is_source_playing() {
            self.graph.pause_source();
        }
    }

    fn resume_from_buffering(&mut self) {
        debug!("streamer: buffering finished");
        if self.graph.is_running() {
            self.graph.play_source();
        }
        self.set_state(PlaybackState::Playing);
    }

    fn check_end_of_track(&mut self) {
        if self.state != PlaybackState::Playing || self.download_active {
            return;
        }
        let reached = self
            .current_time()
            .zip(self.duration)
            .is_some_and(|(time, duration)| time >= duration);
        let drained = self.scheduling_complete && self.graph.queued_buffers() == 0;
        if reached || drained {
            self.finish_track();
        }
    }

    fn finish_track(&mut self) {
        info!(behavior = ?self.settings.end_behavior, "streamer: end of track");
        match self.settings.end_behavior {
            EndBehavior::Stop => self.stop(),
            EndBehavior::RewindAndStop => {
                if let Err(e) = self.seek(Duration::ZERO) {
                    warn!(error = %e, "streamer: rewind failed");
                }
                self.stop();
            }
            EndBehavior::Loop => {
                if let Err(e) = self.seek(Duration::ZERO) {
                    warn!(error = %e, "streamer: loop failed");
                    self.stop();
                }
            }
        }
    }
}
