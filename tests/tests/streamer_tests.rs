//! Playback driver scenarios on the headless output graph.
//!
//! Timers are disabled: each test advances the graph's render clock and calls `tick()`
//! itself, so scheduling is deterministic. Downloads still run on their own threads.

mod audio_fixture;
mod setup;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use stream_audio::{
    AudioSpec, DownloadError, EndBehavior, Gain, MemoryGraph, MemorySource, OutputGraph,
    ParserError, PlaybackState, ProcessingChain, StreamError, Streamer, StreamerEvent,
    StreamerSettings, TimePitch,
};
use url::Url;

use audio_fixture::AudioFixture;
use setup::wait_until;

const RATE: u32 = 8_000;
const SPEC: AudioSpec = AudioSpec::new(RATE, 1);
/// 100 ms per read.
const READ_FRAMES: usize = 800;
const STEP: Duration = Duration::from_millis(100);
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    streamer: Streamer,
    graph: MemoryGraph,
    events: Receiver<StreamerEvent>,
}

impl Harness {
    fn new(source: MemorySource) -> Self {
        Self::with(source, settings(), ProcessingChain::new())
    }

    fn with(source: MemorySource, settings: StreamerSettings, chain: ProcessingChain) -> Self {
        setup::init_tracing();
        let graph = MemoryGraph::new(SPEC);
        let (tx, events) = unbounded();
        let streamer = Streamer::builder(graph.clone(), source)
            .settings(settings)
            .processing_chain(chain)
            .observer(Arc::new(tx))
            .manual_ticks()
            .build()
            .unwrap();
        Self {
            streamer,
            graph,
            events,
        }
    }

    fn load(&self) {
        self.streamer.set_url(url("track.wav")).unwrap();
    }

    fn wait_downloaded(&self) {
        assert!(wait_until(WAIT, || !self.streamer.is_download_active()));
    }

    /// Tick and render one step at a time until `done` or the step budget runs out.
    fn run_until(&self, steps: usize, mut done: impl FnMut(&Streamer) -> bool) -> bool {
        for _ in 0..steps {
            self.streamer.tick();
            if done(&self.streamer) {
                return true;
            }
            self.graph.advance(STEP);
        }
        false
    }

    fn drain_events(&self) -> Vec<StreamerEvent> {
        self.streamer.flush_notifications();
        self.events.try_iter().collect()
    }
}

fn settings() -> StreamerSettings {
    StreamerSettings::new()
        .with_output_spec(SPEC)
        .with_read_buffer_size(READ_FRAMES)
        .with_fade_duration(Duration::ZERO)
}

fn url(path: &str) -> Url {
    Url::parse("memory://fixtures/").unwrap().join(path).unwrap()
}

fn states(events: &[StreamerEvent]) -> Vec<PlaybackState> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamerEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn one_second_wav() -> Vec<u8> {
    AudioFixture::sine_wav(440.0, 1.0, RATE, 1)
}

#[test]
fn plays_to_the_end_and_rewinds() {
    let h = Harness::new(MemorySource::new(one_second_wav()));
    h.load();
    h.wait_downloaded();
    assert_eq!(h.streamer.duration(), Some(Duration::from_secs(1)));

    h.streamer.play();
    assert!(h.run_until(40, |s| s.state() == PlaybackState::Stopped));

    // The final packet marks the end and is never rendered.
    assert_eq!(h.graph.take_output().len(), RATE as usize - 1);
    assert_eq!(h.streamer.current_time(), Some(Duration::ZERO));
    let events = h.drain_events();
    assert_eq!(
        states(&events),
        [PlaybackState::Playing, PlaybackState::Stopped]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamerEvent::DurationUpdated(d) if *d == Duration::from_secs(1))));
}

#[test]
fn seek_to_half_duration_keeps_playing() {
    let h = Harness::new(MemorySource::new(AudioFixture::sine_wav(440.0, 2.0, RATE, 1)));
    h.load();
    h.wait_downloaded();
    h.streamer.play();
    h.run_until(3, |_| false);

    let half = h.streamer.duration().unwrap() / 2;
    h.streamer.seek(half).unwrap();
    assert_eq!(h.streamer.current_time(), Some(half));

    h.streamer.tick();
    h.graph.advance(STEP);
    let now = h.streamer.current_time().unwrap();
    assert!(now >= half && now - half <= STEP, "time after seek: {now:?}");
    assert_eq!(h.streamer.state(), PlaybackState::Playing);

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamerEvent::CurrentTimeUpdated(t) if *t == half)));
}

#[test]
fn stop_is_idempotent() {
    let source = MemorySource::new(one_second_wav())
        .with_chunk_size(512)
        .with_chunk_interval(Duration::from_millis(20));
    let h = Harness::new(source);
    h.load();
    h.streamer.play();
    h.streamer.tick();

    h.streamer.stop();
    h.streamer.stop();

    assert_eq!(h.streamer.state(), PlaybackState::Stopped);
    assert!(!h.streamer.is_download_active());
    let events = h.drain_events();
    let states = states(&events);
    assert_eq!(states.last(), Some(&PlaybackState::Stopped));
    assert_eq!(
        states
            .iter()
            .filter(|s| **s == PlaybackState::Stopped)
            .count(),
        1
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamerEvent::DownloadFailed { .. })));
}

#[test]
fn buffers_until_data_arrives() {
    let source = MemorySource::new(one_second_wav())
        .with_chunk_size(1600)
        .with_chunk_interval(Duration::from_millis(50));
    let h = Harness::new(source);
    h.load();
    h.streamer.play();
    h.streamer.tick();
    assert_eq!(h.streamer.state(), PlaybackState::Buffering);

    assert!(wait_until(WAIT, || {
        h.streamer.tick();
        h.streamer.state() == PlaybackState::Playing
    }));
    assert!(h.graph.queued_buffers() > 0);

    let states = states(&h.drain_events());
    assert_eq!(
        &states[..3],
        [
            PlaybackState::Playing,
            PlaybackState::Buffering,
            PlaybackState::Playing
        ]
    );
}

#[test]
fn download_failure_stops_playback() {
    let source = MemorySource::new(one_second_wav())
        .with_chunk_size(1000)
        .with_failure_after(4_000, DownloadError::http(503, "memory://fixtures/track.wav"));
    let h = Harness::new(source);
    h.load();
    h.streamer.play();

    assert!(wait_until(WAIT, || !h.streamer.is_download_active()));
    assert_eq!(h.streamer.state(), PlaybackState::Stopped);
    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        StreamerEvent::DownloadFailed { error: DownloadError::Http { status: 503, .. }, url }
            if *url == self::url("track.wav")
    )));
}

#[test]
fn unsupported_container_is_a_playback_failure() {
    let mut ogg = b"OggS".to_vec();
    ogg.resize(4096, 0);
    let h = Harness::new(MemorySource::new(ogg));
    h.load();

    assert!(wait_until(WAIT, || !h.streamer.is_download_active()));
    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        StreamerEvent::PlaybackFailed {
            error: StreamError::Format(ParserError::UnsupportedFileType(_)),
            ..
        }
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, StreamerEvent::DownloadFailed { .. })));
    assert_eq!(h.streamer.state(), PlaybackState::Stopped);
}

#[test]
fn duration_updates_never_decrease() {
    let source = MemorySource::new(AudioFixture::silent_mp3(200, false))
        .with_chunk_size(2048)
        .without_length();
    let h = Harness::new(source);
    h.load();
    h.wait_downloaded();

    let durations: Vec<Duration> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            StreamerEvent::DurationUpdated(d) => Some(d),
            _ => None,
        })
        .collect();
    assert!(durations.len() > 1);
    assert!(durations.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(durations.last().copied(), h.streamer.duration());
}

#[test]
fn processing_chain_and_volume_shape_the_output() {
    let gain = Gain::new(0.5);
    let chain = ProcessingChain::new().with_stage("gain", gain.clone());
    let source = MemorySource::new(AudioFixture::constant_wav(16_384, 1_600, RATE, 1));
    let h = Harness::with(source, settings(), chain);
    h.load();
    h.wait_downloaded();
    h.streamer.set_volume(0.5);
    assert_eq!(h.streamer.volume(), 0.5);

    h.streamer.play();
    h.streamer.tick();
    h.graph.advance(STEP);
    let out = h.graph.take_output();
    assert_eq!(out.len(), READ_FRAMES);
    // 0.5 full scale, halved by the stage and again by the volume.
    assert!(out.iter().all(|s| (s - 0.125).abs() < 1e-3));
}

#[test]
fn fade_mutes_until_restored() {
    let settings = settings().with_fade_duration(Duration::from_millis(30));
    let h = Harness::with(
        MemorySource::new(one_second_wav()),
        settings,
        ProcessingChain::new(),
    );
    h.load();
    h.wait_downloaded();
    h.streamer.play();
    assert_eq!(h.streamer.volume(), 1.0);

    h.streamer.tick();
    h.graph.advance(STEP);
    assert!(h.graph.take_output().iter().all(|s| *s == 0.0));

    std::thread::sleep(Duration::from_millis(40));
    h.streamer.tick();
    h.graph.advance(STEP);
    assert!(AudioFixture::verify_samples_not_silence(&h.graph.take_output()));
}

#[test]
fn loop_restarts_from_the_beginning() {
    let settings = settings().with_end_behavior(EndBehavior::Loop);
    let h = Harness::with(
        MemorySource::new(one_second_wav()),
        settings,
        ProcessingChain::new(),
    );
    h.load();
    h.wait_downloaded();
    h.streamer.play();

    let mut passed_end = false;
    let looped = h.run_until(40, |s| {
        let now = s.current_time().unwrap_or_default();
        passed_end |= now >= Duration::from_millis(900);
        passed_end && now < Duration::from_millis(500)
    });
    assert!(looped);
    assert_eq!(h.streamer.state(), PlaybackState::Playing);
}

#[test]
fn new_url_replaces_the_session() {
    let h = Harness::new(MemorySource::new(one_second_wav()));
    h.load();
    h.wait_downloaded();
    h.streamer.play();
    h.run_until(3, |_| false);

    h.streamer.set_url(url("other.wav")).unwrap();
    assert_eq!(h.streamer.state(), PlaybackState::Stopped);
    assert_eq!(h.streamer.url(), Some(url("other.wav")));

    h.wait_downloaded();
    assert_eq!(h.streamer.duration(), Some(Duration::from_secs(1)));
}

#[test]
fn seek_without_stream_is_refused() {
    let h = Harness::new(MemorySource::new(one_second_wav()));
    assert_eq!(
        h.streamer.seek(Duration::from_secs(1)),
        Err(stream_audio::SeekError::NoStream)
    );
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn pause_freezes_the_clock_until_play() {
    let h = Harness::new(MemorySource::new(AudioFixture::sine_wav(440.0, 2.0, RATE, 1)));
    h.load();
    h.wait_downloaded();
    h.streamer.play();
    h.run_until(5, |_| false);
    assert_eq!(h.streamer.current_time(), Some(ms(500)));

    h.streamer.pause();
    assert_eq!(h.streamer.state(), PlaybackState::Paused);
    h.run_until(3, |_| false);
    assert_eq!(h.streamer.current_time(), Some(ms(500)));

    h.streamer.play();
    assert_eq!(h.streamer.state(), PlaybackState::Playing);
    h.run_until(3, |_| false);
    assert_eq!(h.streamer.current_time(), Some(ms(800)));
}

#[test]
fn seek_while_paused_stays_paused() {
    let h = Harness::new(MemorySource::new(AudioFixture::sine_wav(440.0, 2.0, RATE, 1)));
    h.load();
    h.wait_downloaded();
    h.streamer.play();
    h.run_until(3, |_| false);
    h.streamer.pause();

    h.streamer.seek(ms(1_500)).unwrap();
    assert_eq!(h.streamer.state(), PlaybackState::Paused);
    assert_eq!(h.streamer.current_time(), Some(ms(1_500)));
    h.run_until(3, |_| false);
    assert_eq!(h.streamer.current_time(), Some(ms(1_500)));
    assert!(h.graph.take_output().len() < RATE as usize);

    h.streamer.play();
    assert!(h.run_until(20, |s| s.state() == PlaybackState::Stopped));
    let events = h.drain_events();
    assert_eq!(
        states(&events),
        [
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Playing,
            PlaybackState::Stopped
        ]
    );
}

#[test]
fn set_rate_changes_frames_rendered_per_step() {
    let h = Harness::new(MemorySource::new(AudioFixture::sine_wav(440.0, 2.0, RATE, 1)));
    h.load();
    h.wait_downloaded();
    h.streamer.play();
    assert!(!h.streamer.set_rate(0.0));
    assert!(!h.streamer.set_rate(f32::NAN));

    assert!(h.streamer.set_rate(2.0));
    assert_eq!(h.graph.rate(), 2.0);
    h.streamer.tick();
    h.streamer.tick();
    assert_eq!(h.graph.advance(STEP), 2 * READ_FRAMES);
    assert_eq!(h.streamer.current_time(), Some(ms(200)));

    assert!(h.streamer.set_rate(1.0));
    h.streamer.tick();
    assert_eq!(h.graph.advance(STEP), READ_FRAMES);
}

/// Frequency of a mono signal from its zero crossings, skipping the first tenth.
fn frequency(samples: &[f32]) -> f32 {
    let body = &samples[samples.len() / 10..];
    let crossings = body
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count();
    crossings as f32 * RATE as f32 / body.len() as f32 / 2.0
}

#[test]
fn time_pitch_stage_changes_tempo_and_keeps_media_time() {
    let time_pitch = TimePitch::new();
    time_pitch.set_rate(2.0);
    let chain = ProcessingChain::new().with_stage("time-pitch", time_pitch.clone());
    let source = MemorySource::new(AudioFixture::sine_wav(440.0, 2.0, RATE, 1));
    let h = Harness::with(source, settings(), chain);
    h.load();
    h.wait_downloaded();
    h.streamer.play();

    // Each step plays everything scheduled: one read of media, about half as much output.
    h.run_until(6, |_| false);
    h.streamer.tick();
    let now = h.streamer.current_time().unwrap();
    let rendered = h.graph.render_time().unwrap();
    assert!(now > ms(595) && now < ms(605), "media time {now:?}");
    assert!(rendered < ms(350), "rendered {rendered:?}");

    assert!(h.run_until(40, |s| s.state() == PlaybackState::Stopped));
    let out = h.graph.take_output();
    let expected = RATE as f32;
    assert!(
        (out.len() as f32 - expected).abs() < expected * 0.1,
        "output frames {}",
        out.len()
    );
    assert!((frequency(&out) - 440.0).abs() < 22.0, "pitch {}", frequency(&out));
}

#[test]
fn time_pitch_stage_shifts_pitch_at_the_same_tempo() {
    let time_pitch = TimePitch::new();
    let chain = ProcessingChain::new().with_stage("time-pitch", time_pitch.clone());
    let source = MemorySource::new(AudioFixture::sine_wav(440.0, 1.0, RATE, 1));
    let h = Harness::with(source, settings(), chain);
    h.load();
    h.wait_downloaded();
    time_pitch.set_pitch(1_200.0);
    h.streamer.play();

    assert!(h.run_until(40, |s| s.state() == PlaybackState::Stopped));
    let out = h.graph.take_output();
    let expected = RATE as f32;
    assert!(
        (out.len() as f32 - expected).abs() < expected * 0.1,
        "output frames {}",
        out.len()
    );
    assert!((frequency(&out) - 880.0).abs() < 44.0, "pitch {}", frequency(&out));
}
