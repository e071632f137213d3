//! HTTP downloader against the local fixture server.

mod audio_fixture;
mod setup;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use rstest::rstest;
use stream_audio::{
    AudioSpec, DownloadError, DownloadEvent, DownloadSink, DownloadState, Downloader,
    DownloaderFactory, MemoryGraph, PlaybackState, Streamer, StreamerEvent, StreamerSettings,
};
use stream_audio_http::{HttpDownloaderFactory, HttpSettings};
use url::Url;

use audio_fixture::{AudioFixture, AudioServer};
use setup::{wait_until, SERVER_RT};

fn factory(settings: HttpSettings) -> HttpDownloaderFactory {
    HttpDownloaderFactory::with_handle(settings, SERVER_RT.handle().clone()).unwrap()
}

fn fast_retries() -> HttpSettings {
    HttpSettings::new().with_retry_delays(Duration::from_millis(10), Duration::from_millis(50))
}

struct Collected {
    expected: Option<u64>,
    body: Vec<u8>,
    last_progress: f32,
    error: Option<DownloadError>,
}

fn collect(rx: &Receiver<DownloadEvent>) -> Collected {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut out = Collected {
        expected: None,
        body: Vec::new(),
        last_progress: 0.0,
        error: None,
    };
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait).expect("download stalled") {
            DownloadEvent::Header { expected_length } => out.expected = expected_length,
            DownloadEvent::Data { chunk, progress } => {
                out.body.extend_from_slice(&chunk);
                out.last_progress = progress;
            }
            DownloadEvent::Complete(error) => {
                out.error = error;
                return out;
            }
        }
    }
}

#[test]
fn downloads_the_whole_body() {
    setup::init_tracing();
    let wav = AudioFixture::sine_wav(440.0, 1.0, 44_100, 2);
    let mut server = AudioServer::new().with_file("audio.wav", wav.clone());
    let base = server.start();

    let (sink, rx) = DownloadSink::channel();
    let mut downloader = factory(HttpSettings::default()).create(&base.join("audio.wav").unwrap(), sink);
    assert_eq!(downloader.state(), DownloadState::NotStarted);
    downloader.start();

    let got = collect(&rx);
    assert!(got.error.is_none());
    assert_eq!(got.expected, Some(wav.len() as u64));
    assert_eq!(got.body, wav);
    assert_eq!(got.last_progress, 1.0);
    assert!(wait_until(Duration::from_secs(1), || {
        downloader.state() == DownloadState::Completed
    }));
}

#[test]
fn resumes_with_range_after_a_broken_connection() {
    setup::init_tracing();
    let mp3 = AudioFixture::silent_mp3(100, false);
    let mut server = AudioServer::new().with_flaky_file("flaky.mp3", mp3.clone());
    let base = server.start();

    let (sink, rx) = DownloadSink::channel();
    let mut downloader = factory(fast_retries()).create(&base.join("flaky.mp3").unwrap(), sink);
    downloader.start();

    let got = collect(&rx);
    assert!(got.error.is_none(), "error: {:?}", got.error);
    assert_eq!(got.body, mp3);

    let requests = server.requests();
    assert!(requests.len() >= 2);
    assert!(requests[0].range.is_none());
    assert!(requests[1..]
        .iter()
        .all(|r| r.range.as_deref().is_some_and(|r| r.starts_with("bytes="))));
}

#[rstest]
#[case("missing.wav", 404)]
fn client_errors_are_not_retried(#[case] path: &str, #[case] status: u16) {
    setup::init_tracing();
    let mut server = AudioServer::new();
    let base = server.start();

    let (sink, rx) = DownloadSink::channel();
    let mut downloader = factory(fast_retries()).create(&base.join(path).unwrap(), sink);
    downloader.start();

    let got = collect(&rx);
    assert!(matches!(got.error, Some(DownloadError::Http { status: s, .. }) if s == status));
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn stop_cancels_a_paused_download() {
    setup::init_tracing();
    let mut server = AudioServer::new().with_file("audio.wav", vec![0u8; 1 << 20]);
    let base = server.start();

    let (sink, rx) = DownloadSink::channel();
    let mut downloader = factory(HttpSettings::default()).create(&base.join("audio.wav").unwrap(), sink);
    downloader.start();
    downloader.pause();
    assert_eq!(downloader.state(), DownloadState::Paused);
    downloader.stop();
    downloader.stop();

    let got = collect(&rx);
    assert!(got.error.is_some_and(|e| e.is_cancelled()));
    assert_eq!(downloader.state(), DownloadState::Stopped);
}

#[test]
fn streams_and_plays_over_http() {
    setup::init_tracing();
    let wav = AudioFixture::sine_wav(440.0, 0.5, 8_000, 1);
    let mut server = AudioServer::new().with_file("tone.wav", wav);
    let base = server.start();

    let spec = AudioSpec::new(8_000, 1);
    let graph = MemoryGraph::new(spec);
    let (tx, events) = unbounded();
    let streamer = Streamer::builder(graph.clone(), factory(HttpSettings::default()))
        .settings(
            StreamerSettings::new()
                .with_output_spec(spec)
                .with_read_buffer_size(400)
                .with_fade_duration(Duration::ZERO),
        )
        .observer(Arc::new(tx))
        .manual_ticks()
        .build()
        .unwrap();

    let url: Url = base.join("tone.wav").unwrap();
    streamer.set_url(url.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(10), || !streamer.is_download_active()));
    assert_eq!(streamer.duration(), Some(Duration::from_millis(500)));

    streamer.play();
    for _ in 0..40 {
        streamer.tick();
        if streamer.state() == PlaybackState::Stopped {
            break;
        }
        graph.advance(Duration::from_millis(50));
    }
    assert_eq!(streamer.state(), PlaybackState::Stopped);
    let out = graph.take_output();
    assert_eq!(out.len(), 3_999);
    assert!(AudioFixture::verify_samples_not_silence(&out));

    streamer.flush_notifications();
    let events: Vec<_> = events.try_iter().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        StreamerEvent::DownloadProgress { progress, url: u } if *progress == 1.0 && *u == url
    )));
}
