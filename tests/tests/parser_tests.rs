//! Progressive parsing and reading over whole generated files.

mod audio_fixture;
mod setup;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rstest::rstest;
use stream_audio::{
    AudioSpec, FileType, Parser, ParserOptions, Reader, ReaderError, ResamplingQuality,
};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use audio_fixture::{AudioFixture, MP3_FRAMES_PER_PACKET};

fn parse_in_chunks(data: &[u8], chunk: usize) -> Parser {
    let mut parser = Parser::open(ParserOptions::default()).unwrap();
    for piece in data.chunks(chunk) {
        parser.parse(piece).unwrap();
    }
    parser.finish().unwrap();
    parser
}

#[test]
fn ten_second_mp3_in_4k_chunks() {
    setup::init_tracing();
    // 10 s at 44.1 kHz is 441000 frames: 383 frames of 1152.
    let mp3 = AudioFixture::silent_mp3(383, false);
    let parser = parse_in_chunks(&mp3, 4096);
    let stream = parser.stream();

    assert_eq!(stream.file_type(), Some(FileType::Mp3));
    assert!(stream.data_format().is_some());
    assert_eq!(stream.packet_count(), 383);
    let frames = stream.total_packet_count() * MP3_FRAMES_PER_PACKET;
    assert!(frames.abs_diff(441_000) < MP3_FRAMES_PER_PACKET);

    let mut reader =
        Reader::new(stream, AudioSpec::new(44_100, 2), ResamplingQuality::Fast).unwrap();
    for _ in 0..10 {
        let buffer = reader.read(22_050).unwrap();
        assert_eq!(buffer.frames(), 22_050);
    }
}

#[test]
fn xing_header_announces_count_before_the_data() {
    let mp3 = AudioFixture::silent_mp3(383, true);
    let mut parser = Parser::open(ParserOptions::default()).unwrap();
    parser.parse(&mp3[..4096]).unwrap();

    let stream = parser.stream();
    assert_eq!(stream.total_packet_count(), 383);
    let duration = stream.duration().unwrap().as_secs_f64();
    assert!((duration - 10.005).abs() < 0.01, "duration {duration}");
    assert!(stream.packet_count() < 383);

    parser.parse(&mp3[4096..]).unwrap();
    parser.finish().unwrap();
    // The Xing frame itself is not audio.
    assert_eq!(stream.packet_count(), 383);
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(1000)]
#[case(65_536)]
fn counters_only_grow(#[case] chunk: usize) {
    let wav = AudioFixture::sine_wav(440.0, 0.5, 8_000, 1);
    let mut parser = Parser::open(ParserOptions::default()).unwrap();
    let stream = parser.stream();
    let (mut packets, mut total) = (0, 0);
    for piece in wav.chunks(chunk) {
        parser.parse(piece).unwrap();
        assert!(stream.packet_count() >= packets);
        assert!(stream.total_packet_count() >= total);
        packets = stream.packet_count();
        total = stream.total_packet_count();
    }
    parser.finish().unwrap();
    assert_eq!(stream.packet_count(), 4_000);
    assert_eq!(stream.duration(), Some(Duration::from_millis(500)));
}

#[test]
fn adts_frames_become_packets() {
    let aac = AudioFixture::adts_stream(100, 200);
    let parser = parse_in_chunks(&aac, 333);
    let stream = parser.stream();

    assert_eq!(stream.file_type(), Some(FileType::Adts));
    assert_eq!(stream.packet_count(), 100);
    let format = stream.data_format().unwrap();
    assert_eq!(format.sample_rate, 44_100);
    assert_eq!(format.frames_per_packet, 1024);
    assert_eq!(stream.packet(0).unwrap().payload.len(), 200);
    assert!(stream.magic_cookie().is_some());
}

#[test]
fn seek_offsets_round_trip_within_one_packet() {
    let mp3 = AudioFixture::silent_mp3(383, false);
    let stream = parse_in_chunks(&mp3, 4096).stream();
    let duration = stream.duration().unwrap();
    let packet_duration = Duration::from_secs_f64(1152.0 / 44_100.0);

    let mut t = Duration::ZERO;
    while t < duration {
        let frame = stream.frame_offset(t).unwrap();
        let packet = stream.packet_offset(frame).unwrap();
        let back = stream.packet_time(packet).unwrap();
        assert!(back <= t + Duration::from_micros(1));
        assert!(t - back.min(t) < packet_duration, "t={t:?} back={back:?}");
        t += Duration::from_millis(137);
    }
}

#[test]
fn reader_reports_end_at_the_final_packet() {
    let wav = AudioFixture::sine_wav(440.0, 0.25, 8_000, 1);
    let stream = parse_in_chunks(&wav, 512).stream();
    let mut reader = Reader::new(stream, AudioSpec::new(8_000, 1), ResamplingQuality::Fast).unwrap();

    let mut frames = 0;
    loop {
        match reader.read(600) {
            Ok(buffer) => frames += buffer.frames(),
            Err(ReaderError::ReachedEndOfFile) => break,
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
    assert_eq!(frames, 1_999);
    assert!(matches!(reader.read(600), Err(ReaderError::ReachedEndOfFile)));
}

#[test]
fn decoded_wav_is_not_silent() {
    let wav = AudioFixture::sine_wav(440.0, 0.5, 44_100, 2);
    let stream = parse_in_chunks(&wav, 4096).stream();
    let mut reader =
        Reader::new(stream, AudioSpec::new(48_000, 2), ResamplingQuality::High).unwrap();
    let buffer = reader.read(8_192).unwrap();
    assert!(AudioFixture::verify_samples_not_silence(buffer.samples()));
}

/// Levels of the library's events on the current thread.
#[derive(Clone, Default)]
struct LevelRecorder(Arc<Mutex<Vec<Level>>>);

impl<S: Subscriber> Layer<S> for LevelRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target().starts_with("stream_audio") {
            self.0.lock().push(*event.metadata().level());
        }
    }
}

fn recorded_levels(f: impl FnOnce()) -> Vec<Level> {
    let recorder = LevelRecorder::default();
    let subscriber = tracing_subscriber::registry().with(recorder.clone());
    tracing::subscriber::with_default(subscriber, f);
    let levels = recorder.0.lock().clone();
    levels
}

#[test]
fn unfinished_stream_is_logged_quietly() {
    // A download cancelled before any container was seen ends the parse early.
    let levels = recorded_levels(|| {
        let mut parser = Parser::open(ParserOptions::default()).unwrap();
        parser.parse(&[0x00, 0x00]).unwrap();
        assert!(parser.finish().is_err());
    });
    assert!(levels.contains(&Level::DEBUG));
    assert!(levels.iter().all(|l| *l != Level::WARN && *l != Level::ERROR));
}

#[test]
fn rejected_chunk_is_a_warning() {
    let levels = recorded_levels(|| {
        let mut parser = Parser::open(ParserOptions::default()).unwrap();
        assert!(parser.parse(b"OggS\x00\x02\x00\x00\x00\x00\x00\x00").is_err());
    });
    assert!(levels.contains(&Level::WARN));
}
