//! Stream a URL to the default output device, optionally with a pitch shift (cents) and a
//! tempo change.
//!
//! ```text
//! cargo run -p stream-audio-demos --example play_url -- https://example.com/song.mp3 -300 1.25
//! ```

use std::error::Error;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use stream_audio::{
    AudioSpec, PlaybackState, ProcessingChain, RodioGraph, Streamer, StreamerEvent,
    StreamerSettings, TimePitch,
};
use stream_audio_http::{HttpDownloaderFactory, HttpSettings};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use url::Url;

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("stream_audio=info".parse()?)
                .add_directive(LevelFilter::WARN.into()),
        )
        .with_line_number(true)
        .with_file(true)
        .init();

    let mut args = std::env::args().skip(1);
    let url: Url = args
        .next()
        .unwrap_or_else(|| "https://www.soundhelix.com/examples/mp3/SoundHelix-Song-1.mp3".into())
        .parse()?;
    let time_pitch = TimePitch::new();
    if let Some(cents) = args.next() {
        time_pitch.set_pitch(cents.parse()?);
    }
    if let Some(rate) = args.next() {
        time_pitch.set_rate(rate.parse()?);
    }
    info!(pitch = time_pitch.pitch(), rate = time_pitch.rate(), "time-pitch");

    let spec = AudioSpec::default();
    let graph = RodioGraph::open_default(spec)?;
    let factory = HttpDownloaderFactory::new(HttpSettings::default())?;
    let (tx, events) = unbounded();
    let streamer = Streamer::builder(graph, factory)
        .settings(StreamerSettings::new().with_output_spec(spec))
        .processing_chain(ProcessingChain::new().with_stage("time-pitch", time_pitch))
        .observer(Arc::new(tx))
        .build()?;

    streamer.set_url(url)?;
    streamer.play();

    for event in events {
        match event {
            StreamerEvent::DurationUpdated(duration) => info!(?duration, "duration"),
            StreamerEvent::StateChanged(PlaybackState::Stopped) => break,
            StreamerEvent::StateChanged(state) => info!(?state, "state"),
            StreamerEvent::DownloadFailed { error, .. } => return Err(error.into()),
            StreamerEvent::PlaybackFailed { error, .. } => return Err(error.into()),
            _ => {}
        }
    }
    Ok(())
}
