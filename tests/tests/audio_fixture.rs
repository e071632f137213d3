//! Audio fixtures: deterministic WAV, MP3 and ADTS generators plus a local HTTP server.
//!
//! Generated data keeps the tests free of binary assets. MP3 frames are silent MPEG-1
//! Layer III frames (zero side info), which decoders accept and turn into silence.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use url::Url;

use crate::setup::SERVER_RT;

/// Header of a 128 kbit/s, 44.1 kHz, stereo MPEG-1 Layer III frame without CRC or padding.
pub const MP3_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
pub const MP3_FRAME_LEN: usize = 417;
pub const MP3_FRAMES_PER_PACKET: u64 = 1152;

pub struct AudioFixture;

impl AudioFixture {
    /// 16-bit PCM WAV with a sine wave on every channel.
    pub fn sine_wav(freq_hz: f32, duration_secs: f32, sample_rate: u32, channels: u16) -> Vec<u8> {
        let frames = (sample_rate as f32 * duration_secs) as usize;
        Self::wav_from_fn(frames, sample_rate, channels, |i| {
            let t = i as f32 / sample_rate as f32;
            ((2.0 * std::f32::consts::PI * freq_hz * t).sin() * i16::MAX as f32) as i16
        })
    }

    /// 16-bit PCM WAV holding the same sample value throughout.
    pub fn constant_wav(value: i16, frames: usize, sample_rate: u32, channels: u16) -> Vec<u8> {
        Self::wav_from_fn(frames, sample_rate, channels, |_| value)
    }

    fn wav_from_fn(
        frames: usize,
        sample_rate: u32,
        channels: u16,
        sample: impl Fn(usize) -> i16,
    ) -> Vec<u8> {
        let data_size = frames * usize::from(channels) * 2;
        let mut wav = Vec::with_capacity(44 + data_size);

        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_size as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");

        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&channels.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
        wav.extend_from_slice(&(channels * 2).to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());

        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data_size as u32).to_le_bytes());
        for i in 0..frames {
            let value = sample(i).to_le_bytes();
            for _ in 0..channels {
                wav.extend_from_slice(&value);
            }
        }
        wav
    }

    /// `frames` silent MP3 frames, optionally preceded by a Xing frame announcing the count.
    pub fn silent_mp3(frames: usize, xing: bool) -> Vec<u8> {
        let mut mp3 = Vec::with_capacity((frames + 1) * MP3_FRAME_LEN);
        if xing {
            let mut frame = vec![0u8; MP3_FRAME_LEN];
            frame[..4].copy_from_slice(&MP3_HEADER);
            // Header plus 32 bytes of stereo side info.
            frame[36..40].copy_from_slice(b"Xing");
            frame[40..44].copy_from_slice(&1u32.to_be_bytes());
            frame[44..48].copy_from_slice(&(frames as u32).to_be_bytes());
            mp3.extend_from_slice(&frame);
        }
        for _ in 0..frames {
            mp3.extend_from_slice(&MP3_HEADER);
            mp3.resize(mp3.len() + MP3_FRAME_LEN - 4, 0);
        }
        mp3
    }

    /// AAC-LC ADTS stream, 44.1 kHz stereo, with `payload` zero bytes per frame.
    pub fn adts_stream(frames: usize, payload: usize) -> Vec<u8> {
        let frame_len = 7 + payload;
        let header = [
            0xFF,
            0xF1,
            0x50,
            0x80 | ((frame_len >> 11) & 0x03) as u8,
            ((frame_len >> 3) & 0xFF) as u8,
            (((frame_len & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ];
        let mut out = Vec::with_capacity(frames * frame_len);
        for _ in 0..frames {
            out.extend_from_slice(&header);
            out.resize(out.len() + payload, 0);
        }
        out
    }

    /// At least 10% of samples above a small threshold.
    pub fn verify_samples_not_silence(samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }
        let non_silent = samples.iter().filter(|s| s.abs() > 0.01).count();
        non_silent > samples.len() / 10
    }
}

/// One request seen by [`AudioServer`].
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub path: String,
    pub range: Option<String>,
}

struct ServerState {
    files: HashMap<String, Bytes>,
    /// Paths whose first response breaks off halfway through the body.
    flaky: Mutex<HashSet<String>>,
    log: Mutex<Vec<RequestLog>>,
}

/// Serves fixture files with `Range` support. Unknown paths answer 404.
pub struct AudioServer {
    files: HashMap<String, Bytes>,
    flaky: HashSet<String>,
    state: Option<Arc<ServerState>>,
}

impl AudioServer {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            flaky: HashSet::new(),
            state: None,
        }
    }

    pub fn with_file(mut self, path: &str, data: impl Into<Bytes>) -> Self {
        self.files.insert(path.to_string(), data.into());
        self
    }

    /// Serve `data` at `path`; the first request gets half of it, then the connection fails.
    pub fn with_flaky_file(mut self, path: &str, data: impl Into<Bytes>) -> Self {
        self.flaky.insert(path.to_string());
        self.with_file(path, data)
    }

    /// Start serving on the shared server runtime. Returns the base URL (ending with `/`).
    pub fn start(&mut self) -> Url {
        let state = Arc::new(ServerState {
            files: std::mem::take(&mut self.files),
            flaky: Mutex::new(std::mem::take(&mut self.flaky)),
            log: Mutex::new(Vec::new()),
        });
        self.state = Some(Arc::clone(&state));
        let app = Router::new().fallback(serve).with_state(state);

        let listener =
            std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind fixture server");
        listener
            .set_nonblocking(true)
            .expect("failed to set nonblocking on fixture listener");
        let addr = listener.local_addr().unwrap();

        SERVER_RT.spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener)
                .expect("failed to convert fixture listener");
            axum::serve(listener, app).await.unwrap();
        });

        Url::parse(&format!("http://{addr}/")).expect("failed to build base url")
    }

    pub fn requests(&self) -> Vec<RequestLog> {
        self.state
            .as_ref()
            .map(|s| s.log.lock().clone())
            .unwrap_or_default()
    }
}

async fn serve(State(state): State<Arc<ServerState>>, uri: Uri, headers: HeaderMap) -> Response {
    let path = uri.path().trim_start_matches('/').to_string();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.log.lock().push(RequestLog {
        path: path.clone(),
        range: range.clone(),
    });

    let Some(data) = state.files.get(&path).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if state.flaky.lock().remove(&path) {
        let half = data.slice(..data.len() / 2);
        // Pause before failing so the first half is flushed to the client.
        let cut = futures_util::stream::once(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "fixture cut"))
        });
        let body = futures_util::stream::once(async move { Ok(half) }).chain(cut);
        return (StatusCode::OK, Body::from_stream(body)).into_response();
    }

    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|r| r.parse::<usize>().ok());
    match start {
        Some(start) if start < data.len() => {
            let content_range = format!("bytes {}-{}/{}", start, data.len() - 1, data.len());
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, content_range)],
                data.slice(start..),
            )
                .into_response()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => (StatusCode::OK, data).into_response(),
    }
}
