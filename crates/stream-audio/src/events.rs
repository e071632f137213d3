//! Observer interface of the streamer.
//!
//! Callbacks run on a dedicated notification thread, in the order the driver produced
//! them, never while the driver's lock is held. An observer may call back into the
//! [`Streamer`](crate::Streamer).

use std::time::Duration;

use crossbeam_channel::Sender;
use url::Url;

use crate::download::DownloadError;
use crate::error::StreamError;

/// Playback phase, orthogonal to whether the download is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
    /// Playing, but waiting for more parsed data.
    Buffering,
}

/// Receives streamer notifications. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait StreamerObserver: Send + Sync {
    fn on_download_failed(&self, error: &DownloadError, url: &Url) {}
    fn on_download_progress(&self, progress: f32, url: &Url) {}
    fn on_state_changed(&self, state: PlaybackState) {}
    fn on_current_time_updated(&self, time: Duration) {}
    fn on_duration_updated(&self, duration: Duration) {}
    fn on_playback_failed(&self, error: &StreamError, url: &Url) {}
}

impl StreamerObserver for () {}

/// Notifications as values, for channel-based consumers.
#[derive(Debug, Clone)]
pub enum StreamerEvent {
    DownloadFailed { error: DownloadError, url: Url },
    DownloadProgress { progress: f32, url: Url },
    StateChanged(PlaybackState),
    CurrentTimeUpdated(Duration),
    DurationUpdated(Duration),
    PlaybackFailed { error: StreamError, url: Url },
}

impl StreamerEvent {
    pub(crate) fn dispatch(&self, observer: &dyn StreamerObserver) {
        match self {
            StreamerEvent::DownloadFailed { error, url } => observer.on_download_failed(error, url),
            StreamerEvent::DownloadProgress { progress, url } => {
                observer.on_download_progress(*progress, url)
            }
            StreamerEvent::StateChanged(state) => observer.on_state_changed(*state),
            StreamerEvent::CurrentTimeUpdated(time) => observer.on_current_time_updated(*time),
            StreamerEvent::DurationUpdated(duration) => observer.on_duration_updated(*duration),
            StreamerEvent::PlaybackFailed { error, url } => observer.on_playback_failed(error, url),
        }
    }
}

/// Forwards every notification into a channel. Send errors are ignored.
impl StreamerObserver for Sender<StreamerEvent> {
    fn on_download_failed(&self, error: &DownloadError, url: &Url) {
        let _ = self.send(StreamerEvent::DownloadFailed {
            error: error.clone(),
            url: url.clone(),
        });
    }

    fn on_download_progress(&self, progress: f32, url: &Url) {
        let _ = self.send(StreamerEvent::DownloadProgress {
            progress,
            url: url.clone(),
        });
    }

    fn on_state_changed(&self, state: PlaybackState) {
        let _ = self.send(StreamerEvent::StateChanged(state));
    }

    fn on_current_time_updated(&self, time: Duration) {
        let _ = self.send(StreamerEvent::CurrentTimeUpdated(time));
    }

    fn on_duration_updated(&self, duration: Duration) {
        let _ = self.send(StreamerEvent::DurationUpdated(duration));
    }

    fn on_playback_failed(&self, error: &StreamError, url: &Url) {
        let _ = self.send(StreamerEvent::PlaybackFailed {
            error: error.clone(),
            url: url.clone(),
        });
    }
}
