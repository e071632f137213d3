//! Background threads of the streamer: per-session parse worker, scheduler timer and
//! observer notifier.

use std::io;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, debug_span, error};

use super::driver::Notice;
use super::Shared;
use crate::download::DownloadEvent;
use crate::events::StreamerObserver;
use crate::parser::Parser;

/// Parse the chunks of one session in arrival order, on a thread of its own.
pub(super) fn spawn_parse_worker(
    shared: Weak<Shared>,
    session: u64,
    mut parser: Parser,
    events: Receiver<DownloadEvent>,
) {
    let spawned = thread::Builder::new()
        .name(format!("stream-audio-parse-{session}"))
        .spawn(move || {
            let _span = debug_span!("parse", session).entered();
            for event in events {
                match event {
                    DownloadEvent::Header { expected_length } => {
                        parser.set_content_length(expected_length);
                    }
                    DownloadEvent::Data { chunk, progress } => {
                        let result = parser.parse(&chunk);
                        let failed = result.is_err();
                        let Some(shared) = shared.upgrade() else {
                            return;
                        };
                        shared.with_core(|core| core.on_parsed(session, result, progress));
                        if failed {
                            return;
                        }
                    }
                    DownloadEvent::Complete(error) => {
                        let finished = parser.finish();
                        if let Some(shared) = shared.upgrade() {
                            shared.with_core(|core| {
                                core.on_download_complete(session, error, finished)
                            });
                        }
                        return;
                    }
                }
            }
            debug!(bytes = parser.bytes_parsed(), "parse worker: downloader went away");
        });
    if let Err(e) = spawned {
        error!(session, error = %e, "failed to spawn parse worker");
    }
}

/// Timer thread calling [`Shared::tick`] until shut down.
pub(super) struct Scheduler {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub(super) fn spawn(shared: Weak<Shared>, interval: Duration) -> io::Result<Self> {
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("stream-audio-scheduler".into())
            .spawn(move || {
                debug!(?interval, "scheduler started");
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let Some(shared) = shared.upgrade() else { break };
                            shared.with_core(|core| core.tick());
                        }
                    }
                }
                debug!("scheduler stopped");
            })?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Deliver notices to the observer in order. Ends when the driver is dropped.
pub(super) fn spawn_notifier(
    observer: Arc<dyn StreamerObserver>,
    notices: Receiver<Notice>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("stream-audio-notify".into())
        .spawn(move || {
            for notice in notices {
                match notice {
                    Notice::Event(event) => event.dispatch(observer.as_ref()),
                    Notice::Barrier(done) => {
                        let _ = done.send(());
                    }
                }
            }
        })?;
    Ok(())
}
