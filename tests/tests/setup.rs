//! Shared test infrastructure: tracing, a runtime for fixture servers, polling helpers.

#![allow(dead_code)]

use std::sync::{LazyLock, Once};
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

/// Multi-threaded runtime hosting fixture servers and HTTP downloads, shared by all tests
/// of one binary so servers outlive individual tests.
pub static SERVER_RT: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build server runtime")
});

static TRACING: Once = Once::new();

/// Install a test subscriber once. Filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
