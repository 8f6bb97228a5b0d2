//! Polling helpers for timing-dependent tests.
//!
//! Multi-actor tests (hub, loopback network, several coordinators) settle
//! over a number of mailbox hops. These helpers retry a condition with
//! exponential backoff instead of sleeping for a fixed time.

use peer_session::media::MediaStreamHandle;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Default timeout for a mesh to settle.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

const INITIAL_DELAY: Duration = Duration::from_millis(1);
const MAX_DELAY: Duration = Duration::from_millis(100);

/// Wait until `condition` returns true, or fail after `timeout`.
///
/// Backoff starts at 1ms and doubles up to 100ms.
pub async fn assert_eventually<F, Fut>(timeout: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!("Condition not met within {timeout:?}"));
        }

        sleep(delay.min(timeout.saturating_sub(elapsed))).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// [`assert_eventually`] with [`SETTLE_TIMEOUT`], panicking with `what` on
/// timeout.
///
/// # Panics
///
/// If the condition is not met in time.
pub async fn eventually<F, Fut>(what: &str, condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if let Err(e) = assert_eventually(SETTLE_TIMEOUT, condition).await {
        panic!("{what}: {e}");
    }
}

/// Wait until `stream` has been stopped.
///
/// # Panics
///
/// If it is still live after [`SETTLE_TIMEOUT`].
pub async fn wait_until_stopped(stream: &MediaStreamHandle) {
    let stream = stream.clone();
    eventually("stream stopped", move || {
        let stream = stream.clone();
        async move { !stream.is_live() }
    })
    .await;
}
