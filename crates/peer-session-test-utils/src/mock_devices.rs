//! Capture devices resolved by the test.
//!
//! Every `acquire` call parks until the test takes it off the
//! [`AcquisitionQueue`] and grants or denies it. This makes it possible to
//! resolve acquisitions out of order, or after a newer request.
//!
//! # Example
//!
//! ```rust,ignore
//! let (devices, mut queue) = MockMediaDevices::new();
//! // ... coordinator requests a screen share ...
//! let request = queue.next_request().await;
//! assert_eq!(request.kind, SourceKind::Screen);
//! request.grant(screen_stream());
//! ```

use async_trait::async_trait;
use peer_session::errors::MediaError;
use peer_session::media::{MediaStreamHandle, SourceKind};
use peer_session::ports::MediaDevices;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How long `next_request` waits before failing the test.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One parked acquisition.
#[derive(Debug)]
pub struct PendingAcquisition {
    pub kind: SourceKind,
    reply: oneshot::Sender<Result<MediaStreamHandle, MediaError>>,
}

impl PendingAcquisition {
    /// Resolve with `stream`. Returns `false` if the acquiring task was
    /// already cancelled.
    pub fn grant(self, stream: MediaStreamHandle) -> bool {
        self.reply.send(Ok(stream)).is_ok()
    }

    /// Resolve with `error`.
    pub fn deny(self, error: MediaError) -> bool {
        self.reply.send(Err(error)).is_ok()
    }

    /// Whether the acquiring task has gone away.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Wait for the acquiring task to go away.
    ///
    /// # Panics
    ///
    /// If it is still waiting after the request timeout.
    pub async fn wait_abandoned(&mut self) {
        tokio::time::timeout(REQUEST_TIMEOUT, self.reply.closed())
            .await
            .expect("acquisition was never abandoned");
    }
}

/// `MediaDevices` whose acquisitions are resolved by the test.
#[derive(Debug, Clone)]
pub struct MockMediaDevices {
    requests: mpsc::UnboundedSender<PendingAcquisition>,
}

/// The test's side of `MockMediaDevices`.
#[derive(Debug)]
pub struct AcquisitionQueue {
    requests: mpsc::UnboundedReceiver<PendingAcquisition>,
}

impl MockMediaDevices {
    #[must_use]
    pub fn new() -> (Self, AcquisitionQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { requests: tx }, AcquisitionQueue { requests: rx })
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn acquire(&self, kind: SourceKind) -> Result<MediaStreamHandle, MediaError> {
        let (tx, rx) = oneshot::channel();
        if self
            .requests
            .send(PendingAcquisition { kind, reply: tx })
            .is_err()
        {
            return Err(MediaError::Unavailable("no devices".to_string()));
        }
        rx.await
            .unwrap_or_else(|_| Err(MediaError::Unavailable("request dropped".to_string())))
    }
}

impl AcquisitionQueue {
    /// Wait for the next acquisition request.
    ///
    /// # Panics
    ///
    /// If no request arrives in time.
    pub async fn next_request(&mut self) -> PendingAcquisition {
        tokio::time::timeout(REQUEST_TIMEOUT, self.requests.recv())
            .await
            .expect("timed out waiting for an acquisition request")
            .expect("MockMediaDevices dropped")
    }

    /// The next request, if one is already queued.
    pub fn try_next(&mut self) -> Option<PendingAcquisition> {
        self.requests.try_recv().ok()
    }
}
