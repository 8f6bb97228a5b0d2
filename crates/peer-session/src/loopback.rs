//! `LoopbackNetwork` - in-memory peer transport fabric.
//!
//! Every endpoint is a [`LoopbackTransport`] implementing [`PeerTransport`].
//! The network actor assigns identities, routes offers to callees, and on
//! answer delivers a stream to each side carrying the other side's track
//! kinds. Closing a call notifies the remote side; destroying an endpoint
//! closes all of its calls.
//!
//! [`SimulatedDevices`] stands in for camera and screen capture.

use crate::actors::metrics::{ActorType, MailboxMonitor};
use crate::actors::CoordinatorHandle;
use crate::errors::{MediaError, TransportError};
use crate::media::{MediaStreamHandle, SourceKind, TrackKind};
use crate::ports::{CallOffer, MediaDevices, PeerTransport, TransportEvent};

use async_trait::async_trait;
use common::types::{CallId, ParticipantId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default network mailbox capacity.
pub const LOOPBACK_CHANNEL_BUFFER: usize = 1024;

#[derive(Debug)]
enum LoopbackMessage {
    Attach {
        endpoint: ParticipantId,
        handle: CoordinatorHandle,
        respond_to: oneshot::Sender<()>,
    },
    PlaceCall {
        call: CallId,
        caller: ParticipantId,
        callee: ParticipantId,
        kinds: Vec<TrackKind>,
    },
    Answer {
        call: CallId,
        kinds: Vec<TrackKind>,
    },
    Close {
        call: CallId,
        by: ParticipantId,
    },
    Destroy {
        endpoint: ParticipantId,
    },
    ActiveCalls {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Handle to a `LoopbackNetwork`.
#[derive(Clone)]
pub struct LoopbackNetworkHandle {
    sender: mpsc::Sender<LoopbackMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl LoopbackNetworkHandle {
    /// Create the transport endpoint for `id`.
    #[must_use]
    pub fn endpoint(&self, id: ParticipantId) -> LoopbackTransport {
        LoopbackTransport {
            local: id,
            sender: self.sender.clone(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// Route events for `endpoint` to `coordinator` and announce its identity.
    pub async fn attach(
        &self,
        endpoint: &LoopbackTransport,
        coordinator: CoordinatorHandle,
    ) -> Result<(), TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LoopbackMessage::Attach {
                endpoint: endpoint.local.clone(),
                handle: coordinator,
                respond_to: tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)
    }

    /// Number of calls placed and not yet closed.
    pub async fn active_calls(&self) -> Result<usize, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LoopbackMessage::ActiveCalls { respond_to: tx })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// One client's endpoint on the loopback network.
pub struct LoopbackTransport {
    local: ParticipantId,
    sender: mpsc::Sender<LoopbackMessage>,
    mailbox: Arc<MailboxMonitor>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn local_id(&self) -> &ParticipantId {
        &self.local
    }

    fn post(&self, message: LoopbackMessage) -> Result<(), TransportError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.mailbox.record_drop();
                TransportError::Closed
            }
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

impl PeerTransport for LoopbackTransport {
    fn place_call(
        &self,
        peer: &ParticipantId,
        stream: &MediaStreamHandle,
    ) -> Result<CallId, TransportError> {
        let call = CallId::new();
        self.post(LoopbackMessage::PlaceCall {
            call,
            caller: self.local.clone(),
            callee: peer.clone(),
            kinds: stream.track_kinds(),
        })?;
        Ok(call)
    }

    fn answer(&self, offer: &CallOffer, stream: &MediaStreamHandle) -> Result<(), TransportError> {
        self.post(LoopbackMessage::Answer {
            call: offer.call_id,
            kinds: stream.track_kinds(),
        })
    }

    fn close(&self, call: CallId) {
        let _ = self.post(LoopbackMessage::Close {
            call,
            by: self.local.clone(),
        });
    }

    fn destroy(&self) {
        let _ = self.post(LoopbackMessage::Destroy {
            endpoint: self.local.clone(),
        });
    }
}

struct LoopbackCall {
    caller: ParticipantId,
    callee: ParticipantId,
    caller_kinds: Vec<TrackKind>,
}

impl LoopbackCall {
    fn other_side(&self, endpoint: &ParticipantId) -> &ParticipantId {
        if *endpoint == self.caller {
            &self.callee
        } else {
            &self.caller
        }
    }
}

/// The `LoopbackNetwork` actor.
pub struct LoopbackNetwork {
    receiver: mpsc::Receiver<LoopbackMessage>,
    cancel_token: CancellationToken,
    endpoints: HashMap<ParticipantId, CoordinatorHandle>,
    calls: HashMap<CallId, LoopbackCall>,
    mailbox: Arc<MailboxMonitor>,
}

impl LoopbackNetwork {
    /// Spawn a network.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(cancel_token: CancellationToken) -> (LoopbackNetworkHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(LOOPBACK_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Loopback, "loopback"));

        let network = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            endpoints: HashMap::new(),
            calls: HashMap::new(),
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(network.run());

        let handle = LoopbackNetworkHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "peer_session.loopback")]
    async fn run(mut self) {
        info!(target: "peer_session.loopback", "LoopbackNetwork started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,

                msg = self.receiver.recv() => {
                    let Some(message) = msg else { break };
                    self.mailbox.record_enqueue(self.receiver.len());
                    self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                }
            }
        }

        info!(
            target: "peer_session.loopback",
            open_calls = self.calls.len(),
            "LoopbackNetwork stopped"
        );
    }

    async fn handle_message(&mut self, message: LoopbackMessage) {
        match message {
            LoopbackMessage::Attach {
                endpoint,
                handle,
                respond_to,
            } => {
                self.deliver_to(&handle, TransportEvent::IdentityReady(endpoint.clone()))
                    .await;
                self.endpoints.insert(endpoint, handle);
                let _ = respond_to.send(());
            }
            LoopbackMessage::PlaceCall {
                call,
                caller,
                callee,
                kinds,
            } => {
                if self.endpoints.contains_key(&callee) {
                    debug!(
                        target: "peer_session.loopback",
                        caller = %caller,
                        callee = %callee,
                        call_id = %call,
                        "Routing call offer"
                    );
                    self.deliver(
                        &callee,
                        TransportEvent::CallOffer(CallOffer {
                            call_id: call,
                            peer_id: caller.clone(),
                        }),
                    )
                    .await;
                    self.calls.insert(
                        call,
                        LoopbackCall {
                            caller,
                            callee,
                            caller_kinds: kinds,
                        },
                    );
                } else {
                    debug!(
                        target: "peer_session.loopback",
                        callee = %callee,
                        "Callee unknown, closing call"
                    );
                    self.deliver(
                        &caller,
                        TransportEvent::Closed {
                            peer_id: callee,
                            call_id: call,
                        },
                    )
                    .await;
                }
            }
            LoopbackMessage::Answer { call, kinds } => {
                let Some(entry) = self.calls.get(&call) else {
                    debug!(target: "peer_session.loopback", call_id = %call, "Answer for a closed call");
                    return;
                };
                let (caller, callee) = (entry.caller.clone(), entry.callee.clone());
                let to_caller = MediaStreamHandle::new(&kinds);
                let to_callee = MediaStreamHandle::new(&entry.caller_kinds);

                self.deliver(
                    &caller,
                    TransportEvent::Stream {
                        peer_id: callee.clone(),
                        call_id: call,
                        stream: to_caller,
                    },
                )
                .await;
                self.deliver(
                    &callee,
                    TransportEvent::Stream {
                        peer_id: caller,
                        call_id: call,
                        stream: to_callee,
                    },
                )
                .await;
            }
            LoopbackMessage::Close { call, by } => {
                if let Some(entry) = self.calls.remove(&call) {
                    let other = entry.other_side(&by).clone();
                    self.deliver(
                        &other,
                        TransportEvent::Closed {
                            peer_id: by,
                            call_id: call,
                        },
                    )
                    .await;
                }
            }
            LoopbackMessage::Destroy { endpoint } => {
                self.endpoints.remove(&endpoint);
                let owned: Vec<CallId> = self
                    .calls
                    .iter()
                    .filter(|(_, c)| c.caller == endpoint || c.callee == endpoint)
                    .map(|(id, _)| *id)
                    .collect();
                for call in owned {
                    if let Some(entry) = self.calls.remove(&call) {
                        let other = entry.other_side(&endpoint).clone();
                        self.deliver(
                            &other,
                            TransportEvent::Closed {
                                peer_id: endpoint.clone(),
                                call_id: call,
                            },
                        )
                        .await;
                    }
                }
                debug!(target: "peer_session.loopback", endpoint = %endpoint, "Endpoint destroyed");
            }
            LoopbackMessage::ActiveCalls { respond_to } => {
                let _ = respond_to.send(self.calls.len());
            }
        }
    }

    async fn deliver(&self, endpoint: &ParticipantId, event: TransportEvent) {
        if let Some(handle) = self.endpoints.get(endpoint) {
            self.deliver_to(handle, event).await;
        }
    }

    async fn deliver_to(&self, handle: &CoordinatorHandle, event: TransportEvent) {
        if handle.transport_event(event).await.is_err() {
            debug!(
                target: "peer_session.loopback",
                "Endpoint coordinator already stopped"
            );
        }
    }
}

/// Simulated capture devices.
///
/// Camera streams carry audio and video. Screen streams carry video, plus
/// audio when enabled. Either source can be configured to be refused.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevices {
    screen_audio: bool,
    denied: Option<SourceKind>,
    delay: Duration,
}

impl SimulatedDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Include an audio track in screen captures.
    #[must_use]
    pub fn with_screen_audio(mut self, enabled: bool) -> Self {
        self.screen_audio = enabled;
        self
    }

    /// Refuse every acquisition of `kind`.
    #[must_use]
    pub fn deny(mut self, kind: SourceKind) -> Self {
        self.denied = Some(kind);
        self
    }

    /// Wait before resolving each acquisition.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The stream captured at startup.
    #[must_use]
    pub fn camera_stream() -> MediaStreamHandle {
        MediaStreamHandle::new(&[TrackKind::Audio, TrackKind::Video])
    }
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn acquire(&self, kind: SourceKind) -> Result<MediaStreamHandle, MediaError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.denied == Some(kind) {
            return Err(MediaError::AccessDenied(format!(
                "{} capture refused",
                kind.as_str()
            )));
        }

        Ok(match kind {
            SourceKind::Camera => Self::camera_stream(),
            SourceKind::Screen if self.screen_audio => {
                MediaStreamHandle::new(&[TrackKind::Audio, TrackKind::Video])
            }
            SourceKind::Screen => MediaStreamHandle::new(&[TrackKind::Video]),
        })
    }
}
