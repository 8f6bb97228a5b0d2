//! `TestCall` - a coordinator wired to recording mocks.
//!
//! Adapter events are injected by name and handled before the helper
//! returns, so the mocks can be inspected right away. Presentation events
//! can be awaited.

use crate::eventual::eventually;
use crate::fixtures::{camera_stream, pid, room};
use crate::mock_devices::{AcquisitionQueue, MockMediaDevices};
use crate::mock_signaling::MockSignaling;
use crate::mock_transport::MockTransport;

use common::types::{CallId, StreamId};
use peer_session::actors::{CallSnapshot, PresentationEvent};
use peer_session::config::Config;
use peer_session::media::MediaStreamHandle;
use peer_session::ports::{CallOffer, Ports, SignalingEvent, TransportEvent};
use peer_session::{CoordinatorActor, CoordinatorHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `next_event` waits before failing the test.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One coordinator plus its mocks.
pub struct TestCall {
    pub handle: CoordinatorHandle,
    pub signaling: MockSignaling,
    pub transport: MockTransport,
    pub devices: AcquisitionQueue,
    /// The startup camera stream.
    pub camera: MediaStreamHandle,
    pub events: broadcast::Receiver<PresentationEvent>,
    pub task: JoinHandle<()>,
}

impl TestCall {
    /// Spawn with default configuration.
    #[must_use]
    pub fn spawn() -> Self {
        Self::spawn_with(Config::default(), MockTransport::new())
    }

    /// Spawn with `config` and a pre-configured transport.
    #[must_use]
    pub fn spawn_with(config: Config, transport: MockTransport) -> Self {
        let signaling = MockSignaling::new();
        let (devices, queue) = MockMediaDevices::new();
        let camera = camera_stream();

        let ports = Ports::new(
            Arc::new(signaling.clone()),
            Arc::new(transport.clone()),
            Arc::new(devices),
        );
        let (handle, task) =
            CoordinatorActor::spawn(config, ports, camera.clone(), CancellationToken::new());
        let events = handle.subscribe();

        Self {
            handle,
            signaling,
            transport,
            devices: queue,
            camera,
            events,
            task,
        }
    }

    /// Spawn, assign `local` as the identity and join `room_id`.
    pub async fn joined(room_id: &str, local: &str) -> Self {
        let call = Self::spawn();
        call.identity(local).await;
        call.handle.join(room(room_id)).await.unwrap();
        call
    }

    pub async fn identity(&self, local: &str) {
        self.transport_event(TransportEvent::IdentityReady(pid(local)))
            .await;
    }

    pub async fn remote_joins(&self, peer: &str) {
        self.signaling_event(SignalingEvent::ParticipantJoined(pid(peer)))
            .await;
    }

    pub async fn remote_leaves(&self, peer: &str) {
        self.signaling_event(SignalingEvent::ParticipantLeft(pid(peer)))
            .await;
    }

    pub async fn share_announced(&self, peer: &str) {
        self.signaling_event(SignalingEvent::ShareAnnounced(pid(peer)))
            .await;
    }

    pub async fn chat_from(&self, peer: &str, text: &str) {
        self.signaling_event(SignalingEvent::ChatMessage {
            text: text.to_string(),
            sender: pid(peer),
        })
        .await;
    }

    /// Deliver an inbound offer from `peer` and return its call id.
    pub async fn offer(&self, peer: &str) -> CallId {
        let call_id = CallId::new();
        self.transport_event(TransportEvent::CallOffer(CallOffer {
            call_id,
            peer_id: pid(peer),
        }))
        .await;
        call_id
    }

    pub async fn stream(&self, peer: &str, call_id: CallId, stream: MediaStreamHandle) {
        self.transport_event(TransportEvent::Stream {
            peer_id: pid(peer),
            call_id,
            stream,
        })
        .await;
    }

    pub async fn closed(&self, peer: &str, call_id: CallId) {
        self.transport_event(TransportEvent::Closed {
            peer_id: pid(peer),
            call_id,
        })
        .await;
    }

    /// Deliver a signaling event. Returns once the coordinator has handled it.
    pub async fn signaling_event(&self, event: SignalingEvent) {
        self.handle.signaling_event(event).await.unwrap();
        self.settle().await;
    }

    /// Deliver a transport event. Returns once the coordinator has handled it.
    pub async fn transport_event(&self, event: TransportEvent) {
        self.handle.transport_event(event).await.unwrap();
        self.settle().await;
    }

    /// Round-trip the mailbox so every earlier message has been handled.
    /// A coordinator that stopped meanwhile counts as settled.
    async fn settle(&self) {
        let _ = self.handle.snapshot().await;
    }

    /// Snapshot after every previously sent message has been handled.
    pub async fn snapshot(&self) -> CallSnapshot {
        self.handle.snapshot().await.unwrap()
    }

    /// Wait until the outgoing stream is `stream`.
    ///
    /// # Panics
    ///
    /// If it is not installed in time.
    pub async fn wait_for_source(&self, stream: StreamId) {
        let handle = self.handle.clone();
        eventually("outgoing source installed", move || {
            let handle = handle.clone();
            async move {
                handle
                    .snapshot()
                    .await
                    .is_ok_and(|s| s.local_media.stream_id == stream)
            }
        })
        .await;
    }

    /// The next presentation event.
    ///
    /// # Panics
    ///
    /// If none arrives in time.
    pub async fn next_event(&mut self) -> PresentationEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for a presentation event")
            .expect("presentation event stream closed")
    }

    /// Skip events until one matches `pred`.
    ///
    /// # Panics
    ///
    /// If none arrives in time.
    pub async fn wait_for_event(
        &mut self,
        pred: impl Fn(&PresentationEvent) -> bool,
    ) -> PresentationEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Wait for the actor task to exit.
    pub async fn join_task(self) {
        tokio::time::timeout(EVENT_TIMEOUT, self.task)
            .await
            .expect("coordinator did not stop in time")
            .expect("coordinator task panicked");
    }
}
