//! Seams to the external collaborators.
//!
//! The coordinator consumes [`SignalingEvent`]s and [`TransportEvent`]s
//! through its handle and drives the outside world through these traits.
//! `SignalingChannel` and `PeerTransport` are called from inside the actor
//! loop and must not block; implementations hand work off to their own
//! tasks or channels. Media acquisition is asynchronous and runs in a task
//! spawned by the coordinator.

use crate::errors::{MediaError, TransportError};
use crate::media::{MediaStreamHandle, SourceKind};

use async_trait::async_trait;
use common::types::{CallId, ParticipantId, RoomId};
use std::sync::Arc;

/// An inbound call waiting to be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOffer {
    pub call_id: CallId,
    pub peer_id: ParticipantId,
}

/// Events delivered by the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    ChatMessage { text: String, sender: ParticipantId },
    /// The peer swapped its outgoing source and expects to be reconnected.
    ShareAnnounced(ParticipantId),
    /// The signaling connection is gone.
    Disconnected { reason: String },
}

/// Events delivered by the peer transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport assigned this client its identity.
    IdentityReady(ParticipantId),
    CallOffer(CallOffer),
    /// A remote stream arrived on `call_id`.
    Stream {
        peer_id: ParticipantId,
        call_id: CallId,
        stream: MediaStreamHandle,
    },
    /// The remote side closed `call_id`.
    Closed {
        peer_id: ParticipantId,
        call_id: CallId,
    },
    /// The transport is gone.
    Disconnected { reason: String },
}

/// Outgoing side of the signaling channel.
pub trait SignalingChannel: Send + Sync {
    /// Announce presence in `room` as `local`.
    fn announce_join(&self, room: &RoomId, local: &ParticipantId);

    /// Broadcast chat text from `sender`.
    fn send_chat(&self, sender: &ParticipantId, text: &str);

    /// Tell the room our outgoing source changed.
    fn announce_share(&self);

    /// Leave the room and close the channel.
    fn disconnect(&self);
}

/// Outgoing side of the peer transport.
pub trait PeerTransport: Send + Sync {
    /// Start a call to `peer` carrying `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer cannot be reached or the transport is gone.
    fn place_call(
        &self,
        peer: &ParticipantId,
        stream: &MediaStreamHandle,
    ) -> Result<CallId, TransportError>;

    /// Accept `offer`, sending `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is gone.
    fn answer(&self, offer: &CallOffer, stream: &MediaStreamHandle) -> Result<(), TransportError>;

    /// Close one call.
    fn close(&self, call: CallId);

    /// Close every call and release the local identity.
    fn destroy(&self);
}

/// Local capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a new stream for `kind`.
    ///
    /// May wait on a user prompt; the coordinator drops the future when a
    /// newer request or shutdown supersedes it.
    ///
    /// # Errors
    ///
    /// `AccessDenied` when the user or platform refuses (including a cancelled
    /// picker), `Unavailable` when no such source exists.
    async fn acquire(&self, kind: SourceKind) -> Result<MediaStreamHandle, MediaError>;
}

/// The three collaborators a coordinator is wired to.
#[derive(Clone)]
pub struct Ports {
    pub signaling: Arc<dyn SignalingChannel>,
    pub transport: Arc<dyn PeerTransport>,
    pub devices: Arc<dyn MediaDevices>,
}

impl Ports {
    #[must_use]
    pub fn new(
        signaling: Arc<dyn SignalingChannel>,
        transport: Arc<dyn PeerTransport>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        Self {
            signaling,
            transport,
            devices,
        }
    }
}
