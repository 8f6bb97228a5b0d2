//! Message types for the coordinator actor.
//!
//! Every input to the coordinator, external event or user intent, is a
//! `CoordinatorMessage` on one mpsc mailbox. Request/reply uses
//! `tokio::sync::oneshot`. Push notifications to the presentation layer go
//! out as `PresentationEvent`s on a broadcast channel.

use super::session::{CallDirection, CallState};
use crate::chat::ChatMessage;
use crate::errors::{MediaError, SessionError};
use crate::media::{MediaStreamHandle, SourceKind, TrackKind};
use crate::ports::{SignalingEvent, TransportEvent};

use common::types::{CallId, ParticipantId, RoomId, StreamId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to `CoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Event from the signaling channel.
    Signaling(SignalingEvent),

    /// Event from the peer transport.
    Transport(TransportEvent),

    /// Join a room. Presence is announced once the local identity is known.
    Join {
        room: RoomId,
        respond_to: oneshot::Sender<Result<JoinOutcome, SessionError>>,
    },

    /// Leave the call. Terminal.
    Leave {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Switch the outgoing source to `kind`.
    RequestSource {
        kind: SourceKind,
        respond_to: oneshot::Sender<Result<SourceRequest, SessionError>>,
    },

    /// Switch to whichever source is not the current (or pending) one.
    ToggleScreenShare {
        respond_to: oneshot::Sender<Result<SourceRequest, SessionError>>,
    },

    /// Set (`Some`) or flip (`None`) the enabled flag of a local track.
    SetTrackEnabled {
        kind: TrackKind,
        enabled: Option<bool>,
        /// New enabled value, or `None` when the stream has no such track.
        respond_to: oneshot::Sender<Result<Option<bool>, SessionError>>,
    },

    /// Send chat text. Replies `false` when blank text was ignored.
    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<bool, SessionError>>,
    },

    /// Read-only view of the call.
    GetSnapshot {
        respond_to: oneshot::Sender<CallSnapshot>,
    },

    /// Read-only copy of the chat log.
    GetChatLog {
        respond_to: oneshot::Sender<Vec<ChatMessage>>,
    },

    /// Result of a source acquisition task. Internal.
    AcquisitionResolved {
        seq: u64,
        kind: SourceKind,
        result: Result<MediaStreamHandle, MediaError>,
    },
}

/// Result of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Presence announced.
    Announced,
    /// Recorded; presence is announced when the transport assigns an identity.
    AwaitingIdentity,
    /// Same room joined or requested before; nothing was sent.
    AlreadyJoined,
}

/// Result of a source switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRequest {
    /// The swap was applied immediately (cached camera).
    Committed,
    /// An acquisition is in flight; the swap commits when it resolves
    /// unless superseded by request `seq + n`.
    Pending { seq: u64 },
    /// Already on the requested source.
    Unchanged,
}

/// Global coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoordinatorState {
    Idle,
    Joined,
    /// Terminal.
    Left,
}

/// The outgoing media as seen by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalMediaView {
    pub stream_id: StreamId,
    pub source_kind: SourceKind,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// Source being acquired, if a request is in flight.
    pub acquisition_pending: Option<SourceKind>,
}

/// One rendered remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub call_id: CallId,
    pub stream_id: StreamId,
    #[serde(skip)]
    pub stream: MediaStreamHandle,
}

/// One call session, rendered or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub peer_id: ParticipantId,
    pub call_id: CallId,
    pub direction: CallDirection,
    pub state: CallState,
    pub has_standby: bool,
}

/// Point-in-time view of the whole call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub state: CoordinatorState,
    pub local_id: Option<ParticipantId>,
    pub room_id: Option<RoomId>,
    pub local_media: LocalMediaView,
    /// Rendered participants in join order.
    pub participants: Vec<ParticipantView>,
    /// Sessions in the order they were opened.
    pub sessions: Vec<SessionView>,
}

impl CallSnapshot {
    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn session(&self, id: &ParticipantId) -> Option<&SessionView> {
        self.sessions.iter().find(|s| &s.peer_id == id)
    }

    #[must_use]
    pub fn participant_ids(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.id.as_str()).collect()
    }
}

/// Why the coordinator stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TerminationReason {
    Left,
    Cancelled,
    TransportDisconnected(String),
}

/// Notifications pushed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationEvent {
    /// The rendered participant set or one of its streams changed.
    ParticipantsChanged,
    /// The outgoing source or a track flag changed.
    LocalMediaChanged,
    ChatAppended(ChatMessage),
    /// A source acquisition failed; the call continues unchanged.
    MediaFailure(SessionError),
    /// A pending call produced no stream in time and was dropped.
    CallAbandoned { peer: ParticipantId },
    /// The transport could not place a call to a joining participant.
    PeerUnreachable { peer: ParticipantId },
    /// Terminal. No further events follow.
    Terminated { reason: TerminationReason },
}
