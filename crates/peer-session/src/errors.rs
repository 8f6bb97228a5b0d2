//! Peer-session error types.
//!
//! Error types map to stable numeric codes for the presentation layer.
//! Internal details are logged but not exposed through `client_message`.

use common::types::{ParticipantId, RoomId};
use thiserror::Error;

/// Peer-session coordinator error type.
///
/// Maps to presentation error codes:
/// - `MediaAccessDenied`, `MediaUnavailable`: `MEDIA` (1)
/// - `AlreadyInRoom`, `NotJoined`, `InvalidChatMessage`: `INVALID_REQUEST` (2)
/// - `SessionLeft`, `TransportDisconnected`: `TERMINATED` (3)
/// - `StaleAcquisition`, `DuplicateSession`: `IGNORED` (4), never surfaced as failures
/// - `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The user or platform refused camera, microphone or screen capture.
    #[error("Media access denied: {0}")]
    MediaAccessDenied(String),

    /// The requested capture source does not exist or produced no live stream.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// A superseded source acquisition resolved after a newer request.
    #[error("Stale media acquisition")]
    StaleAcquisition,

    /// A second call arrived for a participant that already has a session.
    #[error("Duplicate session for participant {0}")]
    DuplicateSession(ParticipantId),

    /// Signaling or peer transport failed unrecoverably.
    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    /// A join was requested for a different room than the one already joined.
    #[error("Already in room {0}")]
    AlreadyInRoom(RoomId),

    /// The operation requires a joined room.
    #[error("Not joined to a room")]
    NotJoined,

    /// Chat text exceeded the configured length limit.
    #[error("Invalid chat message: {0}")]
    InvalidChatMessage(String),

    /// The coordinator has left the call and is no longer usable.
    #[error("Session has left the call")]
    SessionLeft,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns the presentation error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SessionError::MediaAccessDenied(_) | SessionError::MediaUnavailable(_) => 1,
            SessionError::AlreadyInRoom(_)
            | SessionError::NotJoined
            | SessionError::InvalidChatMessage(_) => 2,
            SessionError::SessionLeft | SessionError::TransportDisconnected(_) => 3,
            SessionError::StaleAcquisition | SessionError::DuplicateSession(_) => 4,
            SessionError::Internal(_) => 6,
        }
    }

    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::MediaAccessDenied(_) => {
                "Camera, microphone or screen access was denied".to_string()
            }
            SessionError::MediaUnavailable(_) => "The selected media source is unavailable".to_string(),
            SessionError::StaleAcquisition | SessionError::DuplicateSession(_) => String::new(),
            SessionError::TransportDisconnected(_) => "Connection to the call was lost".to_string(),
            SessionError::AlreadyInRoom(room) => format!("Already in room {room}"),
            SessionError::NotJoined => "Join a room first".to_string(),
            SessionError::InvalidChatMessage(msg) => msg.clone(),
            SessionError::SessionLeft => "You left the meeting".to_string(),
            SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether the error should be shown to the user at all.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            SessionError::StaleAcquisition | SessionError::DuplicateSession(_)
        )
    }
}

/// Failure reported by the platform when acquiring a capture source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// User cancelled the picker or the platform refused permission.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No such device, or the device is busy.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<MediaError> for SessionError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::AccessDenied(reason) => SessionError::MediaAccessDenied(reason),
            MediaError::Unavailable(reason) => SessionError::MediaUnavailable(reason),
        }
    }
}

/// Failure reported synchronously by a peer transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport cannot reach the requested participant.
    #[error("participant unreachable: {0}")]
    Unreachable(ParticipantId),

    /// The transport has been destroyed or its backing channel is gone.
    #[error("transport closed")]
    Closed,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        // Media errors -> 1
        assert_eq!(
            SessionError::MediaAccessDenied("picker".to_string()).error_code(),
            1
        );
        assert_eq!(
            SessionError::MediaUnavailable("no camera".to_string()).error_code(),
            1
        );

        // Invalid requests -> 2
        assert_eq!(SessionError::AlreadyInRoom(RoomId::from("r")).error_code(), 2);
        assert_eq!(SessionError::NotJoined.error_code(), 2);

        // Terminal -> 3
        assert_eq!(SessionError::SessionLeft.error_code(), 3);
        assert_eq!(
            SessionError::TransportDisconnected("socket".to_string()).error_code(),
            3
        );

        // Ignored -> 4
        assert_eq!(SessionError::StaleAcquisition.error_code(), 4);
        assert_eq!(
            SessionError::DuplicateSession(ParticipantId::from("b")).error_code(),
            4
        );

        assert_eq!(SessionError::Internal("x".to_string()).error_code(), 6);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SessionError::Internal("mailbox closed at 0xdeadbeef".to_string());
        assert!(!err.client_message().contains("0xdeadbeef"));

        let err = SessionError::TransportDisconnected("ws://10.0.0.4 reset".to_string());
        assert!(!err.client_message().contains("10.0.0.4"));
    }

    #[test]
    fn test_dedup_and_stale_are_not_user_visible() {
        assert!(!SessionError::StaleAcquisition.is_user_visible());
        assert!(!SessionError::DuplicateSession(ParticipantId::from("b")).is_user_visible());
        assert!(SessionError::MediaAccessDenied(String::new()).is_user_visible());
    }

    #[test]
    fn test_media_error_conversion() {
        let err: SessionError = MediaError::AccessDenied("cancelled".to_string()).into();
        assert_eq!(err, SessionError::MediaAccessDenied("cancelled".to_string()));

        let err: SessionError = MediaError::Unavailable("busy".to_string()).into();
        assert_eq!(err.error_code(), 1);
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SessionError::DuplicateSession(ParticipantId::from("c"))),
            "Duplicate session for participant c"
        );
        assert_eq!(
            format!("{}", TransportError::Unreachable(ParticipantId::from("d"))),
            "participant unreachable: d"
        );
    }
}
