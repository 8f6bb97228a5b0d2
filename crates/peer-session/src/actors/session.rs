//! Per-peer call session state.
//!
//! A session moves `Pending -> Streaming -> Closed`; `Closed` is terminal and
//! reachable from any state. The coordinator keeps at most one session per
//! remote participant.
//!
//! A session may hold a *standby* call: an inbound offer answered while the
//! session was already live. It is promoted when the active call closes.

use crate::media::MediaStreamHandle;

use common::types::{CallId, ParticipantId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Which side placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

/// Lifecycle of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Call placed or answered, no remote stream yet.
    Pending,
    /// Remote stream received and rendered.
    Streaming,
    /// Closed locally or by the remote. Terminal.
    Closed,
}

/// A second call answered for a peer that already has a session.
#[derive(Debug, Clone)]
pub struct StandbyCall {
    pub call: CallId,
    /// Stream delivered on the standby call, if any arrived yet.
    pub stream: Option<MediaStreamHandle>,
}

/// One remote participant's call.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub peer_id: ParticipantId,
    pub direction: CallDirection,
    pub state: CallState,
    pub call: CallId,
    /// When the current call was placed or answered.
    pub opened_at: Instant,
    pub standby: Option<StandbyCall>,
}

impl CallSession {
    /// Session for a call we placed.
    #[must_use]
    pub fn outbound(peer_id: ParticipantId, call: CallId) -> Self {
        Self::new(peer_id, CallDirection::Outbound, call)
    }

    /// Session for a call we answered.
    #[must_use]
    pub fn inbound(peer_id: ParticipantId, call: CallId) -> Self {
        Self::new(peer_id, CallDirection::Inbound, call)
    }

    fn new(peer_id: ParticipantId, direction: CallDirection, call: CallId) -> Self {
        Self {
            peer_id,
            direction,
            state: CallState::Pending,
            call,
            opened_at: Instant::now(),
            standby: None,
        }
    }

    #[must_use]
    pub fn is_current(&self, call: CallId) -> bool {
        self.call == call
    }

    #[must_use]
    pub fn is_standby(&self, call: CallId) -> bool {
        self.standby.as_ref().is_some_and(|s| s.call == call)
    }

    /// Whether the session is still `Pending` after `timeout`.
    #[must_use]
    pub fn is_overdue(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.state == CallState::Pending && now.saturating_duration_since(self.opened_at) >= timeout
    }

    /// Promote to `Streaming`. Has no effect on a closed session.
    pub fn mark_streaming(&mut self) {
        if self.state != CallState::Closed {
            self.state = CallState::Streaming;
        }
    }

    /// Mark the session closed and return every call it still owns.
    pub fn close(&mut self) -> Vec<CallId> {
        let mut calls = Vec::with_capacity(2);
        if self.state != CallState::Closed {
            calls.push(self.call);
        }
        if let Some(standby) = self.standby.take() {
            calls.push(standby.call);
        }
        self.state = CallState::Closed;
        calls
    }

    /// Keep `call` as the standby. Returns a previous standby call, which
    /// the caller must close.
    pub fn set_standby(&mut self, call: CallId) -> Option<StandbyCall> {
        self.standby.replace(StandbyCall { call, stream: None })
    }

    /// Record a stream that arrived on the standby call. Returns a stream it
    /// displaced, if any.
    pub fn record_standby_stream(&mut self, stream: MediaStreamHandle) -> Option<MediaStreamHandle> {
        self.standby
            .as_mut()
            .and_then(|standby| standby.stream.replace(stream))
    }

    /// Drop the standby call if it is `call`.
    pub fn clear_standby(&mut self, call: CallId) -> Option<StandbyCall> {
        if self.is_standby(call) {
            self.standby.take()
        } else {
            None
        }
    }

    /// Replace the current call with the standby.
    ///
    /// The session becomes `Streaming` if the standby already delivered a
    /// stream, `Pending` otherwise. Returns that stream, or `None` when
    /// there was no standby or it had no stream yet.
    pub fn promote_standby(&mut self) -> Option<Option<MediaStreamHandle>> {
        let standby = self.standby.take()?;
        self.call = standby.call;
        self.direction = CallDirection::Inbound;
        self.opened_at = Instant::now();
        self.state = if standby.stream.is_some() {
            CallState::Streaming
        } else {
            CallState::Pending
        };
        Some(standby.stream)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::TrackKind;
    use std::time::Duration;

    fn peer() -> ParticipantId {
        ParticipantId::from("b")
    }

    #[test]
    fn test_new_session_is_pending() {
        let call = CallId::new();
        let session = CallSession::outbound(peer(), call);
        assert_eq!(session.state, CallState::Pending);
        assert_eq!(session.direction, CallDirection::Outbound);
        assert!(session.is_current(call));
        assert!(!session.is_current(CallId::new()));
    }

    #[test]
    fn test_closed_is_terminal() {
        let call = CallId::new();
        let mut session = CallSession::inbound(peer(), call);

        assert_eq!(session.close(), vec![call]);
        session.mark_streaming();

        assert_eq!(session.state, CallState::Closed);
        assert!(session.close().is_empty());
    }

    #[test]
    fn test_close_returns_standby_call() {
        let call = CallId::new();
        let standby = CallId::new();
        let mut session = CallSession::outbound(peer(), call);
        session.mark_streaming();
        assert!(session.set_standby(standby).is_none());

        assert_eq!(session.close(), vec![call, standby]);
        assert!(session.standby.is_none());
    }

    #[test]
    fn test_promote_standby_with_stream() {
        let mut session = CallSession::outbound(peer(), CallId::new());
        session.mark_streaming();
        let standby = CallId::new();
        let _ = session.set_standby(standby);
        let stream = MediaStreamHandle::new(&[TrackKind::Video]);
        assert!(session.record_standby_stream(stream.clone()).is_none());

        let promoted = session.promote_standby();

        assert_eq!(promoted, Some(Some(stream)));
        assert!(session.is_current(standby));
        assert_eq!(session.state, CallState::Streaming);
        assert_eq!(session.direction, CallDirection::Inbound);
    }

    #[test]
    fn test_promote_standby_without_stream_returns_to_pending() {
        let mut session = CallSession::outbound(peer(), CallId::new());
        session.mark_streaming();
        let _ = session.set_standby(CallId::new());

        assert_eq!(session.promote_standby(), Some(None));
        assert_eq!(session.state, CallState::Pending);
    }

    #[test]
    fn test_promote_without_standby_is_none() {
        let mut session = CallSession::outbound(peer(), CallId::new());
        assert!(session.promote_standby().is_none());
    }

    #[test]
    fn test_second_standby_displaces_first() {
        let mut session = CallSession::outbound(peer(), CallId::new());
        let first = CallId::new();
        let _ = session.set_standby(first);

        let displaced = session.set_standby(CallId::new());

        assert_eq!(displaced.map(|s| s.call), Some(first));
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_overdue_only_while_pending() {
        let mut session = CallSession::inbound(peer(), CallId::new());
        let timeout = Duration::from_secs(30);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!session.is_overdue(Instant::now(), timeout));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(session.is_overdue(Instant::now(), timeout));

        session.mark_streaming();
        assert!(!session.is_overdue(Instant::now(), timeout));
    }
}
