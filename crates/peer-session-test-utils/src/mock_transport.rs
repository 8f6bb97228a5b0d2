//! Recording peer transport.
//!
//! Provides a mock transport that:
//! - Assigns a fresh `CallId` to every placed call
//! - Records answers, closes and destroy
//! - Refuses calls to peers marked unreachable

use common::types::{CallId, ParticipantId, StreamId};
use peer_session::errors::TransportError;
use peer_session::media::MediaStreamHandle;
use peer_session::ports::{CallOffer, PeerTransport};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// One call made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    PlaceCall {
        peer: ParticipantId,
        call: CallId,
        stream: StreamId,
    },
    Answer {
        peer: ParticipantId,
        call: CallId,
        stream: StreamId,
    },
    Close {
        call: CallId,
    },
    Destroy,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    actions: Vec<TransportAction>,
    unreachable: HashSet<ParticipantId>,
}

/// Peer transport that records every action. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `place_call` to `peer` with `TransportError::Unreachable`.
    #[must_use]
    pub fn with_unreachable(self, peer: ParticipantId) -> Self {
        self.inner.lock().unwrap().unreachable.insert(peer);
        self
    }

    #[must_use]
    pub fn actions(&self) -> Vec<TransportAction> {
        self.inner.lock().unwrap().actions.clone()
    }

    /// Calls placed, in order.
    #[must_use]
    pub fn placed(&self) -> Vec<(ParticipantId, CallId)> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                TransportAction::PlaceCall { peer, call, .. } => Some((peer, call)),
                _ => None,
            })
            .collect()
    }

    /// Calls placed to `peer`, in order.
    #[must_use]
    pub fn calls_to(&self, peer: &ParticipantId) -> Vec<CallId> {
        self.placed()
            .into_iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, call)| call)
            .collect()
    }

    #[must_use]
    pub fn last_call_to(&self, peer: &ParticipantId) -> Option<CallId> {
        self.calls_to(peer).last().copied()
    }

    /// Stream offered on every placed call and answer, in order.
    #[must_use]
    pub fn offered_streams(&self) -> Vec<StreamId> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                TransportAction::PlaceCall { stream, .. } | TransportAction::Answer { stream, .. } => {
                    Some(stream)
                }
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn answered(&self) -> Vec<CallId> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                TransportAction::Answer { call, .. } => Some(call),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn closed(&self) -> Vec<CallId> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                TransportAction::Close { call } => Some(call),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_closed(&self, call: CallId) -> bool {
        self.closed().contains(&call)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.actions().contains(&TransportAction::Destroy)
    }

    fn record(&self, action: TransportAction) {
        self.inner.lock().unwrap().actions.push(action);
    }
}

impl PeerTransport for MockTransport {
    fn place_call(
        &self,
        peer: &ParticipantId,
        stream: &MediaStreamHandle,
    ) -> Result<CallId, TransportError> {
        if self.inner.lock().unwrap().unreachable.contains(peer) {
            return Err(TransportError::Unreachable(peer.clone()));
        }
        let call = CallId::new();
        self.record(TransportAction::PlaceCall {
            peer: peer.clone(),
            call,
            stream: stream.id(),
        });
        Ok(call)
    }

    fn answer(&self, offer: &CallOffer, stream: &MediaStreamHandle) -> Result<(), TransportError> {
        self.record(TransportAction::Answer {
            peer: offer.peer_id.clone(),
            call: offer.call_id,
            stream: stream.id(),
        });
        Ok(())
    }

    fn close(&self, call: CallId) {
        self.record(TransportAction::Close { call });
    }

    fn destroy(&self) {
        self.record(TransportAction::Destroy);
    }
}
