//! Recording signaling channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use peer_session_test_utils::MockSignaling;
//!
//! let signaling = MockSignaling::new();
//! // ... hand `Arc::new(signaling.clone())` to a coordinator ...
//! assert_eq!(signaling.share_count(), 1);
//! ```

use common::types::{ParticipantId, RoomId};
use peer_session::ports::SignalingChannel;
use std::sync::{Arc, Mutex};

/// One call made on the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingAction {
    AnnounceJoin { room: RoomId, local: ParticipantId },
    SendChat { sender: ParticipantId, text: String },
    AnnounceShare,
    Disconnect,
}

/// Signaling channel that records every action. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MockSignaling {
    actions: Arc<Mutex<Vec<SignalingAction>>>,
}

impl MockSignaling {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded action, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<SignalingAction> {
        self.actions.lock().unwrap().clone()
    }

    /// Recorded join announcements.
    #[must_use]
    pub fn joins(&self) -> Vec<(RoomId, ParticipantId)> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                SignalingAction::AnnounceJoin { room, local } => Some((room, local)),
                _ => None,
            })
            .collect()
    }

    /// Text of every chat message sent.
    #[must_use]
    pub fn chats(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                SignalingAction::SendChat { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn share_count(&self) -> usize {
        self.count(&SignalingAction::AnnounceShare)
    }

    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.count(&SignalingAction::Disconnect)
    }

    fn count(&self, action: &SignalingAction) -> usize {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|a| *a == action)
            .count()
    }

    fn record(&self, action: SignalingAction) {
        self.actions.lock().unwrap().push(action);
    }
}

impl SignalingChannel for MockSignaling {
    fn announce_join(&self, room: &RoomId, local: &ParticipantId) {
        self.record(SignalingAction::AnnounceJoin {
            room: room.clone(),
            local: local.clone(),
        });
    }

    fn send_chat(&self, sender: &ParticipantId, text: &str) {
        self.record(SignalingAction::SendChat {
            sender: sender.clone(),
            text: text.to_string(),
        });
    }

    fn announce_share(&self) {
        self.record(SignalingAction::AnnounceShare);
    }

    fn disconnect(&self) {
        self.record(SignalingAction::Disconnect);
    }
}
