//! Room chat relay.
//!
//! Chat is independent of call state. Outgoing text goes over the signaling
//! channel; incoming messages are appended to an ordered log in arrival order.

use crate::errors::SessionError;
use crate::ports::SignalingChannel;

use chrono::{DateTime, Utc};
use common::types::ParticipantId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One received chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: ParticipantId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// Append-only chat log plus the outgoing path.
#[derive(Debug)]
pub struct ChatRelay {
    log: Vec<ChatMessage>,
    max_len: usize,
}

impl ChatRelay {
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            log: Vec::new(),
            max_len,
        }
    }

    /// Send `text` as `local`.
    ///
    /// Empty and whitespace-only text is never transmitted and yields
    /// `Ok(false)`. The text is sent unmodified otherwise.
    ///
    /// # Errors
    ///
    /// `InvalidChatMessage` when the text is longer than the configured limit.
    pub fn send(
        &self,
        signaling: &dyn SignalingChannel,
        local: &ParticipantId,
        text: &str,
    ) -> Result<bool, SessionError> {
        if text.trim().is_empty() {
            debug!(target: "peer_session.chat", "Ignoring blank chat message");
            return Ok(false);
        }

        let len = text.chars().count();
        if len > self.max_len {
            return Err(SessionError::InvalidChatMessage(format!(
                "Message is {len} characters, the limit is {}",
                self.max_len
            )));
        }

        signaling.send_chat(local, text);
        crate::observability::metrics::record_chat_message("sent");
        Ok(true)
    }

    /// Append a received message to the log.
    pub fn on_message_received(&mut self, text: String, sender: ParticipantId) -> ChatMessage {
        crate::observability::metrics::record_chat_message("received");
        debug!(
            target: "peer_session.chat",
            sender = %sender,
            log_len = self.log.len() + 1,
            "Chat message received"
        );
        let message = ChatMessage {
            sender,
            text,
            received_at: Utc::now(),
        };
        self.log.push(message.clone());
        message
    }

    #[must_use]
    pub fn log(&self) -> &[ChatMessage] {
        &self.log
    }
}
