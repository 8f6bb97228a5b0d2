//! Mailbox depth monitoring for the peer-session actors.
//!
//! | Actor Type  | Normal | Warning | Critical |
//! |-------------|--------|---------|----------|
//! | Coordinator | < 64   | 64-192  | > 192    |
//! | Hub         | < 128  | 128-384 | > 384    |
//! | Loopback    | < 128  | 128-384 | > 384    |
//!
//! Depth is published as `peer_session_actor_mailbox_depth`.

use crate::observability::metrics as obs;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Mailbox depth thresholds for the coordinator.
pub const COORDINATOR_MAILBOX_NORMAL: usize = 64;
pub const COORDINATOR_MAILBOX_WARNING: usize = 192;

/// Mailbox depth thresholds for the in-process fabric actors.
pub const FABRIC_MAILBOX_NORMAL: usize = 128;
pub const FABRIC_MAILBOX_WARNING: usize = 384;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `CoordinatorActor` (one per client).
    Coordinator,
    /// `RoomHub` signaling actor.
    Hub,
    /// `LoopbackNetwork` transport actor.
    Loopback,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Hub => "hub",
            ActorType::Loopback => "loopback",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator => COORDINATOR_MAILBOX_WARNING,
            ActorType::Hub | ActorType::Loopback => FABRIC_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Coordinator => COORDINATOR_MAILBOX_NORMAL,
            ActorType::Hub | ActorType::Loopback => FABRIC_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Local participant id, or the fabric name.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Rename the monitored actor, e.g. once the local identity is known.
    pub fn set_actor_id(&mut self, actor_id: impl Into<String>) {
        self.actor_id = actor_id.into();
    }

    /// Record a message entering processing.
    ///
    /// `queued` is the number of messages still waiting behind it.
    pub fn record_enqueue(&self, queued: usize) {
        let new_depth = queued + 1;
        self.depth.store(new_depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        obs::set_actor_mailbox_depth(self.actor_type.as_str(), new_depth);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "peer_session.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning => debug!(
                target: "peer_session.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            ),
            MailboxLevel::Normal => {}
        }
    }

    /// Record a message finished processing.
    pub fn record_dequeue(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message dropped because the mailbox was full.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        obs::record_message_dropped(self.actor_type.as_str());
        warn!(
            target: "peer_session.mailbox",
            actor_type = self.actor_type.as_str(),
            actor_id = %self.actor_id,
            dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}
