//! `RoomHub` - in-process signaling server.
//!
//! Plays the role of the room server for the demo binary and multi-party
//! tests:
//!
//! - `join-room` registers the member and tells the *other* members
//! - chat is relayed to *every* member of the room, the sender included
//! - a share announcement is relayed to the other members
//! - a disconnect tells the other members the participant left
//!
//! Each client gets a [`HubSignaling`] implementing [`SignalingChannel`].
//! Its methods never block: they `try_send` into the hub mailbox and count
//! a drop when it is full.

use crate::actors::metrics::{ActorType, MailboxMonitor};
use crate::actors::CoordinatorHandle;
use crate::ports::{SignalingChannel, SignalingEvent};

use common::types::{ParticipantId, RoomId};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default hub mailbox capacity.
pub const HUB_CHANNEL_BUFFER: usize = 1024;

type MemberId = u64;

#[derive(Debug)]
enum HubMessage {
    Attach {
        member: MemberId,
        handle: CoordinatorHandle,
        respond_to: oneshot::Sender<()>,
    },
    JoinRoom {
        member: MemberId,
        room: RoomId,
        participant: ParticipantId,
    },
    Chat {
        member: MemberId,
        sender: ParticipantId,
        text: String,
    },
    Share {
        member: MemberId,
    },
    Disconnect {
        member: MemberId,
    },
    Members {
        room: RoomId,
        respond_to: oneshot::Sender<Vec<ParticipantId>>,
    },
    Shutdown {
        reason: String,
    },
}

impl HubMessage {
    const fn kind(&self) -> &'static str {
        match self {
            HubMessage::Attach { .. } => "attach",
            HubMessage::JoinRoom { .. } => "join_room",
            HubMessage::Chat { .. } => "chat",
            HubMessage::Share { .. } => "share",
            HubMessage::Disconnect { .. } => "disconnect",
            HubMessage::Members { .. } => "members",
            HubMessage::Shutdown { .. } => "shutdown",
        }
    }
}

/// Handle to a `RoomHub`.
#[derive(Clone)]
pub struct RoomHubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    next_member: Arc<AtomicU64>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomHubHandle {
    /// Open a signaling channel for a new client.
    #[must_use]
    pub fn open_channel(&self) -> HubSignaling {
        HubSignaling {
            member: self.next_member.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// Route events for `channel` to `coordinator`.
    ///
    /// Must complete before the coordinator joins a room.
    pub async fn attach(
        &self,
        channel: &HubSignaling,
        coordinator: CoordinatorHandle,
    ) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Attach {
                member: channel.member,
                handle: coordinator,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Participants currently in `room`, in join order.
    pub async fn members(&self, room: RoomId) -> Result<Vec<ParticipantId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Members {
                room,
                respond_to: tx,
            })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Stop the hub, telling every attached client the connection is gone.
    pub async fn shutdown(&self, reason: impl Into<String>) -> Result<(), HubError> {
        self.sender
            .send(HubMessage::Shutdown {
                reason: reason.into(),
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The hub has stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("room hub closed")]
    Closed,
}

/// One client's signaling channel to the hub.
pub struct HubSignaling {
    member: MemberId,
    sender: mpsc::Sender<HubMessage>,
    mailbox: Arc<MailboxMonitor>,
}

impl HubSignaling {
    fn post(&self, message: HubMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.mailbox.record_drop();
                warn!(
                    target: "peer_session.hub",
                    member = self.member,
                    kind = message.kind(),
                    "Hub mailbox full, signaling message dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    target: "peer_session.hub",
                    member = self.member,
                    "Hub closed, signaling message discarded"
                );
            }
        }
    }
}

impl SignalingChannel for HubSignaling {
    fn announce_join(&self, room: &RoomId, local: &ParticipantId) {
        self.post(HubMessage::JoinRoom {
            member: self.member,
            room: room.clone(),
            participant: local.clone(),
        });
    }

    fn send_chat(&self, sender: &ParticipantId, text: &str) {
        self.post(HubMessage::Chat {
            member: self.member,
            sender: sender.clone(),
            text: text.to_string(),
        });
    }

    fn announce_share(&self) {
        self.post(HubMessage::Share {
            member: self.member,
        });
    }

    fn disconnect(&self) {
        self.post(HubMessage::Disconnect {
            member: self.member,
        });
    }
}

#[derive(Default)]
struct Member {
    handle: Option<CoordinatorHandle>,
    room: Option<RoomId>,
    participant: Option<ParticipantId>,
}

/// The `RoomHub` actor.
pub struct RoomHub {
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    members: IndexMap<MemberId, Member>,
    mailbox: Arc<MailboxMonitor>,
}

impl RoomHub {
    /// Spawn a hub.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(cancel_token: CancellationToken) -> (RoomHubHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Hub, "room-hub"));

        let hub = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            members: IndexMap::new(),
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(hub.run());

        let handle = RoomHubHandle {
            sender,
            cancel_token,
            next_member: Arc::new(AtomicU64::new(1)),
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "peer_session.hub")]
    async fn run(mut self) {
        info!(target: "peer_session.hub", "RoomHub started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,

                msg = self.receiver.recv() => {
                    let Some(message) = msg else { break };
                    self.mailbox.record_enqueue(self.receiver.len());
                    let keep_running = self.handle_message(message).await;
                    self.mailbox.record_dequeue();
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!(
            target: "peer_session.hub",
            messages_processed = self.mailbox.messages_processed(),
            "RoomHub stopped"
        );
    }

    async fn handle_message(&mut self, message: HubMessage) -> bool {
        match message {
            HubMessage::Attach {
                member,
                handle,
                respond_to,
            } => {
                self.members.entry(member).or_default().handle = Some(handle);
                let _ = respond_to.send(());
            }
            HubMessage::JoinRoom {
                member,
                room,
                participant,
            } => {
                let entry = self.members.entry(member).or_default();
                entry.room = Some(room.clone());
                entry.participant = Some(participant.clone());
                info!(
                    target: "peer_session.hub",
                    room_id = %room,
                    participant = %participant,
                    "Participant joined room"
                );
                self.relay(member, &room, false, SignalingEvent::ParticipantJoined(participant))
                    .await;
            }
            HubMessage::Chat {
                member,
                sender,
                text,
            } => {
                if let Some(room) = self.room_of(member) {
                    self.relay(member, &room, true, SignalingEvent::ChatMessage { text, sender })
                        .await;
                }
            }
            HubMessage::Share { member } => {
                if let (Some(room), Some(participant)) =
                    (self.room_of(member), self.participant_of(member))
                {
                    self.relay(member, &room, false, SignalingEvent::ShareAnnounced(participant))
                        .await;
                }
            }
            HubMessage::Disconnect { member } => {
                if let Some(removed) = self.members.shift_remove(&member) {
                    if let (Some(room), Some(participant)) = (removed.room, removed.participant) {
                        info!(
                            target: "peer_session.hub",
                            room_id = %room,
                            participant = %participant,
                            "Participant disconnected"
                        );
                        self.relay(member, &room, false, SignalingEvent::ParticipantLeft(participant))
                            .await;
                    }
                }
            }
            HubMessage::Members { room, respond_to } => {
                let members = self
                    .members
                    .values()
                    .filter(|m| m.room.as_ref() == Some(&room))
                    .filter_map(|m| m.participant.clone())
                    .collect();
                let _ = respond_to.send(members);
            }
            HubMessage::Shutdown { reason } => {
                warn!(target: "peer_session.hub", reason = %reason, "RoomHub shutting down");
                for member in self.members.values() {
                    if let Some(handle) = &member.handle {
                        let _ = handle
                            .signaling_event(SignalingEvent::Disconnected {
                                reason: reason.clone(),
                            })
                            .await;
                    }
                }
                return false;
            }
        }
        true
    }

    fn room_of(&self, member: MemberId) -> Option<RoomId> {
        self.members.get(&member).and_then(|m| m.room.clone())
    }

    fn participant_of(&self, member: MemberId) -> Option<ParticipantId> {
        self.members.get(&member).and_then(|m| m.participant.clone())
    }

    /// Deliver `event` to every attached member of `room`, skipping `from`
    /// unless `include_sender`.
    async fn relay(
        &self,
        from: MemberId,
        room: &RoomId,
        include_sender: bool,
        event: SignalingEvent,
    ) {
        let targets = self
            .members
            .iter()
            .filter(|(id, m)| (include_sender || **id != from) && m.room.as_ref() == Some(room))
            .filter_map(|(_, m)| m.handle.as_ref());

        for handle in targets {
            if handle.signaling_event(event.clone()).await.is_err() {
                debug!(
                    target: "peer_session.hub",
                    room_id = %room,
                    "Member coordinator already stopped"
                );
            }
        }
    }
}
