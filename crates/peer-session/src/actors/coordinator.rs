//! `CoordinatorActor` - the peer-session state machine.
//!
//! One actor per client. It owns the local media holder, the remote
//! participant registry, every call session and the chat log, and is the
//! only writer to any of them. Signaling events, transport events, user
//! intents and media acquisition results all arrive on one mailbox and are
//! handled to completion one at a time.
//!
//! # Global state
//!
//! `Idle -> Joined -> Left`. Presence is announced, and the state becomes
//! `Joined`, once both a room has been requested and the transport has
//! assigned a local identity. `Left` is terminal: the actor tears down every
//! call and local stream and exits.
//!
//! # Per-peer state
//!
//! `Unknown -> Pending -> Streaming -> Closed`. At most one session and one
//! registry entry exist per peer. A second call for a peer that already has
//! a session is answered but kept as the session's standby call.

use super::messages::{
    CallSnapshot, CoordinatorMessage, CoordinatorState, JoinOutcome, LocalMediaView,
    ParticipantView, PresentationEvent, SessionView, SourceRequest, TerminationReason,
};
use super::metrics::{ActorType, MailboxMonitor};
use super::session::{CallSession, CallState};
use crate::chat::{ChatMessage, ChatRelay};
use crate::config::Config;
use crate::errors::{MediaError, SessionError};
use crate::media::{MediaSourceHolder, MediaStreamHandle, SourceKind, TrackKind};
use crate::observability::metrics as obs;
use crate::ports::{
    CallOffer, MediaDevices, PeerTransport, Ports, SignalingChannel, SignalingEvent,
    TransportEvent,
};
use crate::registry::{ParticipantEntry, RemoteParticipantRegistry};

use common::types::{CallId, ParticipantId, RoomId};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Handle to a `CoordinatorActor`.
///
/// Cheap to clone. Every method fails with `SessionError::SessionLeft` once
/// the actor has stopped.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    events: broadcast::Sender<PresentationEvent>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    async fn send(&self, message: CoordinatorMessage) -> Result<(), SessionError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SessionError::SessionLeft)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| SessionError::SessionLeft)
    }

    /// Deliver an event from the signaling channel.
    pub async fn signaling_event(&self, event: SignalingEvent) -> Result<(), SessionError> {
        self.send(CoordinatorMessage::Signaling(event)).await
    }

    /// Deliver an event from the peer transport.
    pub async fn transport_event(&self, event: TransportEvent) -> Result<(), SessionError> {
        self.send(CoordinatorMessage::Transport(event)).await
    }

    /// Join `room`. A second join for the same room is a no-op.
    pub async fn join(&self, room: RoomId) -> Result<JoinOutcome, SessionError> {
        self.request(|respond_to| CoordinatorMessage::Join { room, respond_to })
            .await?
    }

    /// Leave the call: close every session, release local media and
    /// disconnect signaling. Terminal.
    pub async fn leave(&self) -> Result<(), SessionError> {
        self.request(|respond_to| CoordinatorMessage::Leave { respond_to })
            .await?
    }

    /// Switch the outgoing video to a screen capture.
    pub async fn request_screen_share(&self) -> Result<SourceRequest, SessionError> {
        self.request_source(SourceKind::Screen).await
    }

    /// Switch the outgoing video back to the camera.
    pub async fn request_camera_share(&self) -> Result<SourceRequest, SessionError> {
        self.request_source(SourceKind::Camera).await
    }

    async fn request_source(&self, kind: SourceKind) -> Result<SourceRequest, SessionError> {
        self.request(|respond_to| CoordinatorMessage::RequestSource { kind, respond_to })
            .await?
    }

    /// Switch between camera and screen.
    pub async fn toggle_screen_share(&self) -> Result<SourceRequest, SessionError> {
        self.request(|respond_to| CoordinatorMessage::ToggleScreenShare { respond_to })
            .await?
    }

    /// Flip the outgoing audio track. Returns the new enabled flag, or
    /// `None` when the current stream has no audio.
    pub async fn toggle_audio(&self) -> Result<Option<bool>, SessionError> {
        self.set_track(TrackKind::Audio, None).await
    }

    /// Flip the outgoing video track. Returns the new enabled flag, or
    /// `None` when the current stream has no video.
    pub async fn toggle_video(&self) -> Result<Option<bool>, SessionError> {
        self.set_track(TrackKind::Video, None).await
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<Option<bool>, SessionError> {
        self.set_track(TrackKind::Audio, Some(enabled)).await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<Option<bool>, SessionError> {
        self.set_track(TrackKind::Video, Some(enabled)).await
    }

    async fn set_track(
        &self,
        kind: TrackKind,
        enabled: Option<bool>,
    ) -> Result<Option<bool>, SessionError> {
        self.request(|respond_to| CoordinatorMessage::SetTrackEnabled {
            kind,
            enabled,
            respond_to,
        })
        .await?
    }

    /// Send chat text. Returns `false` when blank text was ignored.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<bool, SessionError> {
        let text = text.into();
        self.request(|respond_to| CoordinatorMessage::SendChat { text, respond_to })
            .await?
    }

    /// Read-only view of the call.
    pub async fn snapshot(&self) -> Result<CallSnapshot, SessionError> {
        self.request(|respond_to| CoordinatorMessage::GetSnapshot { respond_to })
            .await
    }

    /// Read-only copy of the chat log, in arrival order.
    pub async fn chat_log(&self) -> Result<Vec<ChatMessage>, SessionError> {
        self.request(|respond_to| CoordinatorMessage::GetChatLog { respond_to })
            .await
    }

    /// Subscribe to presentation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PresentationEvent> {
        self.events.subscribe()
    }

    /// Cancel the coordinator. Equivalent to leaving.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl std::fmt::Debug for CoordinatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorHandle")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// The in-flight source acquisition, if any.
#[derive(Debug, Clone, Copy)]
struct PendingAcquisition {
    seq: u64,
    kind: SourceKind,
}

/// The `CoordinatorActor` implementation.
pub struct CoordinatorActor {
    config: Config,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// For acquisition tasks; weak so it never keeps the mailbox open.
    self_sender: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    /// Cancels in-flight acquisitions on teardown.
    acquisitions_token: CancellationToken,
    events: broadcast::Sender<PresentationEvent>,
    signaling: Arc<dyn SignalingChannel>,
    transport: Arc<dyn PeerTransport>,
    devices: Arc<dyn MediaDevices>,
    state: CoordinatorState,
    local_id: Option<ParticipantId>,
    room: Option<RoomId>,
    media: MediaSourceHolder,
    registry: RemoteParticipantRegistry,
    /// Sessions by peer, in the order they were opened.
    sessions: IndexMap<ParticipantId, CallSession>,
    chat: ChatRelay,
    acquisition_seq: u64,
    pending_acquisition: Option<PendingAcquisition>,
    mailbox: MailboxMonitor,
}

impl CoordinatorActor {
    /// Spawn a coordinator using `camera` as the initial outgoing stream.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: Config,
        ports: Ports,
        camera: MediaStreamHandle,
        cancel_token: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        // tokio channels panic on a zero capacity
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let actor = Self {
            chat: ChatRelay::new(config.chat_max_len),
            config,
            receiver,
            self_sender: sender.downgrade(),
            acquisitions_token: cancel_token.child_token(),
            cancel_token: cancel_token.clone(),
            events: events.clone(),
            signaling: ports.signaling,
            transport: ports.transport,
            devices: ports.devices,
            state: CoordinatorState::Idle,
            local_id: None,
            room: None,
            media: MediaSourceHolder::new(camera),
            registry: RemoteParticipantRegistry::new(),
            sessions: IndexMap::new(),
            acquisition_seq: 0,
            pending_acquisition: None,
            mailbox: MailboxMonitor::new(ActorType::Coordinator, "unassigned"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CoordinatorHandle {
            sender,
            events,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "peer_session.coordinator", fields(local_id = tracing::field::Empty))]
    async fn run(mut self) {
        info!(target: "peer_session.coordinator", "CoordinatorActor started");

        let mut pending_check = tokio::time::interval(self.config.pending_check_period());
        pending_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "peer_session.coordinator",
                        "CoordinatorActor received cancellation signal"
                    );
                    self.teardown(TerminationReason::Cancelled);
                    break;
                }

                _ = pending_check.tick() => {
                    self.check_pending_timeouts();
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.mailbox.record_enqueue(self.receiver.len());
                        self.handle_message(message);
                        self.mailbox.record_dequeue();

                        if self.state == CoordinatorState::Left {
                            break;
                        }
                    } else {
                        info!(
                            target: "peer_session.coordinator",
                            "All coordinator handles dropped, exiting"
                        );
                        self.teardown(TerminationReason::Cancelled);
                        break;
                    }
                }
            }
        }

        self.drain_mailbox();

        info!(
            target: "peer_session.coordinator",
            messages_processed = self.mailbox.messages_processed(),
            "CoordinatorActor stopped"
        );
    }

    /// Release media carried by messages that will never be handled.
    fn drain_mailbox(&mut self) {
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            if let CoordinatorMessage::AcquisitionResolved {
                result: Ok(stream), ..
            } = message
            {
                stream.stop();
            }
        }
    }

    fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Signaling(event) => self.handle_signaling(event),
            CoordinatorMessage::Transport(event) => self.handle_transport(event),
            CoordinatorMessage::Join { room, respond_to } => {
                let _ = respond_to.send(self.handle_join(room));
            }
            CoordinatorMessage::Leave { respond_to } => {
                self.teardown(TerminationReason::Left);
                let _ = respond_to.send(Ok(()));
            }
            CoordinatorMessage::RequestSource { kind, respond_to } => {
                let _ = respond_to.send(Ok(self.request_source(kind)));
            }
            CoordinatorMessage::ToggleScreenShare { respond_to } => {
                let target = self
                    .pending_acquisition
                    .map_or(self.media.source_kind(), |p| p.kind)
                    .opposite();
                let _ = respond_to.send(Ok(self.request_source(target)));
            }
            CoordinatorMessage::SetTrackEnabled {
                kind,
                enabled,
                respond_to,
            } => {
                let _ = respond_to.send(Ok(self.set_track_enabled(kind, enabled)));
            }
            CoordinatorMessage::SendChat { text, respond_to } => {
                let _ = respond_to.send(self.send_chat(&text));
            }
            CoordinatorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            CoordinatorMessage::GetChatLog { respond_to } => {
                let _ = respond_to.send(self.chat.log().to_vec());
            }
            CoordinatorMessage::AcquisitionResolved { seq, kind, result } => {
                self.handle_acquisition_resolved(seq, kind, result);
            }
        }
    }

    fn handle_signaling(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::ParticipantJoined(peer) => self.on_remote_join(&peer),
            SignalingEvent::ParticipantLeft(peer) => self.on_remote_leave(&peer),
            SignalingEvent::ChatMessage { text, sender } => {
                let message = self.chat.on_message_received(text, sender);
                self.emit(PresentationEvent::ChatAppended(message));
            }
            SignalingEvent::ShareAnnounced(peer) => self.on_screen_share_announced(&peer),
            SignalingEvent::Disconnected { reason } => {
                error!(
                    target: "peer_session.coordinator",
                    reason = %reason,
                    "Signaling channel disconnected"
                );
                self.teardown(TerminationReason::TransportDisconnected(reason));
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IdentityReady(local) => self.on_identity_ready(local),
            TransportEvent::CallOffer(offer) => self.on_inbound_call(&offer),
            TransportEvent::Stream {
                peer_id,
                call_id,
                stream,
            } => self.on_remote_stream(&peer_id, call_id, stream),
            TransportEvent::Closed { peer_id, call_id } => self.on_call_closed(&peer_id, call_id),
            TransportEvent::Disconnected { reason } => {
                error!(
                    target: "peer_session.coordinator",
                    reason = %reason,
                    "Peer transport disconnected"
                );
                self.teardown(TerminationReason::TransportDisconnected(reason));
            }
        }
    }

    // ------------------------------------------------------------------
    // Room membership
    // ------------------------------------------------------------------

    fn on_identity_ready(&mut self, local: ParticipantId) {
        if let Some(existing) = &self.local_id {
            warn!(
                target: "peer_session.coordinator",
                local_id = %existing,
                offered = %local,
                "Identity already assigned, ignoring"
            );
            return;
        }

        tracing::Span::current().record("local_id", local.as_str());
        self.mailbox.set_actor_id(local.as_str());
        info!(target: "peer_session.coordinator", local_id = %local, "Local identity ready");
        self.local_id = Some(local);

        if self.room.is_some() {
            self.announce();
        }
    }

    fn handle_join(&mut self, room: RoomId) -> Result<JoinOutcome, SessionError> {
        if let Some(current) = &self.room {
            if *current == room {
                debug!(
                    target: "peer_session.coordinator",
                    room_id = %room,
                    "Join repeated for the same room, ignoring"
                );
                return Ok(JoinOutcome::AlreadyJoined);
            }
            return Err(SessionError::AlreadyInRoom(current.clone()));
        }

        self.room = Some(room);
        if self.local_id.is_some() {
            self.announce();
            Ok(JoinOutcome::Announced)
        } else {
            debug!(
                target: "peer_session.coordinator",
                "Join recorded, waiting for local identity"
            );
            Ok(JoinOutcome::AwaitingIdentity)
        }
    }

    fn announce(&mut self) {
        let (Some(room), Some(local)) = (&self.room, &self.local_id) else {
            return;
        };
        if self.state != CoordinatorState::Idle {
            return;
        }

        self.signaling.announce_join(room, local);
        self.state = CoordinatorState::Joined;

        info!(
            target: "peer_session.coordinator",
            room_id = %room,
            local_id = %local,
            "Joined room"
        );
    }

    fn is_local(&self, peer: &ParticipantId) -> bool {
        self.local_id.as_ref() == Some(peer)
    }

    fn on_remote_join(&mut self, peer: &ParticipantId) {
        if self.state != CoordinatorState::Joined || self.is_local(peer) {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                state = ?self.state,
                "Ignoring participant-joined"
            );
            return;
        }

        if self.sessions.contains_key(peer) {
            obs::record_duplicate_session();
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                error = %SessionError::DuplicateSession(peer.clone()),
                "Session already exists, not placing a second call"
            );
            return;
        }

        match self.transport.place_call(peer, self.media.current_stream()) {
            Ok(call) => {
                obs::record_call_placed();
                debug!(
                    target: "peer_session.coordinator",
                    peer_id = %peer,
                    call_id = %call,
                    "Outbound call placed"
                );
                self.sessions
                    .insert(peer.clone(), CallSession::outbound(peer.clone(), call));
            }
            Err(e) => {
                warn!(
                    target: "peer_session.coordinator",
                    peer_id = %peer,
                    error = %e,
                    "Failed to place call"
                );
                self.emit(PresentationEvent::PeerUnreachable { peer: peer.clone() });
            }
        }
    }

    fn on_remote_leave(&mut self, peer: &ParticipantId) {
        let had_session = self.close_session(peer);
        let had_entry = self.release_entry(peer);

        if had_session || had_entry {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                "Participant left"
            );
            self.participants_changed();
        }
    }

    fn on_screen_share_announced(&mut self, peer: &ParticipantId) {
        if self.state != CoordinatorState::Joined || self.is_local(peer) {
            return;
        }
        debug!(
            target: "peer_session.coordinator",
            peer_id = %peer,
            "Peer swapped source, reconnecting"
        );
        self.on_remote_leave(peer);
        self.on_remote_join(peer);
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(peer_id = %offer.peer_id, call_id = %offer.call_id))]
    fn on_inbound_call(&mut self, offer: &CallOffer) {
        if self.state != CoordinatorState::Joined || self.is_local(&offer.peer_id) {
            obs::record_call_answered("rejected");
            debug!(
                target: "peer_session.coordinator",
                state = ?self.state,
                "Rejecting call offer outside a joined room"
            );
            self.transport.close(offer.call_id);
            return;
        }

        if let Err(e) = self.transport.answer(offer, self.media.current_stream()) {
            obs::record_call_answered("failed");
            warn!(
                target: "peer_session.coordinator",
                error = %e,
                "Failed to answer call"
            );
            return;
        }

        if let Some(session) = self.sessions.get_mut(&offer.peer_id) {
            let displaced = session.set_standby(offer.call_id);
            obs::record_call_answered("duplicate");
            obs::record_duplicate_session();
            debug!(
                target: "peer_session.coordinator",
                error = %SessionError::DuplicateSession(offer.peer_id.clone()),
                current_call = %session.call,
                "Answered call kept as standby"
            );

            if let Some(old) = displaced {
                self.transport.close(old.call);
                if let Some(stream) = old.stream {
                    stream.stop();
                }
            }
            return;
        }

        obs::record_call_answered("new_session");
        self.sessions.insert(
            offer.peer_id.clone(),
            CallSession::inbound(offer.peer_id.clone(), offer.call_id),
        );
        debug!(target: "peer_session.coordinator", "Inbound call answered");
    }

    fn on_remote_stream(&mut self, peer: &ParticipantId, call: CallId, stream: MediaStreamHandle) {
        let Some(session) = self.sessions.get_mut(peer) else {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call,
                "Stream for a peer without a session, releasing"
            );
            stream.stop();
            return;
        };

        if session.is_current(call) {
            session.mark_streaming();
            let entry = ParticipantEntry {
                id: peer.clone(),
                call_id: call,
                direction: session.direction,
                rendered_stream: stream,
            };
            if let Some(displaced) = self.registry.upsert(entry) {
                displaced.stop();
            }
            self.participants_changed();
        } else if session.is_standby(call) {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call,
                "Stream arrived on standby call"
            );
            if let Some(displaced) = session.record_standby_stream(stream) {
                displaced.stop();
            }
        } else {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call,
                "Stream for a stale call, releasing"
            );
            stream.stop();
        }
    }

    fn on_call_closed(&mut self, peer: &ParticipantId, call: CallId) {
        let Some(session) = self.sessions.get_mut(peer) else {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call,
                "Close for a peer without a session, ignoring"
            );
            return;
        };

        if session.is_standby(call) {
            if let Some(standby) = session.clear_standby(call) {
                if let Some(stream) = standby.stream {
                    stream.stop();
                }
            }
            return;
        }

        if !session.is_current(call) {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call,
                "Close for a stale call, ignoring"
            );
            return;
        }

        let direction = session.direction;
        if self.promote_standby(peer) {
            return;
        }

        if let Some(mut session) = self.sessions.shift_remove(peer) {
            session.close();
        }
        self.release_entry(peer);
        debug!(
            target: "peer_session.coordinator",
            peer_id = %peer,
            call_id = %call,
            direction = direction.as_str(),
            "Call closed by remote"
        );
        self.participants_changed();
    }

    /// Replace `peer`'s active call with its standby and render the standby's
    /// stream, if it has one. Returns `false` when there is no standby.
    fn promote_standby(&mut self, peer: &ParticipantId) -> bool {
        let Some(session) = self.sessions.get_mut(peer) else {
            return false;
        };
        let Some(promoted) = session.promote_standby() else {
            return false;
        };
        let (call_id, direction) = (session.call, session.direction);

        if let Some(stream) = promoted {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call_id,
                "Standby promoted"
            );
            let entry = ParticipantEntry {
                id: peer.clone(),
                call_id,
                direction,
                rendered_stream: stream,
            };
            if let Some(displaced) = self.registry.upsert(entry) {
                displaced.stop();
            }
        } else {
            debug!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                call_id = %call_id,
                "Standby promoted without stream"
            );
            self.release_entry(peer);
        }
        self.participants_changed();
        true
    }

    /// Close and drop the session for `peer`. Returns whether one existed.
    fn close_session(&mut self, peer: &ParticipantId) -> bool {
        let Some(mut session) = self.sessions.shift_remove(peer) else {
            return false;
        };
        if let Some(stream) = session.standby.as_ref().and_then(|s| s.stream.clone()) {
            stream.stop();
        }
        for call in session.close() {
            self.transport.close(call);
        }
        true
    }

    /// Remove the registry entry for `peer` and stop its stream.
    fn release_entry(&mut self, peer: &ParticipantId) -> bool {
        match self.registry.remove(peer) {
            Some(entry) => {
                if entry.rendered_stream.is_live() {
                    entry.rendered_stream.stop();
                }
                true
            }
            None => false,
        }
    }

    fn check_pending_timeouts(&mut self) {
        let timeout = self.config.pending_call_timeout;
        if timeout.is_zero() || self.state != CoordinatorState::Joined {
            return;
        }

        let now = Instant::now();
        let overdue: Vec<ParticipantId> = self
            .sessions
            .values()
            .filter(|s| s.is_overdue(now, timeout))
            .map(|s| s.peer_id.clone())
            .collect();

        for peer in overdue {
            obs::record_call_abandoned();

            // A standby call to the same peer takes over from the stuck one
            let stuck = self.sessions.get(&peer).map(|s| s.call);
            if self.promote_standby(&peer) {
                if let Some(call) = stuck {
                    self.transport.close(call);
                }
                warn!(
                    target: "peer_session.coordinator",
                    peer_id = %peer,
                    timeout_secs = timeout.as_secs(),
                    "Call produced no stream in time, switched to standby"
                );
                continue;
            }

            self.close_session(&peer);
            self.release_entry(&peer);
            warn!(
                target: "peer_session.coordinator",
                peer_id = %peer,
                timeout_secs = timeout.as_secs(),
                "Call produced no stream in time, abandoned"
            );
            self.emit(PresentationEvent::CallAbandoned { peer });
        }
    }

    // ------------------------------------------------------------------
    // Local media
    // ------------------------------------------------------------------

    fn request_source(&mut self, kind: SourceKind) -> SourceRequest {
        self.acquisition_seq += 1;
        let seq = self.acquisition_seq;

        if let Some(superseded) = self.pending_acquisition.take() {
            debug!(
                target: "peer_session.media",
                seq = superseded.seq,
                kind = superseded.kind.as_str(),
                "Source request superseded"
            );
        }

        if kind == self.media.source_kind() {
            return SourceRequest::Unchanged;
        }

        if kind == SourceKind::Camera {
            if let Some(camera) = self.media.reusable_camera().cloned() {
                self.commit_swap(camera, kind);
                return SourceRequest::Committed;
            }
        }

        self.pending_acquisition = Some(PendingAcquisition { seq, kind });
        self.spawn_acquisition(seq, kind);
        SourceRequest::Pending { seq }
    }

    fn spawn_acquisition(&self, seq: u64, kind: SourceKind) {
        let devices = Arc::clone(&self.devices);
        let sender = self.self_sender.clone();
        let cancel = self.acquisitions_token.clone();

        debug!(
            target: "peer_session.media",
            seq,
            kind = kind.as_str(),
            "Acquiring source"
        );

        tokio::spawn(
            async move {
                let result = tokio::select! {
                    () = cancel.cancelled() => return,
                    result = devices.acquire(kind) => result,
                };
                deliver_acquisition(&sender, seq, kind, result).await;
            }
            .instrument(tracing::debug_span!("peer_session.acquire", seq, kind = kind.as_str())),
        );
    }

    #[instrument(skip_all, fields(seq = seq, kind = kind.as_str()))]
    fn handle_acquisition_resolved(
        &mut self,
        seq: u64,
        kind: SourceKind,
        result: Result<MediaStreamHandle, MediaError>,
    ) {
        let current = self.pending_acquisition.filter(|p| p.seq == seq);
        if current.is_none() {
            if let Ok(stream) = result {
                stream.stop();
                obs::record_stale_acquisition();
                debug!(
                    target: "peer_session.media",
                    error = %SessionError::StaleAcquisition,
                    "Discarded superseded acquisition"
                );
            }
            return;
        }
        self.pending_acquisition = None;

        let error = match result {
            Ok(stream) if stream.is_live() => {
                self.commit_swap(stream, kind);
                return;
            }
            Ok(_) => SessionError::MediaUnavailable(format!("{} stream ended", kind.as_str())),
            Err(e) => SessionError::from(e),
        };

        let label = match error {
            SessionError::MediaAccessDenied(_) => "access_denied",
            _ => "unavailable",
        };
        obs::record_media_failure(label);
        warn!(
            target: "peer_session.media",
            error = %error,
            "Source acquisition failed, keeping current source"
        );
        self.emit(PresentationEvent::MediaFailure(error));
    }

    fn commit_swap(&mut self, stream: MediaStreamHandle, kind: SourceKind) {
        let previous = self.media.swap_source(stream, kind);
        info!(
            target: "peer_session.media",
            from = previous.source_kind.as_str(),
            to = kind.as_str(),
            "Outgoing source changed"
        );
        self.emit(PresentationEvent::LocalMediaChanged);

        if self.state == CoordinatorState::Joined {
            self.signaling.announce_share();
        }
    }

    fn set_track_enabled(&mut self, kind: TrackKind, enabled: Option<bool>) -> Option<bool> {
        let target = enabled.unwrap_or(!self.media.is_enabled(kind));
        let applied = match kind {
            TrackKind::Audio => self.media.set_audio_enabled(target),
            TrackKind::Video => self.media.set_video_enabled(target),
        };

        if applied {
            self.emit(PresentationEvent::LocalMediaChanged);
            Some(target)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Chat and views
    // ------------------------------------------------------------------

    fn send_chat(&self, text: &str) -> Result<bool, SessionError> {
        match (&self.state, &self.local_id) {
            (CoordinatorState::Joined, Some(local)) => {
                self.chat.send(self.signaling.as_ref(), local, text)
            }
            _ => Err(SessionError::NotJoined),
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        let media = self.media.state();
        CallSnapshot {
            state: self.state,
            local_id: self.local_id.clone(),
            room_id: self.room.clone(),
            local_media: LocalMediaView {
                stream_id: media.current_stream.id(),
                source_kind: media.source_kind,
                audio_enabled: media.audio_enabled,
                video_enabled: media.video_enabled,
                acquisition_pending: self.pending_acquisition.map(|p| p.kind),
            },
            participants: self
                .registry
                .values()
                .map(|entry| ParticipantView {
                    id: entry.id.clone(),
                    call_id: entry.call_id,
                    stream_id: entry.rendered_stream.id(),
                    stream: entry.rendered_stream.clone(),
                })
                .collect(),
            sessions: self
                .sessions
                .values()
                .map(|s| SessionView {
                    peer_id: s.peer_id.clone(),
                    call_id: s.call,
                    direction: s.direction,
                    state: s.state,
                    has_standby: s.standby.is_some(),
                })
                .collect(),
        }
    }

    fn participants_changed(&self) {
        obs::set_participants_active(self.registry.len());
        self.emit(PresentationEvent::ParticipantsChanged);
    }

    fn emit(&self, event: PresentationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn teardown(&mut self, reason: TerminationReason) {
        if self.state == CoordinatorState::Left {
            return;
        }

        self.acquisitions_token.cancel();
        self.pending_acquisition = None;

        let peers: Vec<ParticipantId> = self.sessions.keys().cloned().collect();
        for peer in &peers {
            self.close_session(peer);
        }
        for entry in self.registry.drain() {
            if entry.rendered_stream.is_live() {
                entry.rendered_stream.stop();
            }
        }
        self.media.release();

        self.signaling.disconnect();
        self.transport.destroy();
        self.state = CoordinatorState::Left;
        obs::set_participants_active(0);

        info!(
            target: "peer_session.coordinator",
            reason = ?reason,
            closed_sessions = peers.len(),
            "Left call"
        );
        self.emit(PresentationEvent::Terminated { reason });
    }
}

/// Hand an acquisition result back to the coordinator, releasing the stream
/// if the coordinator is gone.
async fn deliver_acquisition(
    sender: &mpsc::WeakSender<CoordinatorMessage>,
    seq: u64,
    kind: SourceKind,
    result: Result<MediaStreamHandle, MediaError>,
) {
    let Some(sender) = sender.upgrade() else {
        if let Ok(stream) = result {
            stream.stop();
        }
        return;
    };

    if let Err(mpsc::error::SendError(message)) = sender
        .send(CoordinatorMessage::AcquisitionResolved { seq, kind, result })
        .await
    {
        if let CoordinatorMessage::AcquisitionResolved {
            result: Ok(stream), ..
        } = message
        {
            stream.stop();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSignaling {
        joins: Mutex<Vec<(RoomId, ParticipantId)>>,
        chats: Mutex<Vec<String>>,
        shares: Mutex<u32>,
        disconnects: Mutex<u32>,
    }

    impl SignalingChannel for FakeSignaling {
        fn announce_join(&self, room: &RoomId, local: &ParticipantId) {
            self.joins.lock().unwrap().push((room.clone(), local.clone()));
        }
        fn send_chat(&self, _sender: &ParticipantId, text: &str) {
            self.chats.lock().unwrap().push(text.to_string());
        }
        fn announce_share(&self) {
            *self.shares.lock().unwrap() += 1;
        }
        fn disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        placed: Mutex<Vec<(ParticipantId, CallId)>>,
        answered: Mutex<Vec<CallId>>,
        closed: Mutex<Vec<CallId>>,
        destroyed: Mutex<bool>,
    }

    impl PeerTransport for FakeTransport {
        fn place_call(
            &self,
            peer: &ParticipantId,
            _stream: &MediaStreamHandle,
        ) -> Result<CallId, TransportError> {
            let call = CallId::new();
            self.placed.lock().unwrap().push((peer.clone(), call));
            Ok(call)
        }
        fn answer(&self, offer: &CallOffer, _stream: &MediaStreamHandle) -> Result<(), TransportError> {
            self.answered.lock().unwrap().push(offer.call_id);
            Ok(())
        }
        fn close(&self, call: CallId) {
            self.closed.lock().unwrap().push(call);
        }
        fn destroy(&self) {
            *self.destroyed.lock().unwrap() = true;
        }
    }

    struct InstantDevices;

    #[async_trait]
    impl MediaDevices for InstantDevices {
        async fn acquire(&self, kind: SourceKind) -> Result<MediaStreamHandle, MediaError> {
            match kind {
                SourceKind::Screen => Ok(MediaStreamHandle::new(&[TrackKind::Video])),
                SourceKind::Camera => Err(MediaError::Unavailable("no camera".to_string())),
            }
        }
    }

    struct Harness {
        handle: CoordinatorHandle,
        signaling: Arc<FakeSignaling>,
        transport: Arc<FakeTransport>,
        camera: MediaStreamHandle,
        task: JoinHandle<()>,
    }

    fn spawn_with(config: Config) -> Harness {
        let signaling = Arc::new(FakeSignaling::default());
        let transport = Arc::new(FakeTransport::default());
        let camera = MediaStreamHandle::new(&[TrackKind::Audio, TrackKind::Video]);
        let ports = Ports::new(signaling.clone(), transport.clone(), Arc::new(InstantDevices));
        let (handle, task) =
            CoordinatorActor::spawn(config, ports, camera.clone(), CancellationToken::new());
        Harness {
            handle,
            signaling,
            transport,
            camera,
            task,
        }
    }

    fn spawn() -> Harness {
        spawn_with(Config::default())
    }

    /// The `n`th placed call, once every queued message has been handled.
    async fn placed_call(h: &Harness, n: usize) -> CallId {
        h.handle.snapshot().await.unwrap();
        h.transport.placed.lock().unwrap().get(n).unwrap().1
    }

    async fn joined(room: &str, local: &str) -> Harness {
        let h = spawn();
        h.handle
            .transport_event(TransportEvent::IdentityReady(ParticipantId::from(local)))
            .await
            .unwrap();
        h.handle.join(RoomId::from(room)).await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_join_waits_for_identity() {
        let h = spawn();

        let outcome = h.handle.join(RoomId::from("room1")).await.unwrap();
        assert_eq!(outcome, JoinOutcome::AwaitingIdentity);
        assert!(h.signaling.joins.lock().unwrap().is_empty());

        h.handle
            .transport_event(TransportEvent::IdentityReady(ParticipantId::from("a")))
            .await
            .unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();

        assert_eq!(snapshot.state, CoordinatorState::Joined);
        assert_eq!(
            h.signaling.joins.lock().unwrap().as_slice(),
            &[(RoomId::from("room1"), ParticipantId::from("a"))]
        );
    }

    #[tokio::test]
    async fn test_second_join_same_room_is_noop() {
        let h = joined("room1", "a").await;

        let outcome = h.handle.join(RoomId::from("room1")).await.unwrap();

        assert_eq!(outcome, JoinOutcome::AlreadyJoined);
        assert_eq!(h.signaling.joins.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_join_different_room_rejected() {
        let h = joined("room1", "a").await;

        let result = h.handle.join(RoomId::from("room2")).await;

        assert_eq!(result, Err(SessionError::AlreadyInRoom(RoomId::from("room1"))));
    }

    #[tokio::test]
    async fn test_remote_join_before_joined_is_ignored() {
        let h = spawn();
        h.handle
            .signaling_event(SignalingEvent::ParticipantJoined(ParticipantId::from("b")))
            .await
            .unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();

        assert!(snapshot.sessions.is_empty());
        assert!(h.transport.placed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_offer_while_idle_is_closed() {
        let h = spawn();
        let call = CallId::new();
        h.handle
            .transport_event(TransportEvent::CallOffer(CallOffer {
                call_id: call,
                peer_id: ParticipantId::from("c"),
            }))
            .await
            .unwrap();
        let snapshot = h.handle.snapshot().await.unwrap();

        assert!(snapshot.sessions.is_empty());
        assert_eq!(h.transport.closed.lock().unwrap().as_slice(), &[call]);
    }

    #[tokio::test]
    async fn test_stale_close_does_not_remove_reconnected_peer() {
        let h = joined("room1", "a").await;
        let b = ParticipantId::from("b");
        h.handle
            .signaling_event(SignalingEvent::ParticipantJoined(b.clone()))
            .await
            .unwrap();
        let first_call = placed_call(&h, 0).await;

        h.handle
            .signaling_event(SignalingEvent::ShareAnnounced(b.clone()))
            .await
            .unwrap();
        let second_call = placed_call(&h, 1).await;
        h.handle
            .transport_event(TransportEvent::Closed {
                peer_id: b.clone(),
                call_id: first_call,
            })
            .await
            .unwrap();

        let snapshot = h.handle.snapshot().await.unwrap();
        let session = snapshot.session(&b).unwrap();
        assert_eq!(session.call_id, second_call);
        assert_eq!(session.state, CallState::Pending);
    }

    #[tokio::test]
    async fn test_toggle_audio_flips_and_reports() {
        let h = spawn();

        assert_eq!(h.handle.toggle_audio().await.unwrap(), Some(false));
        assert_eq!(h.camera.track_enabled(TrackKind::Audio), Some(false));
        assert_eq!(h.handle.toggle_audio().await.unwrap(), Some(true));
        assert_eq!(h.handle.set_video_enabled(false).await.unwrap(), Some(false));

        let snapshot = h.handle.snapshot().await.unwrap();
        assert!(snapshot.local_media.audio_enabled);
        assert!(!snapshot.local_media.video_enabled);
    }

    #[tokio::test]
    async fn test_screen_share_commits_and_announces() {
        let h = joined("room1", "a").await;
        let mut events = h.handle.subscribe();

        let request = h.handle.request_screen_share().await.unwrap();
        assert!(matches!(request, SourceRequest::Pending { .. }));

        loop {
            if events.recv().await.unwrap() == PresentationEvent::LocalMediaChanged {
                break;
            }
        }
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.local_media.source_kind, SourceKind::Screen);
        assert_eq!(snapshot.local_media.acquisition_pending, None);
        assert_eq!(*h.signaling.shares.lock().unwrap(), 1);
        assert!(h.camera.is_live());

        // Camera is cached, so swapping back commits synchronously
        let request = h.handle.request_camera_share().await.unwrap();
        assert_eq!(request, SourceRequest::Committed);
        assert_eq!(*h.signaling.shares.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_request_current_source_is_unchanged() {
        let h = spawn();
        let request = h.handle.request_camera_share().await.unwrap();
        assert_eq!(request, SourceRequest::Unchanged);
    }

    #[tokio::test]
    async fn test_chat_requires_joined_room() {
        let h = spawn();
        assert_eq!(h.handle.send_chat("hi").await, Err(SessionError::NotJoined));

        let h = joined("room1", "a").await;
        assert_eq!(h.handle.send_chat("hi").await, Ok(true));
        assert_eq!(h.handle.send_chat("  ").await, Ok(false));
        assert_eq!(h.signaling.chats.lock().unwrap().as_slice(), &["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_leave_tears_down_everything() {
        let h = joined("room1", "a").await;
        let mut events = h.handle.subscribe();
        let b = ParticipantId::from("b");
        h.handle
            .signaling_event(SignalingEvent::ParticipantJoined(b.clone()))
            .await
            .unwrap();
        let call = placed_call(&h, 0).await;
        let remote = MediaStreamHandle::new(&[TrackKind::Audio, TrackKind::Video]);
        h.handle
            .transport_event(TransportEvent::Stream {
                peer_id: b,
                call_id: call,
                stream: remote.clone(),
            })
            .await
            .unwrap();

        h.handle.leave().await.unwrap();
        h.task.await.unwrap();

        assert_eq!(h.transport.closed.lock().unwrap().as_slice(), &[call]);
        assert!(*h.transport.destroyed.lock().unwrap());
        assert_eq!(*h.signaling.disconnects.lock().unwrap(), 1);
        assert_eq!(h.camera.stop_count(), 1);
        assert_eq!(remote.stop_count(), 1);
        assert!(h.handle.is_closed());
        assert_eq!(h.handle.snapshot().await, Err(SessionError::SessionLeft));

        let mut terminated = None;
        while let Ok(event) = events.try_recv() {
            if let PresentationEvent::Terminated { reason } = event {
                terminated = Some(reason);
            }
        }
        assert_eq!(terminated, Some(TerminationReason::Left));
    }

    #[tokio::test]
    async fn test_cancel_releases_local_media() {
        let h = spawn();
        h.handle.cancel();
        assert!(h.handle.is_cancelled());

        h.task.await.unwrap();

        assert_eq!(h.camera.stop_count(), 1);
        assert!(*h.transport.destroyed.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_timeout_zero_never_abandons() {
        let config = Config {
            pending_call_timeout: Duration::ZERO,
            ..Config::default()
        };
        let h = spawn_with(config);
        h.handle
            .transport_event(TransportEvent::IdentityReady(ParticipantId::from("a")))
            .await
            .unwrap();
        h.handle.join(RoomId::from("room1")).await.unwrap();
        h.handle
            .signaling_event(SignalingEvent::ParticipantJoined(ParticipantId::from("b")))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions.first().unwrap().state, CallState::Pending);
    }
}
