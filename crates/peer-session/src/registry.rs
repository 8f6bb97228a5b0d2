//! Remote participant registry.
//!
//! Maps each remote participant to its rendered stream and the call it came
//! from. Entries are kept in insertion order so the presentation layer can
//! lay out a stable grid. At most one entry exists per participant.

use crate::actors::session::CallDirection;
use crate::media::MediaStreamHandle;

use common::types::{CallId, ParticipantId};
use indexmap::IndexMap;
use tracing::debug;

/// One remote participant as rendered locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    pub id: ParticipantId,
    /// Call that delivered `rendered_stream`.
    pub call_id: CallId,
    pub direction: CallDirection,
    pub rendered_stream: MediaStreamHandle,
}

/// Keyed, insertion-ordered registry of remote participants.
///
/// Written only by the coordinator.
#[derive(Debug, Default)]
pub struct RemoteParticipantRegistry {
    entries: IndexMap<ParticipantId, ParticipantEntry>,
}

impl RemoteParticipantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `entry.id`.
    ///
    /// A replaced entry keeps its position. Returns the displaced stream when
    /// it differs from the new one; the caller is responsible for closing it.
    #[must_use = "a displaced stream must be released"]
    pub fn upsert(&mut self, entry: ParticipantEntry) -> Option<MediaStreamHandle> {
        let id = entry.id.clone();
        let new_stream = entry.rendered_stream.clone();

        match self.entries.insert(id.clone(), entry) {
            Some(old) if old.rendered_stream != new_stream => {
                debug!(
                    target: "peer_session.registry",
                    peer_id = %id,
                    old_stream = %old.rendered_stream.id(),
                    new_stream = %new_stream.id(),
                    "Replaced rendered stream"
                );
                Some(old.rendered_stream)
            }
            Some(_) => None,
            None => {
                debug!(
                    target: "peer_session.registry",
                    peer_id = %id,
                    stream_id = %new_stream.id(),
                    participants = self.entries.len(),
                    "Participant registered"
                );
                None
            }
        }
    }

    /// Remove and return the entry for `id`, if any.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<ParticipantEntry> {
        let removed = self.entries.shift_remove(id);
        if removed.is_some() {
            debug!(
                target: "peer_session.registry",
                peer_id = %id,
                participants = self.entries.len(),
                "Participant removed"
            );
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&ParticipantEntry> {
        self.entries.get(id)
    }

    /// Entries in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &ParticipantEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, in insertion order.
    pub fn drain(&mut self) -> Vec<ParticipantEntry> {
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }
}
