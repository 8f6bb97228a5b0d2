//! Stream and identifier fixtures.

use common::types::{ParticipantId, RoomId};
use peer_session::media::{MediaStreamHandle, TrackKind};

/// Participant id from a short name.
#[must_use]
pub fn pid(name: &str) -> ParticipantId {
    ParticipantId::from(name)
}

/// Room id from a short name.
#[must_use]
pub fn room(name: &str) -> RoomId {
    RoomId::from(name)
}

/// A live camera stream with one audio and one video track.
#[must_use]
pub fn camera_stream() -> MediaStreamHandle {
    MediaStreamHandle::new(&[TrackKind::Audio, TrackKind::Video])
}

/// A live screen capture without audio.
#[must_use]
pub fn screen_stream() -> MediaStreamHandle {
    MediaStreamHandle::new(&[TrackKind::Video])
}

/// A live screen capture that includes system audio.
#[must_use]
pub fn screen_stream_with_audio() -> MediaStreamHandle {
    MediaStreamHandle::new(&[TrackKind::Audio, TrackKind::Video])
}

/// A live stream with only an audio track.
#[must_use]
pub fn audio_only_stream() -> MediaStreamHandle {
    MediaStreamHandle::new(&[TrackKind::Audio])
}

/// A stream that has already ended.
#[must_use]
pub fn ended_stream() -> MediaStreamHandle {
    let stream = screen_stream();
    stream.stop();
    stream
}
