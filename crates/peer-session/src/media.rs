//! Local and remote media handles, and the holder of the outgoing stream.
//!
//! A [`MediaStreamHandle`] is an opaque, cheaply cloneable reference to a set
//! of tracks. Clones refer to the same tracks; exactly one owner is
//! responsible for stopping them. The handle records how many times a stop
//! was requested so a double release is visible in logs and tests.
//!
//! [`MediaSourceHolder`] owns the single [`LocalMediaState`] and is only
//! mutated by the coordinator.

use common::types::{StreamId, TrackId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Kind of a single media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Returns the track kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Where the outgoing video comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Camera,
    Screen,
}

impl SourceKind {
    /// Returns the source kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Camera => "camera",
            SourceKind::Screen => "screen",
        }
    }

    /// The other source kind.
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            SourceKind::Camera => SourceKind::Screen,
            SourceKind::Screen => SourceKind::Camera,
        }
    }
}

/// One audio or video track inside a stream.
#[derive(Debug)]
pub struct MediaTrack {
    id: TrackId,
    kind: TrackKind,
    enabled: AtomicBool,
}

impl MediaTrack {
    fn new(kind: TrackKind) -> Self {
        Self {
            id: TrackId::new(),
            kind,
            enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn id(&self) -> TrackId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

struct StreamInner {
    id: StreamId,
    tracks: Vec<MediaTrack>,
    stop_requests: AtomicU32,
}

/// Opaque handle to a live set of audio/video tracks.
///
/// Equality is identity: two handles are equal when they refer to the same
/// underlying stream.
#[derive(Clone)]
pub struct MediaStreamHandle {
    inner: Arc<StreamInner>,
}

impl MediaStreamHandle {
    /// Create a live stream with one enabled track per listed kind.
    #[must_use]
    pub fn new(kinds: &[TrackKind]) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: StreamId::new(),
                tracks: kinds.iter().copied().map(MediaTrack::new).collect(),
                stop_requests: AtomicU32::new(0),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    /// Kinds of the tracks in this stream, in track order.
    #[must_use]
    pub fn track_kinds(&self) -> Vec<TrackKind> {
        self.inner.tracks.iter().map(MediaTrack::kind).collect()
    }

    #[must_use]
    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.inner.tracks.iter().any(|t| t.kind == kind)
    }

    /// Enabled flag of the first track of `kind`, if the stream has one.
    #[must_use]
    pub fn track_enabled(&self, kind: TrackKind) -> Option<bool> {
        self.inner
            .tracks
            .iter()
            .find(|t| t.kind == kind)
            .map(MediaTrack::is_enabled)
    }

    /// Set the enabled flag on every track of `kind`.
    ///
    /// Returns `false` (and changes nothing) when the stream has no such track.
    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        let mut found = false;
        for track in self.inner.tracks.iter().filter(|t| t.kind == kind) {
            track.set_enabled(enabled);
            found = true;
        }
        found
    }

    /// Whether the tracks are still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.stop_requests.load(Ordering::SeqCst) == 0
    }

    /// Stop all tracks.
    ///
    /// Returns `true` the first time. Later calls change nothing, return
    /// `false` and are logged as a double release.
    pub fn stop(&self) -> bool {
        let previous = self.inner.stop_requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            debug!(
                target: "peer_session.media",
                stream_id = %self.inner.id,
                "Stream stopped"
            );
            true
        } else {
            warn!(
                target: "peer_session.media",
                stream_id = %self.inner.id,
                stop_requests = previous + 1,
                "Stop requested on an already stopped stream"
            );
            false
        }
    }

    /// Number of times `stop` has been called on this stream.
    #[must_use]
    pub fn stop_count(&self) -> u32 {
        self.inner.stop_requests.load(Ordering::SeqCst)
    }
}

impl PartialEq for MediaStreamHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MediaStreamHandle {}

impl fmt::Debug for MediaStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStreamHandle")
            .field("id", &self.inner.id)
            .field("tracks", &self.track_kinds())
            .field("live", &self.is_live())
            .finish()
    }
}

/// The client's outgoing media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMediaState {
    pub current_stream: MediaStreamHandle,
    pub source_kind: SourceKind,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

/// Owns the outgoing stream and the cached camera stream.
///
/// Camera streams are kept for reuse when swapping back from a screen share;
/// only screen streams are stopped when superseded.
#[derive(Debug)]
pub struct MediaSourceHolder {
    state: LocalMediaState,
    camera: Option<MediaStreamHandle>,
}

impl MediaSourceHolder {
    /// Start with the camera stream captured at startup.
    #[must_use]
    pub fn new(camera_stream: MediaStreamHandle) -> Self {
        let state = LocalMediaState {
            audio_enabled: camera_stream.track_enabled(TrackKind::Audio).unwrap_or(true),
            video_enabled: camera_stream.track_enabled(TrackKind::Video).unwrap_or(true),
            current_stream: camera_stream.clone(),
            source_kind: SourceKind::Camera,
        };

        Self {
            state,
            camera: Some(camera_stream),
        }
    }

    #[must_use]
    pub fn state(&self) -> &LocalMediaState {
        &self.state
    }

    #[must_use]
    pub fn current_stream(&self) -> &MediaStreamHandle {
        &self.state.current_stream
    }

    #[must_use]
    pub fn source_kind(&self) -> SourceKind {
        self.state.source_kind
    }

    /// The cached camera stream, if it is still live.
    #[must_use]
    pub fn reusable_camera(&self) -> Option<&MediaStreamHandle> {
        self.camera.as_ref().filter(|s| s.is_live())
    }

    /// Install `new_stream` as the outgoing stream.
    ///
    /// The previous stream is stopped only when it was a screen capture.
    /// The user's audio/video enabled preferences carry over to the new
    /// stream. Returns the state as it was before the swap.
    pub fn swap_source(&mut self, new_stream: MediaStreamHandle, kind: SourceKind) -> LocalMediaState {
        let previous = self.state.clone();

        if new_stream == previous.current_stream {
            self.state.source_kind = kind;
            return previous;
        }

        if previous.source_kind == SourceKind::Screen {
            previous.current_stream.stop();
        }

        new_stream.set_track_enabled(TrackKind::Audio, previous.audio_enabled);
        new_stream.set_track_enabled(TrackKind::Video, previous.video_enabled);

        if kind == SourceKind::Camera {
            self.camera = Some(new_stream.clone());
        }

        self.state = LocalMediaState {
            current_stream: new_stream,
            source_kind: kind,
            audio_enabled: previous.audio_enabled,
            video_enabled: previous.video_enabled,
        };

        debug!(
            target: "peer_session.media",
            from = previous.source_kind.as_str(),
            to = kind.as_str(),
            stream_id = %self.state.current_stream.id(),
            "Outgoing source swapped"
        );

        previous
    }

    /// Enable or disable the outgoing audio track.
    ///
    /// No-op returning `false` when the current stream has no audio track.
    pub fn set_audio_enabled(&mut self, enabled: bool) -> bool {
        self.set_enabled(TrackKind::Audio, enabled)
    }

    /// Enable or disable the outgoing video track.
    ///
    /// No-op returning `false` when the current stream has no video track.
    pub fn set_video_enabled(&mut self, enabled: bool) -> bool {
        self.set_enabled(TrackKind::Video, enabled)
    }

    fn set_enabled(&mut self, kind: TrackKind, enabled: bool) -> bool {
        if !self.state.current_stream.set_track_enabled(kind, enabled) {
            debug!(
                target: "peer_session.media",
                track = kind.as_str(),
                "Current stream has no such track, toggle ignored"
            );
            return false;
        }

        match kind {
            TrackKind::Audio => self.state.audio_enabled = enabled,
            TrackKind::Video => self.state.video_enabled = enabled,
        }
        true
    }

    /// Current enabled preference for a track kind.
    #[must_use]
    pub fn is_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.state.audio_enabled,
            TrackKind::Video => self.state.video_enabled,
        }
    }

    /// Stop every local stream this holder owns.
    ///
    /// Used when the session ends; the holder must not be used afterwards.
    pub fn release(&mut self) {
        if self.state.current_stream.is_live() {
            self.state.current_stream.stop();
        }
        if let Some(camera) = self.camera.take() {
            if camera != self.state.current_stream && camera.is_live() {
                camera.stop();
            }
        }
    }
}
