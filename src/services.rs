//! Consumed collaborator contracts.
//!
//! Narrow injected traits for the managers the playback core talks to, so
//! the core stays testable and platform-free. None of them are implemented
//! in this crate.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::{
    download::DownloadBuffer,
    error::Result,
    track::{Song, Track},
};

/// Outcome of resolving a song against the metadata/rights service.
#[derive(Clone, Debug)]
pub struct ResolvedPlayback {
    /// Best-matching track for the requested media type.
    pub track: Track,
    /// Where the track's bytes can be fetched or found.
    pub uri: Url,
    /// Whether the bytes are already on this device.
    pub is_local: bool,
}

/// Resolves a song to the best-matching playable track.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolves `song` for the requested media type.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotFound`] when no playable track exists.
    ///
    /// [`ErrorKind::NotFound`]: crate::error::ErrorKind::NotFound
    async fn resolve(&self, song: &Song, want_video: bool) -> Result<ResolvedPlayback>;
}

/// Starts (or joins) a download and exposes it as a [`DownloadBuffer`].
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Begins downloading `uri` for `track_id` immediately.
    ///
    /// May join an existing in-flight download for the same id. The await
    /// completes once the download has started, not once it has finished.
    async fn download_now(&self, track_id: &str, uri: &Url) -> Result<Arc<dyn DownloadBuffer>>;
}

/// Why playback of a track ended.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum PlaybackEndedReason {
    /// The track played to its natural end.
    Ended,
    /// The user skipped to another track.
    Skipped,
    /// Playback was stopped explicitly.
    Stopped,
}

/// Report sent to the scrobble collaborator when playback ends.
#[derive(Clone, Debug)]
pub struct PlaybackEndedEvent {
    pub song: Song,
    pub track_id: String,
    pub context: String,
    /// Playback position in seconds at the moment the track ended.
    pub position: f64,
    pub reason: PlaybackEndedReason,
}

/// Now-playing and playback-ended reporting.
pub trait ScrobbleReporter: Send + Sync {
    fn set_now_playing(&self, song: &Song, track_id: &str);

    fn playback_ended(&self, event: PlaybackEndedEvent);
}

/// External play queue; consulted on natural end and unrecoverable failure.
#[async_trait]
pub trait QueueManager: Send + Sync {
    /// Advances the queue to the next track.
    async fn next_track(&self);
}

/// Persisted playback settings owned by the embedding application.
pub trait SettingsStore: Send + Sync {
    fn current_track_id(&self) -> String;
    fn set_current_track_id(&self, id: &str);

    /// Last known playback position as a fraction of the duration.
    fn current_playback_percent(&self) -> f32;
    fn set_current_playback_percent(&self, percent: f32);

    fn current_playback_is_video(&self) -> bool;
    fn set_current_playback_is_video(&self, video: bool);

    /// Opaque playback context (playlist, album, radio) for reporting.
    fn current_playback_context(&self) -> String;
    fn set_current_playback_context(&self, context: &str);
}
