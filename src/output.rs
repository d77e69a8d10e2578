//! Consumed contract of the media decode/render pipeline.
//!
//! The core never decodes or renders anything itself. It drives an external
//! output through [`MediaOutput`]: load an item, play/pause/seek, and read
//! back rate, time and duration so the watchdog can judge pipeline health.
//!
//! A [`PlayableItem`] is the opaque handle the preparation pipeline hands
//! over once a song is resolved: either a local file URL or a virtual
//! streaming resource served by the bridge.

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

/// Where a playable item gets its bytes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemSource {
    /// A finished file reachable through a regular file URL.
    LocalFile(Url),

    /// A virtual resource served by the streaming bridge.
    Streaming {
        /// Track id used to route loading requests back to the session.
        track_id: String,
        /// The `streaming://` URL handed to the media pipeline.
        url: Url,
    },
}

/// A resolved, ready-to-play media resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayableItem {
    source: ItemSource,
}

impl PlayableItem {
    /// Creates an item backed by a local file or device-library URL.
    #[must_use]
    pub fn local(url: Url) -> Self {
        Self {
            source: ItemSource::LocalFile(url),
        }
    }

    /// Creates an item backed by the streaming bridge.
    #[must_use]
    pub fn streaming(track_id: impl Into<String>, url: Url) -> Self {
        Self {
            source: ItemSource::Streaming {
                track_id: track_id.into(),
                url,
            },
        }
    }

    #[must_use]
    pub fn source(&self) -> &ItemSource {
        &self.source
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.source, ItemSource::Streaming { .. })
    }
}

impl fmt::Display for PlayableItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ItemSource::LocalFile(url) => write!(f, "local item {url}"),
            ItemSource::Streaming { url, .. } => write!(f, "streaming item {url}"),
        }
    }
}

/// The media pipeline surface the coordinator drives.
///
/// Implementations wrap the platform player. All methods must be cheap and
/// non-blocking except [`wait_until_ready`], which is the readiness probe
/// awaited during preparation.
///
/// [`wait_until_ready`]: MediaOutput::wait_until_ready
#[async_trait]
pub trait MediaOutput: Send + Sync {
    /// Waits until `item` is ready for playback.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DeadlineExceeded`] when the item never becomes
    /// ready, or the item's own failure.
    ///
    /// [`ErrorKind::DeadlineExceeded`]: crate::error::ErrorKind::DeadlineExceeded
    async fn wait_until_ready(&self, item: &PlayableItem) -> Result<()>;

    /// Replaces the current item.
    fn load(&self, item: PlayableItem);

    /// Appends an item after the current one for gapless transition.
    fn enqueue(&self, item: PlayableItem);

    /// Starts or resumes playback of the current item.
    fn play(&self);

    /// Pauses playback, keeping the current item.
    fn pause(&self);

    /// Seeks the current item to an absolute time in seconds.
    fn seek(&self, seconds: f64);

    /// Current playback rate; zero when paused or starved.
    fn rate(&self) -> f32;

    /// Current playback time of the item in seconds.
    fn current_time(&self) -> f64;

    /// Duration of the current item in seconds, zero when unknown.
    fn duration(&self) -> f64;

    /// Whether an item is currently loaded.
    fn has_current_item(&self) -> bool;

    /// Whether the current item has decoded tracks available.
    fn has_decoded_tracks(&self) -> bool;

    /// Whether the current item is in a failed state.
    fn item_failed(&self) -> bool;
}
