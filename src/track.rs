//! Song and track metadata for the playback core.
//!
//! A [`Song`] is the logical unit the user plays; it does not know where its
//! bytes live. A [`Track`] is one concrete encoded representation of a song
//! (audio or video) together with its storage kind and, once known, its byte
//! length.
//!
//! Remote tracks are addressed inside the engine through a synthetic
//! `streaming://` URL. That scheme exists only to route media-pipeline
//! loading requests back to the [`StreamingResourceBridge`]; it is never
//! persisted or shown to users.
//!
//! [`StreamingResourceBridge`]: crate::bridge::StreamingResourceBridge

use std::fmt;

use url::Url;

use crate::error::Result;

/// URL scheme used to address virtual streaming resources.
pub const STREAMING_SCHEME: &str = "streaming";

/// Logical reference to playable content.
///
/// Identity only; resolution to a concrete [`Track`] happens in the
/// preparation pipeline.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Song {
    /// Stable identifier of the song.
    pub id: String,
    /// Title for logging and now-playing reporting.
    pub title: String,
    /// Artist for logging and now-playing reporting.
    pub artist: String,
}

impl Song {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: \"{} - {}\"", self.id, self.artist, self.title)
    }
}

/// Media type of a track.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum MediaType {
    #[default]
    Audio,
    Video,
}

/// Where the bytes of a track are stored.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum ServiceKind {
    /// A file on the local filesystem.
    LocalFile,
    /// An item in the device's media library.
    DeviceLibrary,
    /// A remote server, streamed progressively.
    #[default]
    Remote,
}

/// One concrete encoded representation of a [`Song`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Track {
    id: String,
    extension: String,
    media_type: MediaType,
    service: ServiceKind,
    byte_len: Option<u64>,
}

impl Track {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        extension: impl Into<String>,
        media_type: MediaType,
        service: ServiceKind,
    ) -> Self {
        Self {
            id: id.into(),
            extension: extension.into(),
            media_type,
            service,
            byte_len: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[must_use]
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    #[must_use]
    pub fn service(&self) -> ServiceKind {
        self.service
    }

    /// Total size of the encoded track in bytes, once known.
    #[must_use]
    pub fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }

    pub fn set_byte_len(&mut self, byte_len: u64) {
        self.byte_len = Some(byte_len);
    }

    /// The virtual URL under which the bridge serves this track.
    ///
    /// # Errors
    ///
    /// Returns an error if the track id or extension produce an unparsable
    /// URL.
    pub fn streaming_url(&self) -> Result<Url> {
        let url = format!(
            "{STREAMING_SCHEME}://localhost/{}.{}",
            self.id, self.extension
        )
        .parse::<Url>()?;
        Ok(url)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.extension)
    }
}

/// Extracts the track id from a virtual streaming URL.
///
/// Returns `None` when the URL does not use the streaming scheme or has no
/// usable path. The extension is stripped at the first dot, mirroring how
/// the URL is built in [`Track::streaming_url`].
#[must_use]
pub fn streaming_track_id(url: &Url) -> Option<String> {
    if url.scheme() != STREAMING_SCHEME {
        return None;
    }

    let id = url.path().trim_matches('/');
    let id = match id.find('.') {
        Some(dot) => &id[..dot],
        None => id,
    };

    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}

/// Point-in-time playback position snapshot published to observers.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TrackPosition {
    /// Current playback time in seconds.
    pub current_time: f64,
    /// Total duration in seconds, zero when not yet known.
    pub duration: f64,
}
