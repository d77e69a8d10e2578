//! Per-song playback sessions and the shared session registry.
//!
//! A [`PlaybackData`] tracks one playback attempt of one song: the resolved
//! track, the download buffer serving it, and a cancellation token scoped to
//! the session. Starting a new song cancels the previous song's entire
//! session; a cancelled session is never read from again.
//!
//! [`Sessions`] is the registry shared between the coordinator, the
//! preparation pipeline and the streaming bridge. All maps are mutated under
//! short-held locks; long-running work never happens while a lock is held.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio_util::sync::CancellationToken;

use crate::{
    download::DownloadBuffer,
    track::{Song, Track},
};

/// Session state for one song currently in flight.
pub struct PlaybackData {
    song: Song,
    resolved: Mutex<Option<Track>>,
    download: Mutex<Option<Arc<dyn DownloadBuffer>>>,
    /// Serializes reads against the download buffer; one loading request at
    /// a time may touch it.
    read_serial: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl PlaybackData {
    fn new(song: Song) -> Self {
        Self {
            song,
            resolved: Mutex::new(None),
            download: Mutex::new(None),
            read_serial: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn song(&self) -> &Song {
        &self.song
    }

    #[must_use]
    pub fn song_id(&self) -> &str {
        &self.song.id
    }

    /// The resolved track, once preparation has picked one.
    #[must_use]
    pub fn resolved(&self) -> Option<Track> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_resolved(&self, track: Track) {
        *self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(track);
    }

    /// The download buffer serving this session, once available.
    #[must_use]
    pub fn download(&self) -> Option<Arc<dyn DownloadBuffer>> {
        self.download
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_download(&self, buffer: Arc<dyn DownloadBuffer>) {
        *self
            .download
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(buffer);
    }

    /// Lock serializing buffer reads for one loading request.
    pub(crate) fn read_serial(&self) -> &tokio::sync::Mutex<()> {
        &self.read_serial
    }

    /// Cancellation token scoped to this session. Once fired, stays fired.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Registry of live sessions, streaming-id routes and the current song.
#[derive(Default)]
pub struct Sessions {
    /// Live sessions keyed by song id; at most one per song.
    data: Mutex<HashMap<String, Arc<PlaybackData>>>,
    /// Reverse routing from streaming track ids to owning song ids.
    track_to_song: Mutex<HashMap<String, String>>,
    /// The globally current song and whether it plays as video.
    current: Mutex<Option<(Song, bool)>>,
}

impl Sessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `song`, creating one with a fresh
    /// cancellation token if none exists.
    #[must_use]
    pub fn get_or_create(&self, song: &Song) -> Arc<PlaybackData> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            data.entry(song.id.clone())
                .or_insert_with(|| Arc::new(PlaybackData::new(song.clone()))),
        )
    }

    /// Returns the live session for `song_id`, if any.
    #[must_use]
    pub fn get(&self, song_id: &str) -> Option<Arc<PlaybackData>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(song_id)
            .cloned()
    }

    /// Routes a streaming track id back to its owning song.
    pub fn map_track(&self, track_id: &str, song_id: &str) {
        self.track_to_song
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(track_id.to_owned(), song_id.to_owned());
    }

    /// The song a streaming track id belongs to, if mapped.
    #[must_use]
    pub fn song_for_track(&self, track_id: &str) -> Option<String> {
        self.track_to_song
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(track_id)
            .cloned()
    }

    /// Replaces the globally current song.
    pub fn set_current(&self, song: Option<Song>, want_video: bool) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) =
            song.map(|song| (song, want_video));
    }

    /// Updates the video flag of the current song, if one is set.
    pub fn set_current_video(&self, want_video: bool) {
        if let Some((_, video)) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            *video = want_video;
        }
    }

    /// The current song and its video flag.
    #[must_use]
    pub fn current(&self) -> Option<(Song, bool)> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn is_current(&self, song_id: &str) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(song, _)| song.id == song_id)
    }

    /// Tears down the session for `song_id`: fires its cancellation token,
    /// removes the entry and drops any streaming routes pointing at it.
    /// Safe to call when no such session exists.
    pub fn cleanup(&self, song_id: &str) {
        let removed = self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(song_id);

        if let Some(data) = removed {
            data.cancel.cancel();
        }

        self.track_to_song
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| owner != song_id);
    }
}
