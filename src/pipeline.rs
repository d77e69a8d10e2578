//! Resolves songs into playable items, deduplicating concurrent requests.
//!
//! The pipeline turns a song plus a want-video flag into a ready
//! [`PlayableItem`]: a local file reference, or a virtual streaming
//! resource backed by a live download session. Concurrent `prepare` calls
//! for the same `(song, want_video)` key share a single resolution; the
//! registry lock is only held around lookup, insert and remove, never
//! across the resolution itself.
//!
//! Failures never cross the pipeline boundary as errors. Every outcome is a
//! `(success, item)` pair so request storms racing against cancellation and
//! track changes always get a definite answer.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use futures_util::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tokio::sync::mpsc;

use crate::{
    error::{Error, ErrorKind, Result},
    events::Event,
    output::{MediaOutput, PlayableItem},
    services::{DownloadEngine, MetadataResolver, SettingsStore},
    session::Sessions,
    track::{MediaType, ServiceKind, Song},
};

/// Outcome of a preparation: success flag plus the item when successful.
pub type PrepareResult = (bool, Option<PlayableItem>);

/// In-flight resolution shared between concurrent callers; the id makes
/// registry removal identity-safe.
type PrepareTask = (u64, Shared<BoxFuture<'static, PrepareResult>>);

/// Produces exactly one playable handle per song under request storms.
pub struct PreparationPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: Arc<Sessions>,
    resolver: Arc<dyn MetadataResolver>,
    downloads: Arc<dyn DownloadEngine>,
    output: Arc<dyn MediaOutput>,
    settings: Arc<dyn SettingsStore>,
    events: mpsc::UnboundedSender<Event>,
    tasks: Mutex<HashMap<(String, bool), PrepareTask>>,
    next_task_id: Mutex<u64>,
}

impl PreparationPipeline {
    #[must_use]
    pub fn new(
        sessions: Arc<Sessions>,
        resolver: Arc<dyn MetadataResolver>,
        downloads: Arc<dyn DownloadEngine>,
        output: Arc<dyn MediaOutput>,
        settings: Arc<dyn SettingsStore>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions,
                resolver,
                downloads,
                output,
                settings,
                events,
                tasks: Mutex::new(HashMap::new()),
                next_task_id: Mutex::new(0),
            }),
        }
    }

    /// Resolves `song` into a playable item.
    ///
    /// Concurrent callers with the same `(song.id, want_video)` key await
    /// one shared resolution and observe the same result. The registry
    /// entry is removed once the resolution completes, so a later call
    /// starts fresh.
    pub async fn prepare(&self, song: &Song, want_video: bool) -> PrepareResult {
        let key = (song.id.clone(), want_video);

        let (task_id, task) = {
            let mut tasks = self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match tasks.get(&key) {
                // Join an in-flight resolution instead of starting another.
                Some((id, task)) if task.peek().is_none() => (*id, task.clone()),
                _ => {
                    let id = {
                        let mut next = self
                            .inner
                            .next_task_id
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        *next += 1;
                        *next
                    };
                    let inner = Arc::clone(&self.inner);
                    let song = song.clone();
                    let task = async move { inner.resolve(&song, want_video).await }
                        .boxed()
                        .shared();
                    tasks.insert(key.clone(), (id, task.clone()));
                    (id, task)
                }
            }
        };

        let result = task.await;

        // Remove only our own entry; a newer resolution may already have
        // replaced it.
        let mut tasks = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if tasks.get(&key).is_some_and(|(id, _)| *id == task_id) {
            tasks.remove(&key);
        }

        result
    }

    /// Tears down the session for `song`. Safe no-op when none exists.
    pub fn cleanup_song(&self, song: &Song) {
        self.inner.sessions.cleanup(&song.id);
    }
}

impl Inner {
    /// The boundary that converts all failures into a definite outcome.
    async fn resolve(&self, song: &Song, want_video: bool) -> PrepareResult {
        match self.try_resolve(song, want_video).await {
            Ok(item) => (true, Some(item)),
            Err(err) if err.kind == ErrorKind::Cancelled => {
                debug!("preparation of {song} cancelled");
                (false, None)
            }
            Err(err) => {
                warn!("failed to prepare {song}: {err}");
                (false, None)
            }
        }
    }

    async fn try_resolve(&self, song: &Song, want_video: bool) -> Result<PlayableItem> {
        info!("preparing {song}");
        let data = self.sessions.get_or_create(song);

        let resolved = self.resolver.resolve(song, want_video).await.map_err(|e| {
            if e.kind == ErrorKind::NotFound {
                Error::not_found(format!("no playable track for {song}"))
            } else {
                e
            }
        })?;

        if data.is_cancelled() {
            return Err(Error::cancelled(format!("session for {song} superseded")));
        }

        let track = resolved.track;

        if self.sessions.is_current(&song.id) {
            self.settings.set_current_track_id(track.id());
            let is_video = track.media_type() == MediaType::Video;
            self.sessions.set_current_video(is_video);
            self.settings.set_current_playback_is_video(is_video);
            let _ = self.events.send(Event::VideoModeChanged(is_video));
        }

        let item = if resolved.is_local || track.service() == ServiceKind::DeviceLibrary {
            debug!("local track {track} found for {song}");
            let item = PlayableItem::local(resolved.uri);
            self.output.wait_until_ready(&item).await?;

            // A local track is fully available by definition.
            let _ = self.events.send(Event::DownloadProgress {
                song_id: song.id.clone(),
                progress: 1.0,
            });
            item
        } else {
            data.set_resolved(track.clone());

            let buffer = self.downloads.download_now(track.id(), &resolved.uri).await?;
            if data.is_cancelled() {
                return Err(Error::cancelled(format!("session for {song} superseded")));
            }

            debug!("loading remote track {track} for {song}");
            self.sessions.map_track(track.id(), &song.id);
            data.set_download(buffer);

            let item = PlayableItem::streaming(track.id(), track.streaming_url()?);
            if data.is_cancelled() {
                return Err(Error::cancelled(format!("session for {song} superseded")));
            }

            self.output.wait_until_ready(&item).await?;
            item
        };

        if data.is_cancelled() {
            return Err(Error::cancelled(format!("session for {song} superseded")));
        }

        Ok(item)
    }
}
