//! Bridges media-pipeline loading requests onto download buffers.
//!
//! The media pipeline believes it is reading a finished file at a
//! `streaming://` URL. The [`StreamingResourceBridge`] intercepts its
//! loading requests, routes the track id back to the owning session, and
//! serves content metadata and byte ranges from the session's
//! [`DownloadBuffer`] while the download is still in flight.
//!
//! Delivery is chunked: each chunk is handed to the requester as soon as it
//! is read, so playback can start before a range has fully downloaded and
//! memory stays bounded regardless of range size.
//!
//! [`DownloadBuffer`]: crate::download::DownloadBuffer

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::{
    error::{Error, Result},
    player::PlayerSignal,
    session::{PlaybackData, Sessions},
    track,
};

/// Chunk size for range delivery (32 KiB).
///
/// Matches the sequential read pattern of the media pipeline, which reads
/// in increasing chunks up to 32 KiB.
pub const CHUNK_LEN: usize = 32 * 1024;

/// Content metadata reported back to the media pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentInfo {
    /// MIME type of the resource.
    pub content_type: String,
    /// Total length of the resource in bytes.
    pub content_length: u64,
    /// Whether byte-range access is supported.
    pub byte_range_access_supported: bool,
}

/// The byte range a loading request asks for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataRequest {
    /// First byte of the requested range.
    pub requested_offset: u64,
    /// Number of bytes requested.
    pub requested_length: u64,
    /// Whether the pipeline asked for all remaining data to the end of the
    /// resource.
    pub requests_all_data_to_end: bool,
}

/// One loading request issued by the media pipeline for a virtual resource.
///
/// Implementations wrap the platform's resource-loading object. `respond`
/// receives chunks in order; exactly one of [`finish`] or
/// [`finish_with_error`] is called unless the requester cancels first.
///
/// [`finish`]: LoadingRequest::finish
/// [`finish_with_error`]: LoadingRequest::finish_with_error
pub trait LoadingRequest: Send + Sync {
    /// Whether the request asks for content metadata.
    fn wants_content_info(&self) -> bool;

    /// Publishes resolved content metadata.
    fn set_content_info(&self, info: ContentInfo);

    /// The byte range asked for, if any.
    fn data_request(&self) -> Option<DataRequest>;

    /// Delivers one chunk of range data.
    fn respond(&self, chunk: Vec<u8>);

    /// Requester-side cancellation, distinct from session cancellation.
    fn is_cancelled(&self) -> bool;

    /// Marks the request successfully finished.
    fn finish(&self);

    /// Fails the request with an error.
    fn finish_with_error(&self, error: &Error);
}

/// How serving a request concluded, short of an error.
enum Served {
    /// All requested data was delivered or end of stream was reached.
    Complete,
    /// The session was cancelled; the request was ended cleanly.
    SessionCancelled,
    /// The requester cancelled; stopped silently without completion.
    RequesterCancelled,
}

/// Serves virtual streaming resources from live download sessions.
pub struct StreamingResourceBridge {
    sessions: Arc<Sessions>,
    signals: mpsc::UnboundedSender<PlayerSignal>,
}

impl StreamingResourceBridge {
    #[must_use]
    pub fn new(sessions: Arc<Sessions>, signals: mpsc::UnboundedSender<PlayerSignal>) -> Self {
        Self { sessions, signals }
    }

    /// Entry point mirroring the platform resource-loader delegate.
    ///
    /// Parses the track id out of `url` and, when it routes to a live
    /// session, spawns a task serving the request and returns `true`.
    /// Returns `false` when the URL is not a routable streaming URL, which
    /// tells the pipeline to treat the resource as unavailable.
    pub fn should_wait_for_loading(
        self: &Arc<Self>,
        url: &Url,
        request: Arc<dyn LoadingRequest>,
    ) -> bool {
        let Some(track_id) = track::streaming_track_id(url) else {
            warn!("loading request for unroutable url {url}");
            return false;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.handle_request(&track_id, request).await;
        });
        true
    }

    /// Serves one loading request for the track id `track_id`.
    ///
    /// Requests for tracks with no live session fail immediately; the
    /// pipeline must never be left blocking on a torn-down session.
    pub async fn handle_request(&self, track_id: &str, request: Arc<dyn LoadingRequest>) {
        let data = self
            .sessions
            .song_for_track(track_id)
            .and_then(|song_id| self.sessions.get(&song_id));

        let Some(data) = data else {
            request.finish_with_error(&Error::unavailable(format!(
                "no playback session for track {track_id}"
            )));
            return;
        };

        match Self::serve(&data, request.as_ref()).await {
            Ok(Served::Complete) => {
                request.finish();
                // The pipeline pauses itself when starved for data; nudge
                // the coordinator to resume if playback should be running.
                let _ = self.signals.send(PlayerSignal::ResumeIfActive);
            }
            Ok(Served::SessionCancelled) => {
                trace!("session for track {track_id} cancelled, ending request");
                request.finish();
            }
            Ok(Served::RequesterCancelled) => {
                trace!("loading request for track {track_id} cancelled by requester");
            }
            Err(err) => {
                error!("loading request for track {track_id} failed: {err}");
                request.finish_with_error(&err);
                // A torn download session is not safely resumable in place;
                // restart the song from scratch.
                let _ = self.signals.send(PlayerSignal::Recover {
                    song_id: data.song_id().to_owned(),
                });
            }
        }
    }

    async fn serve(data: &PlaybackData, request: &dyn LoadingRequest) -> Result<Served> {
        // One loading request at a time per buffer; other tracks are served
        // concurrently through their own sessions.
        let _serial = data.read_serial().lock().await;

        let buffer = data.download().ok_or_else(|| {
            Error::unavailable(format!("no download buffer for song {}", data.song_id()))
        })?;

        if request.wants_content_info() {
            let content_type = match buffer.mime_type() {
                Some(mime) => mime,
                None => buffer.await_mime_type().await?,
            };
            let content_length = buffer.await_length().await?;

            request.set_content_info(ContentInfo {
                content_type,
                content_length,
                byte_range_access_supported: true,
            });
        }

        let Some(range) = request.data_request() else {
            return Ok(Served::Complete);
        };

        let expected = if range.requests_all_data_to_end {
            buffer
                .total_length()
                .map_or(range.requested_length, |total| {
                    range.requested_length.max(total)
                })
        } else {
            range.requested_length
        };

        trace!(
            "data request for song {}: offset {} length {expected}",
            data.song_id(),
            range.requested_offset,
        );

        let mut sent: u64 = 0;
        while sent < expected {
            if data.is_cancelled() {
                return Ok(Served::SessionCancelled);
            }
            if request.is_cancelled() {
                return Ok(Served::RequesterCancelled);
            }

            let offset = range.requested_offset + sent;
            #[expect(clippy::cast_possible_truncation)]
            let max_len = (expected - sent).min(CHUNK_LEN as u64) as usize;

            let chunk = buffer.read_at(offset, max_len).await?;
            if chunk.is_empty() {
                // End of stream before the requested length was satisfied.
                break;
            }

            sent += chunk.len() as u64;
            request.respond(chunk);

            if buffer
                .total_length()
                .is_some_and(|total| sent + range.requested_offset >= total)
            {
                break;
            }
        }

        Ok(Served::Complete)
    }
}
