//! Random-access byte source for a track that is still downloading.
//!
//! [`DownloadBuffer`] is the contract the streaming bridge consumes: a
//! byte-addressable view of a track whose total length and MIME type may
//! only become known once response headers arrive, and whose reads block
//! until the requested bytes have been fetched. Positions are free to move
//! backwards; the media pipeline re-requests earlier byte ranges while
//! probing container headers.
//!
//! [`HttpDownloadBuffer`] is the production implementation, wrapping a
//! `stream-download` progressive download spooled to a temporary file so
//! reads behave as if the file were already complete.

use std::{
    io::{Read, Seek, SeekFrom},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use stream_download::{
    http::HttpStream, source::SourceStream, storage::temp::TempStorageProvider, StreamDownload,
    StreamPhase, StreamState,
};
use url::Url;

use crate::error::{Error, Result};

/// Callback pulsed with download progress in `0.0..=1.0`.
pub type ProgressCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Byte source for a (possibly still downloading) track.
#[async_trait]
pub trait DownloadBuffer: Send + Sync {
    /// Reads up to `max_len` bytes starting at `position`.
    ///
    /// Blocks until at least one byte is available at `position` or the end
    /// of the stream is reached. Returns an empty buffer only at end of
    /// stream. Positions may be non-monotonic across calls.
    ///
    /// # Errors
    ///
    /// Returns a transfer failure when the underlying download breaks.
    async fn read_at(&self, position: u64, max_len: usize) -> Result<Vec<u8>>;

    /// Total length in bytes, if already known.
    fn total_length(&self) -> Option<u64>;

    /// Waits for the total length to become known.
    async fn await_length(&self) -> Result<u64>;

    /// MIME type, if already known.
    fn mime_type(&self) -> Option<String>;

    /// Waits for the MIME type to resolve from response headers.
    async fn await_mime_type(&self) -> Result<String>;
}

/// Progressive HTTP download exposed as a [`DownloadBuffer`].
///
/// Reads are served from the spooled download and block until the
/// background transfer has fetched the requested range. Length and MIME
/// type come from the response headers and are known once [`fetch`] has
/// returned.
///
/// [`fetch`]: HttpDownloadBuffer::fetch
pub struct HttpDownloadBuffer {
    /// Blocking reader over the spooled download; guarded so positioned
    /// reads are atomic seek+read pairs.
    reader: Arc<Mutex<StreamDownload<TempStorageProvider>>>,
    total_length: Option<u64>,
    mime_type: Option<String>,
}

impl HttpDownloadBuffer {
    /// The default amount of bytes to prefetch before the buffer can be
    /// read from. Used when the prefetch size cannot be estimated.
    const PREFETCH_DEFAULT: u64 = 60 * 1024;

    /// Amount of playback to prefetch when the track duration is known.
    const PREFETCH_LENGTH: Duration = Duration::from_secs(3);

    /// Starts downloading `url` and returns once the transfer is underway.
    ///
    /// The download continues in the background; reads block until the
    /// requested range has arrived. When `duration_hint` is given together
    /// with a `Content-Length`, the prefetch size is scaled to roughly
    /// [`PREFETCH_LENGTH`] of playback. `on_progress` is pulsed with the
    /// fraction downloaded whenever the transfer advances.
    ///
    /// # Errors
    ///
    /// Returns an error when the request fails or the download cannot be
    /// started.
    ///
    /// [`PREFETCH_LENGTH`]: HttpDownloadBuffer::PREFETCH_LENGTH
    pub async fn fetch(
        client: reqwest::Client,
        url: Url,
        duration_hint: Option<Duration>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Self> {
        let stream = HttpStream::new(client, url.clone()).await?;

        let total_length = stream.content_length();
        let mime_type = stream
            .content_type()
            .as_ref()
            .map(|content_type| format!("{}/{}", content_type.r#type, content_type.subtype));

        match total_length {
            Some(len) => debug!("downloading {len} bytes from {url}"),
            None => debug!("downloading {url} with unknown file size"),
        }

        let callback = move |stream: &HttpStream<_>, stream_state: StreamState, _: &_| {
            let Some(on_progress) = &on_progress else {
                return;
            };
            match stream_state.phase {
                StreamPhase::Complete => on_progress(1.0),
                _ => {
                    if let Some(file_size) = stream.content_length() {
                        if file_size > 0 {
                            // `f64` not for precision, but to be able to fit
                            // as big as possible file sizes.
                            #[expect(clippy::cast_precision_loss)]
                            let progress =
                                stream_state.current_position as f64 / file_size as f64;
                            #[expect(clippy::cast_possible_truncation)]
                            on_progress(progress as f32);
                        }
                    }
                }
            }
        };

        let prefetch_bytes = match (total_length, duration_hint) {
            (Some(len), Some(duration)) if !duration.is_zero() => {
                #[expect(clippy::cast_precision_loss)]
                let bytes_per_second = len as f64 / duration.as_secs_f64();
                #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let estimate =
                    (bytes_per_second * Self::PREFETCH_LENGTH.as_secs_f64()) as u64;
                estimate.min(len)
            }
            (Some(len), None) => len.min(Self::PREFETCH_DEFAULT),
            _ => Self::PREFETCH_DEFAULT,
        };

        // The `await` here will *not* block until the download is complete,
        // but only until the download is started. The transfer continues in
        // the background.
        let download = StreamDownload::from_stream(
            stream,
            TempStorageProvider::default(),
            stream_download::Settings::default()
                .on_progress(callback)
                .prefetch_bytes(prefetch_bytes),
        )
        .await?;

        Ok(Self {
            reader: Arc::new(Mutex::new(download)),
            total_length,
            mime_type,
        })
    }
}

#[async_trait]
impl DownloadBuffer for HttpDownloadBuffer {
    async fn read_at(&self, position: u64, max_len: usize) -> Result<Vec<u8>> {
        let reader = Arc::clone(&self.reader);

        // The spooled reader blocks until the range has downloaded, so the
        // seek+read pair moves off the async worker threads.
        let chunk = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut reader = reader.lock().unwrap_or_else(PoisonError::into_inner);
            reader.seek(SeekFrom::Start(position))?;

            let mut buf = vec![0; max_len];
            let read = reader.read(&mut buf)?;
            buf.truncate(read);
            Ok(buf)
        })
        .await?;

        chunk.map_err(Error::from)
    }

    fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    async fn await_length(&self) -> Result<u64> {
        self.total_length
            .ok_or_else(|| Error::unavailable("response did not report a content length"))
    }

    fn mime_type(&self) -> Option<String> {
        self.mime_type.clone()
    }

    async fn await_mime_type(&self) -> Result<String> {
        self.mime_type
            .clone()
            .ok_or_else(|| Error::unavailable("response did not report a content type"))
    }
}
