//! Shared test doubles for the playback core.
//!
//! Every collaborator trait gets a configurable mock with counters so tests
//! can assert how the core drove it. Gates (semaphores) let tests hold a
//! resolution or a read in flight to provoke races deterministically.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use url::Url;

use cadenza::{
    bridge::{ContentInfo, DataRequest, LoadingRequest},
    download::DownloadBuffer,
    error::{Error, Result},
    output::{MediaOutput, PlayableItem},
    services::{
        DownloadEngine, MetadataResolver, PlaybackEndedEvent, QueueManager, ResolvedPlayback,
        ScrobbleReporter, SettingsStore,
    },
    track::{MediaType, ServiceKind, Song, Track},
};

/// Initializes test logging once; honors `RUST_LOG`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn song(id: &str) -> Song {
    Song {
        id: id.to_owned(),
        title: format!("Title {id}"),
        artist: "Artist".to_owned(),
    }
}

/// In-memory download buffer with optional read gating and late MIME type.
pub struct MockBuffer {
    data: Vec<u8>,
    mime: watch::Sender<Option<String>>,
    read_gate: Mutex<Option<Arc<Semaphore>>>,
    pub read_calls: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MockBuffer {
    pub fn new(data: Vec<u8>, mime: &str) -> Self {
        let (tx, _rx) = watch::channel(Some(mime.to_owned()));
        Self {
            data,
            mime: tx,
            read_gate: Mutex::new(None),
            read_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Buffer whose MIME type resolves later, like headers still in flight.
    pub fn with_late_mime(data: Vec<u8>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            data,
            mime: tx,
            read_gate: Mutex::new(None),
            read_calls: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn set_mime(&self, mime: &str) {
        self.mime.send_replace(Some(mime.to_owned()));
    }

    /// Every read consumes one permit from `gate` before proceeding.
    pub fn gate_reads(&self, gate: Arc<Semaphore>) {
        *self.read_gate.lock().unwrap() = Some(gate);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DownloadBuffer for MockBuffer {
    async fn read_at(&self, position: u64, max_len: usize) -> Result<Vec<u8>> {
        let gate = self.read_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::data_loss("transfer aborted"))?;
            permit.forget();
        }

        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::data_loss("simulated transfer failure"));
        }

        let start = usize::try_from(position).unwrap().min(self.data.len());
        let end = start.saturating_add(max_len).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn total_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn await_length(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn mime_type(&self) -> Option<String> {
        self.mime.borrow().clone()
    }

    async fn await_mime_type(&self) -> Result<String> {
        let mut rx = self.mime.subscribe();
        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::unavailable("mime type never resolved"))?;
        Ok(value.clone().unwrap())
    }
}

/// Records everything the bridge hands to a loading request.
pub struct MockLoadingRequest {
    wants_info: bool,
    range: Option<DataRequest>,
    cancel_after: Option<usize>,
    cancelled: AtomicBool,
    pub info: Mutex<Option<ContentInfo>>,
    pub chunks: Mutex<Vec<Vec<u8>>>,
    pub finished: AtomicBool,
    pub failed: Mutex<Option<String>>,
}

impl MockLoadingRequest {
    fn empty() -> Self {
        Self {
            wants_info: false,
            range: None,
            cancel_after: None,
            cancelled: AtomicBool::new(false),
            info: Mutex::new(None),
            chunks: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
            failed: Mutex::new(None),
        }
    }

    pub fn content_info() -> Self {
        Self {
            wants_info: true,
            ..Self::empty()
        }
    }

    pub fn range(offset: u64, length: u64) -> Self {
        Self {
            range: Some(DataRequest {
                requested_offset: offset,
                requested_length: length,
                requests_all_data_to_end: false,
            }),
            ..Self::empty()
        }
    }

    pub fn to_end(offset: u64, length: u64) -> Self {
        Self {
            range: Some(DataRequest {
                requested_offset: offset,
                requested_length: length,
                requests_all_data_to_end: true,
            }),
            ..Self::empty()
        }
    }

    pub fn with_content_info(mut self) -> Self {
        self.wants_info = true;
        self
    }

    /// The requester cancels itself after receiving `chunks` chunks.
    pub fn cancel_after(mut self, chunks: usize) -> Self {
        self.cancel_after = Some(chunks);
        self
    }

    pub fn received(&self) -> Vec<u8> {
        self.chunks.lock().unwrap().concat()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn failure(&self) -> Option<String> {
        self.failed.lock().unwrap().clone()
    }
}

impl LoadingRequest for MockLoadingRequest {
    fn wants_content_info(&self) -> bool {
        self.wants_info
    }

    fn set_content_info(&self, info: ContentInfo) {
        *self.info.lock().unwrap() = Some(info);
    }

    fn data_request(&self) -> Option<DataRequest> {
        self.range
    }

    fn respond(&self, chunk: Vec<u8>) {
        let mut chunks = self.chunks.lock().unwrap();
        chunks.push(chunk);
        if self.cancel_after.is_some_and(|after| chunks.len() >= after) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn finish_with_error(&self, error: &Error) {
        *self.failed.lock().unwrap() = Some(error.to_string());
    }
}

/// Media output double; `play`/`pause` drive the reported rate.
pub struct MockOutput {
    pub loaded: Mutex<Vec<PlayableItem>>,
    pub enqueued: Mutex<Vec<PlayableItem>>,
    pub play_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub seeks: Mutex<Vec<f64>>,
    rate: Mutex<f32>,
    current_time: Mutex<f64>,
    duration: Mutex<f64>,
    has_current_item: AtomicBool,
    has_decoded_tracks: AtomicBool,
    item_failed: AtomicBool,
    fail_ready: AtomicBool,
}

impl MockOutput {
    pub fn new() -> Self {
        Self {
            loaded: Mutex::new(Vec::new()),
            enqueued: Mutex::new(Vec::new()),
            play_calls: AtomicUsize::new(0),
            pause_calls: AtomicUsize::new(0),
            seeks: Mutex::new(Vec::new()),
            rate: Mutex::new(0.0),
            current_time: Mutex::new(0.0),
            duration: Mutex::new(0.0),
            has_current_item: AtomicBool::new(false),
            has_decoded_tracks: AtomicBool::new(false),
            item_failed: AtomicBool::new(false),
            fail_ready: AtomicBool::new(false),
        }
    }

    pub fn set_rate(&self, rate: f32) {
        *self.rate.lock().unwrap() = rate;
    }

    pub fn set_current_time(&self, seconds: f64) {
        *self.current_time.lock().unwrap() = seconds;
    }

    pub fn set_duration(&self, seconds: f64) {
        *self.duration.lock().unwrap() = seconds;
    }

    pub fn set_decoded_tracks(&self, decoded: bool) {
        self.has_decoded_tracks.store(decoded, Ordering::SeqCst);
    }

    pub fn set_current_item(&self, present: bool) {
        self.has_current_item.store(present, Ordering::SeqCst);
    }

    pub fn set_item_failed(&self, failed: bool) {
        self.item_failed.store(failed, Ordering::SeqCst);
    }

    pub fn fail_readiness(&self) {
        self.fail_ready.store(true, Ordering::SeqCst);
    }

    pub fn loaded_items(&self) -> Vec<PlayableItem> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaOutput for MockOutput {
    async fn wait_until_ready(&self, _item: &PlayableItem) -> Result<()> {
        if self.fail_ready.load(Ordering::SeqCst) {
            return Err(Error::deadline_exceeded("item never became ready"));
        }
        Ok(())
    }

    fn load(&self, item: PlayableItem) {
        self.loaded.lock().unwrap().push(item);
        self.has_current_item.store(true, Ordering::SeqCst);
        self.item_failed.store(false, Ordering::SeqCst);
    }

    fn enqueue(&self, item: PlayableItem) {
        self.enqueued.lock().unwrap().push(item);
    }

    fn play(&self) {
        self.play_calls.fetch_add(1, Ordering::SeqCst);
        *self.rate.lock().unwrap() = 1.0;
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        *self.rate.lock().unwrap() = 0.0;
    }

    // Deliberately leaves `current_time` alone; stall tests freeze the
    // reported time and drive it through `set_current_time` only.
    fn seek(&self, seconds: f64) {
        self.seeks.lock().unwrap().push(seconds);
    }

    fn rate(&self) -> f32 {
        *self.rate.lock().unwrap()
    }

    fn current_time(&self) -> f64 {
        *self.current_time.lock().unwrap()
    }

    fn duration(&self) -> f64 {
        *self.duration.lock().unwrap()
    }

    fn has_current_item(&self) -> bool {
        self.has_current_item.load(Ordering::SeqCst)
    }

    fn has_decoded_tracks(&self) -> bool {
        self.has_decoded_tracks.load(Ordering::SeqCst)
    }

    fn item_failed(&self) -> bool {
        self.item_failed.load(Ordering::SeqCst)
    }
}

/// Metadata resolver double; optionally gated to hold resolutions in flight.
pub struct MockResolver {
    pub calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fail_not_found: AtomicBool,
    local_uri: Mutex<Option<Url>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
            fail_not_found: AtomicBool::new(false),
            local_uri: Mutex::new(None),
        }
    }

    /// Every resolution consumes one permit from `gate` before completing.
    pub fn gate(&self, gate: Arc<Semaphore>) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn fail_not_found(&self) {
        self.fail_not_found.store(true, Ordering::SeqCst);
    }

    /// Resolve songs to a local file at `uri` instead of a remote track.
    pub fn resolve_local(&self, uri: Url) {
        *self.local_uri.lock().unwrap() = Some(uri);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataResolver for MockResolver {
    async fn resolve(&self, song: &Song, want_video: bool) -> Result<ResolvedPlayback> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::cancelled("resolution aborted"))?;
            permit.forget();
        }

        if self.fail_not_found.load(Ordering::SeqCst) {
            return Err(Error::not_found(format!("no track for {song}")));
        }

        if let Some(uri) = self.local_uri.lock().unwrap().clone() {
            return Ok(ResolvedPlayback {
                track: Track::new(
                    format!("track-{}", song.id),
                    "mp3",
                    MediaType::Audio,
                    ServiceKind::LocalFile,
                ),
                uri,
                is_local: true,
            });
        }

        let (extension, media_type) = if want_video {
            ("mp4", MediaType::Video)
        } else {
            ("mp3", MediaType::Audio)
        };
        Ok(ResolvedPlayback {
            track: Track::new(
                format!("track-{}", song.id),
                extension,
                media_type,
                ServiceKind::Remote,
            ),
            uri: format!("https://cdn.example.com/{}.{extension}", song.id)
                .parse()
                .unwrap(),
            is_local: false,
        })
    }
}

/// Download engine double handing out a preconfigured buffer.
pub struct MockEngine {
    buffer: Mutex<Arc<MockBuffer>>,
    pub calls: AtomicUsize,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Arc::new(MockBuffer::new(vec![0; 1024], "audio/mpeg"))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_buffer(buffer: Arc<MockBuffer>) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn download_now(&self, _track_id: &str, _uri: &Url) -> Result<Arc<dyn DownloadBuffer>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.buffer.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MockScrobbler {
    pub now_playing: Mutex<Vec<(String, String)>>,
    pub ended: Mutex<Vec<PlaybackEndedEvent>>,
}

impl MockScrobbler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_playing_calls(&self) -> Vec<(String, String)> {
        self.now_playing.lock().unwrap().clone()
    }

    pub fn ended_events(&self) -> Vec<PlaybackEndedEvent> {
        self.ended.lock().unwrap().clone()
    }
}

impl ScrobbleReporter for MockScrobbler {
    fn set_now_playing(&self, song: &Song, track_id: &str) {
        self.now_playing
            .lock()
            .unwrap()
            .push((song.id.clone(), track_id.to_owned()));
    }

    fn playback_ended(&self, event: PlaybackEndedEvent) {
        self.ended.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct MockQueue {
    pub next_calls: AtomicUsize,
}

impl MockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_count(&self) -> usize {
        self.next_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueManager for MockQueue {
    async fn next_track(&self) {
        self.next_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockSettings {
    track_id: Mutex<String>,
    percent: Mutex<f32>,
    is_video: Mutex<bool>,
    context: Mutex<String>,
}

impl MockSettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MockSettings {
    fn current_track_id(&self) -> String {
        self.track_id.lock().unwrap().clone()
    }

    fn set_current_track_id(&self, id: &str) {
        *self.track_id.lock().unwrap() = id.to_owned();
    }

    fn current_playback_percent(&self) -> f32 {
        *self.percent.lock().unwrap()
    }

    fn set_current_playback_percent(&self, percent: f32) {
        *self.percent.lock().unwrap() = percent;
    }

    fn current_playback_is_video(&self) -> bool {
        *self.is_video.lock().unwrap()
    }

    fn set_current_playback_is_video(&self, video: bool) {
        *self.is_video.lock().unwrap() = video;
    }

    fn current_playback_context(&self) -> String {
        self.context.lock().unwrap().clone()
    }

    fn set_current_playback_context(&self, context: &str) {
        *self.context.lock().unwrap() = context.to_owned();
    }
}
