//! Playback coordination: state machine, watchdog and recovery.
//!
//! The [`Player`] owns the playback state and drives the preparation
//! pipeline and the media output. A periodic watchdog detects a stalled or
//! mis-synced pipeline (time not advancing while the output claims to be
//! playing) and recovers it by re-preparing the current song. Interruption
//! and route-change signals arrive as [`AudioSessionEvent`]s; track end as
//! an [`OutputEvent`].
//!
//! State machine: `Stopped → Buffering → Playing ⇄ Paused`, with `Stopped`
//! reachable from any state and `Buffering` re-entered on song change.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    events::{AudioSessionEvent, Event, OutputEvent},
    output::MediaOutput,
    pipeline::PreparationPipeline,
    services::{
        PlaybackEndedEvent, PlaybackEndedReason, QueueManager, ScrobbleReporter, SettingsStore,
    },
    session::Sessions,
    track::{Song, TrackPosition},
};

/// How often the watchdog checks pipeline health.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

/// Overall playback state; exactly one value holds at a time.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Buffering,
    Playing,
    Paused,
}

/// Signals sent to the coordinator by the streaming bridge.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PlayerSignal {
    /// A starved output finished loading data; resume it if playback
    /// should be running.
    ResumeIfActive,

    /// A download session tore mid-transfer; restart the song from
    /// scratch.
    Recover { song_id: String },
}

/// Watchdog bookkeeping between ticks.
struct WatchState {
    state: PlaybackState,
    /// State remembered across an audio-session interruption.
    remembered: PlaybackState,
    /// Duration observed on the previous tick; zero until known.
    last_duration: f64,
    /// Playback time observed on the previous tick.
    last_seconds: f64,
}

impl Default for WatchState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            remembered: PlaybackState::Stopped,
            last_duration: 0.0,
            last_seconds: -1.0,
        }
    }
}

/// The playback coordinator. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Player {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: Arc<Sessions>,
    pipeline: Arc<PreparationPipeline>,
    output: Arc<dyn MediaOutput>,
    scrobbler: Arc<dyn ScrobbleReporter>,
    queue: Arc<dyn QueueManager>,
    settings: Arc<dyn SettingsStore>,
    events: mpsc::UnboundedSender<Event>,
    signal_tx: mpsc::UnboundedSender<PlayerSignal>,
    signal_rx: Mutex<Option<mpsc::UnboundedReceiver<PlayerSignal>>>,
    watch: Mutex<WatchState>,
    /// Single-flight stall recovery; never blocks the play/pause/seek API.
    recovery: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    #[must_use]
    pub fn new(
        sessions: Arc<Sessions>,
        pipeline: Arc<PreparationPipeline>,
        output: Arc<dyn MediaOutput>,
        scrobbler: Arc<dyn ScrobbleReporter>,
        queue: Arc<dyn QueueManager>,
        settings: Arc<dyn SettingsStore>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                sessions,
                pipeline,
                output,
                scrobbler,
                queue,
                settings,
                events,
                signal_tx,
                signal_rx: Mutex::new(Some(signal_rx)),
                watch: Mutex::new(WatchState::default()),
                recovery: Mutex::new(None),
            }),
        }
    }

    /// Sender handed to the streaming bridge for resume/recovery signals.
    #[must_use]
    pub fn bridge_signals(&self) -> mpsc::UnboundedSender<PlayerSignal> {
        self.inner.signal_tx.clone()
    }

    /// The shared session registry.
    #[must_use]
    pub fn sessions(&self) -> &Arc<Sessions> {
        &self.inner.sessions
    }

    /// Current playback state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// The current song, if any.
    #[must_use]
    pub fn current_song(&self) -> Option<Song> {
        self.inner.sessions.current().map(|(song, _)| song)
    }

    fn set_state(&self, state: PlaybackState) {
        {
            let mut watch = self
                .inner
                .watch
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if watch.state == state {
                return;
            }
            watch.state = state;
        }
        debug!("playback state changed to {state:?}");
        let _ = self.inner.events.send(Event::StateChanged(state));
    }

    /// Tears down the session for `song` and resets watchdog progress
    /// tracking. Safe to call when no session exists.
    pub fn cleanup_song(&self, song: &Song) {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_seconds = -1.0;
        self.inner.pipeline.cleanup_song(song);
    }

    /// Switches playback to `song`, tearing down the previous session.
    ///
    /// Passing `None` stops playback. If the current song changes while
    /// the preparation is in flight (the user skipped ahead), the result
    /// is discarded silently. On failure the queue advances to the next
    /// track.
    pub async fn play_song(&self, song: Option<Song>, want_video: bool) {
        self.inner.output.pause();

        if let Some((previous, _)) = self.inner.sessions.current() {
            self.cleanup_song(&previous);
        }
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_duration = 0.0;

        self.inner.sessions.set_current(song.clone(), want_video);
        self.inner.settings.set_current_track_id("");
        self.inner.settings.set_current_playback_is_video(false);
        let _ = self
            .inner
            .events
            .send(Event::TrackPositionChanged(TrackPosition::default()));

        let Some(song) = song else {
            self.set_state(PlaybackState::Stopped);
            return;
        };

        info!("playing {song}");
        self.set_state(PlaybackState::Buffering);

        let (success, item) = self.inner.pipeline.prepare(&song, want_video).await;

        if !self.inner.sessions.is_current(&song.id) {
            debug!("{song} superseded while preparing, discarding result");
            return;
        }

        if success {
            if let Some(item) = item {
                self.inner.output.load(item);
            }
            self.inner.output.play();
            self.set_state(PlaybackState::Playing);
            self.inner
                .scrobbler
                .set_now_playing(&song, &self.inner.settings.current_track_id());
        } else {
            warn!("failed to play {song}, skipping to next track");
            self.set_state(PlaybackState::Stopped);
            self.inner.queue.next_track().await;
        }
    }

    /// Starts or resumes playback of the current song.
    ///
    /// No-op while buffering, without a current song, or when already
    /// actively playing with decoded tracks. Resumes directly when a
    /// healthy item is loaded, re-seeking to the persisted position;
    /// otherwise goes through the full `play_song` path.
    pub async fn play(&self) {
        let Some((song, want_video)) = self.inner.sessions.current() else {
            return;
        };

        let state = self.state();
        if state == PlaybackState::Buffering {
            return;
        }
        if state == PlaybackState::Playing
            && self.inner.output.rate() > 0.0
            && self.inner.output.has_decoded_tracks()
        {
            return;
        }

        if self.inner.output.has_current_item()
            && !self.inner.output.item_failed()
            && self.inner.output.has_decoded_tracks()
        {
            self.inner
                .scrobbler
                .set_now_playing(&song, &self.inner.settings.current_track_id());
            self.inner.output.play();
            self.set_state(PlaybackState::Playing);
            self.seek(self.inner.settings.current_playback_percent());
        } else {
            self.play_song(Some(song), want_video).await;
        }
    }

    /// Pauses playback, keeping the current item.
    pub fn pause(&self) {
        self.inner.output.pause();
        self.set_state(PlaybackState::Paused);
    }

    /// Stops playback and tears down the current session.
    pub fn stop(&self) {
        self.inner.output.pause();
        if let Some((song, _)) = self.inner.sessions.current() {
            self.cleanup_song(&song);
        }
        self.inner.sessions.set_current(None, false);
        self.set_state(PlaybackState::Stopped);
    }

    /// Seeks to a position given as a fraction of the duration.
    ///
    /// A zero (unknown) duration resolves to time zero; NaN never reaches
    /// the output.
    pub fn seek(&self, percent: f32) {
        let duration = self.inner.output.duration();
        let mut seconds = f64::from(percent) * duration;
        if seconds.is_nan() {
            seconds = 0.0;
        }
        self.inner.output.seek(seconds);

        let _ = self
            .inner
            .events
            .send(Event::TrackPositionChanged(TrackPosition {
                current_time: seconds,
                duration,
            }));
    }

    /// Prepares `song` and enqueues it after the current item for a
    /// gapless transition. Returns whether the song is queued.
    pub async fn queue_song(&self, song: &Song, want_video: bool) -> bool {
        match self.inner.pipeline.prepare(song, want_video).await {
            (true, Some(item)) => {
                self.inner.output.enqueue(item);
                true
            }
            _ => false,
        }
    }

    /// Restores the last session's track without starting playback, e.g.
    /// at application start. Returns whether the item is loaded.
    pub async fn prepare_first_track(&self, song: &Song, want_video: bool) -> bool {
        let (success, item) = self.inner.pipeline.prepare(song, want_video).await;
        if !success {
            return false;
        }
        self.inner
            .sessions
            .set_current(Some(song.clone()), want_video);
        if let Some(item) = item {
            self.inner.output.load(item);
        }
        true
    }

    /// One watchdog tick.
    ///
    /// Performs the deferred initial seek once the duration becomes known,
    /// then judges pipeline health: time advancing under a non-zero rate is
    /// healthy; anything else spawns a single-flight recovery task.
    pub fn check_playback(&self) {
        let Some((song, want_video)) = self.inner.sessions.current() else {
            return;
        };
        if !self.inner.output.has_current_item() {
            return;
        }

        let duration = self.inner.output.duration();
        let deferred_seek = {
            let mut watch = self
                .inner
                .watch
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if duration > 0.0 && watch.last_duration.abs() < f64::EPSILON {
                watch.last_duration = duration;
                true
            } else {
                false
            }
        };
        if deferred_seek {
            self.seek(self.inner.settings.current_playback_percent());
        }

        let state = self.state();
        if state == PlaybackState::Paused || state == PlaybackState::Stopped {
            return;
        }

        let time = self.inner.output.current_time();
        if self.inner.output.rate() > 0.0 {
            let mut watch = self
                .inner
                .watch
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if (time - watch.last_seconds).abs() > f64::EPSILON {
                watch.last_seconds = time;
                return;
            }
        }

        let mut recovery = self
            .inner
            .recovery
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if recovery.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        debug!("playback of {song} stalled, starting recovery");
        let this = self.clone();
        *recovery = Some(tokio::spawn(async move {
            if this.inner.output.rate() > 0.0 {
                // The output claims to be playing but time is frozen; the
                // torn pipeline needs a fresh resolution.
                let (success, item) = this.inner.pipeline.prepare(&song, want_video).await;
                if success {
                    if let Some(item) = item {
                        this.inner.output.load(item);
                    }
                    this.inner.output.play();
                    if time > 0.0 {
                        this.inner.output.seek(time);
                    }
                }
            } else {
                this.play().await;
            }
        }));
    }

    /// Reacts to OS audio-session signals.
    pub async fn handle_audio_session(&self, event: AudioSessionEvent) {
        match event {
            AudioSessionEvent::InterruptionBegan => {
                let state = self.state();
                self.inner
                    .watch
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remembered = state;
                if state == PlaybackState::Playing {
                    self.pause();
                } else {
                    self.set_state(PlaybackState::Stopped);
                }
            }
            AudioSessionEvent::InterruptionEnded { should_resume } => {
                let remembered = self
                    .inner
                    .watch
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remembered;
                self.set_state(remembered);
                if should_resume && remembered == PlaybackState::Playing {
                    self.play().await;
                } else {
                    self.pause();
                }
            }
            AudioSessionEvent::RouteChanged {
                old_device_unavailable,
            } => {
                if old_device_unavailable {
                    self.pause();
                }
            }
        }
    }

    /// Reacts to media output signals.
    pub async fn handle_output_event(&self, event: OutputEvent) {
        match event {
            OutputEvent::TrackEnded => self.finished_playing().await,
        }
    }

    /// Handles one bridge signal.
    pub async fn handle_signal(&self, signal: PlayerSignal) {
        match signal {
            PlayerSignal::ResumeIfActive => {
                let state = self.state();
                if state == PlaybackState::Buffering || state == PlaybackState::Playing {
                    self.inner.output.play();
                }
            }
            PlayerSignal::Recover { song_id } => {
                let Some(data) = self.inner.sessions.get(&song_id) else {
                    return;
                };
                let song = data.song().clone();
                let want_video = self
                    .inner
                    .sessions
                    .current()
                    .map(|(_, video)| video)
                    .unwrap_or_default();

                warn!("recovering playback of {song} after stream failure");
                self.cleanup_song(&song);
                self.play_song(Some(song), want_video).await;
            }
        }
    }

    async fn finished_playing(&self) {
        let Some((song, _)) = self.inner.sessions.current() else {
            return;
        };

        self.inner.scrobbler.playback_ended(PlaybackEndedEvent {
            song: song.clone(),
            track_id: self.inner.settings.current_track_id(),
            context: self.inner.settings.current_playback_context(),
            position: self.inner.output.current_time(),
            reason: PlaybackEndedReason::Ended,
        });

        self.cleanup_song(&song);
        self.set_state(PlaybackState::Stopped);
        self.inner.queue.next_track().await;
    }

    /// Drives the coordinator until `shutdown` fires.
    ///
    /// Multiplexes watchdog ticks, bridge signals, audio-session events and
    /// output events. Must be called at most once across all clones.
    pub async fn run(
        self,
        mut audio_session: mpsc::UnboundedReceiver<AudioSessionEvent>,
        mut output_events: mpsc::UnboundedReceiver<OutputEvent>,
        shutdown: CancellationToken,
    ) {
        let signal_rx = self
            .inner
            .signal_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut signals) = signal_rx else {
            error!("player run loop started twice");
            return;
        };

        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = watchdog.tick() => self.check_playback(),
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
                Some(event) = audio_session.recv() => self.handle_audio_session(event).await,
                Some(event) = output_events.recv() => self.handle_output_event(event).await,
            }
        }

        debug!("player run loop stopped");
    }
}
