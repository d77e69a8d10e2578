//! Events exchanged between the playback core and its surroundings.
//!
//! Three directions of traffic:
//! * [`Event`] — observations the core publishes (position, state, video
//!   mode, download progress). Consumers receive them over an unbounded
//!   channel so a slow observer can never stall playback.
//! * [`AudioSessionEvent`] — OS-level audio session signals fed *into* the
//!   coordinator (interruptions, route changes). Platform specifics stay
//!   outside the core.
//! * [`OutputEvent`] — signals from the media decode/render pipeline, such
//!   as the current item playing to its natural end.

use crate::{player::PlaybackState, track::TrackPosition};

/// Observations published by the playback core.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The playback position snapshot changed (seek or track change).
    TrackPositionChanged(TrackPosition),

    /// The playback state machine transitioned.
    StateChanged(PlaybackState),

    /// The current playback switched between audio and video.
    VideoModeChanged(bool),

    /// Download progress pulse for a song, `1.0` when fully available.
    DownloadProgress {
        /// Song the pulse belongs to.
        song_id: String,
        /// Fraction of the track available locally, `0.0..=1.0`.
        progress: f32,
    },
}

/// OS audio-session signals consumed by the coordinator.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum AudioSessionEvent {
    /// An interruption (call, alarm) started.
    InterruptionBegan,

    /// The interruption ended.
    InterruptionEnded {
        /// Whether the OS permits resuming playback.
        should_resume: bool,
    },

    /// The audio route changed.
    RouteChanged {
        /// Whether the previous output device disappeared.
        old_device_unavailable: bool,
    },
}

/// Signals from the media output pipeline consumed by the coordinator.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum OutputEvent {
    /// The current item played to its natural end.
    TrackEnded,
}
