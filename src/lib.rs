//! Core engine for progressive media playback.
//!
//! Three cooperating parts:
//! * [`bridge`] — serves media-pipeline loading requests from files that
//!   are still downloading.
//! * [`pipeline`] — resolves songs into playable items, producing exactly
//!   one playable handle per song under concurrent request storms.
//! * [`player`] — the playback state machine with its stall watchdog,
//!   interruption handling and track-end handling.
//!
//! Platform collaborators (metadata resolution, the download engine, the
//! actual media output, settings and scrobbling) are injected through the
//! traits in [`services`], [`download`] and [`output`].

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod bridge;
pub mod download;
pub mod error;
pub mod events;
pub mod output;
pub mod pipeline;
pub mod player;
pub mod services;
pub mod session;
pub mod track;
