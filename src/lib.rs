//! Playback resolution and queue navigation for streaming music catalogs.
//!
//! The [`Player`](player::Player) turns user actions (play a song, next,
//! previous) and end-of-song notifications into resolved streams handed to
//! an audio engine. Along the way it:
//!
//! * resolves songs to stream URLs with availability probes, retry with
//!   backoff and a third-party unblock fallback
//! * walks the playback queue past unplayable songs with bounded attempts
//! * supersedes older requests, so that only the latest one has visible
//!   effects
//! * loads placeholder entries of lazily loaded lists on demand
//!
//! Catalog, audio output, list layer and unblock service are collaborators
//! behind traits; [`fixture`] has in-memory versions of all of them.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod cache;
pub mod catalog;
pub mod config;
pub mod enrich;
pub mod error;
pub mod events;
pub mod fixture;
pub mod http;
pub mod placeholder;
pub mod player;
pub mod probe;
pub mod quality;
pub mod queue;
pub mod report;
pub mod resolve;
pub mod retry;
pub mod scope;
pub mod song;
pub mod unblock;
pub mod view;
