//! A multi-session music queue engine.
//!
//! Each [`Session`](session::Session) owns a play queue, a history of played
//! entries and a playback driver that feeds the queue to an audio
//! [`Sink`](sink::Sink). Requests are turned into entries by a
//! [`Resolver`](resolver::Resolver) running on a bounded worker pool;
//! albums and playlists are queued in order while their entries resolve
//! concurrently. Sessions live in a [`Registry`](registry::Registry) keyed
//! by identifier.
//!
//! The [`sim`] module provides backends that need no network or audio
//! device, and [`console`] a text front end on top of them.
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod console;
pub mod driver;
pub mod entry;
pub mod error;
pub mod events;
pub mod history;
pub mod pipeline;
pub mod queue;
pub mod recorder;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod sim;
pub mod sink;
pub mod util;
