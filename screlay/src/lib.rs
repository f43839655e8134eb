//! screlay library crate.
//!
//! A chat bot that relays SoundCloud tracks and playlists. The coordination
//! layer (task queue, retrieval fallback, playlist sessions, durable
//! counters) is exposed for integration testing.

pub mod auth;
pub mod bot;
pub mod config;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod messages;
pub mod panic_hook;
pub mod quality;
pub mod resolver;
pub mod session;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
