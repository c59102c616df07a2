//! Client orchestration for an adaptive music exercise generator: request generation, verify
//! and play the rendered audio with a fallback player, and keep a practice-assistant chat in
//! step with the server.

pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod events;
pub mod generate;
pub mod playback;
pub mod types;
pub mod url;
pub mod verify;

#[cfg(test)]
mod testing;

pub use error::{EtudeError, Result};
