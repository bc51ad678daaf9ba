//! Errors returned synchronously by the player API.
//!
//! Decoder, sink and source failures never surface here: the processing loop turns them
//! into listener events (see [`crate::PlayerEvent`]).

use std::fmt;

use thiserror::Error;

use crate::source::AudioSource;

/// Caller-facing error kinds.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    /// The request itself is malformed (empty source, unusable config).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The bounded command queue has no free slot.
    #[error("command queue is full")]
    QueueFull,
    /// The player has not been created, or has already been destroyed.
    #[error("player is not initialized")]
    NotInitialized,
    /// `create` was called on a player that is already running.
    #[error("player is already initialized")]
    AlreadyInitialized,
    /// Buffers or the processing thread could not be allocated.
    #[error("failed to allocate player resources: {0}")]
    NoMemory(String),
    /// The processing loop did not exit within the retry budget.
    #[error("processing loop did not stop after {retries} attempts")]
    FailedToStop { retries: u32 },
}

/// A rejected `play` request.
///
/// Ownership of the source stays with the caller; take it back with
/// [`PlayRejected::into_source`] and release it.
#[derive(Error)]
#[error("play request rejected: {error}")]
pub struct PlayRejected {
    error: PlayerError,
    audio: Option<Box<dyn AudioSource>>,
}

impl PlayRejected {
    pub(crate) fn new(error: PlayerError, audio: Box<dyn AudioSource>) -> Self {
        Self {
            error,
            audio: Some(audio),
        }
    }

    /// Rejection for a request whose source never made it back out of the queue.
    pub(crate) fn unrecovered(error: PlayerError) -> Self {
        Self { error, audio: None }
    }

    /// Why the request was rejected.
    pub fn error(&self) -> &PlayerError {
        &self.error
    }

    /// Hand the source back to the caller.
    ///
    /// `None` only if the queue returned a request that carried no source; the player
    /// then never took ownership of anything to give back.
    pub fn into_source(self) -> Option<Box<dyn AudioSource>> {
        self.audio
    }
}

impl fmt::Debug for PlayRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayRejected")
            .field("error", &self.error)
            .field("source", &self.audio.as_ref().map(|a| a.label()))
            .finish()
    }
}
