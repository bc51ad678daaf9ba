//! Control messages carried by the bounded command queue.

use std::fmt;

use crossbeam_channel::{Sender, TrySendError};

use crate::error::PlayerError;
use crate::source::OwnedSource;

/// One request for the processing loop. Applied strictly in enqueue order.
pub(crate) enum Command {
    /// Start `source` now, interrupting anything active.
    Play(OwnedSource),
    /// Start `source` when the current one ends naturally.
    PlayNext(OwnedSource),
    Pause,
    Resume,
    Stop,
    /// Streamed data arrived; wake the loop.
    FrameDecoded,
    /// Terminate the loop.
    Shutdown,
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::PlayNext(_) => "play_next",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::FrameDecoded => "frame_decoded",
            Command::Shutdown => "shutdown",
        }
    }

    /// Recover the source carried by a command that never reached the loop.
    pub(crate) fn into_source(self) -> Option<OwnedSource> {
        match self {
            Command::Play(s) | Command::PlayNext(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Play(s) => write!(f, "Play({})", s.label()),
            Command::PlayNext(s) => write!(f, "PlayNext({})", s.label()),
            other => f.write_str(other.name()),
        }
    }
}

/// Enqueue without blocking; a rejected command is handed back with the error.
pub(crate) fn try_enqueue(tx: &Sender<Command>, cmd: Command) -> Result<(), (PlayerError, Command)> {
    match tx.try_send(cmd) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(cmd)) => Err((PlayerError::QueueFull, cmd)),
        Err(TrySendError::Disconnected(cmd)) => Err((PlayerError::NotInitialized, cmd)),
    }
}
