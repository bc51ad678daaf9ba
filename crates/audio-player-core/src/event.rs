//! Player state, listener events and the single-slot listener registry.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Playback state owned by the processing loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlayerState {
    Idle = 0,
    Playing = 1,
    Paused = 2,
    /// Terminal: the processing loop has exited.
    Shutdown = 3,
}

impl PlayerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PlayerState::Playing,
            2 => PlayerState::Paused,
            3 => PlayerState::Shutdown,
            _ => PlayerState::Idle,
        }
    }
}

/// Event delivered to the registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayerEvent {
    /// Not playing audio.
    Idle,
    /// A source finished and its replacement started without leaving `Playing`.
    CompletedPlayingNext,
    /// Playing (fresh start, resume, or interruption by a new source).
    Playing,
    /// Paused.
    Pause,
    /// The processing loop is shutting down.
    Shutdown,
    /// The source is not a recognized or supported audio format.
    UnknownFileType,
    /// Playback of the source failed for another reason.
    Unknown,
}

impl PlayerEvent {
    /// Stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerEvent::Idle => "idle",
            PlayerEvent::CompletedPlayingNext => "completed_playing_next",
            PlayerEvent::Playing => "playing",
            PlayerEvent::Pause => "pause",
            PlayerEvent::Shutdown => "shutdown",
            PlayerEvent::UnknownFileType => "unknown_file_type",
            PlayerEvent::Unknown => "unknown",
        }
    }
}

impl From<PlayerState> for PlayerEvent {
    fn from(state: PlayerState) -> Self {
        match state {
            PlayerState::Idle => PlayerEvent::Idle,
            PlayerState::Playing => PlayerEvent::Playing,
            PlayerState::Paused => PlayerEvent::Pause,
            PlayerState::Shutdown => PlayerEvent::Shutdown,
        }
    }
}

impl fmt::Display for PlayerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque caller context handed back with every event.
pub type UserContext = Arc<dyn Any + Send + Sync>;

/// Payload passed to the listener.
#[derive(Clone)]
pub struct CallbackContext {
    pub event: PlayerEvent,
    pub user_ctx: Option<UserContext>,
}

impl fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackContext")
            .field("event", &self.event)
            .field("user_ctx", &self.user_ctx.is_some())
            .finish()
    }
}

type Callback = Box<dyn Fn(&CallbackContext) + Send + Sync>;

struct Registration {
    callback: Callback,
    user_ctx: Option<UserContext>,
}

/// Holds at most one listener; registering replaces the previous one.
///
/// The processing thread clones the registration out of the lock before calling it, so a
/// listener may re-register or issue player commands from inside the callback.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    inner: Mutex<Option<Arc<Registration>>>,
}

impl ListenerSlot {
    pub(crate) fn replace(&self, callback: Callback, user_ctx: Option<UserContext>) {
        let registration = Arc::new(Registration { callback, user_ctx });
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(registration);
    }

    pub(crate) fn dispatch(&self, event: PlayerEvent) {
        tracing::info!(event = event.as_str(), "player event");
        let registration = {
            let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        let Some(registration) = registration else {
            return;
        };
        let ctx = CallbackContext {
            event,
            user_ctx: registration.user_ctx.clone(),
        };
        if catch_unwind(AssertUnwindSafe(|| (registration.callback)(&ctx))).is_err() {
            tracing::error!(event = event.as_str(), "listener panicked");
        }
    }
}

/// Lock-free state cell readable from any thread.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: PlayerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> PlayerState {
        PlayerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: PlayerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
