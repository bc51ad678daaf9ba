//! Player handle and lifecycle.
//!
//! [`AudioPlayer`] owns one processing thread. Every public command is a non-blocking
//! enqueue onto a bounded channel; the thread applies them in order and reports progress
//! through the registered listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::buffer::StreamBuffer;
use crate::command::{Command, try_enqueue};
use crate::config::PlayerConfig;
use crate::error::{PlayRejected, PlayerError};
use crate::event::{CallbackContext, ListenerSlot, PlayerState, StateCell, UserContext};
use crate::sink::OutputSink;
use crate::source::{AudioSource, OwnedSource};
use crate::status::{PlayerCounters, PlayerStatus};

mod session;
mod worker;

use worker::Worker;

/// State visible to both caller threads and the processing thread.
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) listener: ListenerSlot,
    pub(crate) counters: PlayerCounters,
    pub(crate) running: AtomicBool,
    pub(crate) wake_pending: AtomicBool,
}

impl Shared {
    fn new(state: PlayerState) -> Self {
        Self {
            state: StateCell::new(state),
            listener: ListenerSlot::default(),
            counters: PlayerCounters::default(),
            running: AtomicBool::new(false),
            wake_pending: AtomicBool::new(false),
        }
    }
}

/// Cloneable command handle for a running player.
///
/// Safe to use from any thread, including from inside the listener.
#[derive(Clone)]
pub struct PlayerHandle {
    tx: Sender<Command>,
    shared: Arc<Shared>,
}

impl PlayerHandle {
    /// Start `source` now, interrupting whatever is loaded.
    ///
    /// Returns once the request is queued. On rejection the source is handed back
    /// unclosed inside [`PlayRejected`].
    pub fn play(&self, source: Box<dyn AudioSource>) -> Result<(), PlayRejected> {
        self.enqueue_source(source, Command::Play)
    }

    /// Stage `source` to start when the current one reaches its natural end.
    ///
    /// With nothing loaded this behaves like [`PlayerHandle::play`]. Staging again replaces
    /// (and closes) the previously staged source.
    pub fn play_next(&self, source: Box<dyn AudioSource>) -> Result<(), PlayRejected> {
        self.enqueue_source(source, Command::PlayNext)
    }

    /// Pause; no-op unless playing.
    pub fn pause(&self) -> Result<(), PlayerError> {
        self.send(Command::Pause)
    }

    /// Resume; no-op unless paused.
    pub fn resume(&self) -> Result<(), PlayerError> {
        self.send(Command::Resume)
    }

    /// Stop and release the current source; no-op when idle.
    pub fn stop(&self) -> Result<(), PlayerError> {
        self.send(Command::Stop)
    }

    /// Most recently applied state.
    pub fn state(&self) -> PlayerState {
        self.shared.state.load()
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.counters.snapshot(self.state())
    }

    /// Waker for streamed sources.
    pub fn data_notifier(&self) -> DataNotifier {
        DataNotifier {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }

    fn send(&self, cmd: Command) -> Result<(), PlayerError> {
        let name = cmd.name();
        try_enqueue(&self.tx, cmd).map_err(|(e, _)| {
            tracing::debug!(command = name, error = %e, "command rejected");
            e
        })
    }

    fn enqueue_source(
        &self,
        source: Box<dyn AudioSource>,
        wrap: fn(OwnedSource) -> Command,
    ) -> Result<(), PlayRejected> {
        if source.total_len() == Some(0) {
            return Err(PlayRejected::new(
                PlayerError::InvalidArgument("source is empty"),
                source,
            ));
        }
        let cmd = wrap(OwnedSource::new(source));
        let name = cmd.name();
        try_enqueue(&self.tx, cmd).map_err(|(error, cmd)| {
            tracing::debug!(command = name, error = %error, "command rejected");
            match cmd.into_source().and_then(OwnedSource::into_inner) {
                Some(audio) => PlayRejected::new(error, audio),
                None => PlayRejected::unrecovered(error),
            }
        })
    }
}

/// Wakes the processing loop when a streamed source has new data.
///
/// Wake-ups coalesce: at most one is queued at a time.
#[derive(Clone)]
pub struct DataNotifier {
    tx: Sender<Command>,
    shared: Arc<Shared>,
}

impl DataNotifier {
    pub fn notify(&self) {
        if self.shared.wake_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        if try_enqueue(&self.tx, Command::FrameDecoded).is_err() {
            self.shared.wake_pending.store(false, Ordering::Release);
        }
    }
}

struct Core {
    handle: PlayerHandle,
    join: Option<JoinHandle<()>>,
    retries: u32,
    retry_delay: Duration,
}

/// An audio player instance.
///
/// Created uninitialized; [`AudioPlayer::create`] starts the processing thread and
/// [`AudioPlayer::destroy`] stops it. Dropping a running player destroys it.
pub struct AudioPlayer {
    shared: Arc<Shared>,
    core: Option<Core>,
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPlayer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new(PlayerState::Idle)),
            core: None,
        }
    }

    /// Create and start a player in one call.
    pub fn with_sink<S: OutputSink + 'static>(
        config: PlayerConfig,
        sink: S,
    ) -> Result<Self, PlayerError> {
        let mut player = Self::new();
        player.create(config, sink)?;
        Ok(player)
    }

    /// Allocate buffers and the command queue, then spawn the processing thread.
    ///
    /// Nothing is kept if any step fails.
    pub fn create<S: OutputSink + 'static>(
        &mut self,
        config: PlayerConfig,
        sink: S,
    ) -> Result<(), PlayerError> {
        if self.core.is_some() {
            return Err(PlayerError::AlreadyInitialized);
        }
        config.validate()?;

        let buffer = StreamBuffer::with_capacity(config.read_buffer_bytes)?;
        let mut pcm = Vec::new();
        // Worst case: one full passthrough chunk of 32-bit stereo, doubled by mono expansion.
        let pcm_capacity = config.max_chunk_frames.max(1152) * 8 * 2;
        pcm.try_reserve_exact(pcm_capacity)
            .map_err(|e| PlayerError::NoMemory(format!("pcm buffer: {e}")))?;

        let (tx, rx) = crossbeam_channel::bounded(config.command_queue_depth);
        let shared = Arc::new(Shared::new(PlayerState::Idle));
        shared.running.store(true, Ordering::Release);

        let retries = config.shutdown_retries;
        let retry_delay = config.shutdown_retry_delay;
        let thread_name = config.thread_name.clone();
        let worker = Worker::new(config, rx, Box::new(sink), shared.clone(), buffer, pcm);

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || worker.run())
            .map_err(|e| PlayerError::NoMemory(format!("spawn {thread_name}: {e}")))?;

        tracing::info!(thread = %thread_name, "audio player created");
        self.shared = shared.clone();
        self.core = Some(Core {
            handle: PlayerHandle { tx, shared },
            join: Some(join),
            retries,
            retry_delay,
        });
        Ok(())
    }

    /// Stop the processing thread and release everything it owns.
    ///
    /// Sends stop + shutdown and waits up to `shutdown_retries` × `shutdown_retry_delay`.
    /// If the thread is still running after that it is detached and
    /// [`PlayerError::FailedToStop`] is returned.
    pub fn destroy(&mut self) -> Result<(), PlayerError> {
        let Some(mut core) = self.core.take() else {
            return Err(PlayerError::NotInitialized);
        };

        let mut attempts = 0;
        while self.shared.running.load(Ordering::Acquire) && attempts < core.retries.max(1) {
            attempts += 1;
            let _ = try_enqueue(&core.handle.tx, Command::Stop);
            let _ = try_enqueue(&core.handle.tx, Command::Shutdown);
            let deadline = Instant::now() + core.retry_delay;
            while self.shared.running.load(Ordering::Acquire) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            tracing::debug!(attempt = attempts, "waiting for processing loop to stop");
        }

        if self.shared.running.load(Ordering::Acquire) {
            tracing::error!(
                retries = core.retries,
                "processing loop did not stop; leaking thread"
            );
            core.join.take();
            return Err(PlayerError::FailedToStop {
                retries: core.retries,
            });
        }

        if let Some(join) = core.join.take() {
            if join.join().is_err() {
                tracing::error!("processing thread panicked");
            }
        }
        tracing::info!("audio player destroyed");
        Ok(())
    }

    /// Cloneable handle for issuing commands from other threads or the listener.
    pub fn handle(&self) -> Result<PlayerHandle, PlayerError> {
        self.core
            .as_ref()
            .map(|c| c.handle.clone())
            .ok_or(PlayerError::NotInitialized)
    }

    pub fn play(&self, source: Box<dyn AudioSource>) -> Result<(), PlayRejected> {
        match self.core.as_ref() {
            Some(core) => core.handle.play(source),
            None => Err(PlayRejected::new(PlayerError::NotInitialized, source)),
        }
    }

    pub fn play_next(&self, source: Box<dyn AudioSource>) -> Result<(), PlayRejected> {
        match self.core.as_ref() {
            Some(core) => core.handle.play_next(source),
            None => Err(PlayRejected::new(PlayerError::NotInitialized, source)),
        }
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.handle_ref()?.pause()
    }

    pub fn resume(&self) -> Result<(), PlayerError> {
        self.handle_ref()?.resume()
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.handle_ref()?.stop()
    }

    /// Replace the listener. Events already dispatched are not replayed.
    pub fn register_callback<F>(
        &self,
        callback: F,
        user_ctx: Option<UserContext>,
    ) -> Result<(), PlayerError>
    where
        F: Fn(&CallbackContext) + Send + Sync + 'static,
    {
        if self.core.is_none() {
            return Err(PlayerError::NotInitialized);
        }
        self.shared.listener.replace(Box::new(callback), user_ctx);
        Ok(())
    }

    /// Most recently applied state. Never blocks on the processing loop.
    pub fn state(&self) -> PlayerState {
        self.shared.state.load()
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.counters.snapshot(self.state())
    }

    pub fn data_notifier(&self) -> Result<DataNotifier, PlayerError> {
        Ok(self.handle_ref()?.data_notifier())
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    fn handle_ref(&self) -> Result<&PlayerHandle, PlayerError> {
        self.core
            .as_ref()
            .map(|c| &c.handle)
            .ok_or(PlayerError::NotInitialized)
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if self.core.is_some() {
            if let Err(e) = self.destroy() {
                tracing::warn!("audio player drop: {e}");
            }
        }
    }
}
