use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::decode::PcmFormat;
use crate::event::PlayerState;

/// Counters updated by the processing loop and read by status callers.
#[derive(Debug, Default)]
pub(crate) struct PlayerCounters {
    frames_written: AtomicU64,
    write_timeouts: AtomicU64,
    resync_bytes: AtomicU64,
    sources_completed: AtomicU64,
    sources_failed: AtomicU64,
    now_playing: Mutex<Option<String>>,
    output_format: Mutex<Option<PcmFormat>>,
}

impl PlayerCounters {
    pub(crate) fn add_frames(&self, frames: u64) {
        self.frames_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn add_write_timeout(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_resync_bytes(&self, bytes: u64) {
        self.resync_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn source_completed(&self) {
        self.sources_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn source_failed(&self) {
        self.sources_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_now_playing(&self, label: Option<String>) {
        *self.now_playing.lock().unwrap_or_else(|e| e.into_inner()) = label;
    }

    pub(crate) fn set_output_format(&self, format: Option<PcmFormat>) {
        *self.output_format.lock().unwrap_or_else(|e| e.into_inner()) = format;
    }

    /// Return a snapshot for API callers.
    pub(crate) fn snapshot(&self, state: PlayerState) -> PlayerStatus {
        PlayerStatus {
            state,
            now_playing: self
                .now_playing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            output_format: *self.output_format.lock().unwrap_or_else(|e| e.into_inner()),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            resync_bytes: self.resync_bytes.load(Ordering::Relaxed),
            sources_completed: self.sources_completed.load(Ordering::Relaxed),
            sources_failed: self.sources_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// Label of the source currently loaded, if any.
    pub now_playing: Option<String>,
    /// Format last negotiated with the sink.
    pub output_format: Option<PcmFormat>,
    /// PCM frames fully accepted by the sink.
    pub frames_written: u64,
    /// Sink writes that hit their timeout and were retried.
    pub write_timeouts: u64,
    /// Bytes dropped while searching for frame sync.
    pub resync_bytes: u64,
    /// Sources that played to their natural end.
    pub sources_completed: u64,
    /// Sources abandoned because of a decode, sink or read error.
    pub sources_failed: u64,
}
