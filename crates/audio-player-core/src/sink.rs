//! Output sink seam.
//!
//! The processing thread is the only caller of a sink while the player is alive.

use std::time::Duration;

use thiserror::Error;

use crate::decode::PcmFormat;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The write did not complete within its timeout. Transient; retried next iteration.
    #[error("sink write timed out")]
    TimedOut,
    #[error("sink failure: {0}")]
    Fatal(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MuteSetting {
    Mute,
    Unmute,
}

/// Destination for decoded PCM (interleaved, little-endian, integer samples).
pub trait OutputSink: Send {
    /// Write up to `pcm.len()` bytes, blocking at most `timeout`.
    ///
    /// Returns the number of bytes accepted, which may be fewer than offered.
    fn write(&mut self, pcm: &[u8], timeout: Duration) -> Result<usize, SinkError>;

    /// Switch to a new sample rate, bit depth or channel count.
    fn reconfigure(&mut self, format: PcmFormat) -> Result<(), SinkError>;

    /// Optional mute control. Must not wait for queued audio.
    fn set_mute(&mut self, _setting: MuteSetting) -> Result<(), SinkError> {
        Ok(())
    }

    /// Let already accepted audio play out, blocking at most `timeout`.
    ///
    /// Returns `true` once nothing is left queued. Sinks without their own buffering
    /// keep the default.
    fn drain(&mut self, _timeout: Duration) -> Result<bool, SinkError> {
        Ok(true)
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write(&mut self, pcm: &[u8], timeout: Duration) -> Result<usize, SinkError> {
        (**self).write(pcm, timeout)
    }

    fn reconfigure(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        (**self).reconfigure(format)
    }

    fn set_mute(&mut self, setting: MuteSetting) -> Result<(), SinkError> {
        (**self).set_mute(setting)
    }

    fn drain(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        (**self).drain(timeout)
    }
}
