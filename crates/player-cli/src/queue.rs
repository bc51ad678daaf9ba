//! Bounded queue of interleaved `f32` samples between the sink and the CPAL callback.
//!
//! The producer side (the player's processing thread, via the sink) pushes with a deadline
//! so a stalled device turns into a write timeout instead of a blocked command loop. The
//! consumer side is the real-time callback and never waits.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Thread-safe bounded queue for interleaved `f32` audio samples.
///
/// Samples are stored interleaved and the channel count is fixed for the lifetime of the
/// queue; a format change builds a new queue.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<VecDeque<f32>>,
    cv: Condvar,
    max_buffered_samples: usize,
}

/// Queue capacity in samples for `buffer_seconds` of audio, with a 2 s fallback for
/// non-positive or non-finite targets.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.max(1).saturating_mul(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(VecDeque::with_capacity(max_buffered_samples)),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().len() / self.channels
    }

    /// Push as many samples as fit before `deadline`, waiting for the callback to drain.
    ///
    /// Only whole frames are pushed. Returns the number of samples accepted.
    pub fn push_until(&self, samples: &[f32], deadline: Instant) -> usize {
        let mut offset = 0;
        let total = samples.len() - samples.len() % self.channels;

        while offset < total {
            let mut g = self.lock();
            while self.max_buffered_samples - g.len() < self.channels {
                let now = Instant::now();
                if now >= deadline {
                    return offset;
                }
                g = match self.cv.wait_timeout(g, deadline - now) {
                    Ok((g, _)) => g,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }

            let room = self.max_buffered_samples - g.len();
            let take = (room - room % self.channels).min(total - offset);
            g.extend(&samples[offset..offset + take]);
            offset += take;
        }
        offset
    }

    /// Return immediately with up to `max_frames`, or `None` if currently empty.
    pub fn pop_up_to(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_frames = (g.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.drain(..take_frames * self.channels).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Wait until the callback has drained the queue or `deadline` passes.
    ///
    /// Returns `true` if the queue is empty.
    pub fn wait_empty_until(&self, deadline: Instant) -> bool {
        let mut g = self.lock();
        while !g.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            g = match self.cv.wait_timeout(g, deadline - now) {
                Ok((g, _)) => g,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Drop everything buffered and wake a waiting producer.
    pub fn clear(&self) {
        self.lock().clear();
        self.cv.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
