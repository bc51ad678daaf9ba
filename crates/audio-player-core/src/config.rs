use std::time::Duration;

use crate::error::PlayerError;

/// Upper bound for one compressed MP3 frame plus slack, in bytes.
pub const MAINBUF_SIZE: usize = 1940;

/// Player tuning parameters shared by the command loop, decode and output stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Capacity of the bounded command queue.
    pub command_queue_depth: usize,
    /// How long an idle or paused loop waits for a command before ticking again.
    pub poll_interval: Duration,
    /// Upper bound for a single blocking sink write.
    pub write_timeout: Duration,
    /// Size of the compressed read buffer in bytes.
    pub read_buffer_bytes: usize,
    /// Max PCM frames handed to the sink per passthrough chunk.
    ///
    /// Smaller values tighten cancellation latency for uncompressed sources.
    pub max_chunk_frames: usize,
    /// How long to wait for a replacement source after natural end-of-stream.
    ///
    /// Zero means only a replacement that is already queued counts.
    pub next_source_grace: Duration,
    /// Number of stop attempts `destroy()` makes before giving up.
    pub shutdown_retries: u32,
    /// Delay between stop attempts.
    pub shutdown_retry_delay: Duration,
    /// Longest a natural end waits for the sink to play out queued audio.
    ///
    /// The wait also ends as soon as a command arrives. Zero skips it.
    pub drain_timeout: Duration,
    /// Expand mono frames to interleaved stereo before they reach the sink.
    pub force_stereo: bool,
    /// Name given to the processing thread.
    pub thread_name: String,
}

impl Default for PlayerConfig {
    /// Defaults sized for MP3 playback with tens-of-milliseconds command latency.
    fn default() -> Self {
        Self {
            command_queue_depth: 4,
            poll_interval: Duration::from_millis(20),
            write_timeout: Duration::from_millis(50),
            read_buffer_bytes: MAINBUF_SIZE * 3,
            max_chunk_frames: 1152,
            next_source_grace: Duration::ZERO,
            shutdown_retries: 5,
            shutdown_retry_delay: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(1),
            force_stereo: false,
            thread_name: "audio-player".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Reject values the processing loop cannot run with.
    pub fn validate(&self) -> Result<(), PlayerError> {
        if self.command_queue_depth == 0 {
            return Err(PlayerError::InvalidArgument(
                "command_queue_depth must be at least 1",
            ));
        }
        if self.read_buffer_bytes < MAINBUF_SIZE {
            return Err(PlayerError::InvalidArgument(
                "read_buffer_bytes must hold at least one compressed frame",
            ));
        }
        if self.max_chunk_frames == 0 {
            return Err(PlayerError::InvalidArgument(
                "max_chunk_frames must be at least 1",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PlayerError::InvalidArgument("poll_interval must be non-zero"));
        }
        Ok(())
    }

    /// Refill the read buffer once fewer unread bytes than this remain.
    pub(crate) fn refill_threshold(&self) -> usize {
        // 1.25 frames worth of slack in the default 3-frame buffer.
        self.read_buffer_bytes * 5 / 12
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PlayerConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_queue_depth() {
        let cfg = PlayerConfig {
            command_queue_depth: 0,
            ..PlayerConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(PlayerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn validate_rejects_tiny_read_buffer() {
        let cfg = PlayerConfig {
            read_buffer_bytes: 16,
            ..PlayerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn refill_threshold_matches_default_slack() {
        let cfg = PlayerConfig::default();
        assert_eq!(cfg.refill_threshold(), 2425);
    }
}
