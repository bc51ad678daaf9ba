//! Per-source playback state owned by the processing loop.

use crate::decode::{FrameDecoder, PcmFormat};
use crate::source::OwnedSource;

/// PCM produced by a decoded frame that the sink has not fully accepted yet.
#[derive(Clone, Copy, Debug)]
pub(super) struct PendingWrite {
    /// Bytes of the PCM buffer already accepted by the sink.
    pub(super) written: usize,
    /// Compressed bytes to consume once the write completes.
    pub(super) consumed: usize,
    pub(super) frames: usize,
}

/// Created when a source starts, dropped (closing the source) when it ends.
pub(super) struct PlaybackSession {
    pub(super) id: u64,
    pub(super) source: OwnedSource,
    pub(super) decoder: Option<Box<dyn FrameDecoder>>,
    /// Format of the PCM currently being written.
    pub(super) format: Option<PcmFormat>,
    pub(super) pending: Option<PendingWrite>,
    /// The source reported no data on the last read.
    pub(super) starved: bool,
}

impl PlaybackSession {
    pub(super) fn new(id: u64, source: OwnedSource) -> Self {
        Self {
            id,
            source,
            decoder: None,
            format: None,
            pending: None,
            starved: false,
        }
    }

    pub(super) fn label(&self) -> &str {
        self.source.label()
    }
}
