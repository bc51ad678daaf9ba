//! Frame decoder adapters.
//!
//! The processing loop only sees [`FrameDecoder`]: locate a sync point in the buffered
//! bytes, decode one frame into interleaved little-endian PCM and report how many
//! compressed bytes that consumed. Which adapter runs is chosen by [`probe`] from the head
//! of the stream, so sources never need to be seekable.

use thiserror::Error;

pub(crate) mod mp3;
pub(crate) mod wav;

/// Bytes [`probe`] wants to see before deciding.
pub(crate) const PROBE_BYTES: usize = 12;

/// Output format of decoded PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits_per_sample).div_ceil(8)
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * usize::from(self.channels)
    }
}

/// Per-frame metadata reported by a decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    /// Compressed bytes this frame occupied.
    pub consumed: usize,
    /// PCM frames (samples per channel) produced.
    pub frames: usize,
    pub format: PcmFormat,
}

/// Outcome of one successful decode call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DecodeStep {
    /// PCM was produced.
    Frame(FrameInfo),
    /// Metadata (tags, container chunks) was consumed without producing PCM.
    Skipped { consumed: usize },
    /// The decoder knows the stream has no more audio.
    Finished,
}

/// Decoder failure kinds.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough buffered bytes for a whole frame.
    #[error("not enough data for a full frame")]
    Underflow,
    /// The frame references bit-reservoir data that is not available; skip it.
    #[error("main data underflow")]
    MainDataUnderflow { consumed: usize },
    /// Free-format bitstreams are not supported.
    #[error("free bitrate streams are not supported")]
    FreeBitrateSync,
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("corrupt stream: {0}")]
    Corrupt(String),
}

impl DecodeError {
    /// Whether this error means the source is not a playable format at all.
    pub fn is_format_error(&self) -> bool {
        matches!(self, DecodeError::FreeBitrateSync | DecodeError::Unsupported(_))
    }
}

/// Incremental decoder driven by the processing loop.
pub(crate) trait FrameDecoder: Send {
    fn name(&self) -> &'static str;

    /// Offset of the next frame start in `input`, if any.
    fn find_sync(&self, input: &[u8]) -> Option<usize>;

    /// Decode the frame at the start of `input`, appending PCM to `out` (cleared first).
    fn decode_frame(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<DecodeStep, DecodeError>;

    /// Called after bytes were dropped to regain sync.
    fn reset_sync(&mut self) {}
}

/// Stream container recognized by [`probe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SourceFormat {
    Mp3,
    Wav,
}

/// Identify the stream format from its first bytes.
pub(crate) fn probe(head: &[u8]) -> Option<SourceFormat> {
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WAVE" {
        return Some(SourceFormat::Wav);
    }
    if head.starts_with(b"ID3") {
        return Some(SourceFormat::Mp3);
    }
    // 11-bit frame sync followed by a Layer III layer field.
    if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE6 == 0xE2 {
        return Some(SourceFormat::Mp3);
    }
    None
}

pub(crate) fn open_decoder(format: SourceFormat, max_chunk_frames: usize) -> Box<dyn FrameDecoder> {
    match format {
        SourceFormat::Mp3 => Box::new(mp3::Mp3Decoder::new()),
        SourceFormat::Wav => Box::new(wav::WavDecoder::new(max_chunk_frames)),
    }
}
