//! RIFF/WAVE passthrough.
//!
//! Walks the chunk list until `data`, then hands out whole PCM frames in bounded chunks
//! so a pending command is seen between chunks.

use super::{DecodeError, DecodeStep, FrameDecoder, FrameInfo, PcmFormat};

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const FMT_MIN_LEN: usize = 16;
const FORMAT_PCM: u16 = 0x0001;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

enum State {
    Riff,
    Chunks { format: Option<PcmFormat> },
    Data { format: PcmFormat, remaining: u64 },
}

pub(crate) struct WavDecoder {
    state: State,
    max_chunk_frames: usize,
}

impl WavDecoder {
    pub(crate) fn new(max_chunk_frames: usize) -> Self {
        Self {
            state: State::Riff,
            max_chunk_frames: max_chunk_frames.max(1),
        }
    }
}

fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Parse a `fmt ` chunk body.
fn parse_fmt(body: &[u8]) -> Result<PcmFormat, DecodeError> {
    let mut tag = le_u16(body, 0);
    if tag == FORMAT_EXTENSIBLE {
        // cbSize, validBits, channelMask, then the sub-format GUID whose first two bytes
        // carry the format tag.
        if body.len() < 26 {
            return Err(DecodeError::Corrupt("truncated WAVE_FORMAT_EXTENSIBLE".into()));
        }
        tag = le_u16(body, 24);
    }
    if tag != FORMAT_PCM {
        return Err(DecodeError::Unsupported(format!("wav format tag {tag:#06x}")));
    }

    let channels = le_u16(body, 2);
    let sample_rate = le_u32(body, 4);
    let bits_per_sample = le_u16(body, 14);
    if channels == 0 || sample_rate == 0 {
        return Err(DecodeError::Corrupt("wav fmt chunk has zero channels or rate".into()));
    }
    if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(DecodeError::Unsupported(format!(
            "{bits_per_sample}-bit wav"
        )));
    }
    Ok(PcmFormat {
        sample_rate,
        channels,
        bits_per_sample,
    })
}

impl FrameDecoder for WavDecoder {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn find_sync(&self, _input: &[u8]) -> Option<usize> {
        Some(0)
    }

    fn decode_frame(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<DecodeStep, DecodeError> {
        out.clear();
        match &mut self.state {
            State::Riff => {
                if input.len() < RIFF_HEADER_LEN {
                    return Err(DecodeError::Underflow);
                }
                if &input[0..4] != b"RIFF" || &input[8..12] != b"WAVE" {
                    return Err(DecodeError::Corrupt("missing RIFF/WAVE header".into()));
                }
                self.state = State::Chunks { format: None };
                Ok(DecodeStep::Skipped {
                    consumed: RIFF_HEADER_LEN,
                })
            }
            State::Chunks { format } => {
                if input.len() < CHUNK_HEADER_LEN {
                    return Err(DecodeError::Underflow);
                }
                let id = &input[0..4];
                let size = le_u32(input, 4) as usize;
                let padded = CHUNK_HEADER_LEN + size + (size & 1);

                if id == b"fmt " {
                    if size < FMT_MIN_LEN {
                        return Err(DecodeError::Corrupt(format!("fmt chunk of {size} bytes")));
                    }
                    if input.len() < CHUNK_HEADER_LEN + size {
                        return Err(DecodeError::Underflow);
                    }
                    let parsed = parse_fmt(&input[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + size])?;
                    tracing::debug!(
                        sample_rate = parsed.sample_rate,
                        channels = parsed.channels,
                        bits = parsed.bits_per_sample,
                        "wav format"
                    );
                    *format = Some(parsed);
                    return Ok(DecodeStep::Skipped { consumed: padded });
                }

                if id == b"data" {
                    let Some(format) = *format else {
                        return Err(DecodeError::Corrupt("data chunk before fmt chunk".into()));
                    };
                    self.state = State::Data {
                        format,
                        remaining: size as u64,
                    };
                    return Ok(DecodeStep::Skipped {
                        consumed: CHUNK_HEADER_LEN,
                    });
                }

                tracing::debug!(
                    chunk = %String::from_utf8_lossy(id),
                    bytes = size,
                    "skipping wav chunk"
                );
                Ok(DecodeStep::Skipped { consumed: padded })
            }
            State::Data { format, remaining } => {
                let frame_bytes = format.bytes_per_frame();
                if *remaining < frame_bytes as u64 {
                    return Ok(DecodeStep::Finished);
                }
                let available = (input.len() as u64).min(*remaining) as usize;
                let frames = (available / frame_bytes).min(self.max_chunk_frames);
                if frames == 0 {
                    return Err(DecodeError::Underflow);
                }
                let bytes = frames * frame_bytes;
                out.extend_from_slice(&input[..bytes]);
                *remaining -= bytes as u64;
                Ok(DecodeStep::Frame(FrameInfo {
                    consumed: bytes,
                    frames,
                    format: *format,
                }))
            }
        }
    }
}
