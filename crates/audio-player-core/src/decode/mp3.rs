//! MPEG audio Layer III adapter.
//!
//! Framing (sync search, header parsing, ID3v2 skipping) happens here so the processing
//! loop can resync on its own buffer; the bitstream itself is decoded by Symphonia's MP3
//! codec one packet per frame.

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use super::{DecodeError, DecodeStep, FrameDecoder, FrameInfo, PcmFormat};

const HEADER_LEN: usize = 4;
const ID3_HEADER_LEN: usize = 10;

/// Frames after a resync during which a decode failure is taken to be a missing bit
/// reservoir rather than corruption.
const RESERVOIR_FRAMES: u32 = 2;

const BITRATES_V1: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATES_V2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MpegVersion {
    V1,
    V2,
    V25,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) version: MpegVersion,
    pub(crate) bitrate_kbps: u32,
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
    pub(crate) frame_len: usize,
}

impl FrameHeader {
    pub(crate) fn samples_per_frame(&self) -> usize {
        match self.version {
            MpegVersion::V1 => 1152,
            MpegVersion::V2 | MpegVersion::V25 => 576,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HeaderError {
    /// Not a Layer III header.
    Invalid,
    /// Valid header using free-format bitrate.
    FreeBitrate,
}

/// Parse a 4-byte Layer III frame header.
pub(crate) fn parse_header(bytes: &[u8]) -> Result<FrameHeader, HeaderError> {
    if bytes.len() < HEADER_LEN || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
        return Err(HeaderError::Invalid);
    }
    let version = match (bytes[1] >> 3) & 0x03 {
        0b00 => MpegVersion::V25,
        0b10 => MpegVersion::V2,
        0b11 => MpegVersion::V1,
        _ => return Err(HeaderError::Invalid),
    };
    if (bytes[1] >> 1) & 0x03 != 0b01 {
        return Err(HeaderError::Invalid);
    }

    let bitrate_index = usize::from(bytes[2] >> 4);
    let rate_index = (bytes[2] >> 2) & 0x03;
    let padding = usize::from((bytes[2] >> 1) & 0x01);
    if bitrate_index == 0x0F || rate_index == 0x03 {
        return Err(HeaderError::Invalid);
    }

    let base_rate = match rate_index {
        0 => 44_100,
        1 => 48_000,
        _ => 32_000,
    };
    let sample_rate = match version {
        MpegVersion::V1 => base_rate,
        MpegVersion::V2 => base_rate / 2,
        MpegVersion::V25 => base_rate / 4,
    };

    if bitrate_index == 0 {
        return Err(HeaderError::FreeBitrate);
    }
    let bitrate_kbps = match version {
        MpegVersion::V1 => BITRATES_V1[bitrate_index],
        MpegVersion::V2 | MpegVersion::V25 => BITRATES_V2[bitrate_index],
    };
    let coefficient = match version {
        MpegVersion::V1 => 144,
        MpegVersion::V2 | MpegVersion::V25 => 72,
    };
    let frame_len = (coefficient * bitrate_kbps * 1000 / sample_rate) as usize + padding;
    let channels = if bytes[3] >> 6 == 0b11 { 1 } else { 2 };

    Ok(FrameHeader {
        version,
        bitrate_kbps,
        sample_rate,
        channels,
        frame_len,
    })
}

/// Total size of an ID3v2 tag starting at `bytes`, header and footer included.
pub(crate) fn id3v2_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < ID3_HEADER_LEN || !bytes.starts_with(b"ID3") {
        return None;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    Some(ID3_HEADER_LEN + size + footer)
}

pub(crate) struct Mp3Decoder {
    codec: Option<Box<dyn Decoder>>,
    codec_rate: u32,
    frames_since_sync: u32,
    ts: u64,
}

impl Mp3Decoder {
    pub(crate) fn new() -> Self {
        Self {
            codec: None,
            codec_rate: 0,
            frames_since_sync: 0,
            ts: 0,
        }
    }

    fn codec_for(&mut self, header: &FrameHeader) -> Result<&mut Box<dyn Decoder>, DecodeError> {
        if self.codec.is_none() || self.codec_rate != header.sample_rate {
            let mut params = CodecParameters::new();
            params
                .for_codec(CODEC_TYPE_MP3)
                .with_sample_rate(header.sample_rate);
            let codec = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
            tracing::debug!(sample_rate = header.sample_rate, "mp3 codec opened");
            self.codec = Some(codec);
            self.codec_rate = header.sample_rate;
        }
        self.codec
            .as_mut()
            .ok_or_else(|| DecodeError::Unsupported("mp3 codec unavailable".to_string()))
    }
}

impl FrameDecoder for Mp3Decoder {
    fn name(&self) -> &'static str {
        "mp3"
    }

    /// ID3v2 tags are only recognized ahead of the first decoded frame. A lone `0xFF` in
    /// the last three bytes counts as a possible sync so the header can be completed by
    /// the next refill.
    fn find_sync(&self, input: &[u8]) -> Option<usize> {
        (0..input.len()).find(|&i| {
            let rest = &input[i..];
            (rest.len() < HEADER_LEN && rest[0] == 0xFF)
                || (self.ts == 0 && rest.starts_with(b"ID3"))
                || matches!(
                    parse_header(rest),
                    Ok(_) | Err(HeaderError::FreeBitrate)
                )
        })
    }

    fn decode_frame(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<DecodeStep, DecodeError> {
        out.clear();

        if self.ts == 0 && input.starts_with(b"ID3") {
            let len = id3v2_len(input).ok_or(DecodeError::Underflow)?;
            tracing::debug!(bytes = len, "skipping id3v2 tag");
            return Ok(DecodeStep::Skipped { consumed: len });
        }

        let header = match parse_header(input) {
            Ok(h) => h,
            Err(HeaderError::FreeBitrate) => return Err(DecodeError::FreeBitrateSync),
            Err(HeaderError::Invalid) if input.len() < HEADER_LEN => {
                return Err(DecodeError::Underflow);
            }
            Err(HeaderError::Invalid) => {
                return Err(DecodeError::Corrupt("lost frame sync".to_string()));
            }
        };
        if input.len() < header.frame_len {
            return Err(DecodeError::Underflow);
        }

        let consumed = header.frame_len;
        let ts = self.ts;
        let dur = header.samples_per_frame() as u64;
        let in_reservoir_window = self.frames_since_sync < RESERVOIR_FRAMES;
        self.frames_since_sync = self.frames_since_sync.saturating_add(1);

        let packet = Packet::new_from_slice(0, ts, dur, &input[..consumed]);
        let codec = self.codec_for(&header)?;
        let decoded = codec.decode(&packet).map(|decoded| {
            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames > 0 {
                let mut samples = SampleBuffer::<i16>::new(frames as u64, spec);
                samples.copy_interleaved_ref(decoded);
                out.reserve(samples.samples().len() * 2);
                for s in samples.samples() {
                    out.extend_from_slice(&s.to_le_bytes());
                }
            }
            (spec, frames)
        });

        let (spec, frames) = match decoded {
            Ok(v) => v,
            Err(SymphoniaError::DecodeError(msg)) if in_reservoir_window => {
                tracing::debug!("mp3 main data underflow: {msg}");
                return Err(DecodeError::MainDataUnderflow { consumed });
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                return Err(DecodeError::Corrupt(msg.to_string()));
            }
            Err(SymphoniaError::Unsupported(msg)) => {
                return Err(DecodeError::Unsupported(msg.to_string()));
            }
            Err(SymphoniaError::ResetRequired) => {
                if let Some(codec) = self.codec.as_mut() {
                    codec.reset();
                }
                return Err(DecodeError::MainDataUnderflow { consumed });
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };
        if frames == 0 {
            return Err(DecodeError::MainDataUnderflow { consumed });
        }
        self.ts = ts + dur;

        let channels = u16::try_from(spec.channels.count()).unwrap_or(header.channels);
        Ok(DecodeStep::Frame(FrameInfo {
            consumed,
            frames,
            format: PcmFormat {
                sample_rate: spec.rate,
                channels,
                bits_per_sample: 16,
            },
        }))
    }

    fn reset_sync(&mut self) {
        self.frames_since_sync = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mpeg1_header() {
        let h = parse_header(&[0xFF, 0xFB, 0x90, 0x64]).unwrap();
        assert_eq!(h.version, MpegVersion::V1);
        assert_eq!(h.bitrate_kbps, 128);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.frame_len, 417);
        assert_eq!(h.channels, 2);
        assert_eq!(h.samples_per_frame(), 1152);
    }

    #[test]
    fn parses_mpeg2_mono_header_with_padding() {
        let h = parse_header(&[0xFF, 0xF3, 0x92, 0xC4]).unwrap();
        assert_eq!(h.version, MpegVersion::V2);
        assert_eq!(h.bitrate_kbps, 80);
        assert_eq!(h.sample_rate, 22_050);
        assert_eq!(h.frame_len, 262);
        assert_eq!(h.channels, 1);
        assert_eq!(h.samples_per_frame(), 576);
    }

    #[test]
    fn detects_free_bitrate() {
        assert_eq!(
            parse_header(&[0xFF, 0xFB, 0x00, 0x00]),
            Err(HeaderError::FreeBitrate)
        );
    }

    #[test]
    fn rejects_reserved_fields() {
        // Bad bitrate index.
        assert_eq!(parse_header(&[0xFF, 0xFB, 0xF0, 0x00]), Err(HeaderError::Invalid));
        // Reserved sample rate.
        assert_eq!(parse_header(&[0xFF, 0xFB, 0x9C, 0x00]), Err(HeaderError::Invalid));
        // Layer II.
        assert_eq!(parse_header(&[0xFF, 0xFD, 0x90, 0x00]), Err(HeaderError::Invalid));
    }

    #[test]
    fn id3v2_len_reads_synchsafe_size() {
        let tag = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 2, 1];
        assert_eq!(id3v2_len(&tag), Some(10 + 257));
        let with_footer = [b'I', b'D', b'3', 4, 0, 0x10, 0, 0, 0, 5];
        assert_eq!(id3v2_len(&with_footer), Some(25));
        assert_eq!(id3v2_len(b"ID3"), None);
    }

    #[test]
    fn find_sync_skips_garbage() {
        let dec = Mp3Decoder::new();
        let data = [0x00, 0x12, 0xFF, 0x00, 0xFF, 0xFB, 0x90, 0x64, 0x00];
        assert_eq!(dec.find_sync(&data), Some(4));
        assert_eq!(dec.find_sync(&[0u8; 32]), None);
        assert_eq!(dec.find_sync(&[0x00, 0x00, 0x00, 0xFF, 0xFB]), Some(3));
        assert_eq!(dec.find_sync(b"xxID3\x04\x00"), Some(2));
    }

    #[test]
    fn truncated_frame_underflows() {
        let mut dec = Mp3Decoder::new();
        let mut out = Vec::new();
        let data = [0xFF, 0xFB, 0x90, 0x64, 0x00, 0x00];
        assert_eq!(dec.decode_frame(&data, &mut out), Err(DecodeError::Underflow));
    }

    #[test]
    fn id3_tag_is_skipped_whole() {
        let mut dec = Mp3Decoder::new();
        let mut out = Vec::new();
        let tag = [b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 20];
        assert_eq!(
            dec.decode_frame(&tag, &mut out),
            Ok(DecodeStep::Skipped { consumed: 30 })
        );
    }

    #[test]
    fn free_bitrate_frame_is_reported() {
        let mut dec = Mp3Decoder::new();
        let mut out = Vec::new();
        assert_eq!(
            dec.decode_frame(&[0xFF, 0xFB, 0x00, 0x00, 0x00], &mut out),
            Err(DecodeError::FreeBitrateSync)
        );
    }
}
