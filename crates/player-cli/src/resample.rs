//! In-line sample-rate conversion for the output sink.
//!
//! Uses Rubato's streaming sinc resampler with a fixed input chunk. Input that does not
//! fill a chunk is held until the next call.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    resampler: Async<f32>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
    indexing: Indexing,
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init {src_rate} -> {dst_rate}: {e}"))?;
        let out = vec![0.0f32; resampler.output_frames_max() * channels];

        Ok(Self {
            resampler,
            channels,
            chunk_frames,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    /// Feed interleaved samples and append every completed output chunk to `dst`.
    pub fn process(&mut self, samples: &[f32], dst: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(samples);

        let chunk_samples = self.chunk_frames * self.channels;
        let mut offset = 0;
        while self.pending.len() - offset >= chunk_samples {
            let chunk = &self.pending[offset..offset + chunk_samples];
            let input = InterleavedSlice::new(chunk, self.channels, self.chunk_frames)
                .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
            let out_frames = self.out.len() / self.channels;
            let mut output = InterleavedSlice::new_mut(&mut self.out, self.channels, out_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

            let (_nbr_in, nbr_out) = self
                .resampler
                .process_into_buffer(&input, &mut output, Some(&self.indexing))
                .map_err(|e| anyhow!("resampler process: {e}"))?;
            dst.extend_from_slice(&self.out[..nbr_out * self.channels]);
            offset += chunk_samples;
        }
        self.pending.drain(..offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_held() {
        let mut rs = StreamResampler::new(8_000, 16_000, 2, 64).unwrap();
        let mut out = Vec::new();
        rs.process(&[0.0; 20], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(rs.pending.len(), 20);
    }

    #[test]
    fn upsampling_roughly_doubles_frames() {
        let mut rs = StreamResampler::new(8_000, 16_000, 1, 64).unwrap();
        let input: Vec<f32> = (0..64 * 20).map(|i| ((i as f32) * 0.05).sin()).collect();
        let mut out = Vec::new();
        rs.process(&input, &mut out).unwrap();

        assert!(rs.pending.is_empty());
        let ratio = out.len() as f32 / input.len() as f32;
        assert!(ratio > 1.7 && ratio < 2.2, "ratio {ratio}");
    }

    #[test]
    fn output_keeps_whole_frames() {
        let mut rs = StreamResampler::new(44_100, 48_000, 2, 128).unwrap();
        let mut out = Vec::new();
        rs.process(&vec![0.25; 128 * 2 * 5 + 6], &mut out).unwrap();
        assert_eq!(out.len() % 2, 0);
        assert_eq!(rs.pending.len(), 6);
    }
}
