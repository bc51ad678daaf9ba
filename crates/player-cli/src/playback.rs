//! CPAL output stream.
//!
//! The callback refills a small local buffer from the shared queue without blocking,
//! maps source channels onto the device layout and converts `f32` to the device
//! sample format.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SharedAudio;

/// Knobs and shared flags for the output callback.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Maximum number of frames to pull from the queue per refill.
    pub refill_max_frames: usize,

    /// When `true` the callback outputs silence and does not drain the queue.
    pub muted: Arc<AtomicBool>,

    /// Incremented each time the callback runs dry while unmuted.
    pub underrun_events: Arc<AtomicU64>,
}

/// Build a CPAL output stream that plays interleaved `f32` from `queue`.
///
/// `queue` must already be at the device sample rate; channel counts may differ.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    cfg: PlaybackConfig,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, cfg),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, cfg),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    cfg: PlaybackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let state = Mutex::new(PlaybackState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    });
    let refill_max_frames = cfg.refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if cfg.muted.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let Ok(mut st) = state.lock() else {
                data.fill(silence);
                return;
            };

            let frames = data.len() / channels_out;
            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match queue_cb.pop_up_to(refill_max_frames) {
                        Some(v) => st.src = v,
                        None => {
                            cfg.underrun_events.fetch_add(1, Ordering::Relaxed);
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = next_sample_mapped(&mut st, channels_out, ch);
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Interleaved samples fetched from the queue, consumed one frame at a time.
struct PlaybackState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut PlaybackState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &PlaybackState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        (1, _) => get_src(0, st),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(src_channels: usize, src: Vec<f32>, dst_channels: usize) -> Vec<f32> {
        let mut st = PlaybackState {
            pos: 0,
            src_channels,
            src,
        };
        let mut out = Vec::new();
        while st.pos < st.src.len() {
            for ch in 0..dst_channels {
                out.push(next_sample_mapped(&mut st, dst_channels, ch));
            }
        }
        out
    }

    #[test]
    fn mono_duplicates_to_stereo() {
        assert_eq!(render(1, vec![0.1, 0.2], 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_averages_to_mono() {
        let out = render(2, vec![0.2, 0.4, -1.0, 1.0], 1);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn stereo_passes_through() {
        assert_eq!(render(2, vec![0.1, 0.2, 0.3, 0.4], 2), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn stereo_into_surround_repeats_last_channel() {
        assert_eq!(render(2, vec![0.1, 0.2], 4), vec![0.1, 0.2, 0.2, 0.2]);
    }
}
