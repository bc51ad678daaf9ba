//! CPAL-backed [`OutputSink`].
//!
//! CPAL devices and streams stay on a dedicated `audio-output` thread; the sink itself only
//! holds the sample queue, so it can move into the player's processing thread. Writes
//! convert integer PCM to `f32`, resample when the device cannot run at the source rate and
//! push into the queue with the caller's timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use audio_player_core::{MuteSetting, OutputSink, PcmFormat, SinkError};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::device;
use crate::playback::{self, PlaybackConfig};
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::resample::StreamResampler;

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Output-side tuning.
#[derive(Clone, Debug)]
pub struct OutputSettings {
    /// Target queue depth in seconds.
    pub buffer_seconds: f32,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Maximum frames the callback pulls from the queue per refill.
    pub refill_max_frames: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            buffer_seconds: 0.5,
            chunk_frames: 1024,
            refill_max_frames: 4096,
        }
    }
}

enum OutputRequest {
    Open {
        format: PcmFormat,
        reply: Sender<Result<OpenedStream, String>>,
    },
}

struct OpenedStream {
    device_rate: u32,
    queue: Arc<SharedAudio>,
}

struct Active {
    format: PcmFormat,
    queue: Arc<SharedAudio>,
    resampler: Option<StreamResampler>,
}

pub struct CpalSink {
    requests: Sender<OutputRequest>,
    settings: OutputSettings,
    muted: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    active: Option<Active>,
    /// Converted samples not yet accepted by the queue.
    backlog: Vec<f32>,
    scratch: Vec<f32>,
}

impl CpalSink {
    /// Start the output thread and select the device.
    ///
    /// No stream is opened until the first [`OutputSink::reconfigure`].
    pub fn open(device_name: Option<String>, settings: OutputSettings) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let muted = Arc::new(AtomicBool::new(true));
        let underruns = Arc::new(AtomicU64::new(0));

        let ctx = OutputThread {
            device_name,
            settings: settings.clone(),
            muted: muted.clone(),
            underruns: underruns.clone(),
        };
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || ctx.run(ready_tx, rx))
            .context("spawn audio-output thread")?;

        ready_rx
            .recv()
            .context("audio-output thread exited during startup")?
            .map_err(|e| anyhow!(e))?;

        Ok(Self {
            requests: tx,
            settings,
            muted,
            underruns,
            active: None,
            backlog: Vec::new(),
            scratch: Vec::new(),
        })
    }

    fn open_stream(&self, format: PcmFormat) -> Result<OpenedStream, SinkError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.requests
            .send(OutputRequest::Open {
                format,
                reply: reply_tx,
            })
            .map_err(|_| SinkError::Fatal("audio-output thread is gone".to_string()))?;
        reply_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|e| SinkError::Fatal(format!("open output stream: {e}")))?
            .map_err(SinkError::Fatal)
    }
}

impl OutputSink for CpalSink {
    fn write(&mut self, pcm: &[u8], timeout: Duration) -> Result<usize, SinkError> {
        let deadline = Instant::now() + timeout;
        let Some(active) = self.active.as_mut() else {
            return Err(SinkError::Fatal("output stream not configured".to_string()));
        };

        if !self.backlog.is_empty() {
            let pushed = active.queue.push_until(&self.backlog, deadline);
            self.backlog.drain(..pushed);
            if !self.backlog.is_empty() {
                return Err(SinkError::TimedOut);
            }
        }

        let frame_bytes = active.format.bytes_per_frame();
        let accepted = pcm.len() - pcm.len() % frame_bytes;
        if accepted == 0 {
            return Ok(0);
        }

        self.scratch.clear();
        pcm_to_f32(
            &pcm[..accepted],
            active.format.bits_per_sample,
            &mut self.scratch,
        );
        match active.resampler.as_mut() {
            Some(rs) => rs
                .process(&self.scratch, &mut self.backlog)
                .map_err(|e| SinkError::Fatal(format!("{e:#}")))?,
            None => self.backlog.extend_from_slice(&self.scratch),
        }

        let pushed = active.queue.push_until(&self.backlog, deadline);
        self.backlog.drain(..pushed);
        Ok(accepted)
    }

    fn reconfigure(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        if self.active.as_ref().map(|a| a.format) == Some(format) {
            return Ok(());
        }
        if !matches!(format.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(SinkError::Fatal(format!(
                "unsupported bit depth {}",
                format.bits_per_sample
            )));
        }

        self.active = None;
        self.backlog.clear();
        let opened = self.open_stream(format)?;

        let resampler = if opened.device_rate != format.sample_rate {
            let rs = StreamResampler::new(
                format.sample_rate,
                opened.device_rate,
                format.channels as usize,
                self.settings.chunk_frames,
            )
            .map_err(|e| SinkError::Fatal(format!("{e:#}")))?;
            Some(rs)
        } else {
            None
        };

        tracing::info!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            bits = format.bits_per_sample,
            device_rate_hz = opened.device_rate,
            resampling = resampler.is_some(),
            underruns = self.underruns.swap(0, Ordering::Relaxed),
            "output reconfigured"
        );
        self.active = Some(Active {
            format,
            queue: opened.queue,
            resampler,
        });
        Ok(())
    }

    fn set_mute(&mut self, setting: MuteSetting) -> Result<(), SinkError> {
        match setting {
            MuteSetting::Unmute => self.muted.store(false, Ordering::Relaxed),
            MuteSetting::Mute => {
                self.muted.store(true, Ordering::Relaxed);
                if let Some(active) = &self.active {
                    active.queue.clear();
                }
                self.backlog.clear();
            }
        }
        tracing::debug!(?setting, "output mute");
        Ok(())
    }

    fn drain(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        let deadline = Instant::now() + timeout;
        let Some(active) = self.active.as_ref() else {
            return Ok(true);
        };
        if !self.backlog.is_empty() {
            let pushed = active.queue.push_until(&self.backlog, deadline);
            self.backlog.drain(..pushed);
        }
        let empty = active.queue.wait_empty_until(deadline);
        Ok(empty && self.backlog.is_empty())
    }
}

/// Owner of the CPAL host, device and stream.
struct OutputThread {
    device_name: Option<String>,
    settings: OutputSettings,
    muted: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
}

impl OutputThread {
    fn run(self, ready: Sender<Result<(), String>>, rx: Receiver<OutputRequest>) {
        let host = cpal::default_host();
        let device = match device::pick_device(&host, self.device_name.as_deref()) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready.send(Err(format!("{e:#}")));
                return;
            }
        };
        match device.description() {
            Ok(name) => tracing::info!(device = %name, "output device"),
            Err(e) => tracing::warn!("output device has no description: {e}"),
        }
        let _ = ready.send(Ok(()));

        // Dropping the stream stops it; the previous one goes before a new one opens.
        let mut stream: Option<cpal::Stream> = None;
        while let Ok(req) = rx.recv() {
            match req {
                OutputRequest::Open { format, reply } => {
                    stream = None;
                    let result = match self.open(&device, format) {
                        Ok((s, opened)) => {
                            stream = Some(s);
                            Ok(opened)
                        }
                        Err(e) => {
                            tracing::warn!("open output stream failed: {e:#}");
                            Err(format!("{e:#}"))
                        }
                    };
                    let _ = reply.send(result);
                }
            }
        }
        drop(stream);
        tracing::debug!("audio-output thread exiting");
    }

    fn open(&self, device: &cpal::Device, format: PcmFormat) -> Result<(cpal::Stream, OpenedStream)> {
        let config = device::pick_output_config(device, format.sample_rate, format.channels)?;
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = buf;
        }

        let channels = format.channels as usize;
        let max_samples = calc_max_buffered_samples(
            stream_config.sample_rate,
            channels,
            self.settings.buffer_seconds,
        );
        let queue = Arc::new(SharedAudio::new(channels, max_samples));

        let stream = playback::build_output_stream(
            device,
            &stream_config,
            config.sample_format(),
            &queue,
            PlaybackConfig {
                refill_max_frames: self.settings.refill_max_frames,
                muted: self.muted.clone(),
                underrun_events: self.underruns.clone(),
            },
        )?;
        stream.play().context("start output stream")?;

        tracing::info!(
            rate_hz = stream_config.sample_rate,
            channels = stream_config.channels,
            sample_format = ?config.sample_format(),
            "output stream started"
        );
        Ok((
            stream,
            OpenedStream {
                device_rate: stream_config.sample_rate,
                queue,
            },
        ))
    }
}

/// Convert little-endian integer PCM to `f32` in `[-1.0, 1.0)`.
///
/// 8-bit samples are unsigned (WAV convention); wider ones are signed.
pub fn pcm_to_f32(pcm: &[u8], bits_per_sample: u16, out: &mut Vec<f32>) {
    match bits_per_sample {
        8 => out.extend(pcm.iter().map(|&b| (b as f32 - 128.0) / 128.0)),
        16 => out.extend(
            pcm.chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32_768.0),
        ),
        24 => out.extend(pcm.chunks_exact(3).map(|c| {
            let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
            v as f32 / 8_388_608.0
        })),
        32 => out.extend(
            pcm.chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0),
        ),
        _ => {}
    }
}
