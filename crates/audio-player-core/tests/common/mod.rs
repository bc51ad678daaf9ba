#![allow(dead_code)]

use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use audio_player_core::{
    AudioPlayer, AudioSource, MemorySource, MuteSetting, OutputSink, PcmFormat, PlayerConfig,
    PlayerEvent, SinkError,
};
use crossbeam_channel::{Receiver, Sender};

pub const WAIT: Duration = Duration::from_secs(5);

/// Config with short ticks so tests run quickly.
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        command_queue_depth: 8,
        poll_interval: Duration::from_millis(5),
        write_timeout: Duration::from_millis(20),
        max_chunk_frames: 64,
        shutdown_retry_delay: Duration::from_millis(50),
        thread_name: "audio-player-test".to_string(),
        ..PlayerConfig::default()
    }
}

/// Mono 16-bit samples used by [`wav_bytes`].
pub fn samples(frames: usize) -> Vec<i16> {
    (0..frames).map(|i| ((i * 37) % 2000) as i16 - 1000).collect()
}

/// Raw little-endian PCM for `samples(frames)`.
pub fn pcm_bytes(frames: usize) -> Vec<u8> {
    samples(frames)
        .into_iter()
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

pub fn wav_bytes(frames: usize, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples(frames) {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn wav_source(label: &str, frames: usize) -> Box<dyn AudioSource> {
    Box::new(MemorySource::with_label(label, wav_bytes(frames, 8_000)))
}

/// MPEG-2 Layer III, 22.05 kHz mono, 64 kbps: a 32-byte ID3v2 tag then 45 frames.
pub const MP3: &[u8] = include_bytes!("../data/lame_22k_mono.mp3");
pub const MP3_FRAMES: usize = 45;
pub const MP3_SAMPLES_PER_FRAME: u64 = 576;

/// Byte offset of every frame in [`MP3`].
pub fn mp3_frame_offsets() -> Vec<usize> {
    let mut offsets = Vec::with_capacity(MP3_FRAMES);
    let mut pos = 32;
    while pos + 4 <= MP3.len() {
        assert_eq!(&MP3[pos..pos + 2], &[0xFF, 0xF3], "frame sync at {pos}");
        offsets.push(pos);
        let padding = ((MP3[pos + 2] >> 1) & 1) as usize;
        pos += 208 + padding;
    }
    offsets
}

/// Fixture with `len` zero bytes inserted before each given offset.
pub fn mp3_with_junk(inserts: &[(usize, usize)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MP3.len() + inserts.iter().map(|(_, n)| n).sum::<usize>());
    let mut from = 0;
    for &(at, len) in inserts {
        out.extend_from_slice(&MP3[from..at]);
        out.resize(out.len() + len, 0);
        from = at;
    }
    out.extend_from_slice(&MP3[from..]);
    out
}

/// Fixture with frame `index` carrying side info the decoder must reject
/// (`big_values` above 288).
pub fn mp3_with_bad_frame(index: usize) -> Vec<u8> {
    let mut data = MP3.to_vec();
    let at = mp3_frame_offsets()[index];
    data[at + 5..at + 9].fill(0xFF);
    data
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub writes: usize,
    pub data: Vec<u8>,
    pub formats: Vec<PcmFormat>,
    pub mutes: Vec<MuteSetting>,
    pub drains: usize,
}

/// Mock sink that records everything it is given.
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    write_delay: Duration,
    max_write: usize,
    timeouts: usize,
    fatal_writes: usize,
    fail_reconfigure: bool,
    stalled_drain: bool,
    gate: Option<(Sender<()>, Receiver<()>)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(SinkLog::default())),
            write_delay: Duration::ZERO,
            max_write: usize::MAX,
            timeouts: 0,
            fatal_writes: 0,
            fail_reconfigure: false,
            stalled_drain: false,
            gate: None,
        }
    }

    pub fn log(&self) -> Arc<Mutex<SinkLog>> {
        self.log.clone()
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Accept at most `bytes` per write call.
    pub fn with_max_write(mut self, bytes: usize) -> Self {
        self.max_write = bytes;
        self
    }

    /// Report `TimedOut` for the first `n` writes.
    pub fn with_timeouts(mut self, n: usize) -> Self {
        self.timeouts = n;
        self
    }

    /// Report `Fatal` for the first `n` writes.
    pub fn with_fatal_writes(mut self, n: usize) -> Self {
        self.fatal_writes = n;
        self
    }

    pub fn failing_reconfigure(mut self) -> Self {
        self.fail_reconfigure = true;
        self
    }

    /// Never finish draining: each call sleeps for its timeout and reports audio left.
    pub fn stalled_drain(mut self) -> Self {
        self.stalled_drain = true;
        self
    }

    /// Block every write until the returned release sender sends or is dropped.
    ///
    /// The returned receiver is signalled each time a write starts waiting.
    pub fn gated(mut self) -> (Self, Sender<()>, Receiver<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        self.gate = Some((entered_tx, release_rx));
        (self, release_tx, entered_rx)
    }
}

impl OutputSink for RecordingSink {
    fn write(&mut self, pcm: &[u8], _timeout: Duration) -> Result<usize, SinkError> {
        if let Some((entered, release)) = &self.gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(WAIT);
        }
        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }
        if self.timeouts > 0 {
            self.timeouts -= 1;
            return Err(SinkError::TimedOut);
        }
        if self.fatal_writes > 0 {
            self.fatal_writes -= 1;
            return Err(SinkError::Fatal("device unplugged".to_string()));
        }
        let n = pcm.len().min(self.max_write);
        let mut log = self.log.lock().unwrap();
        log.writes += 1;
        log.data.extend_from_slice(&pcm[..n]);
        Ok(n)
    }

    fn reconfigure(&mut self, format: PcmFormat) -> Result<(), SinkError> {
        if self.fail_reconfigure {
            return Err(SinkError::Fatal("device rejected format".to_string()));
        }
        self.log.lock().unwrap().formats.push(format);
        Ok(())
    }

    fn set_mute(&mut self, setting: MuteSetting) -> Result<(), SinkError> {
        self.log.lock().unwrap().mutes.push(setting);
        Ok(())
    }

    fn drain(&mut self, timeout: Duration) -> Result<bool, SinkError> {
        self.log.lock().unwrap().drains += 1;
        if self.stalled_drain {
            thread::sleep(timeout);
            return Ok(false);
        }
        Ok(true)
    }
}

/// Source wrapper that counts `close()` calls.
pub struct CountingSource {
    inner: MemorySource,
    closes: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(label: &str, data: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: MemorySource::with_label(label, data),
                closes: closes.clone(),
            },
            closes,
        )
    }
}

impl Read for CountingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl AudioSource for CountingSource {
    fn total_len(&self) -> Option<u64> {
        self.inner.total_len()
    }

    fn label(&self) -> String {
        self.inner.label()
    }

    fn close(&mut self) -> io::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Source that serves `fail_at` bytes of `data`, then fails every read.
pub struct FailingSource {
    data: Vec<u8>,
    pos: usize,
    fail_at: usize,
}

impl FailingSource {
    pub fn new(data: Vec<u8>, fail_at: usize) -> Self {
        Self {
            data,
            pos: 0,
            fail_at,
        }
    }
}

impl Read for FailingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.fail_at {
            return Err(io::Error::other("storage went away"));
        }
        let end = self.fail_at.min(self.data.len()).min(self.pos + buf.len());
        let n = end - self.pos;
        buf[..n].copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(n)
    }
}

impl AudioSource for FailingSource {
    fn label(&self) -> String {
        "failing".to_string()
    }
}

/// Forward every listener event into a channel.
pub fn collect_events(player: &AudioPlayer) -> Receiver<PlayerEvent> {
    let (tx, rx) = crossbeam_channel::unbounded();
    player
        .register_callback(
            move |ctx| {
                let _ = tx.send(ctx.event);
            },
            None,
        )
        .unwrap();
    rx
}

pub fn next_event(rx: &Receiver<PlayerEvent>) -> PlayerEvent {
    rx.recv_timeout(WAIT).expect("timed out waiting for player event")
}

pub fn expect_events(rx: &Receiver<PlayerEvent>, expected: &[PlayerEvent]) {
    let got: Vec<PlayerEvent> = expected.iter().map(|_| next_event(rx)).collect();
    assert_eq!(got, expected);
}

/// Assert nothing else is emitted for a short while.
pub fn expect_quiet(rx: &Receiver<PlayerEvent>) {
    if let Ok(ev) = rx.recv_timeout(Duration::from_millis(100)) {
        panic!("unexpected event {ev:?}");
    }
}

/// Spin until `cond` holds or the wait budget runs out.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
