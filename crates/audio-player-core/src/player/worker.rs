//! The processing loop.
//!
//! Single owner of the sink, decoder, read buffer and current session. Each iteration
//! either applies one command or advances playback by at most one frame, so a queued
//! command never waits behind more than one sink write.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use super::Shared;
use super::session::{PendingWrite, PlaybackSession};
use crate::buffer::{Refill, StreamBuffer};
use crate::command::Command;
use crate::config::PlayerConfig;
use crate::decode::{self, DecodeError, DecodeStep, FrameInfo, PROBE_BYTES};
use crate::event::{PlayerEvent, PlayerState};
use crate::pcm;
use crate::sink::{MuteSetting, OutputSink, SinkError};
use crate::source::OwnedSource;

enum Poll {
    Command(Command),
    Tick,
    Closed,
}

/// What the current session needs after one step.
enum Outcome {
    Continue,
    Complete,
    Fail(PlayerEvent),
}

/// Marks the loop as stopped however it exits.
struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.state.store(PlayerState::Shutdown);
        self.0.running.store(false, Ordering::Release);
    }
}

pub(super) struct Worker {
    config: PlayerConfig,
    refill_threshold: usize,
    rx: Receiver<Command>,
    sink: Box<dyn OutputSink>,
    shared: Arc<Shared>,
    buffer: StreamBuffer,
    pcm: Vec<u8>,
    session: Option<PlaybackSession>,
    next: Option<OwnedSource>,
    backlog: VecDeque<Command>,
    state: PlayerState,
    session_seq: u64,
}

impl Worker {
    pub(super) fn new(
        config: PlayerConfig,
        rx: Receiver<Command>,
        sink: Box<dyn OutputSink>,
        shared: Arc<Shared>,
        buffer: StreamBuffer,
        pcm: Vec<u8>,
    ) -> Self {
        Self {
            refill_threshold: config.refill_threshold(),
            config,
            rx,
            sink,
            shared,
            buffer,
            pcm,
            session: None,
            next: None,
            backlog: VecDeque::new(),
            state: PlayerState::Idle,
            session_seq: 0,
        }
    }

    pub(super) fn run(mut self) {
        let _exit = ExitGuard(self.shared.clone());
        tracing::info!("processing loop started");
        self.mute(MuteSetting::Mute);

        loop {
            match self.poll() {
                Poll::Command(cmd) => {
                    if !self.apply(cmd) {
                        break;
                    }
                    continue;
                }
                Poll::Closed => {
                    tracing::warn!("command channel closed; shutting down");
                    self.apply(Command::Shutdown);
                    break;
                }
                Poll::Tick => {}
            }
            if self.state == PlayerState::Playing {
                self.step();
            }
        }
        tracing::info!("processing loop exited");
    }

    fn poll(&mut self) -> Poll {
        if let Some(cmd) = self.backlog.pop_front() {
            return Poll::Command(cmd);
        }
        let busy = self.state == PlayerState::Playing
            && self.session.as_ref().is_some_and(|s| !s.starved);
        if busy {
            match self.rx.try_recv() {
                Ok(cmd) => Poll::Command(cmd),
                Err(TryRecvError::Empty) => Poll::Tick,
                Err(TryRecvError::Disconnected) => Poll::Closed,
            }
        } else {
            match self.rx.recv_timeout(self.config.poll_interval) {
                Ok(cmd) => Poll::Command(cmd),
                Err(RecvTimeoutError::Timeout) => Poll::Tick,
                Err(RecvTimeoutError::Disconnected) => Poll::Closed,
            }
        }
    }

    /// Apply one command. Returns `false` once the loop must exit.
    fn apply(&mut self, cmd: Command) -> bool {
        tracing::debug!(command = cmd.name(), state = ?self.state, "command received");
        match cmd {
            Command::Play(source) => self.start_now(source),
            Command::PlayNext(source) => {
                if self.session.is_some() {
                    tracing::info!(source = source.label(), "next source staged");
                    if let Some(mut previous) = self.next.replace(source) {
                        tracing::info!(source = previous.label(), "staged source replaced");
                        previous.release();
                    }
                } else {
                    self.start_now(source);
                }
            }
            Command::Pause => {
                if self.state == PlayerState::Playing {
                    self.set_state(PlayerState::Paused);
                    self.emit(PlayerEvent::Pause);
                }
            }
            Command::Resume => {
                if self.state == PlayerState::Paused {
                    self.set_state(PlayerState::Playing);
                    self.emit(PlayerEvent::Playing);
                }
            }
            Command::Stop => {
                if matches!(self.state, PlayerState::Playing | PlayerState::Paused) {
                    self.end_session();
                    self.release_next();
                    self.go_idle();
                }
            }
            Command::FrameDecoded => {
                self.shared.wake_pending.store(false, Ordering::Release);
                if let Some(session) = self.session.as_mut() {
                    session.starved = false;
                }
            }
            Command::Shutdown => {
                self.end_session();
                self.release_next();
                self.backlog.clear();
                self.mute(MuteSetting::Mute);
                self.set_state(PlayerState::Shutdown);
                self.emit(PlayerEvent::Shutdown);
                return false;
            }
        }
        true
    }

    /// Explicit play: discard anything staged, interrupt the current session.
    fn start_now(&mut self, source: OwnedSource) {
        if let Some(mut staged) = self.next.take() {
            tracing::info!(source = staged.label(), "staged source discarded by play");
            staged.release();
        }
        if let Some(old) = self.session.as_ref() {
            tracing::info!(session = old.id, source = old.label(), "interrupting playback");
        }
        self.end_session();
        self.begin(source);
        self.set_state(PlayerState::Playing);
        self.emit(PlayerEvent::Playing);
    }

    fn begin(&mut self, source: OwnedSource) {
        self.session_seq += 1;
        self.buffer.reset();
        self.pcm.clear();
        tracing::info!(
            session = self.session_seq,
            source = source.label(),
            "playback session started"
        );
        self.shared
            .counters
            .set_now_playing(Some(source.label().to_string()));
        self.session = Some(PlaybackSession::new(self.session_seq, source));
        self.mute(MuteSetting::Unmute);
    }

    fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.source.release();
            self.shared.counters.set_now_playing(None);
        }
    }

    fn release_next(&mut self) {
        if let Some(mut staged) = self.next.take() {
            staged.release();
        }
    }

    fn go_idle(&mut self) {
        self.set_state(PlayerState::Idle);
        self.emit(PlayerEvent::Idle);
        self.mute(MuteSetting::Mute);
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "state changed");
        }
        self.state = state;
        self.shared.state.store(state);
    }

    fn emit(&self, event: PlayerEvent) {
        self.shared.listener.dispatch(event);
    }

    fn mute(&mut self, setting: MuteSetting) {
        if let Err(e) = self.sink.set_mute(setting) {
            tracing::warn!(setting = ?setting, "sink mute control failed: {e}");
        }
    }

    fn step(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match self.advance(&mut session) {
            Outcome::Continue => self.session = Some(session),
            Outcome::Complete => self.complete(session),
            Outcome::Fail(event) => self.fail(session, event),
        }
    }

    fn advance(&mut self, session: &mut PlaybackSession) -> Outcome {
        if session.pending.is_some() {
            return self.flush(session);
        }

        if self.buffer.needs_refill(self.refill_threshold) {
            if let Some(outcome) = self.refill(session) {
                return outcome;
            }
        }

        if session.decoder.is_none() {
            let head = self.buffer.unread();
            if head.len() < PROBE_BYTES && !self.buffer.is_eof() {
                return Outcome::Continue;
            }
            match decode::probe(head) {
                Some(format) => {
                    tracing::info!(session = session.id, format = ?format, "source format detected");
                    session.decoder = Some(decode::open_decoder(format, self.config.max_chunk_frames));
                }
                None => {
                    tracing::warn!(session = session.id, source = session.label(), "unrecognized source format");
                    return Outcome::Fail(PlayerEvent::UnknownFileType);
                }
            }
        }

        if self.buffer.unread().is_empty() {
            return if self.buffer.is_eof() {
                Outcome::Complete
            } else {
                Outcome::Continue
            };
        }

        let Some(decoder) = session.decoder.as_mut() else {
            return Outcome::Fail(PlayerEvent::Unknown);
        };

        match decoder.find_sync(self.buffer.unread()) {
            Some(0) => {}
            Some(offset) => {
                tracing::debug!(session = session.id, bytes = offset, "skipped to frame sync");
                self.shared.counters.add_resync_bytes(offset as u64);
                self.buffer.consume(offset);
                decoder.reset_sync();
                return Outcome::Continue;
            }
            None => {
                let unread = self.buffer.unread().len();
                let dropped = if unread < 2 { unread } else { unread & !1 };
                tracing::debug!(session = session.id, bytes = dropped, "no frame sync; dropping bytes");
                self.shared.counters.add_resync_bytes(dropped as u64);
                self.buffer.consume(dropped);
                decoder.reset_sync();
                return Outcome::Continue;
            }
        }

        let result = decoder.decode_frame(self.buffer.unread(), &mut self.pcm);
        match result {
            Ok(DecodeStep::Frame(info)) => self.on_frame(session, info),
            Ok(DecodeStep::Skipped { consumed }) => {
                self.buffer.consume(consumed);
                Outcome::Continue
            }
            Ok(DecodeStep::Finished) => Outcome::Complete,
            Err(DecodeError::Underflow) => {
                if self.buffer.is_eof() {
                    tracing::debug!(
                        session = session.id,
                        trailing = self.buffer.unread().len(),
                        "trailing bytes too short for a frame"
                    );
                    Outcome::Complete
                } else if self.buffer.is_full() {
                    tracing::warn!(session = session.id, "frame larger than read buffer");
                    Outcome::Fail(PlayerEvent::Unknown)
                } else {
                    self.refill(session).unwrap_or(Outcome::Continue)
                }
            }
            Err(DecodeError::MainDataUnderflow { consumed }) => {
                tracing::debug!(session = session.id, "skipping frame without main data");
                self.buffer.consume(consumed);
                Outcome::Continue
            }
            Err(e) if e.is_format_error() => {
                tracing::warn!(session = session.id, decoder = decoder.name(), "unsupported stream: {e}");
                Outcome::Fail(PlayerEvent::UnknownFileType)
            }
            Err(e) => {
                tracing::warn!(session = session.id, decoder = decoder.name(), "decode failed: {e}");
                Outcome::Fail(PlayerEvent::Unknown)
            }
        }
    }

    /// Top up the read buffer. Returns an outcome only when the session must end.
    fn refill(&mut self, session: &mut PlaybackSession) -> Option<Outcome> {
        let Some(reader) = session.source.reader() else {
            return Some(Outcome::Fail(PlayerEvent::Unknown));
        };
        match self.buffer.refill(reader) {
            Ok(Refill::Pending) => {
                session.starved = true;
                None
            }
            Ok(Refill::Read(_) | Refill::Eof) => {
                session.starved = false;
                None
            }
            Err(e) => {
                tracing::warn!(session = session.id, source = session.label(), "source read failed: {e}");
                Some(Outcome::Fail(PlayerEvent::Unknown))
            }
        }
    }

    fn on_frame(&mut self, session: &mut PlaybackSession, info: FrameInfo) -> Outcome {
        let mut format = info.format;
        if self.config.force_stereo && format.channels == 1 {
            pcm::mono_to_stereo(&mut self.pcm, format.bytes_per_sample());
            format.channels = 2;
        }

        if session.format != Some(format) {
            tracing::info!(
                session = session.id,
                sample_rate = format.sample_rate,
                channels = format.channels,
                bits = format.bits_per_sample,
                "reconfiguring output"
            );
            if let Err(e) = self.sink.reconfigure(format) {
                tracing::warn!(session = session.id, "sink reconfigure failed: {e}");
                return Outcome::Fail(PlayerEvent::Unknown);
            }
            session.format = Some(format);
            self.shared.counters.set_output_format(Some(format));
        }

        session.pending = Some(PendingWrite {
            written: 0,
            consumed: info.consumed,
            frames: info.frames,
        });
        self.flush(session)
    }

    /// One sink write attempt for the pending frame. The stream cursor only moves once
    /// the whole frame has been accepted.
    fn flush(&mut self, session: &mut PlaybackSession) -> Outcome {
        let Some(mut pending) = session.pending.take() else {
            return Outcome::Continue;
        };

        let remaining = &self.pcm[pending.written.min(self.pcm.len())..];
        if !remaining.is_empty() {
            match self.sink.write(remaining, self.config.write_timeout) {
                Ok(n) => pending.written += n.min(remaining.len()),
                Err(SinkError::TimedOut) => {
                    tracing::debug!(session = session.id, "sink write timed out; retrying");
                    self.shared.counters.add_write_timeout();
                    session.pending = Some(pending);
                    return Outcome::Continue;
                }
                Err(SinkError::Fatal(msg)) => {
                    tracing::warn!(session = session.id, "sink write failed: {msg}");
                    return Outcome::Fail(PlayerEvent::Unknown);
                }
            }
        }

        if pending.written < self.pcm.len() {
            session.pending = Some(pending);
            return Outcome::Continue;
        }

        self.buffer.consume(pending.consumed);
        self.shared.counters.add_frames(pending.frames as u64);
        Outcome::Continue
    }

    /// Natural end of the current source.
    fn complete(&mut self, mut session: PlaybackSession) {
        tracing::info!(
            session = session.id,
            source = session.label(),
            bytes = self.buffer.position(),
            "source finished"
        );
        session.source.release();
        drop(session);
        self.shared.counters.source_completed();
        self.shared.counters.set_now_playing(None);

        let replacement = match self.next.take() {
            Some(staged) => Some(staged),
            None => self.await_replacement(),
        };
        match replacement {
            Some(source) => {
                self.begin(source);
                self.emit(PlayerEvent::CompletedPlayingNext);
            }
            None => {
                self.drain_output();
                self.go_idle();
            }
        }
    }

    /// Give the sink a chance to play out its queue before the mute.
    ///
    /// Runs in `poll_interval` slices and gives up once a command is waiting, so a
    /// following request is never held up by more than one slice.
    fn drain_output(&mut self) {
        if self.config.drain_timeout.is_zero() {
            return;
        }
        let deadline = Instant::now() + self.config.drain_timeout;
        while self.backlog.is_empty() && self.rx.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("output drain timed out");
                return;
            }
            match self.sink.drain(self.config.poll_interval.min(deadline - now)) {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("sink drain failed: {e}");
                    return;
                }
            }
        }
    }

    /// Look for a play request already queued (or arriving within the grace window).
    ///
    /// Anything else that arrives first is kept for the main loop, in order.
    fn await_replacement(&mut self) -> Option<OwnedSource> {
        let deadline = Instant::now() + self.config.next_source_grace;
        loop {
            let cmd = match self.rx.try_recv() {
                Ok(cmd) => cmd,
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    match self.rx.recv_deadline(deadline) {
                        Ok(cmd) => cmd,
                        Err(_) => return None,
                    }
                }
            };
            match cmd {
                Command::Play(source) | Command::PlayNext(source) => return Some(source),
                Command::FrameDecoded => {
                    self.shared.wake_pending.store(false, Ordering::Release);
                }
                other => {
                    self.backlog.push_back(other);
                    return None;
                }
            }
        }
    }

    /// Per-source failure: report it, release everything staged, return to idle.
    fn fail(&mut self, mut session: PlaybackSession, event: PlayerEvent) {
        tracing::warn!(
            session = session.id,
            source = session.label(),
            event = event.as_str(),
            "playback failed"
        );
        session.source.release();
        drop(session);
        self.shared.counters.source_failed();
        self.shared.counters.set_now_playing(None);
        self.release_next();
        self.emit(event);
        self.go_idle();
    }
}
