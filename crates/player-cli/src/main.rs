//! player-cli: plays local MP3/WAV files in order through the callback-driven player core.
//!
//! The player decodes on its own thread and writes PCM to a CPAL-backed sink. This binary
//! only reacts to listener events: it stages the following file with `play_next` as soon
//! as one starts, starts over after a failure, and exits once the player goes idle with
//! nothing left to play or Ctrl-C stops it.

mod cli;
mod config;
mod device;
mod playback;
mod playlist;
mod queue;
mod resample;
mod sink;

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use audio_player_core::{AudioPlayer, AudioSource, PlayerEvent, PlayerStatus};
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use tracing_subscriber::EnvFilter;

use crate::playlist::Playlist;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_player_core=info,player_cli=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }

    let file_cfg = match &args.config {
        Some(path) => config::FileConfig::load(path)?,
        None => config::FileConfig::default(),
    };
    let settings = config::resolve(&args, file_cfg);
    tracing::debug!(?settings, "resolved settings");

    let sink = sink::CpalSink::open(settings.device.clone(), settings.output.clone())
        .context("open audio output")?;
    let mut player = AudioPlayer::with_sink(settings.player, sink).context("create player")?;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    player.register_callback(
        move |ctx| {
            let _ = event_tx.send(ctx.event);
        },
        None,
    )?;

    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    let mut playlist = Playlist::new(args.files.clone());
    let Some(first) = playlist.open_next() else {
        player.destroy()?;
        bail!("no playable files");
    };
    submit(&player, first, false)?;

    let tick = match args.status_interval_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let outcome = run_playlist(&player, &mut playlist, &event_rx, &stop_rx, tick);

    log_status(&player.status(), "final status");
    player.destroy().context("destroy player")?;
    outcome
}

/// React to listener events until the playlist is exhausted or playback is stopped.
fn run_playlist(
    player: &AudioPlayer,
    playlist: &mut Playlist,
    events: &Receiver<PlayerEvent>,
    stop: &Receiver<()>,
    tick: Option<Duration>,
) -> Result<()> {
    let mut staged = false;
    let mut stopping = false;
    let ticker = match tick {
        Some(every) => crossbeam_channel::tick(every),
        None => crossbeam_channel::never(),
    };

    loop {
        select! {
            recv(events) -> ev => {
                let Ok(ev) = ev else {
                    return Err(anyhow!("player listener disconnected"));
                };
                tracing::debug!(event = %ev, "player event");
                match ev {
                    PlayerEvent::Playing | PlayerEvent::CompletedPlayingNext => {
                        if ev == PlayerEvent::CompletedPlayingNext {
                            staged = false;
                        }
                        let status = player.status();
                        if let Some(track) = &status.now_playing {
                            tracing::info!(track = %track, remaining = playlist.remaining(), "now playing");
                        }
                        if !staged && !stopping {
                            if let Some(src) = playlist.open_next() {
                                staged = submit(player, src, true)?;
                                if !staged {
                                    playlist.rewind();
                                }
                            }
                        }
                    }
                    PlayerEvent::Pause => tracing::info!("paused"),
                    PlayerEvent::UnknownFileType | PlayerEvent::Unknown => {
                        tracing::warn!(reason = %ev, "track could not be played");
                        // The staged file was discarded with the failed one; offer it again.
                        if staged {
                            playlist.rewind();
                            staged = false;
                        }
                    }
                    PlayerEvent::Idle => {
                        if stopping {
                            return Ok(());
                        }
                        match playlist.open_next() {
                            Some(src) => {
                                submit(player, src, false)?;
                            }
                            None => {
                                tracing::info!("playlist finished");
                                return Ok(());
                            }
                        }
                    }
                    PlayerEvent::Shutdown => return Ok(()),
                }
            }
            recv(stop) -> _ => {
                if stopping {
                    return Ok(());
                }
                tracing::info!("interrupted; stopping playback");
                stopping = true;
                if player.stop().is_err() {
                    return Ok(());
                }
            }
            recv(ticker) -> _ => log_status(&player.status(), "status"),
        }
    }
}

/// Hand a source to the player; a rejected source is closed here.
///
/// Returns whether the source was accepted.
fn submit(player: &AudioPlayer, source: Box<dyn AudioSource>, next: bool) -> Result<bool> {
    let result = if next {
        player.play_next(source)
    } else {
        player.play(source)
    };
    match result {
        Ok(()) => Ok(true),
        Err(rejected) => {
            let err = rejected.error().clone();
            let label = match rejected.into_source() {
                Some(mut source) => {
                    let label = source.label();
                    if let Err(e) = source.close() {
                        tracing::debug!(track = %label, "close rejected source: {e}");
                    }
                    label
                }
                None => "-".to_string(),
            };
            if next {
                tracing::warn!(track = %label, error = %err, "could not queue next track");
                Ok(false)
            } else {
                Err(anyhow!(err)).with_context(|| format!("play {label}"))
            }
        }
    }
}

fn log_status(status: &PlayerStatus, msg: &str) {
    tracing::info!(
        state = ?status.state,
        track = status.now_playing.as_deref().unwrap_or("-"),
        frames_written = status.frames_written,
        write_timeouts = status.write_timeouts,
        resync_bytes = status.resync_bytes,
        completed = status.sources_completed,
        failed = status.sources_failed,
        "{msg}"
    );
}
