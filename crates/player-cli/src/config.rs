//! Configuration loading and parsing.
//!
//! An optional TOML file supplies the same knobs as the command line; flags win.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use audio_player_core::PlayerConfig;
use serde::Deserialize;

use crate::cli::Args;
use crate::sink::OutputSettings;

/// Top-level config loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// Output device substring.
    pub device: Option<String>,
    /// Duplicate mono sources to stereo.
    pub force_stereo: Option<bool>,
    /// Upper bound for one sink write in milliseconds.
    pub write_timeout_ms: Option<u64>,
    /// Output queue target in seconds.
    pub buffer_seconds: Option<f32>,
    /// Resampler input chunk size in frames.
    pub chunk_frames: Option<usize>,
    /// Playback callback refill cap in frames.
    pub refill_max_frames: Option<usize>,
    /// Player core tuning.
    pub player: Option<PlayerSection>,
}

/// `[player]` table.
#[derive(Debug, Default, Deserialize)]
pub struct PlayerSection {
    pub command_queue_depth: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub read_buffer_bytes: Option<usize>,
    pub max_chunk_frames: Option<usize>,
    /// How long a finished source waits for a queued replacement.
    pub next_source_grace_ms: Option<u64>,
    pub shutdown_retries: Option<u32>,
    pub shutdown_retry_delay_ms: Option<u64>,
    /// Longest wait for queued output to play out after the last track.
    pub drain_timeout_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("parse config {:?}", path))
    }
}

/// Effective settings after merging the file with command-line flags.
#[derive(Debug)]
pub struct Settings {
    pub device: Option<String>,
    pub player: PlayerConfig,
    pub output: OutputSettings,
}

pub fn resolve(args: &Args, file: FileConfig) -> Settings {
    let mut player = PlayerConfig::default();
    if let Some(section) = file.player {
        if let Some(v) = section.command_queue_depth {
            player.command_queue_depth = v;
        }
        if let Some(ms) = section.poll_interval_ms {
            player.poll_interval = Duration::from_millis(ms);
        }
        if let Some(v) = section.read_buffer_bytes {
            player.read_buffer_bytes = v;
        }
        if let Some(v) = section.max_chunk_frames {
            player.max_chunk_frames = v;
        }
        if let Some(ms) = section.next_source_grace_ms {
            player.next_source_grace = Duration::from_millis(ms);
        }
        if let Some(v) = section.shutdown_retries {
            player.shutdown_retries = v;
        }
        if let Some(ms) = section.shutdown_retry_delay_ms {
            player.shutdown_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = section.drain_timeout_ms {
            player.drain_timeout = Duration::from_millis(ms);
        }
    }

    player.force_stereo = args.force_stereo || file.force_stereo.unwrap_or(false);
    if let Some(ms) = args.write_timeout_ms.or(file.write_timeout_ms) {
        player.write_timeout = Duration::from_millis(ms);
    }

    let defaults = OutputSettings::default();
    let output = OutputSettings {
        buffer_seconds: args
            .buffer_seconds
            .or(file.buffer_seconds)
            .unwrap_or(defaults.buffer_seconds),
        chunk_frames: args
            .chunk_frames
            .or(file.chunk_frames)
            .unwrap_or(defaults.chunk_frames),
        refill_max_frames: file.refill_max_frames.unwrap_or(defaults.refill_max_frames),
    };

    Settings {
        device: args.device.clone().or(file.device),
        player,
        output,
    }
}
