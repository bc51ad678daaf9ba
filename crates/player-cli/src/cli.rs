use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "player-cli", version)]
pub struct Args {
    /// Audio files to play in order (MP3 or WAV)
    #[arg(required_unless_present = "list_devices")]
    pub files: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Optional TOML config file; command-line flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Duplicate mono sources to two channels before output
    #[arg(long)]
    pub force_stereo: bool,

    /// Upper bound for a single write to the output device (milliseconds)
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Output queue target in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// Resampler input chunk size in frames
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Print a status line every N seconds while playing (0 disables)
    #[arg(long, default_value_t = 0)]
    pub status_interval_secs: u64,
}
