//! Callback-driven audio player core.
//!
//! An [`AudioPlayer`] owns one processing thread fed by a bounded command queue. Callers
//! hand it compressed sources (MP3 or WAV) with [`AudioPlayer::play`]; the thread decodes
//! frame by frame, writes PCM to an [`OutputSink`] and reports lifecycle events to a single
//! registered listener:
//!
//! - `PLAYING` on start, resume, or interruption by a new source
//! - `PAUSE`, `IDLE`, `SHUTDOWN` for the matching transitions
//! - `COMPLETED_PLAYING_NEXT` when a source ends and a queued one takes over
//! - `UNKNOWN_FILE_TYPE` / `UNKNOWN` followed by `IDLE` when a source cannot be played

pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod player;
pub mod sink;
pub mod source;
pub mod status;

mod buffer;
mod command;
mod pcm;

pub use config::{MAINBUF_SIZE, PlayerConfig};
pub use decode::{DecodeError, FrameInfo, PcmFormat};
pub use error::{PlayRejected, PlayerError};
pub use event::{CallbackContext, PlayerEvent, PlayerState, UserContext};
pub use player::{AudioPlayer, DataNotifier, PlayerHandle};
pub use sink::{MuteSetting, OutputSink, SinkError};
pub use source::{AudioSource, ChannelSource, ChannelSourceWriter, FileSource, MemorySource};
pub use status::PlayerStatus;
