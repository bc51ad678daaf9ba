//! Ordered list of files handed to the player one at a time.

use std::path::PathBuf;

use audio_player_core::{AudioSource, FileSource};

#[derive(Debug)]
pub struct Playlist {
    files: Vec<PathBuf>,
    next: usize,
}

impl Playlist {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files, next: 0 }
    }

    /// Open the next readable file, skipping ones that cannot be opened.
    pub fn open_next(&mut self) -> Option<Box<dyn AudioSource>> {
        while let Some(path) = self.files.get(self.next) {
            self.next += 1;
            match FileSource::open(path) {
                Ok(src) if src.total_len() == Some(0) => {
                    tracing::warn!(path = %path.display(), "skipping empty file");
                }
                Ok(src) => return Some(Box::new(src)),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable file: {e}"),
            }
        }
        None
    }

    /// Put the most recently opened file back, e.g. when a staged source was discarded.
    pub fn rewind(&mut self) {
        self.next = self.next.saturating_sub(1);
    }

    pub fn remaining(&self) -> usize {
        self.files.len() - self.next
    }
}
