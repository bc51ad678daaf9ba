//! Caller-supplied compressed audio streams.
//!
//! A source is handed to the player by `play()`; from then on the player owns it and
//! closes it exactly once when playback of it ends for any reason.
//!
//! Sources that are fed live (network, another thread) return
//! [`io::ErrorKind::WouldBlock`] while no data is available; the player then waits on its
//! poll tick instead of treating the stream as finished.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::player::DataNotifier;

/// Readable compressed audio stream plus its total length.
pub trait AudioSource: Read + Send {
    /// Total length in bytes, when known up front.
    fn total_len(&self) -> Option<u64> {
        None
    }

    /// Short name used in logs.
    fn label(&self) -> String {
        "stream".to_string()
    }

    /// Release underlying resources.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A local file.
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path,
            file: Some(file),
            len,
        })
    }
}

impl Read for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.read(buf),
            None => Ok(0),
        }
    }
}

impl AudioSource for FileSource {
    fn total_len(&self) -> Option<u64> {
        Some(self.len)
    }

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.take();
        Ok(())
    }
}

/// An in-memory buffer.
pub struct MemorySource {
    label: String,
    data: Cursor<Vec<u8>>,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self::with_label("memory", data)
    }

    pub fn with_label(label: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            data: Cursor::new(data.into()),
        }
    }
}

impl Read for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl AudioSource for MemorySource {
    fn total_len(&self) -> Option<u64> {
        Some(self.data.get_ref().len() as u64)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Streamed source fed chunk-by-chunk from another thread.
///
/// Reads return `WouldBlock` while the feeder is alive but has nothing queued, and
/// end-of-stream once the [`ChannelSourceWriter`] is dropped and all chunks are drained.
pub struct ChannelSource {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

/// Feeding half of a [`ChannelSource`].
pub struct ChannelSourceWriter {
    tx: Sender<Vec<u8>>,
    notifier: Option<DataNotifier>,
}

impl ChannelSource {
    /// Create a connected writer/source pair.
    ///
    /// When `notifier` is set, every pushed chunk wakes the processing loop.
    pub fn pair(notifier: Option<DataNotifier>) -> (ChannelSourceWriter, ChannelSource) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            ChannelSourceWriter { tx, notifier },
            ChannelSource {
                rx,
                chunk: Vec::new(),
                pos: 0,
            },
        )
    }
}

impl ChannelSourceWriter {
    /// Queue a chunk of compressed bytes. Returns `false` once the source is gone.
    pub fn push(&self, bytes: impl Into<Vec<u8>>) -> bool {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return true;
        }
        if self.tx.send(bytes).is_err() {
            return false;
        }
        if let Some(n) = &self.notifier {
            n.notify();
        }
        true
    }
}

impl Read for ChannelSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.try_recv() {
                Ok(next) => {
                    self.chunk = next;
                    self.pos = 0;
                }
                Err(TryRecvError::Empty) => return Err(io::ErrorKind::WouldBlock.into()),
                Err(TryRecvError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl AudioSource for ChannelSource {
    fn label(&self) -> String {
        "channel".to_string()
    }
}

/// Player-owned source that is closed exactly once.
pub(crate) struct OwnedSource {
    inner: Option<Box<dyn AudioSource>>,
    label: String,
}

impl OwnedSource {
    pub(crate) fn new(source: Box<dyn AudioSource>) -> Self {
        let label = source.label();
        Self {
            inner: Some(source),
            label,
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn reader(&mut self) -> Option<&mut (dyn AudioSource + 'static)> {
        self.inner.as_deref_mut()
    }

    /// Give the source back without closing it (rejected requests).
    pub(crate) fn into_inner(mut self) -> Option<Box<dyn AudioSource>> {
        self.inner.take()
    }

    pub(crate) fn release(&mut self) {
        if let Some(mut source) = self.inner.take() {
            match source.close() {
                Ok(()) => tracing::debug!(source = %self.label, "source released"),
                Err(e) => tracing::warn!(source = %self.label, "source close error: {e}"),
            }
        }
    }
}

impl Drop for OwnedSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        closes: Arc<AtomicUsize>,
    }

    impl Read for CountingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl AudioSource for CountingSource {
        fn close(&mut self) -> io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn owned_source_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut owned = OwnedSource::new(Box::new(CountingSource {
            closes: closes.clone(),
        }));
        owned.release();
        owned.release();
        drop(owned);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owned_source_into_inner_skips_close() {
        let closes = Arc::new(AtomicUsize::new(0));
        let owned = OwnedSource::new(Box::new(CountingSource {
            closes: closes.clone(),
        }));
        let inner = owned.into_inner();
        assert!(inner.is_some());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn memory_source_reports_len() {
        let mut src = MemorySource::new(vec![1u8, 2, 3]);
        assert_eq!(src.total_len(), Some(3));
        let mut out = Vec::new();
        src.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn channel_source_would_block_then_eof() {
        let (writer, mut src) = ChannelSource::pair(None);
        let mut buf = [0u8; 4];
        let err = src.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        assert!(writer.push(vec![9u8, 8, 7, 6, 5]));
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [9, 8, 7, 6]);
        assert_eq!(src.read(&mut buf).unwrap(), 1);

        drop(writer);
        assert_eq!(src.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn file_source_reads_and_closes() {
        let path = std::env::temp_dir().join(format!(
            "audio-player-core-source-{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, b"abc").unwrap();
        let mut src = FileSource::open(&path).unwrap();
        assert_eq!(src.total_len(), Some(3));
        src.close().unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        let _ = std::fs::remove_file(&path);
    }
}
