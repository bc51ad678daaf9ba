//! Compressed-byte read buffer sitting between a source and the frame decoder.
//!
//! The buffer is allocated once per player and reused across sessions. Consumption may run
//! past the buffered bytes (large tags, skipped chunks); the excess is discarded from the
//! source on the next refill.

use std::io::{self, Read};

use crate::error::PlayerError;

/// Result of one refill attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Refill {
    /// Read this many new bytes (possibly zero if the buffer was already full).
    Read(usize),
    /// The source reported end-of-stream.
    Eof,
    /// The source has no data right now.
    Pending,
}

pub(crate) struct StreamBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
    skip: u64,
    consumed: u64,
}

impl StreamBuffer {
    pub(crate) fn with_capacity(bytes: usize) -> Result<Self, PlayerError> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|e| PlayerError::NoMemory(format!("read buffer ({bytes} bytes): {e}")))?;
        data.resize(bytes, 0);
        Ok(Self {
            data,
            start: 0,
            end: 0,
            eof: false,
            skip: 0,
            consumed: 0,
        })
    }

    /// Forget all state from the previous session.
    pub(crate) fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
        self.eof = false;
        self.skip = 0;
        self.consumed = 0;
    }

    pub(crate) fn unread(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether the buffer holds `capacity` unread bytes and cannot take more.
    pub(crate) fn is_full(&self) -> bool {
        self.end - self.start == self.data.len()
    }

    /// Stream cursor: total bytes consumed from the source so far.
    pub(crate) fn position(&self) -> u64 {
        self.consumed
    }

    /// Whether a refill should be attempted before decoding.
    pub(crate) fn needs_refill(&self, threshold: usize) -> bool {
        !self.eof && (self.skip > 0 || self.end - self.start < threshold)
    }

    /// Advance past `n` bytes; anything beyond the buffered bytes is skipped on refill.
    pub(crate) fn consume(&mut self, n: usize) {
        let available = self.end - self.start;
        self.consumed += n as u64;
        if n <= available {
            self.start += n;
        } else {
            self.skip += (n - available) as u64;
            self.start = self.end;
        }
    }

    /// Compact unread bytes to the front and read until full, end-of-stream or no data.
    pub(crate) fn refill<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<Refill> {
        if self.eof {
            return Ok(Refill::Eof);
        }

        if self.start > 0 {
            self.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }

        while self.skip > 0 {
            let scratch = &mut self.data[self.end..];
            let want = scratch.len().min(self.skip as usize);
            match src.read(&mut scratch[..want]) {
                Ok(0) => {
                    self.eof = true;
                    self.skip = 0;
                    return Ok(Refill::Eof);
                }
                Ok(n) => self.skip -= n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Refill::Pending),
                Err(e) => return Err(e),
            }
        }

        let mut total = 0;
        while self.end < self.data.len() {
            match src.read(&mut self.data[self.end..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(if total == 0 { Refill::Eof } else { Refill::Read(total) });
                }
                Ok(n) => {
                    self.end += n;
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(if total == 0 { Refill::Pending } else { Refill::Read(total) });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Refill::Read(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn refill_reads_until_full() {
        let mut buf = StreamBuffer::with_capacity(8).unwrap();
        let mut src = Cursor::new((0u8..20).collect::<Vec<_>>());
        assert_eq!(buf.refill(&mut src).unwrap(), Refill::Read(8));
        assert!(buf.is_full());
        assert_eq!(buf.unread(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn consume_then_refill_compacts() {
        let mut buf = StreamBuffer::with_capacity(8).unwrap();
        let mut src = Cursor::new((0u8..12).collect::<Vec<_>>());
        buf.refill(&mut src).unwrap();
        buf.consume(6);
        assert_eq!(buf.refill(&mut src).unwrap(), Refill::Read(4));
        assert_eq!(buf.unread(), &[6, 7, 8, 9, 10, 11]);
        assert!(buf.is_eof());
        assert_eq!(buf.position(), 6);
    }

    #[test]
    fn consume_past_buffer_skips_source_bytes() {
        let mut buf = StreamBuffer::with_capacity(4).unwrap();
        let mut src = Cursor::new((0u8..16).collect::<Vec<_>>());
        buf.refill(&mut src).unwrap();
        buf.consume(10);
        assert!(buf.needs_refill(1));
        buf.refill(&mut src).unwrap();
        assert_eq!(buf.unread(), &[10, 11, 12, 13]);
        assert_eq!(buf.position(), 10);
    }

    #[test]
    fn refill_reports_eof_on_empty_source() {
        let mut buf = StreamBuffer::with_capacity(4).unwrap();
        let mut src = Cursor::new(Vec::<u8>::new());
        assert_eq!(buf.refill(&mut src).unwrap(), Refill::Eof);
        assert!(buf.is_eof());
        assert!(!buf.needs_refill(4));
    }

    struct Blocking;

    impl Read for Blocking {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    #[test]
    fn refill_reports_pending_for_would_block() {
        let mut buf = StreamBuffer::with_capacity(4).unwrap();
        assert_eq!(buf.refill(&mut Blocking).unwrap(), Refill::Pending);
        assert!(!buf.is_eof());
    }

    #[test]
    fn reset_clears_session_state() {
        let mut buf = StreamBuffer::with_capacity(4).unwrap();
        let mut src = Cursor::new(vec![1u8, 2]);
        buf.refill(&mut src).unwrap();
        buf.consume(1);
        buf.reset();
        assert!(buf.unread().is_empty());
        assert!(!buf.is_eof());
        assert_eq!(buf.position(), 0);
    }
}
