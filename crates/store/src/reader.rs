//! Bounded read-seek windows for streaming blob reads.
//!
//! Blobs sit back to back inside page files, so handing a caller the raw
//! file would expose neighbouring blobs. [`LimitedReadSeeker`] restricts
//! reads and seeks to one `(start, len)` window; [`BlobReader`] is the
//! store-facing reader that serves either from such a window or from a
//! cached copy in memory.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// Read/seek adapter restricted to a fixed window of an inner source.
///
/// Positions are window-relative: position 0 is `start` in the underlying
/// source, and the window never grows — seeking from the end accepts only
/// non-positive offsets.
pub struct LimitedReadSeeker<R> {
    inner: R,
    start: u64,
    len: u64,
    /// Current position within the window.
    pos: u64,
}

impl<R: Read + Seek> LimitedReadSeeker<R> {
    /// Positions `inner` at `start` and bounds all further reads and seeks
    /// to `len` bytes from there.
    pub fn new(mut inner: R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self { inner, start, len, pos: 0 })
    }

    /// Length of the window in bytes.
    pub fn limit(&self) -> u64 {
        self.len
    }

    /// Unwraps the inner source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for LimitedReadSeeker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len - self.pos;
        if remaining == 0 {
            return Ok(0);
        }
        let take = buf.len().min(remaining as usize);
        let n = self.inner.read(&mut buf[..take])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for LimitedReadSeeker<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => {
                if offset > self.len {
                    return Err(out_of_bounds());
                }
                offset
            }
            SeekFrom::Current(delta) => {
                let target = self.pos as i64 + delta;
                if target < 0 || target as u64 > self.len {
                    return Err(out_of_bounds());
                }
                target as u64
            }
            SeekFrom::End(delta) => {
                // The window end is a hard bound: positive offsets are
                // rejected rather than extending the limit.
                let target = self.len as i64 + delta;
                if delta > 0 || target < 0 {
                    return Err(out_of_bounds());
                }
                target as u64
            }
        };
        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.pos = target;
        Ok(target)
    }
}

fn out_of_bounds() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "seek out of window bounds")
}

/// Streaming reader over one stored blob.
///
/// Returned by [`crate::Store::get_reader`]. Cached blobs are served from
/// memory; everything else reads through a private handle on the page
/// file, so the reader stays valid independently of the store's own
/// handles.
pub enum BlobReader {
    /// Window over the page file on disk.
    File(LimitedReadSeeker<File>),
    /// Cached blob served from memory.
    Cached(Cursor<Vec<u8>>),
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlobReader::File(reader) => reader.read(buf),
            BlobReader::Cached(cursor) => cursor.read(buf),
        }
    }
}

impl Seek for BlobReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            BlobReader::File(reader) => reader.seek(pos),
            BlobReader::Cached(cursor) => cursor.seek(pos),
        }
    }
}
