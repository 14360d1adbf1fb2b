//! Positional file I/O shared by the header and stream pages.
//!
//! On Unix, reads and writes use `pread(2)`/`pwrite(2)` via
//! [`std::os::unix::fs::FileExt`]: both take `&File` and never touch the
//! file cursor, so concurrent readers need no synchronization. On Windows
//! the fallbacks use `seek_read`/`seek_write`, which do move the cursor —
//! callers that share a handle across threads must serialize access there.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Opens a file read-write, optionally creating it and optionally requesting
/// synchronous writes.
///
/// Synchronous mode maps to `O_SYNC` on Unix. Other targets silently fall
/// back to OS write caching.
pub(crate) fn open_rw(path: &Path, create: bool, sync: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create(create);
    #[cfg(unix)]
    if sync {
        use std::os::unix::fs::OpenOptionsExt;
        opts.custom_flags(libc::O_SYNC);
    }
    #[cfg(not(unix))]
    let _ = sync;
    opts.open(path)
}

/// Reads exactly `buf.len()` bytes from `file` at the given byte `offset`.
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    file.read_exact_at(buf, offset)
}

/// Windows fallback: `seek_read` updates the file cursor.
#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            ));
        }
        pos += n;
    }
    Ok(())
}

/// Writes all of `data` to `file` at the given byte `offset`.
#[cfg(unix)]
pub(crate) fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    file.write_all_at(data, offset)
}

/// Windows fallback for positional writes.
#[cfg(windows)]
pub(crate) fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}
