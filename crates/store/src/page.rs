//! One stream page: a single file holding blobs back to back.
//!
//! A page knows nothing about cells beyond the span they describe: `put`
//! writes a blob at the cell's offset, `get` reads the used bytes back.
//! Positional I/O keeps reads cursor-free so concurrent readers never
//! contend on the handle.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::cell::{Cell, CellState};
use crate::error::Result;
use crate::fio;

/// One stream file on disk.
pub struct Page {
    path: PathBuf,
    file: File,
}

impl Page {
    /// Opens an existing page file read-write.
    pub fn open(path: PathBuf, sync: bool) -> Result<Self> {
        let file = fio::open_rw(&path, false, sync)?;
        Ok(Self { path, file })
    }

    /// Creates a page file, truncating it to `prealloc_size` bytes when
    /// positive (fragmentation control).
    ///
    /// A failed truncation closes and removes the partially created file
    /// before surfacing the error.
    pub fn create(path: PathBuf, prealloc_size: i64, sync: bool) -> Result<Self> {
        let file = fio::open_rw(&path, true, sync)?;
        if prealloc_size > 0 {
            if let Err(err) = file.set_len(prealloc_size as u64) {
                drop(file);
                let _ = std::fs::remove_file(&path);
                return Err(err.into());
            }
        }
        Ok(Self { path, file })
    }

    /// Writes `blob` at the cell's offset. When `zero_pad` is set and the
    /// cell is being reused, the reserved tail beyond the payload is
    /// zeroed in the same write.
    pub fn put(&self, cell: &Cell, blob: &[u8], zero_pad: bool) -> Result<()> {
        let pad = cell.allocated - cell.used;
        if zero_pad && cell.state != CellState::Normal && pad > 0 {
            let mut buf = Vec::with_capacity(blob.len() + pad as usize);
            buf.extend_from_slice(blob);
            buf.resize(blob.len() + pad as usize, 0);
            fio::write_all_at(&self.file, &buf, cell.offset as u64)?;
        } else {
            fio::write_all_at(&self.file, blob, cell.offset as u64)?;
        }
        Ok(())
    }

    /// Reads the cell's payload bytes.
    pub fn get(&self, cell: &Cell) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; cell.used as usize];
        fio::read_exact_at(&self.file, &mut buf, cell.offset as u64)?;
        Ok(buf)
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes pending writes and releases the handle, surfacing any
    /// write-back error.
    pub fn close(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
