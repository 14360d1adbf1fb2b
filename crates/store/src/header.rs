//! The header: cell catalog, key index, free list, cache and dirty set.
//!
//! The header file is an append-only log of cell records behind a 4-byte
//! magic. Records accumulate as cells change state; on load the log is
//! replayed in order and the latest record for a cell id wins. With
//! compaction enabled the file is then rewritten canonically, one record
//! per cell.
//!
//! The in-memory side classifies every cell after replay: live cells go
//! into the key index, deleted cells into the bin. The mem cache and the
//! dirty set start empty each session.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::bin::Bin;
use crate::cell::{new_ref, Cell, CellRef, CellState, CELL_RECORD_SIZE};
use crate::error::{CellId, Error, Result};
use crate::fio;
use crate::mem::Mem;
use crate::pot::Pot;

/// Magic bytes opening every header file.
pub const MAGIC: [u8; 4] = [0xF1, 0x47, 0xF1, 0x13];

/// The cell catalog and its backing file.
pub struct Header {
    path: PathBuf,
    file: Option<File>,
    /// Append position: end of the last complete record.
    end_pos: u64,
    pot: Pot,
    bin: Bin,
    mem: Mem,
    /// Live cells by key.
    keys: HashMap<Vec<u8>, CellRef>,
    /// Key of the most recently committed cell.
    last_key: Vec<u8>,
    /// Cells awaiting serialization on flush/close.
    dirty: HashMap<CellId, CellRef>,
}

impl Header {
    /// Creates a header rooted at `path`. No file is touched until
    /// [`open`](Self::open).
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            end_pos: 0,
            pot: Pot::new(),
            bin: Bin::new(),
            mem: Mem::new(),
            keys: HashMap::new(),
            last_key: Vec::new(),
            dirty: HashMap::new(),
        }
    }

    /// Opens (creating if missing) and replays the header file, then
    /// optionally compacts it.
    ///
    /// Returns the maximum page index referenced by any cell, or -1 when
    /// the catalog is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMagic`] if the file exists but does not
    /// start with the magic bytes, and [`Error::Corrupted`] on a malformed
    /// record.
    pub fn open(&mut self, compact: bool, sync: bool) -> Result<i64> {
        let file = fio::open_rw(&self.path, true, sync)?;
        let len = file.metadata()?.len();

        if len == 0 {
            fio::write_all_at(&file, &MAGIC, 0)?;
            self.end_pos = MAGIC.len() as u64;
            self.file = Some(file);
            return Ok(-1);
        }

        let mut buf = vec![0u8; len as usize];
        fio::read_exact_at(&file, &mut buf, 0)?;
        if buf.len() < MAGIC.len() || buf[..MAGIC.len()] != MAGIC {
            return Err(Error::InvalidMagic);
        }

        self.end_pos = self.replay(&buf)?;
        if self.end_pos < len {
            // Torn tail from an interrupted append; drop it so later
            // appends land on a record boundary.
            tracing::warn!(
                path = %self.path.display(),
                torn_bytes = len - self.end_pos,
                "truncating torn header tail"
            );
            file.set_len(self.end_pos)?;
        }
        self.file = Some(file);

        let max_page = self.classify();
        if compact {
            self.compact()?;
        }
        tracing::debug!(
            path = %self.path.display(),
            cells = self.pot.len(),
            live = self.keys.len(),
            deleted = self.bin.len(),
            "header loaded"
        );
        Ok(max_page)
    }

    /// Replays all complete records in `buf`, masking them into the pot.
    /// Returns the offset just past the last complete record.
    fn replay(&mut self, buf: &[u8]) -> Result<u64> {
        let mut pos = MAGIC.len();
        loop {
            let entry_start = pos;
            if pos + 4 > buf.len() {
                break;
            }
            let key_len = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
            pos += 4;
            if pos + key_len + 4 > buf.len() {
                return Ok(entry_start as u64);
            }
            let key = &buf[pos..pos + key_len];
            pos += key_len;
            let record_len = LittleEndian::read_u32(&buf[pos..pos + 4]) as usize;
            pos += 4;
            if record_len != CELL_RECORD_SIZE {
                return Err(Error::Corrupted {
                    reason: format!("cell record length {} (expected {})", record_len, CELL_RECORD_SIZE),
                });
            }
            if pos + record_len > buf.len() {
                return Ok(entry_start as u64);
            }
            let mut cell = Cell::from_record(&buf[pos..pos + record_len])?;
            pos += record_len;

            cell.key = key.to_vec();
            self.pot.mask(new_ref(cell));
        }
        Ok(pos as u64)
    }

    /// Classifies every replayed cell into the key index or the bin and
    /// returns the maximum page index seen.
    fn classify(&mut self) -> i64 {
        let Self { pot, bin, keys, last_key, .. } = self;
        let mut max_page = -1;
        let mut last_id = 0;
        pot.walk(|handle| {
            let cell = handle.read();
            if cell.page_index > max_page {
                max_page = cell.page_index;
            }
            if cell.state == CellState::Deleted {
                drop(cell);
                bin.trash(Arc::clone(handle));
            } else {
                keys.insert(cell.key.clone(), Arc::clone(handle));
                if cell.id > last_id {
                    last_id = cell.id;
                    *last_key = cell.key.clone();
                }
            }
            true
        });
        max_page
    }

    /// Rewrites the header canonically: magic followed by exactly one
    /// record per cell.
    fn compact(&mut self) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        file.set_len(0)?;
        fio::write_all_at(file, &MAGIC, 0)?;

        let mut buf = Vec::new();
        self.pot.walk(|handle| {
            handle.read().encode_entry(&mut buf);
            true
        });
        fio::write_all_at(file, &buf, MAGIC.len() as u64)?;
        self.end_pos = MAGIC.len() as u64 + buf.len() as u64;
        tracing::debug!(path = %self.path.display(), cells = self.pot.len(), "header compacted");
        Ok(())
    }

    /// Appends raw bytes at the current end of the log.
    fn append(&mut self, buf: &[u8]) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        fio::write_all_at(file, buf, self.end_pos)?;
        self.end_pos += buf.len() as u64;
        Ok(())
    }

    /// Picks a cell for a payload of `size` bytes.
    ///
    /// With `reuse`, the bin is consulted first: the smallest deleted cell
    /// with a sufficient allocation is revived in reused state, keeping
    /// its allocation (any surplus beyond `used` is dead space). Otherwise
    /// a fresh cell is allocated with `allocated == used == size`.
    pub fn select(&mut self, reuse: bool, size: i64) -> CellRef {
        if reuse {
            if let Some(cell) = self.bin.recycle(size) {
                let mut c = cell.write();
                debug_assert!(c.allocated >= size);
                c.state = CellState::Reused;
                c.used = size;
                drop(c);
                return cell;
            }
        }
        let cell = self.pot.allocate();
        {
            let mut c = cell.write();
            c.allocated = size;
            c.used = size;
        }
        cell
    }

    /// Persists the cell: appended to the log immediately when
    /// `persistent`, otherwise parked in the dirty set until flush.
    pub fn update(&mut self, cell: &CellRef, persistent: bool) -> Result<()> {
        if persistent {
            let mut buf = Vec::new();
            cell.read().encode_entry(&mut buf);
            self.append(&buf)
        } else {
            let id = cell.read().id;
            self.dirty.insert(id, Arc::clone(cell));
            Ok(())
        }
    }

    /// Commits the cell's key into the live index.
    pub fn commit_key(&mut self, cell: &CellRef) {
        let key = cell.read().key.clone();
        self.keys.insert(key.clone(), Arc::clone(cell));
        self.last_key = key;
    }

    /// Rolls a freshly allocated cell back out of the pot.
    pub fn destroy(&mut self, id: CellId) {
        self.dirty.remove(&id);
        self.pot.destroy(id);
    }

    /// Looks up the live cell under `key`.
    pub fn lookup(&self, key: &[u8]) -> Option<CellRef> {
        self.keys.get(key).map(Arc::clone)
    }

    /// Whether `key` is live.
    pub fn is_key_used(&self, key: &[u8]) -> bool {
        self.keys.contains_key(key)
    }

    /// Removes `key` from the live index, returning its cell.
    pub fn remove_key(&mut self, key: &[u8]) -> Option<CellRef> {
        self.keys.remove(key)
    }

    /// Snapshot of all live keys.
    pub fn keys_snapshot(&self) -> Vec<Vec<u8>> {
        self.keys.keys().cloned().collect()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Checks if no keys are live.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parks a deleted cell in the bin.
    pub fn trash(&mut self, cell: CellRef) {
        self.bin.trash(cell);
    }

    /// Installs `blob` as the cell's cached bytes (or promotes an existing
    /// entry). Safe under the store's read lock.
    pub fn cache(&self, cell: &CellRef, blob: &[u8], max_bytes: i64) {
        self.mem.push(cell, blob, max_bytes);
    }

    /// Drops the cell from the cache. Safe under the store's read lock.
    pub fn uncache(&self, cell: &CellRef) {
        self.mem.remove(cell);
    }

    /// Total bytes currently cached.
    pub fn cached_bytes(&self) -> i64 {
        self.mem.size()
    }

    /// Appends every dirty cell to the log and clears the dirty set.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for cell in self.dirty.values() {
            cell.read().encode_entry(&mut buf);
        }
        self.append(&buf)?;
        self.dirty.clear();
        Ok(())
    }

    /// Flushes dirty cells, then closes the file and releases all
    /// subordinate structures.
    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush();
        let synced = match self.file.take() {
            Some(file) => file.sync_all().map_err(Error::from),
            None => Ok(()),
        };
        self.pot.clear();
        self.bin.clear();
        self.mem.clear();
        self.keys.clear();
        self.last_key.clear();
        self.dirty.clear();
        self.end_pos = 0;
        flushed.and(synced)
    }

    /// Drops every cell and truncates the log back to the bare magic.
    /// Recovery/reset path.
    pub fn clear(&mut self) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        file.set_len(0)?;
        fio::write_all_at(file, &MAGIC, 0)?;
        self.end_pos = MAGIC.len() as u64;
        self.pot.clear();
        self.bin.clear();
        self.mem.clear();
        self.keys.clear();
        self.last_key.clear();
        self.dirty.clear();
        Ok(())
    }
}
