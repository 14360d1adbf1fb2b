//! Cell descriptors and their on-disk record codec.
//!
//! A cell is one entry in the header catalog: it locates and describes a
//! single blob in the stream. Cells are created once, keep their id and
//! allocation forever, and cycle through normal → deleted → reused states
//! as keys come and go.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;

use crate::error::{CellId, Error, Result};

/// Size of the fixed portion of a serialized cell record in bytes.
///
/// ```text
/// Offset  Size   Field
/// ------  ----   -----
/// 0       8      cell id (u64)
/// 8       8      page index (i64)
/// 16      8      blob offset within the page (i64)
/// 24      8      allocated bytes (i64)
/// 32      8      used bytes (i64)
/// 40      1      state (CellState)
/// 41      4      payload CRC-32 (u32)
/// ```
pub const CELL_RECORD_SIZE: usize = 45;

/// Lifecycle state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellState {
    /// First-use cell occupying freshly allocated stream space.
    Normal = 0,
    /// Deleted cell, parked in the bin awaiting reuse.
    Deleted = 1,
    /// Previously deleted cell now holding new data.
    Reused = 2,
}

impl TryFrom<u8> for CellState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Deleted),
            2 => Ok(Self::Reused),
            _ => Err(Error::Corrupted { reason: format!("invalid cell state: {}", value) }),
        }
    }
}

/// Shared handle to a cell.
///
/// The pot owns the authoritative id→cell map; the key index, bin, cache
/// queue and dirty set all hold clones of the same handle. Mutations are
/// serialized by the store's write lock; the read path touches only the
/// cache slot, guarded by the cell lock plus the cache interior lock
/// (see [`crate::mem::Mem`] for the lock ordering rules).
pub type CellRef = Arc<RwLock<Cell>>;

/// One header catalog entry describing a blob in the stream.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Unique id, assigned by the pot on first creation. Never changes.
    pub id: CellId,
    /// Index of the stream page holding the blob.
    pub page_index: i64,
    /// Byte offset of the blob within its page.
    pub offset: i64,
    /// Bytes reserved on disk, fixed at first creation. Always >= `used`.
    pub allocated: i64,
    /// Current payload length.
    pub used: i64,
    /// Lifecycle state.
    pub state: CellState,
    /// IEEE CRC-32 of the payload; 0 when unset or cleared.
    pub crc32: u32,
    /// Current key while the cell is live; empty when deleted.
    /// In-memory only, not serialized.
    pub key: Vec<u8>,
    /// Blob bytes while the cell resides in the cache.
    /// In-memory only, not serialized.
    pub cache: Option<Vec<u8>>,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            id: 0,
            page_index: 0,
            offset: 0,
            allocated: 0,
            used: 0,
            state: CellState::Normal,
            crc32: 0,
            key: Vec::new(),
            cache: None,
        }
    }
}

impl Cell {
    /// End position of the blob's reserved span within its page.
    pub fn blob_end(&self) -> i64 {
        self.offset + self.allocated
    }

    /// Whether the blob bytes are resident in memory.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Serializes the persistent fields into a fixed-width record.
    pub fn to_record(&self) -> [u8; CELL_RECORD_SIZE] {
        let mut buf = [0u8; CELL_RECORD_SIZE];
        LittleEndian::write_u64(&mut buf[0..8], self.id);
        LittleEndian::write_i64(&mut buf[8..16], self.page_index);
        LittleEndian::write_i64(&mut buf[16..24], self.offset);
        LittleEndian::write_i64(&mut buf[24..32], self.allocated);
        LittleEndian::write_i64(&mut buf[32..40], self.used);
        buf[40] = self.state as u8;
        LittleEndian::write_u32(&mut buf[41..45], self.crc32);
        buf
    }

    /// Decodes a cell from a fixed-width record.
    ///
    /// The key travels outside the record (it prefixes the record on disk);
    /// the decoded cell starts with an empty key and no cache slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the buffer is shorter than
    /// [`CELL_RECORD_SIZE`] or the state byte is invalid.
    pub fn from_record(buf: &[u8]) -> Result<Self> {
        if buf.len() < CELL_RECORD_SIZE {
            return Err(Error::Corrupted { reason: "cell record too short".to_string() });
        }

        Ok(Self {
            id: LittleEndian::read_u64(&buf[0..8]),
            page_index: LittleEndian::read_i64(&buf[8..16]),
            offset: LittleEndian::read_i64(&buf[16..24]),
            allocated: LittleEndian::read_i64(&buf[24..32]),
            used: LittleEndian::read_i64(&buf[32..40]),
            state: CellState::try_from(buf[40])?,
            crc32: LittleEndian::read_u32(&buf[41..45]),
            key: Vec::new(),
            cache: None,
        })
    }

    /// Appends the full on-disk entry to `out`: length-prefixed key bytes
    /// followed by the length-prefixed record. Deleted cells carry an empty
    /// key.
    pub fn encode_entry(&self, out: &mut Vec<u8>) {
        let mut len = [0u8; 4];
        LittleEndian::write_u32(&mut len, self.key.len() as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.key);
        LittleEndian::write_u32(&mut len, CELL_RECORD_SIZE as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.to_record());
    }
}

/// Wraps a cell in a shared handle.
pub fn new_ref(cell: Cell) -> CellRef {
    Arc::new(RwLock::new(cell))
}
