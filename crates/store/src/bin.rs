//! The bin: size-sorted free list of deleted cells.
//!
//! Deleted cells keep their reserved stream space; the bin indexes them by
//! allocation size so a later put can recycle the smallest sufficient one
//! (best fit, biased small). Lookups run on a sequence kept sorted by
//! `allocated`, searched with `partition_point`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cell::{CellRef, CellState};
use crate::error::CellId;

/// Size-ordered free list of deleted cells.
pub struct Bin {
    /// Cells in ascending `allocated` order.
    cells: Vec<CellRef>,
    /// Id lookup for targeted removal.
    by_id: HashMap<CellId, CellRef>,
}

impl Bin {
    /// Creates an empty bin.
    pub fn new() -> Self {
        Self { cells: Vec::new(), by_id: HashMap::new() }
    }

    /// Inserts a deleted cell, preserving ascending allocation order.
    ///
    /// The cell must already be in deleted state.
    pub fn trash(&mut self, cell: CellRef) {
        let (id, allocated) = {
            let c = cell.read();
            debug_assert_eq!(c.state, CellState::Deleted);
            (c.id, c.allocated)
        };
        let idx = self.cells.partition_point(|c| c.read().allocated < allocated);
        self.cells.insert(idx, Arc::clone(&cell));
        self.by_id.insert(id, cell);
    }

    /// Removes and returns the smallest cell whose allocation is at least
    /// `min_size`, or `None` when no deleted cell is big enough.
    ///
    /// When several cells share the smallest sufficient allocation, any of
    /// them may be returned.
    pub fn recycle(&mut self, min_size: i64) -> Option<CellRef> {
        let idx = self.cells.partition_point(|c| c.read().allocated < min_size);
        if idx >= self.cells.len() {
            return None;
        }
        let cell = self.cells.remove(idx);
        self.by_id.remove(&cell.read().id);
        Some(cell)
    }

    /// Removes a specific cell by id if present. Undo path for a
    /// delete-then-failed operation.
    pub fn restore(&mut self, id: CellId) -> bool {
        let Some(cell) = self.by_id.remove(&id) else {
            return false;
        };
        let allocated = cell.read().allocated;
        // Several cells may share this allocation; scan the equal run for
        // the matching id.
        let mut idx = self.cells.partition_point(|c| c.read().allocated < allocated);
        while idx < self.cells.len() {
            let c = self.cells[idx].read();
            if c.allocated != allocated {
                break;
            }
            if c.id == id {
                drop(c);
                self.cells.remove(idx);
                return true;
            }
            idx += 1;
        }
        debug_assert!(false, "bin id index and ordered list out of sync");
        false
    }

    /// Returns the number of cells in the bin.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Checks if the bin is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drops every cell.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.by_id.clear();
    }
}

impl Default for Bin {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{new_ref, Cell};

    fn deleted(id: CellId, allocated: i64) -> CellRef {
        new_ref(Cell { id, allocated, state: CellState::Deleted, ..Cell::default() })
    }

    #[test]
    fn test_trash_keeps_ascending_order() {
        let mut bin = Bin::new();
        for (id, alloc) in [(1, 64), (2, 8), (3, 256), (4, 32)] {
            bin.trash(deleted(id, alloc));
        }

        let mut last = 0;
        for _ in 0..bin.len() {
            let cell = bin.recycle(0).unwrap();
            let alloc = cell.read().allocated;
            assert!(alloc >= last, "bin order violated: {} after {}", alloc, last);
            last = alloc;
        }
    }

    /// Best-fit grid: with allocations 1..512 binned, each request must
    /// yield the smallest sufficient cell.
    #[test]
    fn test_recycle_best_fit() {
        let cases = [(127, 128), (33, 64), (4, 4), (1, 1), (512, 512), (31, 32), (16, 16)];

        for (want_size, expect_alloc) in cases {
            let mut bin = Bin::new();
            for (id, alloc) in [1i64, 2, 4, 8, 16, 32, 64, 128, 256, 512].iter().enumerate() {
                bin.trash(deleted(id as CellId + 1, *alloc));
            }

            let cell = bin.recycle(want_size).unwrap();
            assert_eq!(
                cell.read().allocated,
                expect_alloc,
                "recycle({}) should yield the {}-byte cell",
                want_size,
                expect_alloc
            );
        }
    }

    #[test]
    fn test_recycle_nothing_big_enough() {
        let mut bin = Bin::new();
        bin.trash(deleted(1, 16));
        bin.trash(deleted(2, 32));

        assert!(bin.recycle(64).is_none());
        assert_eq!(bin.len(), 2);
    }

    #[test]
    fn test_recycle_empty_bin() {
        let mut bin = Bin::new();
        assert!(bin.recycle(1).is_none());
    }

    #[test]
    fn test_restore_removes_by_id() {
        let mut bin = Bin::new();
        bin.trash(deleted(1, 64));
        bin.trash(deleted(2, 128));

        assert!(bin.restore(1));
        assert!(!bin.restore(1));
        assert_eq!(bin.len(), 1);

        // The remaining cell is still recyclable.
        assert_eq!(bin.recycle(1).unwrap().read().id, 2);
    }

    /// restore must find the right cell even when several share an
    /// allocation size.
    #[test]
    fn test_restore_with_equal_allocations() {
        let mut bin = Bin::new();
        bin.trash(deleted(1, 64));
        bin.trash(deleted(2, 64));
        bin.trash(deleted(3, 64));

        assert!(bin.restore(2));
        assert_eq!(bin.len(), 2);

        let mut remaining: Vec<CellId> = Vec::new();
        while let Some(cell) = bin.recycle(0) {
            remaining.push(cell.read().id);
        }
        remaining.sort_unstable();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn test_recycle_exact_fit_over_larger() {
        let mut bin = Bin::new();
        bin.trash(deleted(1, 100));
        bin.trash(deleted(2, 50));

        let cell = bin.recycle(50).unwrap();
        assert_eq!(cell.read().id, 2);
    }
}
