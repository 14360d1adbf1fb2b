//! The pot: authoritative arena of every cell in a store.
//!
//! All cells — live, deleted, cached or not — live here, keyed by id. The
//! key index, bin and cache hold non-owning handles into this arena. New
//! cells chain their stream position off the current last cell, so ids and
//! stream offsets grow together.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cell::{new_ref, Cell, CellRef};
use crate::error::CellId;

/// Owns every cell in the store, keyed by id.
pub struct Pot {
    max_id: CellId,
    cells: HashMap<CellId, CellRef>,
}

impl Pot {
    /// Creates an empty pot.
    pub fn new() -> Self {
        Self { max_id: 0, cells: HashMap::new() }
    }

    /// Allocates the next cell, unique within the store.
    ///
    /// The new cell starts in normal state at the stream position right
    /// after the current last cell's reserved span (offset 0 on page 0 when
    /// the pot is empty). The stream may later advance both fields when the
    /// cell overflows its page.
    pub fn allocate(&mut self) -> CellRef {
        let mut cell = Cell::default();
        if self.max_id > 0 {
            if let Some(last) = self.cells.get(&self.max_id) {
                let last = last.read();
                cell.offset = last.blob_end();
                cell.page_index = last.page_index;
            }
        }
        self.max_id += 1;
        cell.id = self.max_id;
        let handle = new_ref(cell);
        self.cells.insert(self.max_id, Arc::clone(&handle));
        handle
    }

    /// Inserts or replaces a cell by id, raising `max_id` when the record
    /// is ahead of it. Replay path: the latest record for an id wins.
    pub fn mask(&mut self, cell: CellRef) {
        let id = cell.read().id;
        if id > self.max_id {
            self.max_id = id;
        }
        self.cells.insert(id, cell);
    }

    /// Removes a cell by id; rolls `max_id` back when the removed cell was
    /// the most recent allocation. Allows undoing a mid-put failure.
    pub fn destroy(&mut self, id: CellId) {
        if self.cells.remove(&id).is_some() && id == self.max_id {
            self.max_id -= 1;
        }
    }

    /// Visits every cell in unspecified order; stops when `visit` returns
    /// false.
    pub fn walk<F: FnMut(&CellRef) -> bool>(&self, mut visit: F) {
        for cell in self.cells.values() {
            if !visit(cell) {
                break;
            }
        }
    }

    /// Returns the highest id ever allocated (and not rolled back).
    pub fn max_id(&self) -> CellId {
        self.max_id
    }

    /// Returns the number of cells in the pot.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Checks if the pot is empty.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drops every cell and resets the id counter.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.max_id = 0;
    }
}

impl Default for Pot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellState;

    #[test]
    fn test_allocate_assigns_sequential_ids() {
        let mut pot = Pot::new();
        assert_eq!(pot.allocate().read().id, 1);
        assert_eq!(pot.allocate().read().id, 2);
        assert_eq!(pot.allocate().read().id, 3);
        assert_eq!(pot.max_id(), 3);
    }

    #[test]
    fn test_allocate_chains_offsets() {
        let mut pot = Pot::new();

        let first = pot.allocate();
        {
            let mut c = first.write();
            c.allocated = 100;
            c.used = 100;
        }

        let second = pot.allocate();
        assert_eq!(second.read().offset, 100);
        assert_eq!(second.read().page_index, 0);

        {
            let mut c = second.write();
            c.allocated = 50;
            c.page_index = 2;
        }

        // Third cell chains off the second, including its page.
        let third = pot.allocate();
        assert_eq!(third.read().offset, 150);
        assert_eq!(third.read().page_index, 2);
    }

    #[test]
    fn test_mask_replaces_and_raises_max_id() {
        let mut pot = Pot::new();

        let old = Cell { id: 5, used: 1, ..Cell::default() };
        pot.mask(new_ref(old));
        assert_eq!(pot.max_id(), 5);
        assert_eq!(pot.len(), 1);

        // A newer record for the same id replaces the old one.
        let newer = Cell { id: 5, used: 9, state: CellState::Deleted, ..Cell::default() };
        pot.mask(new_ref(newer));
        assert_eq!(pot.len(), 1);
        let mut seen_used = 0;
        pot.walk(|c| {
            seen_used = c.read().used;
            true
        });
        assert_eq!(seen_used, 9);

        // A lower id does not disturb max_id.
        pot.mask(new_ref(Cell { id: 2, ..Cell::default() }));
        assert_eq!(pot.max_id(), 5);
    }

    #[test]
    fn test_destroy_rolls_back_last_allocation() {
        let mut pot = Pot::new();
        let _a = pot.allocate();
        let b = pot.allocate();

        pot.destroy(b.read().id);
        assert_eq!(pot.max_id(), 1);
        assert_eq!(pot.len(), 1);

        // The next allocation reuses the rolled-back id.
        let c = pot.allocate();
        assert_eq!(c.read().id, 2);
    }

    #[test]
    fn test_destroy_of_older_cell_keeps_max_id() {
        let mut pot = Pot::new();
        let a = pot.allocate();
        let _b = pot.allocate();

        pot.destroy(a.read().id);
        assert_eq!(pot.max_id(), 2);
        assert_eq!(pot.len(), 1);
    }

    #[test]
    fn test_walk_stops_early() {
        let mut pot = Pot::new();
        for _ in 0..10 {
            pot.allocate();
        }

        let mut visited = 0;
        pot.walk(|_| {
            visited += 1;
            visited < 3
        });
        assert_eq!(visited, 3);
    }
}
