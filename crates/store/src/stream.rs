//! The stream: ordered collection of blob pages on disk.
//!
//! Pages are named `<base>.NNNN.stream` with a zero-padded four-digit
//! index. Blobs never span pages: a cell whose reserved span would cross
//! the page size limit is moved to a fresh page at offset zero, wasting
//! the tail of the previous page.

use std::path::PathBuf;

use crate::cell::{CellRef, CellState};
use crate::error::{Error, Result};
use crate::page::Page;

/// File extension of stream pages.
pub const STREAM_EXT: &str = "stream";

/// Ordered collection of pages; a page's index is its position here.
pub struct Stream {
    /// Directory-qualified base name, without index or extension.
    base: PathBuf,
    pages: Vec<Page>,
}

impl Stream {
    /// Creates a stream rooted at `base` (no files are touched until
    /// [`open`](Self::open) or the first page creation).
    pub fn new(base: PathBuf) -> Self {
        Self { base, pages: Vec::new() }
    }

    fn page_path(&self, index: usize) -> PathBuf {
        let name = match self.base.file_name() {
            Some(name) => format!("{}.{:04}.{}", name.to_string_lossy(), index, STREAM_EXT),
            None => format!("{:04}.{}", index, STREAM_EXT),
        };
        self.base.with_file_name(name)
    }

    /// Opens existing page files `0..count` read-write.
    pub fn open(&mut self, count: i64, sync: bool) -> Result<()> {
        for _ in 0..count {
            let path = self.page_path(self.pages.len());
            self.pages.push(Page::open(path, sync)?);
        }
        Ok(())
    }

    fn create_page(&mut self, prealloc_size: i64, sync: bool) -> Result<usize> {
        let index = self.pages.len();
        let page = Page::create(self.page_path(index), prealloc_size, sync)?;
        self.pages.push(page);
        Ok(index)
    }

    /// Index of the last page, creating the first one when none exist.
    fn last_or_create(&mut self, prealloc_size: i64, sync: bool) -> Result<usize> {
        if self.pages.is_empty() {
            return self.create_page(prealloc_size, sync);
        }
        Ok(self.pages.len() - 1)
    }

    /// Places the cell on a page and returns the page index.
    ///
    /// Reused cells keep their page. A normal cell lands on the last page,
    /// unless its reserved span would reach `size_limit`, in which case a
    /// new page is created and the cell's offset resets to zero. New pages
    /// are preallocated to `size_limit` when `prealloc` is set.
    pub fn assign_page(
        &mut self,
        cell: &CellRef,
        size_limit: i64,
        prealloc: bool,
        sync: bool,
    ) -> Result<usize> {
        let (state, page_index, offset, allocated) = {
            let c = cell.read();
            (c.state, c.page_index, c.offset, c.allocated)
        };

        if state != CellState::Normal {
            return Ok(page_index as usize);
        }

        let prealloc_size = if prealloc && size_limit > 0 { size_limit } else { 0 };
        let mut index = self.last_or_create(prealloc_size, sync)?;

        if size_limit > 0 && offset + allocated >= size_limit {
            index = self.create_page(prealloc_size, sync)?;
            cell.write().offset = 0;
        }
        cell.write().page_index = index as i64;
        Ok(index)
    }

    /// Looks up a page by index.
    pub fn page(&self, index: i64) -> Result<&Page> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.pages.get(i))
            .ok_or_else(|| Error::Corrupted { reason: format!("stream page {} not open", index) })
    }

    /// Returns the number of open pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Checks if no pages are open.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Closes all pages, aggregating any failures.
    pub fn close(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for (index, page) in self.pages.drain(..).enumerate() {
            if let Err(err) = page.close() {
                failures.push(format!("page {}: {}", index, err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailed { detail: failures.join("; ") })
        }
    }

    /// Deletes every open page's file. Recovery/reset path.
    pub fn clear(&mut self) -> Result<()> {
        let paths: Vec<PathBuf> = self.pages.iter().map(|p| p.path().to_path_buf()).collect();
        self.pages.clear();
        for path in paths {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::cell::{new_ref, Cell};

    fn normal(offset: i64, allocated: i64) -> CellRef {
        new_ref(Cell { offset, allocated, used: allocated, ..Cell::default() })
    }

    #[test]
    fn test_page_file_naming() {
        let stream = Stream::new(PathBuf::from("/data/db/db"));
        assert_eq!(stream.page_path(0), PathBuf::from("/data/db/db.0000.stream"));
        assert_eq!(stream.page_path(12), PathBuf::from("/data/db/db.0012.stream"));
    }

    #[test]
    fn test_assign_creates_first_page() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::new(dir.path().join("t"));

        let cell = normal(0, 16);
        let index = stream.assign_page(&cell, 0, false, false).unwrap();

        assert_eq!(index, 0);
        assert_eq!(cell.read().page_index, 0);
        assert_eq!(stream.len(), 1);
        assert!(dir.path().join("t.0000.stream").exists());
    }

    #[test]
    fn test_assign_overflow_advances_page() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::new(dir.path().join("t"));

        // First cell fits page 0.
        let a = normal(0, 100);
        assert_eq!(stream.assign_page(&a, 128, false, false).unwrap(), 0);

        // Second cell would reach the limit: new page, offset reset.
        let b = normal(100, 100);
        assert_eq!(stream.assign_page(&b, 128, false, false).unwrap(), 1);
        assert_eq!(b.read().offset, 0);
        assert_eq!(b.read().page_index, 1);
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_reused_cell_keeps_its_page() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::new(dir.path().join("t"));

        let a = normal(0, 8);
        stream.assign_page(&a, 0, false, false).unwrap();

        let reused = new_ref(Cell {
            offset: 0,
            allocated: 8,
            used: 4,
            page_index: 0,
            state: CellState::Reused,
            ..Cell::default()
        });
        let index = stream.assign_page(&reused, 4, false, false).unwrap();

        // No overflow check, no new page, even with a tiny limit.
        assert_eq!(index, 0);
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn test_preallocated_new_pages() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::new(dir.path().join("t"));

        let cell = normal(0, 16);
        stream.assign_page(&cell, 1024, true, false).unwrap();
        stream.close().unwrap();

        let len = std::fs::metadata(dir.path().join("t.0000.stream")).unwrap().len();
        assert!(len >= 1024, "preallocated page should span the limit, got {}", len);
    }

    #[test]
    fn test_reopen_existing_pages() {
        let dir = tempdir().unwrap();

        {
            let mut stream = Stream::new(dir.path().join("t"));
            stream.assign_page(&normal(0, 200), 128, false, false).unwrap();
            stream.assign_page(&normal(200, 16), 128, false, false).unwrap();
            stream.close().unwrap();
        }

        let mut stream = Stream::new(dir.path().join("t"));
        stream.open(2, false).unwrap();
        assert_eq!(stream.len(), 2);
        assert!(stream.page(1).is_ok());
        assert!(stream.page(2).is_err());
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::new(dir.path().join("t"));
        stream.assign_page(&normal(0, 8), 0, false, false).unwrap();
        assert!(dir.path().join("t.0000.stream").exists());

        stream.clear().unwrap();

        assert!(stream.is_empty());
        assert!(!dir.path().join("t.0000.stream").exists());
    }

    #[test]
    fn test_page_lookup_negative_index() {
        let stream = Stream::new(PathBuf::from("t"));
        assert!(stream.page(-1).is_err());
    }
}
