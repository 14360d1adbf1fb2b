//! The store façade: locking, operation flow, intents and mirroring.
//!
//! A store is a directory holding a header file (the cell catalog), one or
//! more stream pages (the blobs), and an options sidecar. The façade wires
//! the catalog and the stream together behind one readers/writer lock:
//! lookups run concurrently, mutations exclusively.
//!
//! Two optional nested stores hang off the façade. The intents journal
//! (under `<dir>/.intents`) records the pre-image of every modify so an
//! interrupted modify is resolved on the next open. The mirror receives
//! every successful mutation synchronously. Nested instances are marked as
//! such at construction and never nest further, so the composition is
//! acyclic.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cell::{CellRef, CellState};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::options::Options;
use crate::reader::{BlobReader, LimitedReadSeeker};
use crate::stream::Stream;

/// File extension of the header file.
pub const HEADER_EXT: &str = "header";
/// File extension of the options sidecar.
pub const OPTIONS_EXT: &str = "options";
/// Directory of the nested intents journal.
pub const INTENTS_DIR: &str = ".intents";

/// An embeddable on-disk key/value store.
///
/// Keys and values are opaque byte strings. A store must be
/// [`close`](Self::close)d after use: cell records parked in memory are
/// only flushed then (unless `persistent_header` is set).
pub struct Store {
    options: Options,
    inner: RwLock<Inner>,
}

/// Everything guarded by the store lock.
struct Inner {
    dir: PathBuf,
    base: String,
    header: Header,
    stream: Stream,
    intents: Option<Box<Store>>,
    mirror: Option<Box<Store>>,
    /// Marks a nested utility instance (mirror or intents journal).
    /// Nested instances never nest further and skip write-path caching.
    nested: bool,
    open: bool,
}

impl Store {
    /// Opens an existing store or creates a new one in directory `dir`.
    ///
    /// The store's base name is the last path segment. Options persisted in
    /// a previous session take precedence over `options`; on first open the
    /// given options define the store's shape for good.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] when `dir` has no usable final
    /// segment, [`Error::InvalidMagic`]/[`Error::Corrupted`] on damaged
    /// files, and [`Error::Mirror`]/[`Error::Intents`] when a nested store
    /// fails to come up.
    pub fn open(dir: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::open_nested(dir.as_ref(), options, false)
    }

    /// Opens a store, optionally marked as a nested utility instance.
    fn open_nested(dir: &Path, options: Options, nested: bool) -> Result<Self> {
        let dir = dir.to_path_buf();
        let base = match dir.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(Error::InvalidPath { path: dir.display().to_string() }),
        };
        std::fs::create_dir_all(&dir)?;

        let mut options = options;
        let options_path = dir.join(format!("{}.{}", base, OPTIONS_EXT));
        if options_path.exists() {
            options = Options::load(&options_path)?;
        }

        let header = Header::new(dir.join(format!("{}.{}", base, HEADER_EXT)));
        let stream = Stream::new(dir.join(&base));
        let store = Store {
            options,
            inner: RwLock::new(Inner {
                dir,
                base,
                header,
                stream,
                intents: None,
                mirror: None,
                nested,
                open: false,
            }),
        };
        {
            let mut inner = store.inner.write();
            inner.load(&store.options)?;
            store.attach_nested(&mut inner)?;
        }
        Ok(store)
    }

    /// The options this store runs with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Stores `val` under `key`.
    ///
    /// Unless the store is immutable, the blob space of a previously
    /// deleted cell is recycled when one with a sufficient allocation
    /// exists.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidKey`] on an empty key,
    /// [`Error::DuplicateKey`] when the key is live, and
    /// [`Error::BlobTooBig`] when `val` exceeds the page size limit.
    pub fn put(&self, key: &[u8], val: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        inner.put_internal(key, val, &self.options)?;
        if let Some(mirror) = &inner.mirror {
            mirror.put(key, val).map_err(Error::mirror)?;
        }
        Ok(())
    }

    /// Returns a copy of the blob stored under `key`.
    ///
    /// Served from the cache when resident; otherwise read from the page
    /// and, with CRC enabled, verified against the cell's checksum.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        inner.get_internal(key, false, &self.options)
    }

    /// Returns a streaming reader over the blob stored under `key`.
    ///
    /// Cached blobs are served from memory. Otherwise the reader owns a
    /// private read-only handle on the page file, bounded to the blob's
    /// payload, and stays usable independently of later store operations.
    pub fn get_reader(&self, key: &[u8]) -> Result<BlobReader> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }
        let cell = inner.header.lookup(key).ok_or(Error::KeyNotFound)?;
        let (page_index, offset, used, cached) = {
            let c = cell.read();
            (c.page_index, c.offset, c.used, c.cache.clone())
        };
        if let Some(blob) = cached {
            return Ok(BlobReader::Cached(Cursor::new(blob)));
        }
        let page = inner.stream.page(page_index)?;
        let file = File::open(page.path())?;
        let window = LimitedReadSeeker::new(file, offset as u64, used as u64)?;
        Ok(BlobReader::File(window))
    }

    /// Replaces the blob under `key` with `val`.
    ///
    /// Realized as delete + put. With intents enabled the pre-image is
    /// journaled first, so a crash in between is resolved on the next
    /// open: the key ends up holding either the old or the new value,
    /// never nothing.
    pub fn modify(&self, key: &[u8], val: &[u8]) -> Result<()> {
        if self.options.immutable {
            return Err(Error::Immutable);
        }
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        if !inner.header.is_key_used(key) {
            return Err(Error::KeyNotFound);
        }
        let size = val.len() as i64;
        if self.options.max_page_size > 0 && size > self.options.max_page_size {
            return Err(Error::BlobTooBig { size, max: self.options.max_page_size });
        }

        let intents = inner.intents.take();
        let result = inner.modify_locked(intents.as_deref(), key, val, &self.options);
        inner.intents = intents;
        result?;

        if let Some(mirror) = &inner.mirror {
            mirror.modify(key, val).map_err(Error::mirror)?;
        }
        Ok(())
    }

    /// Deletes the blob under `key`.
    ///
    /// The cell keeps its stream space and becomes recyclable by later
    /// puts.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if self.options.immutable {
            return Err(Error::Immutable);
        }
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }
        let mut inner = self.inner.write();
        inner.delete_internal(key, &self.options)?;
        if let Some(mirror) = &inner.mirror {
            mirror.delete(key).map_err(Error::mirror)?;
        }
        Ok(())
    }

    /// Visits every live key/value pair until `visit` returns false.
    ///
    /// Holds the write lock for the whole iteration: the internal reads
    /// would otherwise install cache entries under a read lock while the
    /// key set must stay stable.
    pub fn walk<F: FnMut(&[u8], &[u8]) -> bool>(&self, mut visit: F) -> Result<()> {
        let inner = self.inner.write();
        inner.ensure_open()?;
        for key in inner.header.keys_snapshot() {
            let blob = match inner.get_internal(&key, true, &self.options) {
                Ok(blob) => blob,
                Err(Error::KeyNotFound) => continue,
                Err(err) => return Err(err),
            };
            if !visit(&key, &blob) {
                break;
            }
        }
        Ok(())
    }

    /// Snapshot of all live keys, in unspecified order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.inner.read().header.keys_snapshot()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.inner.read().header.len()
    }

    /// Checks if no keys are live.
    pub fn is_empty(&self) -> bool {
        self.inner.read().header.is_empty()
    }

    /// Total bytes currently held by the blob cache.
    pub fn cached_bytes(&self) -> i64 {
        self.inner.read().header.cached_bytes()
    }

    /// Closes and reloads the store. Nested stores reopen recursively.
    pub fn reopen(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.open {
            self.options.save(&inner.options_path())?;
            inner.header.close()?;
            inner.stream.close()?;
            inner.open = false;
        }
        inner.load(&self.options)?;
        self.attach_nested(&mut inner)
    }

    /// Flushes and closes the store.
    ///
    /// Options, header, stream and the nested stores are attempted
    /// independently; failures are aggregated into one
    /// [`Error::CloseFailed`]. Closing an already closed store is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.open {
            return Ok(());
        }
        let mut failures = Vec::new();
        if let Err(err) = self.options.save(&inner.options_path()) {
            failures.push(format!("options: {}", err));
        }
        if let Err(err) = inner.header.close() {
            failures.push(format!("header: {}", err));
        }
        if let Err(err) = inner.stream.close() {
            failures.push(format!("stream: {}", err));
        }
        if let Some(journal) = inner.intents.take() {
            if let Err(err) = journal.close() {
                failures.push(format!("intents: {}", err));
            }
        }
        if let Some(mirror) = inner.mirror.take() {
            if let Err(err) = mirror.close() {
                failures.push(format!("mirror: {}", err));
            }
        }
        inner.open = false;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailed { detail: failures.join("; ") })
        }
    }

    /// Drops every cell and every page file. Recovery tooling only — live
    /// data is lost.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.header.clear()?;
        inner.stream.clear()?;
        Ok(())
    }

    /// Reserved: compacts header and stream into fresh files.
    ///
    /// Currently a no-op that only acquires the write lock.
    pub fn compact(&self) -> Result<()> {
        let inner = self.inner.write();
        inner.ensure_open()
    }

    /// Brings up the intents journal and the mirror after a load, unless
    /// this instance is itself nested.
    fn attach_nested(&self, inner: &mut Inner) -> Result<()> {
        if inner.nested {
            return Ok(());
        }
        if self.options.use_intents {
            let journal = match inner.intents.take() {
                Some(journal) => {
                    journal.reopen().map_err(Error::intents)?;
                    journal
                }
                None => Box::new(
                    Store::open_nested(
                        &inner.dir.join(INTENTS_DIR),
                        self.options.for_intents(),
                        true,
                    )
                    .map_err(Error::intents)?,
                ),
            };
            inner.replay_intents(&journal, &self.options)?;
            inner.intents = Some(journal);
        }
        if let Some(dir) = &self.options.mirror_dir {
            let mirror = match inner.mirror.take() {
                Some(mirror) => {
                    mirror.reopen().map_err(Error::mirror)?;
                    mirror
                }
                None => Box::new(
                    Store::open_nested(dir, self.options.for_mirror(), true)
                        .map_err(Error::mirror)?,
                ),
            };
            inner.mirror = Some(mirror);
        }
        Ok(())
    }
}

impl Inner {
    fn options_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base, OPTIONS_EXT))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Opens the header and the stream pages it references.
    fn load(&mut self, options: &Options) -> Result<()> {
        let max_page = self.header.open(options.compact_header, options.sync_writes)?;
        if max_page >= 0 {
            if let Err(err) = self.stream.open(max_page + 1, options.sync_writes) {
                let _ = self.header.close();
                return Err(err);
            }
        }
        self.open = true;
        Ok(())
    }

    /// Re-applies every journaled pre-image left behind by an interrupted
    /// modify, then resets the journal.
    fn replay_intents(&mut self, journal: &Store, options: &Options) -> Result<()> {
        let keys = journal.keys();
        if keys.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            dir = %self.dir.display(),
            pending = keys.len(),
            "replaying interrupted modify journal"
        );
        for key in keys {
            let pre = journal.get(&key).map_err(Error::intents)?;
            if self.header.is_key_used(&key) {
                self.delete_internal(&key, options)?;
            }
            self.put_internal(&key, &pre, options)?;
        }
        journal.clear().map_err(Error::intents)
    }

    fn put_internal(&mut self, key: &[u8], val: &[u8], options: &Options) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }
        if self.header.is_key_used(key) {
            return Err(Error::DuplicateKey);
        }
        let size = val.len() as i64;
        if options.max_page_size > 0 && size > options.max_page_size {
            return Err(Error::BlobTooBig { size, max: options.max_page_size });
        }

        let cell = self.header.select(!options.immutable, size);
        {
            let mut c = cell.write();
            c.key = key.to_vec();
            c.crc32 = if options.crc { crc32fast::hash(val) } else { 0 };
        }
        if options.max_cache_memory > 0 && options.cached_writes && !self.nested {
            self.header.cache(&cell, val, options.max_cache_memory);
        }

        if let Err(err) = self.write_blob(&cell, val, options) {
            self.rollback_put(&cell);
            return Err(err);
        }
        self.header.commit_key(&cell);
        Ok(())
    }

    /// Places the cell on a page, writes the blob and persists the cell.
    fn write_blob(&mut self, cell: &CellRef, val: &[u8], options: &Options) -> Result<()> {
        let index = self.stream.assign_page(
            cell,
            options.max_page_size,
            options.preallocate_pages,
            options.sync_writes,
        )?;
        let page = self.stream.page(index as i64)?;
        {
            let c = cell.read();
            page.put(&c, val, options.zero_pad_deleted)?;
        }
        self.header.update(cell, options.persistent_header)
    }

    /// Undoes a failed put: a fresh cell is rolled back out of the pot, a
    /// recycled one returns to the bin with its checksum cleared.
    fn rollback_put(&mut self, cell: &CellRef) {
        self.header.uncache(cell);
        let (id, state) = {
            let c = cell.read();
            (c.id, c.state)
        };
        match state {
            CellState::Normal => self.header.destroy(id),
            _ => {
                {
                    let mut c = cell.write();
                    c.crc32 = 0;
                    c.state = CellState::Deleted;
                    c.key.clear();
                }
                self.header.trash(Arc::clone(cell));
            }
        }
    }

    fn get_internal(&self, key: &[u8], walking: bool, options: &Options) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }
        let cell = self.header.lookup(key).ok_or(Error::KeyNotFound)?;

        let cached = cell.read().cache.clone();
        let blob = match cached {
            Some(blob) => blob,
            None => {
                let (page_index, stored) = {
                    let c = cell.read();
                    (c.page_index, c.crc32)
                };
                let page = self.stream.page(page_index)?;
                let blob = {
                    let c = cell.read();
                    page.get(&c)?
                };
                if options.crc && stored != 0 {
                    let computed = crc32fast::hash(&blob);
                    if computed != stored {
                        return Err(Error::ChecksumFailed { stored, computed });
                    }
                }
                blob
            }
        };

        if options.max_cache_memory > 0 && !walking {
            self.header.cache(&cell, &blob, options.max_cache_memory);
        }
        Ok(blob)
    }

    fn delete_internal(&mut self, key: &[u8], options: &Options) -> Result<()> {
        self.ensure_open()?;
        let cell = self.header.remove_key(key).ok_or(Error::KeyNotFound)?;
        self.header.uncache(&cell);
        {
            let mut c = cell.write();
            c.key.clear();
            c.crc32 = 0;
            c.state = CellState::Deleted;
        }
        self.header.trash(Arc::clone(&cell));
        self.header.update(&cell, options.persistent_header)
    }

    /// The locked body of modify. With a journal, the pre-image is put
    /// there before the outer delete + put; on a failed put the pre-image
    /// is restored and the original error surfaced.
    fn modify_locked(
        &mut self,
        journal: Option<&Store>,
        key: &[u8],
        val: &[u8],
        options: &Options,
    ) -> Result<()> {
        let Some(journal) = journal else {
            self.delete_internal(key, options)?;
            return self.put_internal(key, val, options);
        };

        let pre = self.get_internal(key, true, options)?;
        // Clear any stale intent left by an earlier failed modify of the
        // same key; the live value supersedes it.
        let _ = journal.delete(key);
        journal.put(key, &pre).map_err(Error::intents)?;

        self.delete_internal(key, options)?;
        match self.put_internal(key, val, options) {
            Ok(()) => journal.delete(key).map_err(Error::intents),
            Err(err) => {
                // Best-effort restore; if it fails the intent stays behind
                // and is replayed on the next open.
                if self.put_internal(key, &pre, options).is_ok() {
                    let _ = journal.delete(key);
                }
                Err(err)
            }
        }
    }
}
