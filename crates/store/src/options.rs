//! Store configuration and its sidecar persistence.
//!
//! Options chosen in a store's first session are persisted to the
//! `<base>.options` sidecar and take precedence over caller-supplied
//! options on subsequent opens, so a store keeps the shape it was created
//! with.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration of one store instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Directory of a mirror store that receives every mutation, or `None`
    /// for no mirror.
    pub mirror_dir: Option<PathBuf>,

    /// Compute an IEEE CRC-32 of the payload on put and verify it on get.
    pub crc: bool,

    /// Byte budget for the blob cache; zero or negative disables caching.
    pub max_cache_memory: i64,

    /// Also cache values on put (only meaningful when the cache is
    /// enabled).
    pub cached_writes: bool,

    /// Maximum stream page size in bytes; zero or negative means a single
    /// unbounded page.
    pub max_page_size: i64,

    /// Truncate new pages to `max_page_size` on creation. Slows page
    /// creation but limits OS-level fragmentation during writes.
    pub preallocate_pages: bool,

    /// Append cell records to the header file immediately instead of on
    /// close.
    pub persistent_header: bool,

    /// Forbid modify and delete.
    pub immutable: bool,

    /// Open header and stream files for synchronous I/O. Bypasses OS write
    /// caching and slows writes considerably.
    pub sync_writes: bool,

    /// Zero the reserved tail when writing into a reused cell.
    pub zero_pad_deleted: bool,

    /// Rewrite the header canonically (one record per cell) after each
    /// load.
    pub compact_header: bool,

    /// Journal modify operations so an interrupted modify is rolled
    /// forward or back on the next open.
    pub use_intents: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mirror_dir: None,
            crc: true,
            max_cache_memory: 32 * 1024 * 1024,
            cached_writes: false,
            max_page_size: 4294967295, // 4 GiB - 1
            preallocate_pages: true,
            persistent_header: true,
            immutable: false,
            sync_writes: false,
            zero_pad_deleted: true,
            compact_header: true,
            use_intents: false,
        }
    }
}

impl Options {
    /// Loads options from a sidecar file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::Corrupted`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|err| Error::Corrupted { reason: format!("options sidecar: {}", err) })
    }

    /// Saves options to a sidecar file, overwriting any previous content.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|err| Error::Corrupted { reason: format!("options sidecar: {}", err) })?;
        let file = writer
            .into_inner()
            .map_err(|err| Error::Io { source: err.into_error() })?;
        file.sync_all()?;
        Ok(())
    }

    /// Derives the options for a mirror instance: same shape, nesting
    /// suppressed. Mirror instances are opened as nested stores.
    pub(crate) fn for_mirror(&self) -> Self {
        let mut opts = self.clone();
        opts.mirror_dir = None;
        opts.use_intents = false;
        opts
    }

    /// Derives the options for the intents journal: force-persistent
    /// header, no cache, no zero-padding, nesting suppressed. Journal
    /// instances are opened as nested stores.
    pub(crate) fn for_intents(&self) -> Self {
        let mut opts = self.clone();
        opts.mirror_dir = None;
        opts.use_intents = false;
        opts.persistent_header = true;
        opts.max_cache_memory = 0;
        opts.cached_writes = false;
        opts.zero_pad_deleted = false;
        opts
    }
}
