//! cellar-store: an embeddable, single-process, on-disk key/value store.
//!
//! Opaque byte-string values are stored under opaque byte-string keys in a
//! small family of files inside one directory. Blobs are immediately
//! addressable: the catalog lives in memory during a session, so a read
//! costs one positional page access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 Store façade                 │
//! │   put/get/modify/delete/walk  (RwLock)      │
//! │        ├─ intents journal (nested store)    │
//! │        └─ mirror (nested store)             │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │                   Header                     │
//! │   cell catalog + key index + dirty set      │
//! │     ├─ Pot  (cell arena, id assignment)     │
//! │     ├─ Bin  (size-sorted free list)         │
//! │     └─ Mem  (byte-bounded blob cache)       │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │                   Stream                     │
//! │     pages of blobs, back to back            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The header file is an append-only log of cell records; the latest
//! record per cell wins on replay, and compaction rewrites the log
//! canonically on open. Deleted cells keep their stream space and are
//! recycled best-fit by later puts. Cells and blobs cannot be resized
//! once allocated, only replaced.
//!
//! # Quick start
//!
//! ```no_run
//! use cellar_store::{Options, Store};
//!
//! let store = Store::open("data/example", Options::default())?;
//! store.put(b"greeting", b"hello")?;
//! assert_eq!(store.get(b"greeting")?, b"hello");
//! store.close()?;
//! # Ok::<(), cellar_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
// Cell spans are i64 on disk (size limits use <= 0 as "disabled"); the
// narrowing casts at I/O boundaries are bounds-checked by construction.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bin;
pub mod cell;
pub mod error;
mod fio;
pub mod header;
pub mod mem;
pub mod options;
pub mod page;
pub mod pot;
pub mod reader;
pub mod store;
pub mod stream;

pub use cell::{Cell, CellRef, CellState, CELL_RECORD_SIZE};
pub use error::{CellId, Error, Result};
pub use header::MAGIC;
pub use options::Options;
pub use reader::{BlobReader, LimitedReadSeeker};
pub use store::{Store, HEADER_EXT, INTENTS_DIR, OPTIONS_EXT};
pub use stream::STREAM_EXT;
