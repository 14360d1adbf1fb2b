//! Page layout scenarios: preallocation, overflow, cell recycling and
//! on-disk containment invariants.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use cellar_store::{Cell, CellId, CellState, Error, Options, Store, MAGIC};

/// Parses a header file into `(key, cell)` entries, in log order.
fn read_header_entries(path: &Path) -> Vec<(Vec<u8>, Cell)> {
    let bytes = std::fs::read(path).unwrap();
    assert_eq!(&bytes[..4], &MAGIC, "header magic");
    let mut pos = 4;
    let mut entries = Vec::new();
    while pos < bytes.len() {
        let key_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let key = bytes[pos..pos + key_len].to_vec();
        pos += key_len;
        let record_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let cell = Cell::from_record(&bytes[pos..pos + record_len]).unwrap();
        pos += record_len;
        entries.push((key, cell));
    }
    entries
}

/// Latest record per cell id, replay order.
fn latest_cells(path: &Path) -> Vec<(CellId, Cell)> {
    let mut latest: Vec<(CellId, Cell)> = Vec::new();
    for (_, cell) in read_header_entries(path) {
        if let Some(slot) = latest.iter_mut().find(|(id, _)| *id == cell.id) {
            slot.1 = cell;
        } else {
            latest.push((cell.id, cell));
        }
    }
    latest
}

fn stream_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".stream"))
        .collect();
    names.sort();
    names
}

/// Ten 128-byte puts against a preallocated 1 KiB page: page 0000 exists
/// with at least the page size limit from the moment of creation.
#[test]
fn test_preallocated_page_spans_limit() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t2");
    let options = Options {
        max_page_size: 1024,
        preallocate_pages: true,
        ..Options::default()
    };
    let store = Store::open(&root, options).unwrap();
    for i in 0..10 {
        let key = format!("key{}", i).into_bytes();
        store.put(&key, &[i as u8; 128]).unwrap();
    }
    store.close().unwrap();

    let files = stream_files(&root);
    assert_eq!(
        files.iter().filter(|n| *n == "t2.0000.stream").count(),
        1,
        "got stream files {:?}",
        files
    );
    let first = std::fs::metadata(root.join("t2.0000.stream")).unwrap().len();
    assert!(first >= 1024, "preallocated page is {} bytes", first);

    // The eighth blob would have ended exactly at the limit, so it moved
    // to a second page.
    assert!(files.contains(&"t2.0001.stream".to_string()), "got {:?}", files);

    // Everything still reads back.
    let store = Store::open(&root, Options::default()).unwrap();
    for i in 0..10 {
        let key = format!("key{}", i).into_bytes();
        assert_eq!(store.get(&key).unwrap(), vec![i as u8; 128]);
    }
    store.close().unwrap();
}

/// Deleting "a" frees a 1-byte cell that the next 1-byte put must reuse,
/// leaving "b" untouched.
#[test]
fn test_deleted_cell_is_recycled() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t3");
    let options = Options { max_page_size: 0, preallocate_pages: false, ..Options::default() };
    let store = Store::open(&root, options).unwrap();

    store.put(b"a", b"x").unwrap();
    store.put(b"b", b"yy").unwrap();
    store.delete(b"a").unwrap();
    store.put(b"c", b"z").unwrap();

    assert_eq!(store.get(b"b").unwrap(), b"yy");
    assert_eq!(store.get(b"c").unwrap(), b"z");
    store.close().unwrap();

    // "c" landed in the recycled cell at offset 0 of page 0.
    let page = std::fs::read(root.join("t3.0000.stream")).unwrap();
    assert_eq!(page[0], b'z');
    assert_eq!(&page[1..3], b"yy");

    // The catalog confirms: cell 1 is reused with its original allocation.
    let cells = latest_cells(&root.join("t3.header"));
    let (_, cell1) = cells.iter().find(|(id, _)| *id == 1).unwrap();
    assert_eq!(cell1.state, CellState::Reused);
    assert_eq!(cell1.allocated, 1, "allocation never changes on reuse");
    assert_eq!(cell1.used, 1);
    assert_eq!(cell1.offset, 0);
}

/// A reused cell keeps its allocation; only `used` tracks the new
/// payload.
#[test]
fn test_reuse_keeps_allocation_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("fit");
    let options = Options { max_page_size: 0, preallocate_pages: false, ..Options::default() };
    let store = Store::open(&root, options).unwrap();

    store.put(b"wide", &[7u8; 64]).unwrap();
    store.delete(b"wide").unwrap();
    store.put(b"slim", &[9u8; 10]).unwrap();
    assert_eq!(store.get(b"slim").unwrap(), vec![9u8; 10]);
    store.close().unwrap();

    let cells = latest_cells(&root.join("fit.header"));
    let (_, cell) = cells.iter().find(|(id, _)| *id == 1).unwrap();
    assert_eq!(cell.state, CellState::Reused);
    assert_eq!(cell.allocated, 64);
    assert_eq!(cell.used, 10);
}

/// Every cell fits entirely inside one page: offset + allocated never
/// crosses the page size limit.
#[test]
fn test_page_containment_invariant() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("contain");
    let limit = 256i64;
    let options = Options {
        max_page_size: limit,
        preallocate_pages: false,
        ..Options::default()
    };
    let store = Store::open(&root, options).unwrap();

    for i in 0..50u32 {
        let key = format!("k{:02}", i).into_bytes();
        let val = vec![0x5A; 1 + (i as usize * 37) % 100];
        store.put(&key, &val).unwrap();
    }
    store.close().unwrap();

    let cells = latest_cells(&root.join("contain.header"));
    assert_eq!(cells.len(), 50);
    for (id, cell) in &cells {
        assert!(
            cell.offset + cell.allocated <= limit,
            "cell {} spans the page boundary: offset {} allocated {}",
            id,
            cell.offset,
            cell.allocated
        );
        assert!(cell.offset >= 0);
    }

    // Spot check: values survive the multi-page layout.
    let store = Store::open(&root, Options::default()).unwrap();
    for i in 0..50u32 {
        let key = format!("k{:02}", i).into_bytes();
        assert_eq!(store.get(&key).unwrap().len(), 1 + (i as usize * 37) % 100);
    }
    store.close().unwrap();
}

#[test]
fn test_blob_bigger_than_page_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let options = Options {
        max_page_size: 64,
        preallocate_pages: false,
        ..Options::default()
    };
    let store = Store::open(dir.path().join("big"), options).unwrap();

    assert!(matches!(
        store.put(b"k", &[0u8; 65]),
        Err(Error::BlobTooBig { size: 65, max: 64 })
    ));
    // A full-page blob is still allowed.
    store.put(b"k", &[0u8; 64]).unwrap();
    assert_eq!(store.get(b"k").unwrap(), vec![0u8; 64]);
    store.close().unwrap();
}

/// With an unbounded page size, everything stays in one stream file.
#[test]
fn test_unbounded_page_is_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("one");
    let options = Options { max_page_size: 0, ..Options::default() };
    let store = Store::open(&root, options).unwrap();

    for i in 0..100u32 {
        store.put(format!("k{}", i).as_bytes(), &vec![1u8; 100]).unwrap();
    }
    store.close().unwrap();

    assert_eq!(stream_files(&root), vec!["one.0000.stream".to_string()]);
}

/// Zero-padding wipes the dead tail of a reused cell on disk.
#[test]
fn test_zero_pad_wipes_reused_tail() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pad");
    let options = Options {
        max_page_size: 0,
        preallocate_pages: false,
        zero_pad_deleted: true,
        ..Options::default()
    };
    let store = Store::open(&root, options).unwrap();

    store.put(b"old", &[0xFF; 32]).unwrap();
    store.delete(b"old").unwrap();
    store.put(b"new", b"hi").unwrap();
    store.close().unwrap();

    let page = std::fs::read(root.join("pad.0000.stream")).unwrap();
    assert_eq!(&page[..2], b"hi");
    assert!(
        page[2..32].iter().all(|&b| b == 0),
        "tail of the reused cell should be zeroed"
    );
}
