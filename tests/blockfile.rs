use std::fs;

use tempfile::tempdir;

use minirel::{BlockFile, DbError, DEFAULT_BLOCK_SIZE};

#[test]
fn create_writes_header_and_first_block() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", DEFAULT_BLOCK_SIZE);
    bf.create().unwrap();
    assert_eq!(bf.last(), 1);
    bf.close().unwrap();

    let mut bf2 = BlockFile::new(tmp.path(), "test", DEFAULT_BLOCK_SIZE);
    bf2.open().unwrap();
    assert_eq!(bf2.block_size(), DEFAULT_BLOCK_SIZE);
    assert_eq!(bf2.last(), 1);
    bf2.close().unwrap();
}

#[test]
fn open_missing_file_raises() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "nope", DEFAULT_BLOCK_SIZE);
    assert!(matches!(bf.open(), Err(DbError::NoSuchFile(_))));
}

#[test]
fn create_over_existing_file_raises() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", DEFAULT_BLOCK_SIZE);
    bf.create().unwrap();
    bf.close().unwrap();

    let mut bf2 = BlockFile::new(tmp.path(), "test", DEFAULT_BLOCK_SIZE);
    assert!(matches!(bf2.create(), Err(DbError::Exists(_))));
}

#[test]
fn stored_block_size_overrides_parameter() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", 512);
    bf.create().unwrap();
    bf.close().unwrap();

    let mut bf2 = BlockFile::new(tmp.path(), "test", DEFAULT_BLOCK_SIZE);
    bf2.open().unwrap();
    assert_eq!(bf2.block_size(), 512);
}

#[test]
fn write_read_roundtrip_across_reopen() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", 256);
    bf.create().unwrap();

    let mut b2 = bf.get_new().unwrap();
    assert_eq!(b2.id(), 2);
    b2.bytes_mut()[0..5].copy_from_slice(b"hello");
    bf.put(&b2).unwrap();

    let mut b3 = bf.get_new().unwrap();
    assert_eq!(b3.id(), 3);
    b3.bytes_mut()[0..5].copy_from_slice(b"world");
    bf.put(&b3).unwrap();

    assert_eq!(bf.block_ids().unwrap().collect::<Vec<_>>(), vec![1, 2, 3]);
    bf.close().unwrap();

    let mut bf2 = BlockFile::new(tmp.path(), "test", 256);
    bf2.open().unwrap();
    assert_eq!(bf2.last(), 3);
    assert!(bf2.get(2).unwrap().bytes().starts_with(b"hello"));
    assert!(bf2.get(3).unwrap().bytes().starts_with(b"world"));
    assert!(matches!(bf2.get(4), Err(DbError::NotFound(_))));
    assert!(matches!(bf2.get(0), Err(DbError::NotFound(_))));
}

#[test]
fn coalesced_writes_flush_at_depth_zero() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", 128);
    bf.create().unwrap();
    let path = bf.path().to_path_buf();

    bf.begin_write();
    bf.begin_write();
    let mut block = bf.get(1).unwrap();
    block.bytes_mut()[10] = 0xAB;
    bf.put(&block).unwrap();

    // reads see the dirty copy
    assert_eq!(bf.get(1).unwrap().bytes()[10], 0xAB);
    // but nothing reached disk yet, even after the inner end_write
    bf.end_write().unwrap();
    assert_eq!(fs::read(&path).unwrap()[128 + 10], 0);

    bf.end_write().unwrap();
    assert_eq!(fs::read(&path).unwrap()[128 + 10], 0xAB);
}

#[test]
fn close_flushes_pending_writes() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", 128);
    bf.create().unwrap();

    bf.begin_write();
    let mut block = bf.get(1).unwrap();
    block.bytes_mut()[20] = 0x77;
    bf.put(&block).unwrap();
    bf.close().unwrap();

    let mut bf2 = BlockFile::new(tmp.path(), "test", 128);
    assert_eq!(bf2.get(1).unwrap().bytes()[20], 0x77);
}

#[test]
fn delete_removes_the_file() {
    let tmp = tempdir().unwrap();
    let mut bf = BlockFile::new(tmp.path(), "test", 128);
    bf.create().unwrap();
    let path = bf.path().to_path_buf();
    assert!(path.is_file());
    bf.delete().unwrap();
    assert!(!path.exists());
    assert!(matches!(bf.delete(), Err(DbError::NoSuchFile(_))));
}
