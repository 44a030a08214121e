use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};
use crc32fast::Hasher;
use log::debug;

use crate::core::errors::DbError;

/// Default size of one database block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const MAGIC: [u8; 8] = *b"MINIREL1";
const VERSION: u16 = 1;
const CHECKSUM_LEN: usize = 4;
const HEADER_LEN: usize = CHECKSUM_LEN + 8 + 2 + 4;

/// One fixed-size block, owned by the caller between `get` and `put`.
#[derive(Debug, Clone)]
pub struct Block {
    id: u32,
    data: Vec<u8>,
}

impl Block {
    pub(crate) fn new(id: u32, block_size: usize) -> Self {
        Self {
            id,
            data: vec![0u8; block_size],
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A file of fixed-size blocks addressed by block id.
///
/// Block 0 holds the file header (magic, version, block size, crc32)
/// and is never handed out; data blocks start at id 1. `last` is
/// derived from the file length at open. Writes go through a
/// reference-counted coalescing queue: while `begin_write` depth is
/// above zero, `put` collects dirty blocks in memory and `get` serves
/// the dirty copy; the queue is flushed when the depth returns to zero.
#[derive(Debug)]
pub struct BlockFile {
    path: PathBuf,
    block_size: usize,
    file: Option<File>,
    last: u32,
    write_queue: HashMap<u32, Block>,
    write_depth: usize,
}

impl BlockFile {
    pub fn new(dir: &Path, name: &str, block_size: usize) -> Self {
        Self {
            path: dir.join(format!("{name}.db")),
            block_size,
            file: None,
            last: 0,
            write_queue: HashMap::new(),
            write_depth: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Highest allocated block id.
    pub fn last(&self) -> u32 {
        self.last
    }

    /// Exclusive create: writes the header page and installs block 1
    /// (empty, zeroed; the owner formats it for its page kind).
    pub fn create(&mut self) -> Result<(), DbError> {
        if self.is_open() {
            return Err(DbError::Exists(self.path.display().to_string()));
        }
        if self.block_size < HEADER_LEN {
            return Err(DbError::BadValue(format!(
                "block size {} too small for file header",
                self.block_size
            )));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(DbError::Exists(self.path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        write_header(&mut file, self.block_size)?;
        // first data block of the file
        file.seek(SeekFrom::Start(self.block_size as u64))?;
        file.write_all(&vec![0u8; self.block_size])?;
        file.sync_all()?;

        self.file = Some(file);
        self.last = 1;
        debug!("created block file {:?}", self.path);
        Ok(())
    }

    /// Open an existing file. Idempotent. The block size stored in the
    /// header overrides the constructor parameter.
    pub fn open(&mut self) -> Result<(), DbError> {
        if self.is_open() {
            return Ok(());
        }
        if !self.path.exists() {
            return Err(DbError::NoSuchFile(self.path.display().to_string()));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.block_size = read_header(&mut file)?;
        let file_len = file.metadata()?.len();
        self.last = (file_len / self.block_size as u64).saturating_sub(1) as u32;
        self.file = Some(file);
        debug!("opened block file {:?}, last block {}", self.path, self.last);
        Ok(())
    }

    /// Flush pending writes and release the file handle. Idempotent.
    pub fn close(&mut self) -> Result<(), DbError> {
        if self.is_open() {
            self.write_depth = 1;
            self.end_write()?;
        }
        if let Some(file) = self.file.take() {
            file.sync_all()?;
            self.last = 0;
        }
        Ok(())
    }

    /// Close then unlink the physical file.
    pub fn delete(&mut self) -> Result<(), DbError> {
        if !self.path.exists() {
            return Err(DbError::NoSuchFile(self.path.display().to_string()));
        }
        self.close()?;
        std::fs::remove_file(&self.path)?;
        debug!("deleted block file {:?}", self.path);
        Ok(())
    }

    /// Read a block. During a coalesced write the dirty copy wins. Ids
    /// in range that were allocated but never written read as zeroed.
    pub fn get(&mut self, block_id: u32) -> Result<Block, DbError> {
        self.ensure_open()?;
        if block_id == 0 || block_id > self.last {
            return Err(DbError::NotFound(format!(
                "block {block_id} in {:?}",
                self.path
            )));
        }
        if self.write_depth > 0 {
            if let Some(block) = self.write_queue.get(&block_id) {
                return Ok(block.clone());
            }
        }
        let block_size = self.block_size;
        let file = self.file.as_mut().expect("ensured open");
        let file_len = file.metadata()?.len();
        let offset = block_id as u64 * block_size as u64;
        let mut block = Block::new(block_id, block_size);
        if offset + block_size as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut block.data)?;
        }
        Ok(block)
    }

    /// Allocate the next block id and return an empty block for it.
    /// Nothing reaches disk until the block is `put`.
    pub fn get_new(&mut self) -> Result<Block, DbError> {
        self.ensure_open()?;
        self.last += 1;
        Ok(Block::new(self.last, self.block_size))
    }

    /// Write a block back, or queue it during a coalesced write.
    pub fn put(&mut self, block: &Block) -> Result<(), DbError> {
        self.ensure_open()?;
        if block.size() != self.block_size {
            return Err(DbError::Corrupt(format!(
                "block {} has size {}, file uses {}",
                block.id(),
                block.size(),
                self.block_size
            )));
        }
        if self.write_depth > 0 {
            self.write_queue.insert(block.id(), block.clone());
            return Ok(());
        }
        self.write_block(block)
    }

    /// Hold back writes until the matching `end_write`. Nests.
    pub fn begin_write(&mut self) {
        self.write_depth += 1;
    }

    /// Leave the coalesced-write section; at depth zero all queued
    /// blocks are written out and the queue cleared.
    pub fn end_write(&mut self) -> Result<(), DbError> {
        self.write_depth = self.write_depth.saturating_sub(1);
        if self.write_depth == 0 && !self.write_queue.is_empty() {
            let mut blocks: Vec<Block> = self.write_queue.drain().map(|(_, b)| b).collect();
            blocks.sort_by_key(Block::id);
            for block in &blocks {
                self.write_block(block)?;
            }
        }
        Ok(())
    }

    /// All allocated block ids, `1..=last`.
    pub fn block_ids(&mut self) -> Result<impl Iterator<Item = u32>, DbError> {
        self.ensure_open()?;
        Ok(1..=self.last)
    }

    fn ensure_open(&mut self) -> Result<(), DbError> {
        if self.is_open() {
            return Ok(());
        }
        self.open()
    }

    fn write_block(&mut self, block: &Block) -> Result<(), DbError> {
        let offset = block.id() as u64 * self.block_size as u64;
        let file = self.file.as_mut().expect("ensured open");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&block.data)?;
        Ok(())
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn write_header(file: &mut File, block_size: usize) -> Result<(), DbError> {
    let mut page = vec![0u8; block_size];
    page[CHECKSUM_LEN..CHECKSUM_LEN + 8].copy_from_slice(&MAGIC);
    BigEndian::write_u16(&mut page[CHECKSUM_LEN + 8..CHECKSUM_LEN + 10], VERSION);
    BigEndian::write_u32(
        &mut page[CHECKSUM_LEN + 10..CHECKSUM_LEN + 14],
        block_size as u32,
    );
    let checksum = crc32(&page[CHECKSUM_LEN..]);
    BigEndian::write_u32(&mut page[0..CHECKSUM_LEN], checksum);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&page)?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<usize, DbError> {
    let mut prefix = [0u8; HEADER_LEN];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut prefix)
        .map_err(|_| DbError::Corrupt("file too small to contain header".into()))?;

    if prefix[CHECKSUM_LEN..CHECKSUM_LEN + 8] != MAGIC {
        return Err(DbError::Corrupt("invalid file magic".into()));
    }
    let version = BigEndian::read_u16(&prefix[CHECKSUM_LEN + 8..CHECKSUM_LEN + 10]);
    if version != VERSION {
        return Err(DbError::Corrupt(format!("unsupported version {version}")));
    }
    let block_size =
        BigEndian::read_u32(&prefix[CHECKSUM_LEN + 10..CHECKSUM_LEN + 14]) as usize;
    if block_size < HEADER_LEN {
        return Err(DbError::Corrupt(format!("corrupt block size {block_size}")));
    }

    let stored_checksum = BigEndian::read_u32(&prefix[0..CHECKSUM_LEN]);
    let mut page = vec![0u8; block_size];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut page)
        .map_err(|_| DbError::Corrupt("short read on header page".into()))?;
    if crc32(&page[CHECKSUM_LEN..]) != stored_checksum {
        return Err(DbError::Corrupt("header checksum mismatch".into()));
    }
    Ok(block_size)
}
