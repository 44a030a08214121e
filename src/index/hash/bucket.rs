use byteorder::{BigEndian, ByteOrder};

use crate::core::errors::DbError;
use crate::core::relation::{Handle, HANDLE_LEN};
use crate::index::hash::MAX_BITS;
use crate::storage::block::Block;
use crate::storage::page::SlottedPage;

const HASH_LEN: usize = 2;

/// One bucket of the extendible hash index: a slotted page whose
/// record 1 is the header `hash_prefix | bits_used | 0` (three 2-byte
/// BE fields) and whose remaining records each hold one full hash
/// followed by the handles sharing it.
///
/// All live hashes in a bucket agree on their `bits_used` high bits,
/// which equal `hash_prefix`. `bits_used > MAX_BITS` marks a fully
/// overflowed bucket whose handles live in a per-bucket overflow file.
#[derive(Debug)]
pub(crate) struct Bucket {
    pub block: Block,
    pub hash_prefix: u16,
    pub bits_used: u16,
}

const HEADER_RECORD: u16 = 1;

impl Bucket {
    /// Format a fresh block as an empty bucket.
    pub fn format(mut block: Block, hash_prefix: u16, bits_used: u16) -> Result<Self, DbError> {
        let mut page = SlottedPage::init(&mut block)?;
        page.add(&marshal_header(hash_prefix, bits_used))?;
        drop(page);
        Ok(Self {
            block,
            hash_prefix,
            bits_used,
        })
    }

    /// Wrap an existing bucket block.
    pub fn load(mut block: Block) -> Result<Self, DbError> {
        let block_id = block.id();
        let page = SlottedPage::open(&mut block)?;
        let header = page
            .get(HEADER_RECORD)
            .ok_or_else(|| DbError::Corrupt(format!("bucket {block_id} has no header")))?;
        if header.len() < 3 * HASH_LEN {
            return Err(DbError::Corrupt(format!(
                "bucket {block_id} header is {} bytes",
                header.len()
            )));
        }
        let hash_prefix = BigEndian::read_u16(&header[0..2]);
        let bits_used = BigEndian::read_u16(&header[2..4]);
        drop(page);
        Ok(Self {
            block,
            hash_prefix,
            bits_used,
        })
    }

    pub fn id(&self) -> u32 {
        self.block.id()
    }

    pub fn is_overflow(&self) -> bool {
        self.bits_used > MAX_BITS
    }

    pub fn set_prefix(&mut self, hash_prefix: u16, bits_used: u16) -> Result<(), DbError> {
        self.hash_prefix = hash_prefix;
        self.bits_used = bits_used;
        let header = marshal_header(hash_prefix, bits_used);
        let mut page = SlottedPage::open(&mut self.block)?;
        page.put(HEADER_RECORD, &header)?;
        Ok(())
    }

    /// Mark the bucket as fully overflowed.
    pub fn set_overflow(&mut self) -> Result<(), DbError> {
        let prefix = self.hash_prefix;
        self.set_prefix(prefix, MAX_BITS + 1)
    }

    /// Handles recorded in-page for the given full hash.
    pub fn lookup(&mut self, h: u16) -> Result<Vec<Handle>, DbError> {
        match self.find(h)? {
            Some((_, handles)) => Ok(handles),
            None => Ok(vec![]),
        }
    }

    /// Record a handle under its full hash. `DuplicateKey` when the
    /// index is unique and the hash already has handles; `NoRoom` when
    /// the page cannot grow, which triggers a split upstream.
    pub fn add(&mut self, h: u16, handle: Handle, unique: bool) -> Result<(), DbError> {
        match self.find(h)? {
            None => {
                let data = marshal_record(h, &[handle]);
                let mut page = SlottedPage::open(&mut self.block)?;
                page.add(&data)?;
                Ok(())
            }
            Some((record_id, mut handles)) => {
                if unique {
                    return Err(DbError::DuplicateKey(format!("hash {h:#06x}")));
                }
                handles.push(handle);
                let data = marshal_record(h, &handles);
                let mut page = SlottedPage::open(&mut self.block)?;
                page.put(record_id, &data)?;
                Ok(())
            }
        }
    }

    /// Install a whole handle list for a hash, used when records move
    /// between buckets during a split.
    pub fn add_list(&mut self, h: u16, handles: &[Handle]) -> Result<(), DbError> {
        let data = marshal_record(h, handles);
        let mut page = SlottedPage::open(&mut self.block)?;
        page.add(&data)?;
        Ok(())
    }

    /// Remove one handle from its hash's list; an emptied list drops
    /// the record. Returns whether the handle was present.
    pub fn remove(&mut self, h: u16, handle: Handle) -> Result<bool, DbError> {
        let Some((record_id, mut handles)) = self.find(h)? else {
            return Ok(false);
        };
        let Some(pos) = handles.iter().position(|&existing| existing == handle) else {
            return Ok(false);
        };
        handles.remove(pos);
        let mut page = SlottedPage::open(&mut self.block)?;
        if handles.is_empty() {
            page.delete(record_id);
        } else {
            page.put(record_id, &marshal_record(h, &handles))?;
        }
        Ok(true)
    }

    /// Drop all handles for a hash.
    pub fn delete_hash(&mut self, h: u16) -> Result<(), DbError> {
        if let Some((record_id, _)) = self.find(h)? {
            let mut page = SlottedPage::open(&mut self.block)?;
            page.delete(record_id);
        }
        Ok(())
    }

    /// Shrink a hash's record to the bare hash, leaving it as the
    /// single overflow entry.
    pub fn clear_handles(&mut self, h: u16) -> Result<(), DbError> {
        if let Some((record_id, _)) = self.find(h)? {
            let mut page = SlottedPage::open(&mut self.block)?;
            page.put(record_id, &marshal_record(h, &[]))?;
        }
        Ok(())
    }

    /// All `(hash, handles)` records in the bucket.
    pub fn records(&mut self) -> Result<Vec<(u16, Vec<Handle>)>, DbError> {
        let page = SlottedPage::open(&mut self.block)?;
        let mut records = Vec::new();
        for record_id in page.ids().filter(|&id| id > HEADER_RECORD).collect::<Vec<_>>() {
            let data = page.get(record_id).ok_or_else(|| {
                DbError::Corrupt(format!("missing bucket record {record_id}"))
            })?;
            records.push(unmarshal_record(data)?);
        }
        Ok(records)
    }

    fn find(&mut self, h: u16) -> Result<Option<(u16, Vec<Handle>)>, DbError> {
        let page = SlottedPage::open(&mut self.block)?;
        for record_id in page.ids().filter(|&id| id > HEADER_RECORD).collect::<Vec<_>>() {
            let data = page.get(record_id).ok_or_else(|| {
                DbError::Corrupt(format!("missing bucket record {record_id}"))
            })?;
            if data.len() >= HASH_LEN && BigEndian::read_u16(&data[0..2]) == h {
                return Ok(Some((record_id, unmarshal_record(data)?.1)));
            }
        }
        Ok(None)
    }
}

fn marshal_header(hash_prefix: u16, bits_used: u16) -> [u8; 6] {
    let mut buf = [0u8; 6];
    BigEndian::write_u16(&mut buf[0..2], hash_prefix);
    BigEndian::write_u16(&mut buf[2..4], bits_used);
    buf
}

fn marshal_record(h: u16, handles: &[Handle]) -> Vec<u8> {
    let mut data = Vec::with_capacity(HASH_LEN + handles.len() * HANDLE_LEN);
    let mut hash_bytes = [0u8; HASH_LEN];
    BigEndian::write_u16(&mut hash_bytes, h);
    data.extend_from_slice(&hash_bytes);
    for handle in handles {
        data.extend_from_slice(&handle.to_bytes());
    }
    data
}

fn unmarshal_record(data: &[u8]) -> Result<(u16, Vec<Handle>), DbError> {
    if data.len() < HASH_LEN || (data.len() - HASH_LEN) % HANDLE_LEN != 0 {
        return Err(DbError::Corrupt(format!(
            "bucket record of {} bytes is misframed",
            data.len()
        )));
    }
    let h = BigEndian::read_u16(&data[0..2]);
    let handles = data[HASH_LEN..]
        .chunks(HANDLE_LEN)
        .map(Handle::from_bytes)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((h, handles))
}
