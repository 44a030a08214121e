use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use crate::core::errors::DbError;
use crate::index::key::{KeyProfile, KeyTuple};
use crate::storage::block::BlockFile;
use crate::storage::page::SlottedPage;

/// Block id of the statistics block every tree file starts with.
pub(crate) const STAT_BLOCK: u32 = 1;

const ROOT_RECORD: u16 = 1;
const HEIGHT_RECORD: u16 = 2;

fn block_id_bytes(id: u32) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, id);
    buf
}

fn read_block_id(data: &[u8]) -> Result<u32, DbError> {
    if data.len() < 4 {
        return Err(DbError::Corrupt(format!(
            "block id needs 4 bytes, got {}",
            data.len()
        )));
    }
    Ok(BigEndian::read_u32(&data[0..4]))
}

/// Global facts about the tree, stored in records 1 and 2 of the stat
/// block: the root's block id and the tree height (1 = leaf-only).
#[derive(Debug)]
pub(crate) struct StatNode {
    pub root_id: u32,
    pub height: u32,
}

impl StatNode {
    pub fn create(file: &mut BlockFile, root_id: u32) -> Result<Self, DbError> {
        let mut block = file.get(STAT_BLOCK)?;
        let mut page = SlottedPage::init(&mut block)?;
        page.add(&block_id_bytes(root_id))?;
        page.add(&block_id_bytes(1))?;
        drop(page);
        file.put(&block)?;
        Ok(Self { root_id, height: 1 })
    }

    pub fn load(file: &mut BlockFile) -> Result<Self, DbError> {
        let mut block = file.get(STAT_BLOCK)?;
        let page = SlottedPage::open(&mut block)?;
        let root_id = read_block_id(
            page.get(ROOT_RECORD)
                .ok_or_else(|| DbError::Corrupt("stat block has no root record".into()))?,
        )?;
        let height = read_block_id(
            page.get(HEIGHT_RECORD)
                .ok_or_else(|| DbError::Corrupt("stat block has no height record".into()))?,
        )?;
        Ok(Self { root_id, height })
    }

    pub fn save(&self, file: &mut BlockFile) -> Result<(), DbError> {
        let mut block = file.get(STAT_BLOCK)?;
        let mut page = SlottedPage::open(&mut block)?;
        page.put(ROOT_RECORD, &block_id_bytes(self.root_id))?;
        page.put(HEIGHT_RECORD, &block_id_bytes(self.height))?;
        drop(page);
        file.put(&block)
    }
}

/// Interior node. Record layout inside its block:
/// `first_child | key_1 | child_1 | key_2 | child_2 | ...`.
///
/// Subtree `first` holds keys below `boundaries[0]`; subtree
/// `pointers[i]` holds keys in `[boundaries[i], boundaries[i+1])`.
#[derive(Debug)]
pub(crate) struct InteriorNode {
    pub id: u32,
    pub first: u32,
    pub boundaries: Vec<KeyTuple>,
    pub pointers: Vec<u32>,
}

impl InteriorNode {
    /// Allocate a fresh, empty interior node. Nothing is written until
    /// `save`.
    pub fn create(file: &mut BlockFile) -> Result<Self, DbError> {
        let block = file.get_new()?;
        Ok(Self {
            id: block.id(),
            first: 0,
            boundaries: Vec::new(),
            pointers: Vec::new(),
        })
    }

    pub fn load(file: &mut BlockFile, block_id: u32, profile: &KeyProfile) -> Result<Self, DbError> {
        let mut block = file.get(block_id)?;
        let page = SlottedPage::open(&mut block)?;
        let ids: Vec<u16> = page.ids().collect();
        if ids.is_empty() {
            return Err(DbError::Corrupt(format!("interior node {block_id} is empty")));
        }
        let record = |id: u16| {
            page.get(id)
                .ok_or_else(|| DbError::Corrupt(format!("missing record {id} in node {block_id}")))
        };
        let first = read_block_id(record(ids[0])?)?;
        let mut boundaries = Vec::new();
        let mut pointers = Vec::new();
        for pair in ids[1..].chunks(2) {
            let [key_id, pointer_id] = pair else {
                return Err(DbError::Corrupt(format!(
                    "interior node {block_id} has a dangling key record"
                )));
            };
            boundaries.push(profile.unmarshal(record(*key_id)?)?);
            pointers.push(read_block_id(record(*pointer_id)?)?);
        }
        Ok(Self {
            id: block_id,
            first,
            boundaries,
            pointers,
        })
    }

    /// The child block to descend into for `key`. On a boundary tie
    /// the right-hand child wins.
    pub fn find(&self, key: &KeyTuple) -> u32 {
        let mut down = *self.pointers.last().unwrap_or(&self.first);
        for (i, boundary) in self.boundaries.iter().enumerate() {
            if boundary > key {
                down = if i > 0 { self.pointers[i - 1] } else { self.first };
                break;
            }
        }
        down
    }

    /// Insert a separator and its right-hand child, keeping boundaries
    /// strictly increasing.
    pub fn insert(&mut self, boundary: KeyTuple, block_id: u32) -> Result<(), DbError> {
        let mut position = self.boundaries.len();
        for (i, check) in self.boundaries.iter().enumerate() {
            if boundary == *check {
                return Err(DbError::Corrupt(format!(
                    "boundary already present in interior node {}",
                    self.id
                )));
            }
            if boundary < *check {
                position = i;
                break;
            }
        }
        self.boundaries.insert(position, boundary);
        self.pointers.insert(position, block_id);
        Ok(())
    }

    /// Would the node still fit its block with one more separator?
    pub fn would_fit(
        &self,
        boundary: &KeyTuple,
        profile: &KeyProfile,
        block_size: usize,
    ) -> Result<bool, DbError> {
        let mut data_total = 4;
        let mut records = 1usize;
        for key in self.boundaries.iter().chain(std::iter::once(boundary)) {
            data_total += profile.marshal(key)?.len() + 4;
            records += 2;
        }
        Ok(data_total + 4 * (records + 1) <= block_size)
    }

    pub fn save(&self, file: &mut BlockFile, profile: &KeyProfile) -> Result<(), DbError> {
        let mut block = file.get(self.id)?;
        let mut page = SlottedPage::init(&mut block)?;
        page.add(&block_id_bytes(self.first))?;
        for (boundary, pointer) in self.boundaries.iter().zip(&self.pointers) {
            page.add(&profile.marshal(boundary)?)?;
            page.add(&block_id_bytes(*pointer))?;
        }
        drop(page);
        file.put(&block)
    }
}

/// Leaf node. Record layout inside its block:
/// `value_1 | key_1 | value_2 | key_2 | ... | next_leaf`.
///
/// Values are opaque bytes; the owning tree decides whether they are
/// row handles or marshalled tuples. Keys are kept sorted on save and
/// leaves are singly linked through `next_leaf` (0 terminates).
#[derive(Debug)]
pub(crate) struct LeafNode {
    pub id: u32,
    pub next_leaf: u32,
    pub entries: BTreeMap<KeyTuple, Vec<u8>>,
}

impl LeafNode {
    pub fn create(file: &mut BlockFile) -> Result<Self, DbError> {
        let block = file.get_new()?;
        Ok(Self {
            id: block.id(),
            next_leaf: 0,
            entries: BTreeMap::new(),
        })
    }

    pub fn load(file: &mut BlockFile, block_id: u32, profile: &KeyProfile) -> Result<Self, DbError> {
        let mut block = file.get(block_id)?;
        let page = SlottedPage::open(&mut block)?;
        let ids: Vec<u16> = page.ids().collect();
        let record = |id: u16| {
            page.get(id)
                .ok_or_else(|| DbError::Corrupt(format!("missing record {id} in leaf {block_id}")))
        };
        let mut entries = BTreeMap::new();
        let mut next_leaf = 0;
        if let Some((last, pairs)) = ids.split_last() {
            next_leaf = read_block_id(record(*last)?)?;
            for pair in pairs.chunks(2) {
                let [value_id, key_id] = pair else {
                    return Err(DbError::Corrupt(format!(
                        "leaf {block_id} has a dangling value record"
                    )));
                };
                let value = record(*value_id)?.to_vec();
                let key = profile.unmarshal(record(*key_id)?)?;
                entries.insert(key, value);
            }
        }
        Ok(Self {
            id: block_id,
            next_leaf,
            entries,
        })
    }

    /// Would the leaf still fit its block with one more entry?
    pub fn would_fit(
        &self,
        key: &KeyTuple,
        value_len: usize,
        profile: &KeyProfile,
        block_size: usize,
    ) -> Result<bool, DbError> {
        let mut data_total = 4 + value_len + profile.marshal(key)?.len();
        let mut records = 3usize;
        for (existing, value) in &self.entries {
            data_total += value.len() + profile.marshal(existing)?.len();
            records += 2;
        }
        Ok(data_total + 4 * (records + 1) <= block_size)
    }

    pub fn save(&self, file: &mut BlockFile, profile: &KeyProfile) -> Result<(), DbError> {
        let mut block = file.get(self.id)?;
        let mut page = SlottedPage::init(&mut block)?;
        for (key, value) in &self.entries {
            page.add(value)?;
            page.add(&profile.marshal(key)?)?;
        }
        page.add(&block_id_bytes(self.next_leaf))?;
        drop(page);
        file.put(&block)
    }
}
