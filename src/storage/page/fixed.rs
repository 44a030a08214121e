use std::collections::HashSet;

use byteorder::{BigEndian, ByteOrder};

use crate::core::errors::PageError;
use crate::storage::block::Block;

/// Uniformly sized records inside one block.
///
/// Bytes `[0..2]` hold the head of an intrusive free list; an empty
/// slot stores the next free slot id in its first 2 bytes, with
/// `max_records` as the list terminator. Record ids are 0-based slot
/// numbers. Unlike `SlottedPage`, ids are reused after deletion.
#[derive(Debug)]
pub struct FixedPage<'a> {
    block: &'a mut Block,
    record_len: usize,
    max_records: u16,
    free_list: HashSet<u16>,
}

impl<'a> FixedPage<'a> {
    /// Format `block` for records of `record_len` bytes, every slot on
    /// the free list.
    pub fn init(block: &'a mut Block, record_len: usize) -> Result<Self, PageError> {
        let max_records = check_record_len(block, record_len)?;
        let mut page = Self {
            block,
            record_len,
            max_records,
            free_list: (0..max_records).collect(),
        };
        page.set_head(0);
        for id in 0..max_records {
            page.set_next(id, id + 1);
        }
        Ok(page)
    }

    /// Interpret an existing block, rebuilding the free list by walking
    /// the chain from the head.
    pub fn open(block: &'a mut Block, record_len: usize) -> Result<Self, PageError> {
        let max_records = check_record_len(block, record_len)?;
        let mut page = Self {
            block,
            record_len,
            max_records,
            free_list: HashSet::new(),
        };
        let mut id = page.head();
        while id < max_records {
            if !page.free_list.insert(id) {
                return Err(PageError::Corrupt(format!("free list cycles at slot {id}")));
            }
            id = page.next(id);
        }
        Ok(page)
    }

    /// Take the first free slot. `Full` when the list is exhausted.
    pub fn add(&mut self, data: &[u8]) -> Result<u16, PageError> {
        let id = self.head();
        if id >= self.max_records {
            return Err(PageError::Full);
        }
        self.check_data_len(data)?;
        let next = self.next(id);
        self.write_record(id, data);
        self.set_head(next);
        self.free_list.remove(&id);
        Ok(id)
    }

    /// Read a record. `None` if the slot is free or out of range.
    pub fn get(&self, id: u16) -> Option<&[u8]> {
        if id >= self.max_records || self.free_list.contains(&id) {
            return None;
        }
        let start = self.offset(id);
        Some(&self.block.bytes()[start..start + self.record_len])
    }

    /// Push the slot onto the free list. No-op for free slots.
    pub fn delete(&mut self, id: u16) {
        if id >= self.max_records || self.free_list.contains(&id) {
            return;
        }
        let head = self.head();
        self.set_next(id, head);
        self.set_head(id);
        self.free_list.insert(id);
    }

    /// Overwrite a live record in place.
    pub fn put(&mut self, id: u16, data: &[u8]) -> Result<(), PageError> {
        if id >= self.max_records || self.free_list.contains(&id) {
            return Err(PageError::Corrupt(format!("no record in slot {id}")));
        }
        self.check_data_len(data)?;
        self.write_record(id, data);
        Ok(())
    }

    /// Occupied slots, in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.max_records).filter(|id| !self.free_list.contains(id))
    }

    pub fn len(&self) -> usize {
        self.max_records as usize - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn offset(&self, id: u16) -> usize {
        id as usize * self.record_len + 2
    }

    fn head(&self) -> u16 {
        BigEndian::read_u16(&self.block.bytes()[0..2])
    }

    fn set_head(&mut self, head: u16) {
        BigEndian::write_u16(&mut self.block.bytes_mut()[0..2], head);
    }

    fn next(&self, id: u16) -> u16 {
        let start = self.offset(id);
        BigEndian::read_u16(&self.block.bytes()[start..start + 2])
    }

    fn set_next(&mut self, id: u16, next: u16) {
        let start = self.offset(id);
        BigEndian::write_u16(&mut self.block.bytes_mut()[start..start + 2], next);
    }

    fn write_record(&mut self, id: u16, data: &[u8]) {
        let start = self.offset(id);
        self.block.bytes_mut()[start..start + data.len()].copy_from_slice(data);
    }

    fn check_data_len(&self, data: &[u8]) -> Result<(), PageError> {
        if data.len() != self.record_len {
            return Err(PageError::Corrupt(format!(
                "record of {} bytes in a page of {}-byte slots",
                data.len(),
                self.record_len
            )));
        }
        Ok(())
    }
}

fn check_record_len(block: &Block, record_len: usize) -> Result<u16, PageError> {
    if record_len < 2 {
        return Err(PageError::Corrupt(format!(
            "record length {record_len} cannot hold a free-list pointer"
        )));
    }
    if block.size() < 2 + record_len {
        return Err(PageError::Corrupt(format!(
            "record length {record_len} larger than block of {} bytes",
            block.size()
        )));
    }
    Ok(((block.size() - 2) / record_len) as u16)
}
