use byteorder::{BigEndian, ByteOrder};

use crate::core::errors::PageError;
use crate::storage::block::Block;

/// Records of varying length inside one block, slotted-page style.
///
/// Record ids are handed out sequentially starting at 1 and are never
/// reused. Each record has a 4-byte header at a fixed offset from the
/// start of the block:
///
/// ```text
/// [0..2]     number of records N
/// [2..4]     offset of the last free byte E
/// [4k..4k+2] size of record k
/// [4k+2..4k+4] offset of record k (0 marks a tombstone)
/// [E+1..)    record data, packed from the block tail inward
/// ```
///
/// Record 0's "header" aliases the block header itself.
#[derive(Debug)]
pub struct SlottedPage<'a> {
    block: &'a mut Block,
    num_records: u16,
    end_free: u16,
}

impl<'a> SlottedPage<'a> {
    /// Format `block` as an empty slotted page.
    pub fn init(block: &'a mut Block) -> Result<Self, PageError> {
        check_block_size(block)?;
        let end_free = (block.size() - 1) as u16;
        let mut page = Self {
            block,
            num_records: 0,
            end_free,
        };
        page.put_block_header();
        Ok(page)
    }

    /// Interpret an existing block as a slotted page.
    pub fn open(block: &'a mut Block) -> Result<Self, PageError> {
        check_block_size(block)?;
        let num_records = BigEndian::read_u16(&block.bytes()[0..2]);
        let end_free = BigEndian::read_u16(&block.bytes()[2..4]);
        if end_free as usize >= block.size() {
            return Err(PageError::Corrupt(format!(
                "end of free space {end_free} outside block of {} bytes",
                block.size()
            )));
        }
        if 4 * (num_records as usize + 1) > end_free as usize + 1 {
            return Err(PageError::Corrupt(format!(
                "header region for {num_records} records overlaps data"
            )));
        }
        Ok(Self {
            block,
            num_records,
            end_free,
        })
    }

    /// Bytes left between the header region and the packed records.
    pub fn free_space(&self) -> usize {
        let free = self.end_free as isize - 4 * self.num_records as isize - 3;
        free.max(0) as usize
    }

    /// Add a new record. Returns its id, or `Full` when the data plus
    /// its 4-byte header exceed the free space.
    pub fn add(&mut self, data: &[u8]) -> Result<u16, PageError> {
        if data.len() + 4 > self.free_space() {
            return Err(PageError::Full);
        }
        self.num_records += 1;
        let record_id = self.num_records;
        let size = data.len() as u16;
        self.end_free -= size;
        let loc = self.end_free + 1;
        self.put_block_header();
        self.put_header(record_id, size, loc);
        self.block.bytes_mut()[loc as usize..loc as usize + data.len()].copy_from_slice(data);
        Ok(record_id)
    }

    /// Read a record. `None` for tombstones and unknown ids.
    pub fn get(&self, record_id: u16) -> Option<&[u8]> {
        if record_id == 0 || record_id > self.num_records {
            return None;
        }
        let (size, loc) = self.header(record_id);
        if loc == 0 {
            return None;
        }
        self.block
            .bytes()
            .get(loc as usize..loc as usize + size as usize)
    }

    /// Tombstone a record and compact the data region. Record ids of
    /// the surviving records do not change. Deleting a tombstone is a
    /// no-op.
    pub fn delete(&mut self, record_id: u16) {
        if self.get(record_id).is_none() {
            return;
        }
        let (size, loc) = self.header(record_id);
        self.put_header(record_id, 0, 0);
        self.slide(loc as usize, loc as usize + size as usize);
    }

    /// Replace a record's data in place, sliding neighbours as needed.
    /// `Full` when grown data does not fit.
    pub fn put(&mut self, record_id: u16, data: &[u8]) -> Result<(), PageError> {
        if record_id == 0 || record_id > self.num_records {
            return Err(PageError::Corrupt(format!("no record {record_id}")));
        }
        let (size, loc) = self.header(record_id);
        if loc == 0 {
            return Err(PageError::Corrupt(format!("record {record_id} is deleted")));
        }
        let new_size = data.len();
        let old_size = size as usize;
        if new_size > old_size {
            let extra = new_size - old_size;
            if extra > self.free_space() {
                return Err(PageError::Full);
            }
            self.slide(loc as usize, loc as usize - extra);
        } else {
            let start = loc as usize;
            self.block.bytes_mut()[start..start + new_size].copy_from_slice(data);
            self.slide(start + new_size, start + old_size);
        }
        let (_, new_loc) = self.header(record_id);
        let start = new_loc as usize;
        self.block.bytes_mut()[start..start + new_size].copy_from_slice(data);
        self.put_header(record_id, new_size as u16, new_loc);
        Ok(())
    }

    /// Ids of all live records, in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        (1..=self.num_records).filter(|&id| self.header(id).1 != 0)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.ids().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.num_records = 0;
        self.end_free = (self.block.size() - 1) as u16;
        self.put_block_header();
    }

    fn header(&self, record_id: u16) -> (u16, u16) {
        let base = 4 * record_id as usize;
        let bytes = self.block.bytes();
        (
            BigEndian::read_u16(&bytes[base..base + 2]),
            BigEndian::read_u16(&bytes[base + 2..base + 4]),
        )
    }

    fn put_header(&mut self, record_id: u16, size: u16, loc: u16) {
        let base = 4 * record_id as usize;
        let bytes = self.block.bytes_mut();
        BigEndian::write_u16(&mut bytes[base..base + 2], size);
        BigEndian::write_u16(&mut bytes[base + 2..base + 4], loc);
    }

    fn put_block_header(&mut self) {
        let (num_records, end_free) = (self.num_records, self.end_free);
        self.put_header(0, num_records, end_free);
    }

    /// Remove the data in `[start, end)` by sliding everything left of
    /// `start` to the right (`start < end`), or open up `start - end`
    /// extra bytes by sliding it to the left (`start > end`). Fixes
    /// every live header whose data has slid.
    fn slide(&mut self, start: usize, end: usize) {
        if start == end {
            return;
        }
        let shift = end as isize - start as isize;

        let data_start = self.end_free as usize + 1;
        let dest = (data_start as isize + shift) as usize;
        self.block.bytes_mut().copy_within(data_start..start, dest);

        let live: Vec<u16> = self.ids().collect();
        for record_id in live {
            let (size, loc) = self.header(record_id);
            if loc as usize <= start {
                self.put_header(record_id, size, (loc as isize + shift) as u16);
            }
        }
        self.end_free = (self.end_free as isize + shift) as u16;
        self.put_block_header();
    }
}

fn check_block_size(block: &Block) -> Result<(), PageError> {
    if block.size() < 8 || block.size() > u16::MAX as usize {
        return Err(PageError::Corrupt(format!(
            "unusable block size {}",
            block.size()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basics() {
        let mut block = Block::new(0, 32);
        let mut page = SlottedPage::init(&mut block).unwrap();

        // additions
        let id1 = page.add(b"Hello").unwrap();
        let id2 = page.add(b"Wow!").unwrap();
        assert_eq!(page.get(id1), Some(&b"Hello"[..]));
        assert_eq!(page.get(id2), Some(&b"Wow!"[..]));

        // replacement
        page.put(id1, b"Goodbye").unwrap();
        assert_eq!(page.get(id2), Some(&b"Wow!"[..]));
        assert_eq!(page.get(id1), Some(&b"Goodbye"[..]));
        page.put(id1, b"Tiny").unwrap();
        assert_eq!(page.get(id2), Some(&b"Wow!"[..]));
        assert_eq!(page.get(id1), Some(&b"Tiny"[..]));

        // iteration
        assert_eq!(page.ids().collect::<Vec<_>>(), vec![1, 2]);

        // deletion keeps ids stable and never reuses them
        page.delete(id1);
        assert_eq!(page.get(id1), None);
        assert_eq!(page.ids().collect::<Vec<_>>(), vec![2]);
        let id3 = page.add(b"George").unwrap();
        assert_eq!(id3, 3);
        let live: Vec<&[u8]> = page.ids().map(|i| page.get(i).unwrap()).collect();
        assert_eq!(live, vec![&b"Wow!"[..], &b"George"[..]]);

        // the exact block image, leftover bytes included
        assert_eq!(
            block.bytes(),
            b"\x00\x03\x00\x15\x00\x00\x00\x00\x00\x04\x00\x1c\x00\x06\x00\x16\x00\x00\x00\x00\x00WGeorgeWow!"
        );
    }

    #[test]
    fn grow_in_the_middle_slides_neighbours() {
        let mut block = Block::new(0, 100);
        let mut page = SlottedPage::init(&mut block).unwrap();
        page.add(b"as;lkdjfa;sldfjk").unwrap();
        let id3 = page.add(b"stuff after").unwrap();
        let id4 = page.add(b"foo").unwrap();
        let id5 = page.add(b"more stuff around it").unwrap();
        page.put(id4, b"something bigger").unwrap();
        assert_eq!(page.get(id3), Some(&b"stuff after"[..]));
        assert_eq!(page.get(id4), Some(&b"something bigger"[..]));
        assert_eq!(page.get(id5), Some(&b"more stuff around it"[..]));
    }

    #[test]
    fn fills_to_capacity_then_full() {
        let mut block = Block::new(0, 32);
        let mut page = SlottedPage::init(&mut block).unwrap();
        // 24 data bytes + 4 header bytes consume the whole free gap
        let id = page.add(&[0xAB; 24]).unwrap();
        assert_eq!(page.free_space(), 0);
        assert_eq!(page.add(b""), Err(PageError::Full));
        assert_eq!(page.get(id), Some(&[0xAB; 24][..]));
    }

    #[test]
    fn put_that_does_not_fit_is_full() {
        let mut block = Block::new(0, 32);
        let mut page = SlottedPage::init(&mut block).unwrap();
        let id = page.add(b"abcdefgh").unwrap();
        assert_eq!(page.put(id, &[0x11; 30]), Err(PageError::Full));
        // the record is untouched after a failed grow
        assert_eq!(page.get(id), Some(&b"abcdefgh"[..]));
    }

    #[test]
    fn clear_resets_the_page() {
        let mut block = Block::new(0, 64);
        let mut page = SlottedPage::init(&mut block).unwrap();
        page.add(b"one").unwrap();
        page.add(b"two").unwrap();
        page.clear();
        assert_eq!(page.len(), 0);
        assert_eq!(page.add(b"fresh").unwrap(), 1);
    }

    #[test]
    fn reopen_sees_same_records() {
        let mut block = Block::new(0, 64);
        {
            let mut page = SlottedPage::init(&mut block).unwrap();
            page.add(b"persist").unwrap();
            page.add(b"me").unwrap();
            page.delete(1);
        }
        let page = SlottedPage::open(&mut block).unwrap();
        assert_eq!(page.ids().collect::<Vec<_>>(), vec![2]);
        assert_eq!(page.get(2), Some(&b"me"[..]));
    }
}
