mod bucket;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;
use xxhash_rust::xxh64::xxh64;

use crate::core::errors::{DbError, PageError};
use crate::core::relation::{Handle, Relation, HANDLE_LEN};
use crate::core::schema::TableSchema;
use crate::core::value::{Row, Value};
use crate::index::hash::bucket::Bucket;
use crate::storage::block::{BlockFile, DEFAULT_BLOCK_SIZE};
use crate::storage::fixed_table::FixedTable;
use crate::storage::page::FixedPage;

/// Number of hash bits the index distinguishes. A fully split bucket
/// address table has `2^MAX_BITS` entries, which must fit in memory.
pub const MAX_BITS: u16 = 16;

const MAX_BIT_MASK: u64 = (1 << MAX_BITS) - 1;

/// Extendible hash index over a heap relation. Does not support
/// `range`.
///
/// Three file families share the prefix `<table>-<index>-`:
/// - `...buckets.db`, slotted bucket pages;
/// - `...entries.db`, the bucket address table as unsigned 4-byte
///   `bucket_id` records in a fixed table;
/// - `...<hash_prefix>.db`, one fixed-record overflow file of handles
///   per fully overflowed bucket.
///
/// The index stores no key values; lookups re-project the relation row
/// to filter out hash collisions.
#[derive(Debug)]
pub struct HashIndex {
    name: String,
    key_columns: Vec<String>,
    unique: bool,
    schema: TableSchema,
    dir: PathBuf,
    file_prefix: String,
    buckets: BlockFile,
    entries: FixedTable,
    overflow_cache: HashMap<u16, OverflowFile>,
    bucket_address_table: Vec<u32>,
    bucket_table_bits: u16,
    opened: bool,
}

impl HashIndex {
    pub fn new(
        dir: &Path,
        table_name: &str,
        schema: &TableSchema,
        name: &str,
        key_columns: Vec<String>,
        unique: bool,
    ) -> Result<Self, DbError> {
        for column in &key_columns {
            schema.column(column)?;
        }
        let file_prefix = format!("{table_name}-{name}-");
        let entries = FixedTable::new(
            dir,
            &format!("{file_prefix}entries"),
            vec!["bucket_id".to_string()],
            false,
        )?;
        Ok(Self {
            name: name.to_string(),
            key_columns,
            unique,
            schema: schema.clone(),
            dir: dir.to_path_buf(),
            file_prefix: file_prefix.clone(),
            buckets: BlockFile::new(dir, &format!("{file_prefix}buckets"), DEFAULT_BLOCK_SIZE),
            entries,
            overflow_cache: HashMap::new(),
            bucket_address_table: Vec::new(),
            bucket_table_bits: 0,
            opened: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// log2 of the bucket address table size. Grows when a split
    /// outruns the table, observably to tests.
    pub fn bucket_table_bits(&self) -> u16 {
        self.bucket_table_bits
    }

    /// Create the index files and fill the index from the relation's
    /// current rows, coalescing the bucket writes.
    pub fn create<R>(&mut self, relation: &mut R) -> Result<(), DbError>
    where
        R: Relation<Handle = Handle>,
    {
        self.buckets.create()?;
        let first = Bucket::format(self.buckets.get(1)?, 0, 0)?;
        self.buckets.put(&first.block)?;

        self.entries.create()?;
        self.entries.insert(&bucket_row(first.id())?)?;
        self.bucket_address_table = vec![first.id()];
        self.bucket_table_bits = 0;
        self.opened = true;

        debug!("building hash index {} from relation", self.name);
        self.buckets.begin_write();
        let result: Result<(), DbError> = (|| {
            for handle in relation.select(None, None)? {
                self.insert(relation, handle)?;
            }
            Ok(())
        })();
        self.buckets.end_write()?;
        result
    }

    pub fn open(&mut self) -> Result<(), DbError> {
        if self.opened {
            return Ok(());
        }
        self.buckets.open()?;
        self.entries.open()?;
        self.read_bucket_address_table()?;
        self.opened = true;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), DbError> {
        self.buckets.close()?;
        self.entries.close()?;
        for (_, mut overflow) in self.overflow_cache.drain() {
            overflow.close()?;
        }
        self.opened = false;
        Ok(())
    }

    pub fn drop_index(&mut self) -> Result<(), DbError> {
        self.open()?;
        let block_ids: Vec<u32> = self.buckets.block_ids()?.collect();
        let mut overflow_prefixes = Vec::new();
        for block_id in block_ids {
            let bucket = Bucket::load(self.buckets.get(block_id)?)?;
            if bucket.is_overflow() {
                overflow_prefixes.push(bucket.hash_prefix);
            }
        }
        for prefix in overflow_prefixes {
            let mut overflow = match self.overflow_cache.remove(&prefix) {
                Some(overflow) => overflow,
                None => OverflowFile::new(&self.dir, &format!("{}{}", self.file_prefix, prefix)),
            };
            overflow.drop_file()?;
        }
        self.buckets.delete()?;
        self.entries.drop_table()?;
        self.bucket_address_table.clear();
        self.opened = false;
        Ok(())
    }

    /// Handles of rows whose key columns equal `key`. Hash collisions
    /// are filtered out by comparing the projected rows.
    pub fn lookup<R>(&mut self, relation: &mut R, key: &Row) -> Result<Vec<Handle>, DbError>
    where
        R: Relation<Handle = Handle>,
    {
        self.open()?;
        let h = self.hash(key)?;
        let mut bucket = self.get_bucket(h)?;
        let mut handles = bucket.lookup(h)?;
        if bucket.is_overflow() && h == bucket.hash_prefix {
            handles.extend(self.overflow(bucket.hash_prefix)?.handles()?);
        }

        let mut matching = Vec::new();
        for handle in handles {
            let row = relation.project(&handle, Some(&self.key_columns))?;
            let equal = self
                .key_columns
                .iter()
                .all(|column| row.get(column) == key.get(column));
            if equal {
                matching.push(handle);
            }
        }
        Ok(matching)
    }

    /// `range` is not an operation hash indexes can serve.
    pub fn range(&mut self, _min: Option<&Row>, _max: Option<&Row>) -> Result<Vec<Handle>, DbError> {
        Err(DbError::Unsupported("range on hash index".into()))
    }

    /// Index a row that already exists in the relation. A full bucket
    /// splits (possibly repeatedly) until the handle finds a home or
    /// the bucket converts to overflow.
    pub fn insert<R>(&mut self, relation: &mut R, handle: Handle) -> Result<(), DbError>
    where
        R: Relation<Handle = Handle>,
    {
        self.open()?;
        let key = relation.project(&handle, Some(&self.key_columns))?;
        let h = self.hash(&key)?;
        loop {
            let mut bucket = self.get_bucket(h)?;
            if bucket.is_overflow() {
                self.overflow(bucket.hash_prefix)?.insert(handle)?;
                return Ok(());
            }
            match bucket.add(h, handle, self.unique) {
                Ok(()) => {
                    self.buckets.put(&bucket.block)?;
                    return Ok(());
                }
                Err(DbError::NoRoom) => self.split(bucket)?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Unindex a row. The row must still exist in the relation.
    pub fn delete<R>(&mut self, relation: &mut R, handle: Handle) -> Result<(), DbError>
    where
        R: Relation<Handle = Handle>,
    {
        self.open()?;
        let key = relation.project(&handle, Some(&self.key_columns))?;
        let h = self.hash(&key)?;
        let mut bucket = self.get_bucket(h)?;
        if bucket.is_overflow() {
            if self.overflow(bucket.hash_prefix)?.remove(handle)? {
                return Ok(());
            }
        } else if bucket.remove(h, handle)? {
            self.buckets.put(&bucket.block)?;
            // TODO: coalesce empty sibling buckets and halve the
            // address table once both halves drain
            return Ok(());
        }
        Err(DbError::NotFound(format!(
            "handle {handle:?} in hash index {}",
            self.name
        )))
    }

    /// 64-bit hash of the marshalled key values, masked to MAX_BITS.
    fn hash(&self, key: &Row) -> Result<u16, DbError> {
        let data = self.schema.marshal_subset(key, &self.key_columns)?;
        Ok((xxh64(&data, 0) & MAX_BIT_MASK) as u16)
    }

    fn get_bucket(&mut self, h: u16) -> Result<Bucket, DbError> {
        let entry = (h as usize) >> (MAX_BITS - self.bucket_table_bits);
        let bucket_id = self.bucket_address_table[entry];
        Bucket::load(self.buckets.get(bucket_id)?)
    }

    fn overflow(&mut self, hash_prefix: u16) -> Result<&mut OverflowFile, DbError> {
        if !self.overflow_cache.contains_key(&hash_prefix) {
            let mut overflow =
                OverflowFile::new(&self.dir, &format!("{}{}", self.file_prefix, hash_prefix));
            overflow.open_or_create()?;
            self.overflow_cache.insert(hash_prefix, overflow);
        }
        Ok(self
            .overflow_cache
            .get_mut(&hash_prefix)
            .expect("just inserted"))
    }

    fn read_bucket_address_table(&mut self) -> Result<(), DbError> {
        let mut table = Vec::new();
        for handle in self.entries.select(None, None)? {
            let row = self.entries.project(&handle, None)?;
            let Some(Value::Int(bucket_id)) = row.get("bucket_id") else {
                return Err(DbError::Corrupt("bucket address table misses bucket_id".into()));
            };
            table.push(*bucket_id as u32);
        }
        if !table.len().is_power_of_two() {
            return Err(DbError::Corrupt(format!(
                "bucket address table has {} entries",
                table.len()
            )));
        }
        self.bucket_table_bits = table.len().trailing_zeros() as u16;
        self.bucket_address_table = table;
        Ok(())
    }

    /// Split a full bucket. At MAX_BITS the bucket converts to a
    /// per-bucket overflow file instead; otherwise the records are
    /// redistributed over prefixes `2p` and `2p+1` and the bucket
    /// address table is repointed, doubling it when it has only one
    /// slot for the old bucket.
    fn split(&mut self, mut bucket: Bucket) -> Result<(), DbError> {
        if bucket.bits_used == MAX_BITS {
            let records = bucket.records()?;
            let Some((h, handles)) = records.into_iter().next() else {
                return Err(DbError::Corrupt(format!(
                    "full bucket {} has no records",
                    bucket.id()
                )));
            };
            let overflow = self.overflow(bucket.hash_prefix)?;
            for handle in &handles {
                overflow.insert(*handle)?;
            }
            bucket.clear_handles(h)?;
            bucket.set_overflow()?;
            self.buckets.put(&bucket.block)?;
            debug!("bucket {} fully overflowed to its own file", bucket.id());
            return Ok(());
        }

        let h0 = bucket.hash_prefix * 2;
        let h1 = h0 + 1;
        let bits_used = bucket.bits_used + 1;
        bucket.set_prefix(h0, bits_used)?;
        let mut sibling = Bucket::format(self.buckets.get_new()?, h1, bits_used)?;

        let mut to_move = Vec::new();
        for (h, handles) in bucket.records()? {
            if h >> (MAX_BITS - bits_used) == h1 {
                to_move.push((h, handles));
            }
        }
        for (h, handles) in to_move {
            bucket.delete_hash(h)?;
            sibling.add_list(h, &handles)?;
        }
        self.buckets.put(&bucket.block)?;
        self.buckets.put(&sibling.block)?;
        debug!(
            "split bucket {} into {} at {} bits",
            bucket.id(),
            sibling.id(),
            bits_used
        );

        if self.bucket_table_bits >= bits_used {
            // more than one table slot per bucket: repoint the slots of
            // the upper half of the affected range
            let shift = self.bucket_table_bits - bits_used;
            let start = (h1 as usize) << shift;
            let end = (h1 as usize + 1) << shift;
            for entry in start..end {
                self.bucket_address_table[entry] = sibling.id();
            }
            let entry_handles = self.entries.select(None, None)?;
            self.entries.begin_write();
            for handle in entry_handles.iter().take(end).skip(start) {
                self.entries.update(handle, &bucket_row(sibling.id())?)?;
            }
            self.entries.end_write()?;
        } else {
            // one slot for the old bucket: double the table
            self.bucket_table_bits += 1;
            let mut table = Vec::with_capacity(self.bucket_address_table.len() * 2);
            for bucket_id in &self.bucket_address_table {
                table.push(*bucket_id);
                table.push(*bucket_id);
            }
            table[h0 as usize] = bucket.id();
            table[h1 as usize] = sibling.id();
            self.bucket_address_table = table;
            debug!(
                "bucket address table doubled to {} bits",
                self.bucket_table_bits
            );

            let entry_handles = self.entries.select(None, None)?;
            self.entries.begin_write();
            let result: Result<(), DbError> = (|| {
                for (entry, handle) in entry_handles.iter().enumerate() {
                    self.entries
                        .update(handle, &bucket_row(self.bucket_address_table[entry])?)?;
                }
                for entry in entry_handles.len()..self.bucket_address_table.len() {
                    self.entries
                        .insert(&bucket_row(self.bucket_address_table[entry])?)?;
                }
                Ok(())
            })();
            self.entries.end_write()?;
            result?;
        }
        Ok(())
    }
}

fn bucket_row(bucket_id: u32) -> Result<Row, DbError> {
    let value = i32::try_from(bucket_id)
        .map_err(|_| DbError::Corrupt(format!("bucket id {bucket_id} overflows its column")))?;
    let mut row = Row::new();
    row.insert("bucket_id".to_string(), Value::Int(value));
    Ok(row)
}

/// Flat file of row handles backing one fully overflowed bucket:
/// fixed pages of 6-byte `(block_id, record_id)` records.
#[derive(Debug)]
struct OverflowFile {
    file: BlockFile,
}

impl OverflowFile {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            file: BlockFile::new(dir, name, DEFAULT_BLOCK_SIZE),
        }
    }

    fn open_or_create(&mut self) -> Result<(), DbError> {
        match self.file.open() {
            Err(DbError::NoSuchFile(_)) => {
                self.file.create()?;
                let mut block = self.file.get(1)?;
                FixedPage::init(&mut block, HANDLE_LEN)?;
                self.file.put(&block)
            }
            other => other,
        }
    }

    fn close(&mut self) -> Result<(), DbError> {
        self.file.close()
    }

    fn drop_file(&mut self) -> Result<(), DbError> {
        self.file.delete()
    }

    fn insert(&mut self, handle: Handle) -> Result<(), DbError> {
        let data = handle.to_bytes();
        let mut block = self.file.get(self.file.last())?;
        let added = {
            let mut page = FixedPage::open(&mut block, HANDLE_LEN)?;
            match page.add(&data) {
                Ok(_) => true,
                Err(PageError::Full) => false,
                Err(e) => return Err(e.into()),
            }
        };
        if !added {
            block = self.file.get_new()?;
            let mut page = FixedPage::init(&mut block, HANDLE_LEN)?;
            page.add(&data)?;
        }
        self.file.put(&block)
    }

    fn handles(&mut self) -> Result<Vec<Handle>, DbError> {
        let mut handles = Vec::new();
        let block_ids: Vec<u32> = self.file.block_ids()?.collect();
        for block_id in block_ids {
            let mut block = self.file.get(block_id)?;
            let page = FixedPage::open(&mut block, HANDLE_LEN)?;
            for record_id in page.ids().collect::<Vec<_>>() {
                let data = page.get(record_id).ok_or_else(|| {
                    DbError::Corrupt(format!("missing overflow record {record_id}"))
                })?;
                handles.push(Handle::from_bytes(data)?);
            }
        }
        Ok(handles)
    }

    /// Delete the first stored copy of `handle`. Returns whether one
    /// was found.
    fn remove(&mut self, handle: Handle) -> Result<bool, DbError> {
        let target = handle.to_bytes();
        let block_ids: Vec<u32> = self.file.block_ids()?.collect();
        for block_id in block_ids {
            let mut block = self.file.get(block_id)?;
            let mut page = FixedPage::open(&mut block, HANDLE_LEN)?;
            let found = page
                .ids()
                .collect::<Vec<_>>()
                .into_iter()
                .find(|&record_id| page.get(record_id) == Some(&target[..]));
            if let Some(record_id) = found {
                page.delete(record_id);
                drop(page);
                self.file.put(&block)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
