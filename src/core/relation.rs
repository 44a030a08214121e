use byteorder::{BigEndian, ByteOrder};

use crate::core::errors::DbError;
use crate::core::value::Row;

/// Identity of a row in a heap relation: the block it lives in and its
/// record id within that block. Stable for the life of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    pub block_id: u32,
    pub record_id: u16,
}

pub(crate) const HANDLE_LEN: usize = 6;

impl Handle {
    pub fn new(block_id: u32, record_id: u16) -> Self {
        Self {
            block_id,
            record_id,
        }
    }

    /// Wire form: block id (4 bytes BE) then record id (2 bytes BE).
    pub fn to_bytes(self) -> [u8; HANDLE_LEN] {
        let mut buf = [0u8; HANDLE_LEN];
        BigEndian::write_u32(&mut buf[0..4], self.block_id);
        BigEndian::write_u16(&mut buf[4..6], self.record_id);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DbError> {
        if data.len() < HANDLE_LEN {
            return Err(DbError::Corrupt(format!(
                "handle needs {HANDLE_LEN} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            block_id: BigEndian::read_u32(&data[0..4]),
            record_id: BigEndian::read_u16(&data[4..6]),
        })
    }
}

/// A relation as expressed through a storage engine.
///
/// Heap relations hand out `Handle`s; the clustered B-tree table hands
/// out primary-key tuples. `select` buffers its result: a handle list
/// stays valid across reads but is invalidated by writes to the same
/// relation.
pub trait Relation {
    type Handle: Clone + PartialEq;

    fn create(&mut self) -> Result<(), DbError>;

    fn create_if_not_exists(&mut self) -> Result<(), DbError>;

    fn open(&mut self) -> Result<(), DbError>;

    fn close(&mut self) -> Result<(), DbError>;

    /// Delete the underlying file(s).
    fn drop_table(&mut self) -> Result<(), DbError>;

    fn insert(&mut self, row: &Row) -> Result<Self::Handle, DbError>;

    fn update(&mut self, handle: &Self::Handle, new_values: &Row) -> Result<Self::Handle, DbError>;

    fn delete(&mut self, handle: &Self::Handle) -> Result<(), DbError>;

    /// Handles of rows matching `filter`, a conjunction of column
    /// equalities. With `handles` given, refine that set instead of
    /// scanning the relation.
    fn select(
        &mut self,
        filter: Option<&Row>,
        handles: Option<&[Self::Handle]>,
    ) -> Result<Vec<Self::Handle>, DbError>;

    /// Read the row behind a handle, restricted to `columns` if given.
    fn project(&mut self, handle: &Self::Handle, columns: Option<&[String]>)
        -> Result<Row, DbError>;

    /// Hold back writes until the matching `end_write`.
    fn begin_write(&mut self);

    fn end_write(&mut self) -> Result<(), DbError>;
}
