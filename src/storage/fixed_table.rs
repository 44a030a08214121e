use std::io::Cursor;
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::debug;

use crate::core::errors::{DbError, PageError};
use crate::core::relation::{Handle, Relation};
use crate::core::value::{Row, Value};
use crate::storage::block::{BlockFile, DEFAULT_BLOCK_SIZE};
use crate::storage::page::FixedPage;

/// Relation of fixed-length rows over `FixedPage` blocks. Only INT
/// columns are supported; with `signed` off the 4-byte fields are
/// encoded unsigned, which the hash index uses for its bucket ids.
#[derive(Debug)]
pub struct FixedTable {
    name: String,
    column_names: Vec<String>,
    signed: bool,
    record_len: usize,
    file: BlockFile,
}

impl FixedTable {
    pub fn new(
        dir: &Path,
        name: &str,
        column_names: Vec<String>,
        signed: bool,
    ) -> Result<Self, DbError> {
        if column_names.is_empty() {
            return Err(DbError::BadValue(format!(
                "fixed table {name} needs at least one column"
            )));
        }
        let record_len = 4 * column_names.len();
        Ok(Self {
            name: name.to_string(),
            column_names,
            signed,
            record_len,
            file: BlockFile::new(dir, name, DEFAULT_BLOCK_SIZE),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn create(&mut self) -> Result<(), DbError> {
        self.file.create()?;
        let mut block = self.file.get(1)?;
        FixedPage::init(&mut block, self.record_len)?;
        self.file.put(&block)?;
        debug!("created fixed table {}", self.name);
        Ok(())
    }

    pub fn create_if_not_exists(&mut self) -> Result<(), DbError> {
        match self.open() {
            Err(DbError::NoSuchFile(_)) => self.create(),
            other => other,
        }
    }

    pub fn open(&mut self) -> Result<(), DbError> {
        self.file.open()
    }

    pub fn close(&mut self) -> Result<(), DbError> {
        self.file.close()
    }

    pub fn drop_table(&mut self) -> Result<(), DbError> {
        debug!("dropping fixed table {}", self.name);
        self.file.delete()
    }

    pub fn insert(&mut self, row: &Row) -> Result<Handle, DbError> {
        self.open()?;
        let data = self.marshal(row)?;

        let mut block = self.file.get(self.file.last())?;
        let added = {
            let mut page = FixedPage::open(&mut block, self.record_len)?;
            match page.add(&data) {
                Ok(record_id) => Some(record_id),
                Err(PageError::Full) => None,
                Err(e) => return Err(e.into()),
            }
        };
        let record_id = match added {
            Some(record_id) => record_id,
            None => {
                block = self.file.get_new()?;
                let mut page = FixedPage::init(&mut block, self.record_len)?;
                page.add(&data)?
            }
        };
        self.file.put(&block)?;
        Ok(Handle::new(block.id(), record_id))
    }

    pub fn project(&mut self, handle: &Handle, columns: Option<&[String]>) -> Result<Row, DbError> {
        self.open()?;
        let mut block = self.file.get(handle.block_id)?;
        let page = FixedPage::open(&mut block, self.record_len)?;
        let data = page
            .get(handle.record_id)
            .ok_or_else(|| DbError::NotFound(format!("row {handle:?} in {}", self.name)))?;
        let row = self.unmarshal(data)?;
        match columns {
            None => Ok(row),
            Some(columns) => {
                let mut projected = Row::new();
                for name in columns {
                    let value = row.get(name).ok_or_else(|| {
                        DbError::BadValue(format!("unknown column {name} in {}", self.name))
                    })?;
                    projected.insert(name.clone(), value.clone());
                }
                Ok(projected)
            }
        }
    }

    pub fn update(&mut self, handle: &Handle, new_values: &Row) -> Result<Handle, DbError> {
        let mut row = self.project(handle, None)?;
        for (name, value) in new_values {
            row.insert(name.clone(), value.clone());
        }
        let data = self.marshal(&row)?;
        let mut block = self.file.get(handle.block_id)?;
        let mut page = FixedPage::open(&mut block, self.record_len)?;
        page.put(handle.record_id, &data)?;
        drop(page);
        self.file.put(&block)?;
        Ok(*handle)
    }

    pub fn delete(&mut self, handle: &Handle) -> Result<(), DbError> {
        self.open()?;
        let mut block = self.file.get(handle.block_id)?;
        let mut page = FixedPage::open(&mut block, self.record_len)?;
        if page.get(handle.record_id).is_none() {
            return Err(DbError::NotFound(format!(
                "row {handle:?} in {}",
                self.name
            )));
        }
        page.delete(handle.record_id);
        drop(page);
        self.file.put(&block)
    }

    pub fn select(
        &mut self,
        filter: Option<&Row>,
        handles: Option<&[Handle]>,
    ) -> Result<Vec<Handle>, DbError> {
        self.open()?;
        let candidates: Vec<Handle> = match handles {
            Some(handles) => handles.to_vec(),
            None => {
                let mut all = Vec::new();
                let block_ids: Vec<u32> = self.file.block_ids()?.collect();
                for block_id in block_ids {
                    let mut block = self.file.get(block_id)?;
                    let page = FixedPage::open(&mut block, self.record_len)?;
                    all.extend(page.ids().map(|record_id| Handle::new(block_id, record_id)));
                }
                all
            }
        };

        let mut selected = Vec::new();
        for handle in candidates {
            let keep = match filter {
                None => true,
                Some(filter) => {
                    let row = self.project(&handle, None)?;
                    filter.iter().all(|(name, value)| row.get(name) == Some(value))
                }
            };
            if keep {
                selected.push(handle);
            }
        }
        Ok(selected)
    }

    pub fn begin_write(&mut self) {
        self.file.begin_write();
    }

    pub fn end_write(&mut self) -> Result<(), DbError> {
        self.file.end_write()
    }

    fn marshal(&self, row: &Row) -> Result<Vec<u8>, DbError> {
        let mut data = Vec::with_capacity(self.record_len);
        for name in &self.column_names {
            let value = row
                .get(name)
                .ok_or_else(|| DbError::BadValue(format!("missing value for column {name}")))?;
            let Value::Int(v) = value else {
                return Err(DbError::BadValue(format!(
                    "fixed table {} only supports INT columns",
                    self.name
                )));
            };
            if self.signed {
                data.write_i32::<BigEndian>(*v)?;
            } else {
                let unsigned = u32::try_from(*v).map_err(|_| {
                    DbError::BadValue(format!("negative value {v} in unsigned column {name}"))
                })?;
                data.write_u32::<BigEndian>(unsigned)?;
            }
        }
        Ok(data)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Row, DbError> {
        let mut rdr = Cursor::new(data);
        let mut row = Row::new();
        for name in &self.column_names {
            let value = if self.signed {
                rdr.read_i32::<BigEndian>()?
            } else {
                let unsigned = rdr.read_u32::<BigEndian>()?;
                i32::try_from(unsigned).map_err(|_| {
                    DbError::Corrupt(format!("unsigned value {unsigned} overflows column {name}"))
                })?
            };
            row.insert(name.clone(), Value::Int(value));
        }
        Ok(row)
    }
}

impl Relation for FixedTable {
    type Handle = Handle;

    fn create(&mut self) -> Result<(), DbError> {
        FixedTable::create(self)
    }

    fn create_if_not_exists(&mut self) -> Result<(), DbError> {
        FixedTable::create_if_not_exists(self)
    }

    fn open(&mut self) -> Result<(), DbError> {
        FixedTable::open(self)
    }

    fn close(&mut self) -> Result<(), DbError> {
        FixedTable::close(self)
    }

    fn drop_table(&mut self) -> Result<(), DbError> {
        FixedTable::drop_table(self)
    }

    fn insert(&mut self, row: &Row) -> Result<Handle, DbError> {
        FixedTable::insert(self, row)
    }

    fn update(&mut self, handle: &Handle, new_values: &Row) -> Result<Handle, DbError> {
        FixedTable::update(self, handle, new_values)
    }

    fn delete(&mut self, handle: &Handle) -> Result<(), DbError> {
        FixedTable::delete(self, handle)
    }

    fn select(
        &mut self,
        filter: Option<&Row>,
        handles: Option<&[Handle]>,
    ) -> Result<Vec<Handle>, DbError> {
        FixedTable::select(self, filter, handles)
    }

    fn project(&mut self, handle: &Handle, columns: Option<&[String]>) -> Result<Row, DbError> {
        FixedTable::project(self, handle, columns)
    }

    fn begin_write(&mut self) {
        FixedTable::begin_write(self)
    }

    fn end_write(&mut self) -> Result<(), DbError> {
        FixedTable::end_write(self)
    }
}
