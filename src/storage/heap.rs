use std::path::Path;

use log::debug;

use crate::core::errors::{DbError, PageError};
use crate::core::relation::{Handle, Relation};
use crate::core::schema::TableSchema;
use crate::core::value::Row;
use crate::storage::block::{BlockFile, DEFAULT_BLOCK_SIZE};
use crate::storage::page::SlottedPage;

/// Heap storage engine: a relation of variable-length rows over
/// slotted pages. Rows land in the last block of the file; a full
/// block triggers allocation of a new one. Handles are
/// `(block_id, record_id)` pairs and stay stable across updates.
#[derive(Debug)]
pub struct HeapTable {
    name: String,
    schema: TableSchema,
    file: BlockFile,
}

impl HeapTable {
    pub fn new(dir: &Path, name: &str, schema: TableSchema) -> Self {
        Self::with_block_size(dir, name, schema, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(
        dir: &Path,
        name: &str,
        schema: TableSchema,
        block_size: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            schema,
            file: BlockFile::new(dir, name, block_size),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn create(&mut self) -> Result<(), DbError> {
        self.file.create()?;
        let mut block = self.file.get(1)?;
        SlottedPage::init(&mut block)?;
        self.file.put(&block)?;
        debug!("created heap table {}", self.name);
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
        debug!("dropping heap table {}", self.name);
        self.file.delete()
    }

    /// Validate, marshal and append a row. Returns its handle.
    pub fn insert(&mut self, row: &Row) -> Result<Handle, DbError> {
        self.open()?;
        let full = self.schema.validate_row(row)?;
        let data = self.schema.marshal(&full)?;
        self.append(&data)
    }

    /// Read back the row behind `handle`, restricted to `columns` if
    /// given.
    pub fn project(&mut self, handle: &Handle, columns: Option<&[String]>) -> Result<Row, DbError> {
        self.open()?;
        let mut block = self.file.get(handle.block_id)?;
        let page = SlottedPage::open(&mut block)?;
        let data = page
            .get(handle.record_id)
            .ok_or_else(|| DbError::NotFound(format!("row {handle:?} in {}", self.name)))?;
        let row = self.schema.unmarshal(data)?;
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

    /// Overlay `new_values` on the stored row and write it back in
    /// place. The handle stays valid.
    pub fn update(&mut self, handle: &Handle, new_values: &Row) -> Result<Handle, DbError> {
        let mut row = self.project(handle, None)?;
        for (name, value) in new_values {
            row.insert(name.clone(), value.clone());
        }
        let full = self.schema.validate_row(&row)?;
        let data = self.schema.marshal(&full)?;

        let mut block = self.file.get(handle.block_id)?;
        let mut page = SlottedPage::open(&mut block)?;
        page.put(handle.record_id, &data)?;
        drop(page);
        self.file.put(&block)?;
        Ok(*handle)
    }

    pub fn delete(&mut self, handle: &Handle) -> Result<(), DbError> {
        self.open()?;
        let mut block = self.file.get(handle.block_id)?;
        let mut page = SlottedPage::open(&mut block)?;
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

    /// Handles of rows matching `filter` (a conjunction of column
    /// equalities), scanning the whole file or refining `handles`.
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
                    let page = SlottedPage::open(&mut block)?;
                    all.extend(page.ids().map(|record_id| Handle::new(block_id, record_id)));
                }
                all
            }
        };

        let mut selected = Vec::new();
        for handle in candidates {
            if self.selected(&handle, filter)? {
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

    fn selected(&mut self, handle: &Handle, filter: Option<&Row>) -> Result<bool, DbError> {
        let Some(filter) = filter else {
            return Ok(true);
        };
        let columns: Vec<String> = filter.keys().cloned().collect();
        let row = self.project(handle, Some(&columns))?;
        Ok(filter.iter().all(|(name, value)| row.get(name) == Some(value)))
    }

    /// Append marshalled row data, rolling over to a fresh block when
    /// the last one is full.
    fn append(&mut self, data: &[u8]) -> Result<Handle, DbError> {
        let mut block = self.file.get(self.file.last())?;
        let added = {
            let mut page = SlottedPage::open(&mut block)?;
            match page.add(data) {
                Ok(record_id) => Some(record_id),
                Err(PageError::Full) => None,
                Err(e) => return Err(e.into()),
            }
        };
        let record_id = match added {
            Some(record_id) => record_id,
            None => {
                block = self.file.get_new()?;
                let mut page = SlottedPage::init(&mut block)?;
                page.add(data)?
            }
        };
        self.file.put(&block)?;
        Ok(Handle::new(block.id(), record_id))
    }
}

impl Relation for HeapTable {
    type Handle = Handle;

    fn create(&mut self) -> Result<(), DbError> {
        HeapTable::create(self)
    }

    fn create_if_not_exists(&mut self) -> Result<(), DbError> {
        HeapTable::create_if_not_exists(self)
    }

    fn open(&mut self) -> Result<(), DbError> {
        HeapTable::open(self)
    }

    fn close(&mut self) -> Result<(), DbError> {
        HeapTable::close(self)
    }

    fn drop_table(&mut self) -> Result<(), DbError> {
        HeapTable::drop_table(self)
    }

    fn insert(&mut self, row: &Row) -> Result<Handle, DbError> {
        HeapTable::insert(self, row)
    }

    fn update(&mut self, handle: &Handle, new_values: &Row) -> Result<Handle, DbError> {
        HeapTable::update(self, handle, new_values)
    }

    fn delete(&mut self, handle: &Handle) -> Result<(), DbError> {
        HeapTable::delete(self, handle)
    }

    fn select(
        &mut self,
        filter: Option<&Row>,
        handles: Option<&[Handle]>,
    ) -> Result<Vec<Handle>, DbError> {
        HeapTable::select(self, filter, handles)
    }

    fn project(&mut self, handle: &Handle, columns: Option<&[String]>) -> Result<Row, DbError> {
        HeapTable::project(self, handle, columns)
    }

    fn begin_write(&mut self) {
        HeapTable::begin_write(self)
    }

    fn end_write(&mut self) -> Result<(), DbError> {
        HeapTable::end_write(self)
    }
}
