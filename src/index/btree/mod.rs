mod node;
mod tree;

pub use tree::{BTreeFile, RangeIter};

use std::path::Path;

use log::debug;

use crate::core::errors::DbError;
use crate::core::relation::{Handle, Relation};
use crate::core::schema::TableSchema;
use crate::core::value::Row;
use crate::index::key::{format_key, key_from_row, KeyProfile, KeyTuple};

/// Secondary B+ tree index over a heap relation: leaf values are row
/// handles. Only unique search keys are supported; add the primary key
/// to the search key to force uniqueness if necessary.
#[derive(Debug)]
pub struct BTreeIndex {
    name: String,
    key_columns: Vec<String>,
    tree: BTreeFile,
}

impl BTreeIndex {
    /// The index file is named `<table>-<index>`, which keeps index
    /// names unique per relation.
    pub fn new(
        dir: &Path,
        table_name: &str,
        schema: &TableSchema,
        name: &str,
        key_columns: Vec<String>,
        unique: bool,
    ) -> Result<Self, DbError> {
        if !unique {
            return Err(DbError::BadValue(
                "btree index requires a unique search key".into(),
            ));
        }
        let profile = KeyProfile::from_schema(schema, &key_columns)?;
        let file_name = format!("{table_name}-{name}");
        Ok(Self {
            name: name.to_string(),
            key_columns,
            tree: BTreeFile::new(dir, &file_name, profile),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tree height, 1 for a leaf-only tree.
    pub fn height(&mut self) -> Result<u32, DbError> {
        self.tree.height()
    }

    /// Create the index file and fill it from the relation's current
    /// rows, coalescing the writes.
    pub fn create<R>(&mut self, relation: &mut R) -> Result<(), DbError>
    where
        R: Relation<Handle = Handle>,
    {
        self.tree.create()?;
        debug!("building btree index {} from relation", self.name);
        self.tree.begin_write();
        let result: Result<(), DbError> = (|| {
            for handle in relation.select(None, None)? {
                self.insert(relation, handle)?;
            }
            Ok(())
        })();
        self.tree.end_write()?;
        result
    }

    pub fn open(&mut self) -> Result<(), DbError> {
        self.tree.open()
    }

    pub fn close(&mut self) -> Result<(), DbError> {
        self.tree.close()
    }

    pub fn drop_index(&mut self) -> Result<(), DbError> {
        self.tree.drop_file()
    }

    /// Handles of rows whose key columns equal `key` (zero or one, the
    /// key is unique).
    pub fn lookup(&mut self, key: &Row) -> Result<Vec<Handle>, DbError> {
        let tkey = key_from_row(key, &self.key_columns)?;
        match self.tree.lookup(&tkey)? {
            Some(value) => Ok(vec![Handle::from_bytes(&value)?]),
            None => Ok(vec![]),
        }
    }

    /// Handles of rows with `min <= key <= max`, streamed in key order.
    pub fn range(
        &mut self,
        min: Option<&Row>,
        max: Option<&Row>,
    ) -> Result<impl Iterator<Item = Result<Handle, DbError>> + '_, DbError> {
        let min = min
            .map(|row| key_from_row(row, &self.key_columns))
            .transpose()?;
        let max = max
            .map(|row| key_from_row(row, &self.key_columns))
            .transpose()?;
        let iter = self.tree.range(min.as_ref(), max.as_ref())?;
        Ok(iter.map(|entry| entry.and_then(|(_, value)| Handle::from_bytes(&value))))
    }

    /// Index a row that already exists in the relation.
    pub fn insert<R>(&mut self, relation: &mut R, handle: Handle) -> Result<(), DbError>
    where
        R: Relation<Handle = Handle>,
    {
        let key_row = relation.project(&handle, Some(&self.key_columns))?;
        let tkey = key_from_row(&key_row, &self.key_columns)?;
        self.tree.insert(tkey, handle.to_bytes().to_vec())
    }

    /// Unindex a row. The row must still exist in the relation.
    pub fn delete<R>(&mut self, relation: &mut R, handle: Handle) -> Result<(), DbError>
    where
        R: Relation<Handle = Handle>,
    {
        let key_row = relation.project(&handle, Some(&self.key_columns))?;
        let tkey = key_from_row(&key_row, &self.key_columns)?;
        self.tree.delete(&tkey)
    }
}

/// Clustered primary-key storage engine: the B+ tree holds whole rows,
/// leaf values carrying the non-key columns. Row handles are the
/// primary-key tuples themselves, so `select` naturally scans in key
/// order.
#[derive(Debug)]
pub struct BTreeTable {
    name: String,
    schema: TableSchema,
    primary_key: Vec<String>,
    non_key_columns: Vec<String>,
    tree: BTreeFile,
}

impl BTreeTable {
    pub fn new(dir: &Path, name: &str, schema: TableSchema) -> Result<Self, DbError> {
        let primary_key = schema.primary_key().ok_or_else(|| {
            DbError::BadValue(format!("btree table {name} needs a primary key"))
        })?;
        let profile = KeyProfile::from_schema(&schema, &primary_key)?;
        let non_key_columns: Vec<String> = schema
            .column_names()
            .iter()
            .filter(|name| !primary_key.contains(name))
            .cloned()
            .collect();
        Ok(Self {
            name: name.to_string(),
            schema,
            primary_key,
            non_key_columns,
            tree: BTreeFile::new(dir, name, profile),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn create(&mut self) -> Result<(), DbError> {
        self.tree.create()?;
        debug!("created btree table {}", self.name);
        Ok(())
    }

    pub fn create_if_not_exists(&mut self) -> Result<(), DbError> {
        match self.open() {
            Err(DbError::NoSuchFile(_)) => self.create(),
            other => other,
        }
    }

    pub fn open(&mut self) -> Result<(), DbError> {
        self.tree.open()
    }

    pub fn close(&mut self) -> Result<(), DbError> {
        self.tree.close()
    }

    pub fn drop_table(&mut self) -> Result<(), DbError> {
        debug!("dropping btree table {}", self.name);
        self.tree.drop_file()
    }

    /// Insert a row; the handle is its primary-key tuple.
    pub fn insert(&mut self, row: &Row) -> Result<KeyTuple, DbError> {
        let full = self.schema.validate_row(row)?;
        let tkey = key_from_row(&full, &self.primary_key)?;
        let value = self.schema.marshal_subset(&full, &self.non_key_columns)?;
        self.tree.insert(tkey.clone(), value)?;
        Ok(tkey)
    }

    pub fn project(
        &mut self,
        handle: &KeyTuple,
        columns: Option<&[String]>,
    ) -> Result<Row, DbError> {
        let value = self.tree.lookup(handle)?.ok_or_else(|| {
            DbError::NotFound(format!("key ({}) in {}", format_key(handle), self.name))
        })?;
        let row = self.assemble_row(handle, &value)?;
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

    /// Overlay `new_values` and rewrite the row. A changed primary key
    /// re-keys the row; its handle changes with it.
    pub fn update(&mut self, handle: &KeyTuple, new_values: &Row) -> Result<KeyTuple, DbError> {
        let mut row = self.project(handle, None)?;
        for (name, value) in new_values {
            row.insert(name.clone(), value.clone());
        }
        let full = self.schema.validate_row(&row)?;
        let tkey = key_from_row(&full, &self.primary_key)?;
        if tkey != *handle && self.tree.lookup(&tkey)?.is_some() {
            return Err(DbError::DuplicateKey(format!("({})", format_key(&tkey))));
        }
        let value = self.schema.marshal_subset(&full, &self.non_key_columns)?;
        self.tree.delete(handle)?;
        self.tree.insert(tkey.clone(), value)?;
        Ok(tkey)
    }

    pub fn delete(&mut self, handle: &KeyTuple) -> Result<(), DbError> {
        self.tree.delete(handle)
    }

    /// Matching primary keys in ascending key order.
    pub fn select(
        &mut self,
        filter: Option<&Row>,
        handles: Option<&[KeyTuple]>,
    ) -> Result<Vec<KeyTuple>, DbError> {
        if let Some(handles) = handles {
            let mut selected = Vec::new();
            for handle in handles {
                if self.matches(handle, filter)? {
                    selected.push(handle.clone());
                }
            }
            return Ok(selected);
        }

        let entries: Vec<(KeyTuple, Vec<u8>)> =
            self.tree.range(None, None)?.collect::<Result<_, _>>()?;
        let mut selected = Vec::new();
        for (tkey, value) in entries {
            let keep = match filter {
                None => true,
                Some(filter) => {
                    let row = self.assemble_row(&tkey, &value)?;
                    filter.iter().all(|(name, value)| row.get(name) == Some(value))
                }
            };
            if keep {
                selected.push(tkey);
            }
        }
        Ok(selected)
    }

    pub fn begin_write(&mut self) {
        self.tree.begin_write();
    }

    pub fn end_write(&mut self) -> Result<(), DbError> {
        self.tree.end_write()
    }

    fn matches(&mut self, handle: &KeyTuple, filter: Option<&Row>) -> Result<bool, DbError> {
        let Some(filter) = filter else {
            return Ok(true);
        };
        let row = self.project(handle, None)?;
        Ok(filter.iter().all(|(name, value)| row.get(name) == Some(value)))
    }

    /// Rebuild a full row from its key tuple and marshalled non-key
    /// columns.
    fn assemble_row(&self, tkey: &KeyTuple, value: &[u8]) -> Result<Row, DbError> {
        if tkey.len() != self.primary_key.len() {
            return Err(DbError::BadValue(format!(
                "key has {} components, {} expects {}",
                tkey.len(),
                self.name,
                self.primary_key.len()
            )));
        }
        let mut row = self.schema.unmarshal_subset(value, &self.non_key_columns)?;
        for (name, value) in self.primary_key.iter().zip(tkey) {
            row.insert(name.clone(), value.clone());
        }
        Ok(row)
    }
}

impl Relation for BTreeTable {
    type Handle = KeyTuple;

    fn create(&mut self) -> Result<(), DbError> {
        BTreeTable::create(self)
    }

    fn create_if_not_exists(&mut self) -> Result<(), DbError> {
        BTreeTable::create_if_not_exists(self)
    }

    fn open(&mut self) -> Result<(), DbError> {
        BTreeTable::open(self)
    }

    fn close(&mut self) -> Result<(), DbError> {
        BTreeTable::close(self)
    }

    fn drop_table(&mut self) -> Result<(), DbError> {
        BTreeTable::drop_table(self)
    }

    fn insert(&mut self, row: &Row) -> Result<KeyTuple, DbError> {
        BTreeTable::insert(self, row)
    }

    fn update(&mut self, handle: &KeyTuple, new_values: &Row) -> Result<KeyTuple, DbError> {
        BTreeTable::update(self, handle, new_values)
    }

    fn delete(&mut self, handle: &KeyTuple) -> Result<(), DbError> {
        BTreeTable::delete(self, handle)
    }

    fn select(
        &mut self,
        filter: Option<&Row>,
        handles: Option<&[KeyTuple]>,
    ) -> Result<Vec<KeyTuple>, DbError> {
        BTreeTable::select(self, filter, handles)
    }

    fn project(&mut self, handle: &KeyTuple, columns: Option<&[String]>) -> Result<Row, DbError> {
        BTreeTable::project(self, handle, columns)
    }

    fn begin_write(&mut self) {
        BTreeTable::begin_write(self)
    }

    fn end_write(&mut self) -> Result<(), DbError> {
        BTreeTable::end_write(self)
    }
}
