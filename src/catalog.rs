use std::collections::HashMap;

use crate::index::btree::{BTreeIndex, BTreeTable};
use crate::index::hash::HashIndex;
use crate::storage::fixed_table::FixedTable;
use crate::storage::heap::HeapTable;

/// An open relation of any storage engine.
#[derive(Debug)]
pub enum Table {
    Heap(HeapTable),
    BTree(BTreeTable),
    Fixed(FixedTable),
}

/// An open index of any access method.
#[derive(Debug)]
pub enum Index {
    BTree(BTreeIndex),
    Hash(HashIndex),
}

/// Cache of open tables and indexes, owned by whoever drives the
/// engine and threaded through execution explicitly. Each file should
/// be opened once; dropping a table removes it (and its indexes) from
/// the catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<String, Table>,
    indices: HashMap<(String, String), Index>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, name: &str, table: Table) {
        self.tables.insert(name.to_string(), table);
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Remove a table and every index hanging off it.
    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        self.indices.retain(|(table_name, _), _| table_name != name);
        self.tables.remove(name)
    }

    pub fn add_index(&mut self, table_name: &str, index_name: &str, index: Index) {
        self.indices
            .insert((table_name.to_string(), index_name.to_string()), index);
    }

    pub fn index_mut(&mut self, table_name: &str, index_name: &str) -> Option<&mut Index> {
        self.indices
            .get_mut(&(table_name.to_string(), index_name.to_string()))
    }

    /// Indexes registered for a table.
    pub fn table_indices<'a>(&'a self, table_name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.indices
            .keys()
            .filter(move |(table, _)| table == table_name)
            .map(|(_, index)| index.as_str())
    }

    pub fn remove_index(&mut self, table_name: &str, index_name: &str) -> Option<Index> {
        self.indices
            .remove(&(table_name.to_string(), index_name.to_string()))
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.indices.clear();
    }
}
