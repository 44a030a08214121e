//! Storage and indexing core of a small relational database engine:
//! a fixed-size block file, slotted and fixed page layouts, a heap
//! relation, a dual-role B+ tree (secondary index or clustered
//! primary-key table) and an extendible hash index.
//!
//! Single-threaded by design; outer layers (parser, planner, catalog
//! tables, shell) sit on top of the `Relation` and index contracts.

pub mod catalog;
pub mod core;
pub mod index;
pub mod storage;

pub use crate::catalog::{Catalog, Index, Table};
pub use crate::core::errors::{DbError, PageError};
pub use crate::core::relation::{Handle, Relation};
pub use crate::core::schema::{ColumnAttribute, TableSchema, Validator};
pub use crate::core::value::{ColumnType, Row, Value};
pub use crate::index::btree::{BTreeFile, BTreeIndex, BTreeTable};
pub use crate::index::hash::{HashIndex, MAX_BITS};
pub use crate::index::key::{key_from_row, KeyProfile, KeyTuple};
pub use crate::storage::block::{Block, BlockFile, DEFAULT_BLOCK_SIZE};
pub use crate::storage::fixed_table::FixedTable;
pub use crate::storage::heap::HeapTable;
pub use crate::storage::page::{FixedPage, SlottedPage};
