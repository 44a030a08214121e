use std::io::Cursor;

use crate::core::errors::DbError;
use crate::core::schema::{marshal_value, unmarshal_value, TableSchema};
use crate::core::value::{ColumnType, Row, Value};

/// A composite key: one value per key column, in key-column order.
/// Comparison is lexicographic with natural per-component ordering.
pub type KeyTuple = Vec<Value>;

/// Ordered list of the key columns' data types, used to (de)serialise
/// composite keys identically across index nodes. Key components are
/// INT (4 bytes signed BE) or TEXT (2-byte BE length + UTF-8), with no
/// framing between components.
#[derive(Debug, Clone)]
pub struct KeyProfile {
    types: Vec<ColumnType>,
}

impl KeyProfile {
    /// Derive the profile of `key_columns` from a relation's schema.
    pub fn from_schema(schema: &TableSchema, key_columns: &[String]) -> Result<Self, DbError> {
        let mut types = Vec::with_capacity(key_columns.len());
        for name in key_columns {
            let data_type = schema.column(name)?.data_type;
            if data_type == ColumnType::Boolean {
                return Err(DbError::BadValue(format!(
                    "column {name} is BOOLEAN, keys support INT and TEXT"
                )));
            }
            types.push(data_type);
        }
        Ok(Self { types })
    }

    pub fn marshal(&self, key: &KeyTuple) -> Result<Vec<u8>, DbError> {
        if key.len() != self.types.len() {
            return Err(DbError::BadValue(format!(
                "key has {} components, profile expects {}",
                key.len(),
                self.types.len()
            )));
        }
        let mut data = Vec::new();
        for (data_type, value) in self.types.iter().zip(key) {
            marshal_value(&mut data, *data_type, value)?;
        }
        Ok(data)
    }

    pub fn unmarshal(&self, data: &[u8]) -> Result<KeyTuple, DbError> {
        let mut rdr = Cursor::new(data);
        let mut key = Vec::with_capacity(self.types.len());
        for data_type in &self.types {
            key.push(unmarshal_value(&mut rdr, *data_type)?);
        }
        Ok(key)
    }
}

/// Render a key tuple for error messages.
pub fn format_key(key: &KeyTuple) -> String {
    key.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pull the key columns out of a row, in key-column order.
pub fn key_from_row(row: &Row, key_columns: &[String]) -> Result<KeyTuple, DbError> {
    key_columns
        .iter()
        .map(|name| {
            row.get(name)
                .cloned()
                .ok_or_else(|| DbError::BadValue(format!("key column {name} missing from row")))
        })
        .collect()
}
