use std::collections::BTreeMap;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::core::errors::DbError;
use crate::core::value::{ColumnType, Row, Value};

/// Per-column validator, run on insert and update.
pub type Validator = fn(&Value) -> bool;

/// Attributes of one column: its data type, an optional validator and,
/// for clustered tables, its 1-based position in the primary key.
#[derive(Debug, Clone)]
pub struct ColumnAttribute {
    pub data_type: ColumnType,
    pub validate: Option<Validator>,
    pub primary_key_seq: Option<usize>,
}

impl ColumnAttribute {
    pub fn new(data_type: ColumnType) -> Self {
        Self {
            data_type,
            validate: None,
            primary_key_seq: None,
        }
    }

    pub fn with_validator(mut self, validate: Validator) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_primary_key_seq(mut self, seq: usize) -> Self {
        self.primary_key_seq = Some(seq);
        self
    }
}

/// Column layout of a relation.
///
/// `column_names` fixes the declared order, which is also the
/// marshalling order: INT is 4 bytes signed big-endian, BOOLEAN one
/// byte, TEXT a 2-byte big-endian length followed by UTF-8 bytes. No
/// per-column framing.
#[derive(Debug, Clone)]
pub struct TableSchema {
    column_names: Vec<String>,
    columns: BTreeMap<String, ColumnAttribute>,
}

impl TableSchema {
    pub fn new(column_names: Vec<String>, columns: BTreeMap<String, ColumnAttribute>) -> Self {
        Self {
            column_names,
            columns,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column(&self, name: &str) -> Result<&ColumnAttribute, DbError> {
        self.columns
            .get(name)
            .ok_or_else(|| DbError::BadValue(format!("unknown column {name}")))
    }

    /// Primary-key column names in `primary_key_seq` order, or `None`
    /// when no column carries a sequence number.
    pub fn primary_key(&self) -> Option<Vec<String>> {
        let mut keyed: Vec<(usize, &String)> = self
            .column_names
            .iter()
            .filter_map(|name| {
                self.columns
                    .get(name)
                    .and_then(|attr| attr.primary_key_seq)
                    .map(|seq| (seq, name))
            })
            .collect();
        if keyed.is_empty() {
            return None;
        }
        keyed.sort_by_key(|(seq, _)| *seq);
        Some(keyed.into_iter().map(|(_, name)| name.clone()).collect())
    }

    /// Check a row against the schema: every column present, every
    /// value of the declared type, every validator satisfied. Returns
    /// the full row.
    pub fn validate_row(&self, row: &Row) -> Result<Row, DbError> {
        let mut full = Row::new();
        for name in &self.column_names {
            let attr = self.column(name)?;
            let value = row
                .get(name)
                .ok_or_else(|| DbError::BadValue(format!("missing value for column {name}")))?;
            if value.column_type() != attr.data_type {
                return Err(DbError::BadValue(format!(
                    "column {name} expects {}, got {}",
                    attr.data_type,
                    value.column_type()
                )));
            }
            if let Some(validate) = attr.validate {
                if !validate(value) {
                    return Err(DbError::BadValue(format!(
                        "value for column {name}, '{value}', is unacceptable"
                    )));
                }
            }
            full.insert(name.clone(), value.clone());
        }
        Ok(full)
    }

    /// Marshal a full row in declared column order.
    pub fn marshal(&self, row: &Row) -> Result<Vec<u8>, DbError> {
        marshal_columns(row, &self.column_names, &self.columns)
    }

    /// Invert `marshal`.
    pub fn unmarshal(&self, data: &[u8]) -> Result<Row, DbError> {
        unmarshal_columns(data, &self.column_names, &self.columns)
    }

    /// Marshal only the given columns of a row, in the given order.
    pub fn marshal_subset(&self, row: &Row, columns: &[String]) -> Result<Vec<u8>, DbError> {
        marshal_columns(row, columns, &self.columns)
    }

    /// Invert `marshal_subset`.
    pub fn unmarshal_subset(&self, data: &[u8], columns: &[String]) -> Result<Row, DbError> {
        unmarshal_columns(data, columns, &self.columns)
    }
}

pub(crate) fn marshal_columns(
    row: &Row,
    column_names: &[String],
    columns: &BTreeMap<String, ColumnAttribute>,
) -> Result<Vec<u8>, DbError> {
    let mut data = Vec::new();
    for name in column_names {
        let attr = columns
            .get(name)
            .ok_or_else(|| DbError::BadValue(format!("unknown column {name}")))?;
        let value = row
            .get(name)
            .ok_or_else(|| DbError::BadValue(format!("missing value for column {name}")))?;
        marshal_value(&mut data, attr.data_type, value)?;
    }
    Ok(data)
}

pub(crate) fn unmarshal_columns(
    data: &[u8],
    column_names: &[String],
    columns: &BTreeMap<String, ColumnAttribute>,
) -> Result<Row, DbError> {
    let mut rdr = Cursor::new(data);
    let mut row = Row::new();
    for name in column_names {
        let attr = columns
            .get(name)
            .ok_or_else(|| DbError::BadValue(format!("unknown column {name}")))?;
        row.insert(name.clone(), unmarshal_value(&mut rdr, attr.data_type)?);
    }
    Ok(row)
}

pub(crate) fn marshal_value(
    data: &mut Vec<u8>,
    data_type: ColumnType,
    value: &Value,
) -> Result<(), DbError> {
    match (data_type, value) {
        (ColumnType::Int, Value::Int(v)) => {
            data.write_i32::<BigEndian>(*v)?;
        }
        (ColumnType::Boolean, Value::Boolean(v)) => {
            data.push(u8::from(*v));
        }
        (ColumnType::Text, Value::Text(v)) => {
            let bytes = v.as_bytes();
            let len = u16::try_from(bytes.len())
                .map_err(|_| DbError::BadValue(format!("text value too long: {} bytes", bytes.len())))?;
            data.write_u16::<BigEndian>(len)?;
            data.extend_from_slice(bytes);
        }
        (expected, got) => {
            return Err(DbError::BadValue(format!(
                "cannot marshal {} as {expected}",
                got.column_type()
            )));
        }
    }
    Ok(())
}

pub(crate) fn unmarshal_value(
    rdr: &mut Cursor<&[u8]>,
    data_type: ColumnType,
) -> Result<Value, DbError> {
    match data_type {
        ColumnType::Int => Ok(Value::Int(rdr.read_i32::<BigEndian>()?)),
        ColumnType::Boolean => Ok(Value::Boolean(rdr.read_u8()? != 0)),
        ColumnType::Text => {
            let len = rdr.read_u16::<BigEndian>()? as usize;
            let pos = rdr.position() as usize;
            let data = *rdr.get_ref();
            let bytes = data
                .get(pos..pos + len)
                .ok_or_else(|| DbError::Corrupt("text value truncated".into()))?;
            rdr.set_position((pos + len) as u64);
            let text = std::str::from_utf8(bytes)
                .map_err(|_| DbError::Corrupt("text value is not valid UTF-8".into()))?;
            Ok(Value::Text(text.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> TableSchema {
        let mut columns = BTreeMap::new();
        columns.insert("a".to_string(), ColumnAttribute::new(ColumnType::Int));
        columns.insert("b".to_string(), ColumnAttribute::new(ColumnType::Text));
        columns.insert("c".to_string(), ColumnAttribute::new(ColumnType::Boolean));
        TableSchema::new(vec!["a".into(), "b".into(), "c".into()], columns)
    }

    fn sample_row() -> Row {
        let mut row = Row::new();
        row.insert("a".into(), Value::Int(-192));
        row.insert("b".into(), Value::Text("hello".into()));
        row.insert("c".into(), Value::Boolean(true));
        row
    }

    #[test]
    fn marshal_layout_is_big_endian() {
        let schema = sample_schema();
        let data = schema.marshal(&sample_row()).unwrap();
        assert_eq!(&data[0..4], &(-192i32).to_be_bytes());
        assert_eq!(&data[4..6], &5u16.to_be_bytes());
        assert_eq!(&data[6..11], b"hello");
        assert_eq!(data[11], 1);
        assert_eq!(data.len(), 12);
    }

    #[test]
    fn marshal_unmarshal_round_trip() {
        let schema = sample_schema();
        let row = sample_row();
        let data = schema.marshal(&row).unwrap();
        assert_eq!(schema.unmarshal(&data).unwrap(), row);
    }

    #[test]
    fn empty_text_round_trips() {
        let schema = sample_schema();
        let mut row = sample_row();
        row.insert("b".into(), Value::Text(String::new()));
        let data = schema.marshal(&row).unwrap();
        assert_eq!(schema.unmarshal(&data).unwrap(), row);
    }

    #[test]
    fn missing_column_is_rejected() {
        let schema = sample_schema();
        let mut row = sample_row();
        row.remove("b");
        assert!(matches!(
            schema.validate_row(&row),
            Err(DbError::BadValue(_))
        ));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let schema = sample_schema();
        let mut row = sample_row();
        row.insert("a".into(), Value::Text("not an int".into()));
        assert!(matches!(
            schema.validate_row(&row),
            Err(DbError::BadValue(_))
        ));
    }

    #[test]
    fn validator_runs_on_validate() {
        fn positive(v: &Value) -> bool {
            matches!(v, Value::Int(n) if *n > 0)
        }
        let mut columns = BTreeMap::new();
        columns.insert(
            "a".to_string(),
            ColumnAttribute::new(ColumnType::Int).with_validator(positive),
        );
        let schema = TableSchema::new(vec!["a".into()], columns);

        let mut row = Row::new();
        row.insert("a".into(), Value::Int(7));
        assert!(schema.validate_row(&row).is_ok());
        row.insert("a".into(), Value::Int(-7));
        assert!(matches!(
            schema.validate_row(&row),
            Err(DbError::BadValue(_))
        ));
    }

    #[test]
    fn primary_key_follows_sequence_order() {
        let mut columns = BTreeMap::new();
        columns.insert(
            "a".to_string(),
            ColumnAttribute::new(ColumnType::Int).with_primary_key_seq(2),
        );
        columns.insert(
            "b".to_string(),
            ColumnAttribute::new(ColumnType::Text).with_primary_key_seq(1),
        );
        columns.insert("c".to_string(), ColumnAttribute::new(ColumnType::Boolean));
        let schema = TableSchema::new(vec!["a".into(), "b".into(), "c".into()], columns);
        assert_eq!(
            schema.primary_key(),
            Some(vec!["b".to_string(), "a".to_string()])
        );
    }
}
