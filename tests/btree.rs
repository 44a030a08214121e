use std::collections::BTreeMap;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use tempfile::tempdir;

use minirel::{
    BTreeIndex, BTreeTable, ColumnAttribute, ColumnType, DbError, HeapTable, Row, TableSchema,
    Value,
};

fn int_int_schema() -> TableSchema {
    let mut columns = BTreeMap::new();
    columns.insert("a".to_string(), ColumnAttribute::new(ColumnType::Int));
    columns.insert("b".to_string(), ColumnAttribute::new(ColumnType::Int));
    TableSchema::new(vec!["a".into(), "b".into()], columns)
}

fn row(a: i32, b: i32) -> Row {
    Row::from([
        ("a".to_string(), Value::Int(a)),
        ("b".to_string(), Value::Int(b)),
    ])
}

fn key(a: i32) -> Row {
    Row::from([("a".to_string(), Value::Int(a))])
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The shared fixture: foo(a, b) with two marker rows and a thousand
/// rows `{a: 100+i, b: -i}`, indexed on `a`.
fn build_indexed_table(dir: &Path) -> (HeapTable, BTreeIndex) {
    init_logging();
    let mut table = HeapTable::new(dir, "foo", int_int_schema());
    table.create().unwrap();
    table.insert(&row(12, 99)).unwrap();
    table.insert(&row(88, 101)).unwrap();
    for i in 0..1000 {
        table.insert(&row(100 + i, -i)).unwrap();
    }
    let mut index = BTreeIndex::new(
        dir,
        "foo",
        &int_int_schema(),
        "fooindex",
        vec!["a".to_string()],
        true,
    )
    .unwrap();
    index.create(&mut table).unwrap();
    (table, index)
}

fn lookup_rows(table: &mut HeapTable, index: &mut BTreeIndex, a: i32) -> Vec<Row> {
    index
        .lookup(&key(a))
        .unwrap()
        .iter()
        .map(|handle| table.project(handle, None).unwrap())
        .collect()
}

#[test]
fn lookup_after_bulk_build() {
    let tmp = tempdir().unwrap();
    let (mut table, mut index) = build_indexed_table(tmp.path());

    assert_eq!(lookup_rows(&mut table, &mut index, 12), vec![row(12, 99)]);
    assert_eq!(lookup_rows(&mut table, &mut index, 88), vec![row(88, 101)]);
    assert_eq!(lookup_rows(&mut table, &mut index, 6), Vec::<Row>::new());
    for i in 0..1000 {
        assert_eq!(
            lookup_rows(&mut table, &mut index, 100 + i),
            vec![row(100 + i, -i)]
        );
    }
}

#[test]
fn range_scan_is_inclusive_and_ordered() {
    let tmp = tempdir().unwrap();
    let (mut table, mut index) = build_indexed_table(tmp.path());

    let handles: Vec<_> = index
        .range(Some(&key(100)), Some(&key(310)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(handles.len(), 211);
    for (i, handle) in handles.iter().enumerate() {
        let r = table.project(handle, None).unwrap();
        assert_eq!(r.get("a"), Some(&Value::Int(100 + i as i32)));
    }
}

#[test]
fn open_ended_range_covers_everything() {
    let tmp = tempdir().unwrap();
    let (mut table, mut index) = build_indexed_table(tmp.path());

    let handles: Vec<_> = index
        .range(None, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(handles.len(), 1002);
    let mut previous = i32::MIN;
    for handle in &handles {
        let r = table.project(handle, None).unwrap();
        let Some(Value::Int(a)) = r.get("a") else {
            panic!("missing a");
        };
        assert!(*a > previous);
        previous = *a;
    }
}

#[test]
fn delete_unindexes_a_row() {
    let tmp = tempdir().unwrap();
    let (mut table, mut index) = build_indexed_table(tmp.path());

    let handle = table.insert(&row(44, 44)).unwrap();
    index.insert(&mut table, handle).unwrap();
    assert_eq!(lookup_rows(&mut table, &mut index, 44), vec![row(44, 44)]);

    index.delete(&mut table, handle).unwrap();
    table.delete(&handle).unwrap();
    assert_eq!(index.lookup(&key(44)).unwrap(), vec![]);

    // deleting a key that is gone surfaces NotFound
    let other = table.insert(&row(45, 45)).unwrap();
    assert!(matches!(
        index.delete(&mut table, other),
        Err(DbError::NotFound(_))
    ));
}

#[test]
fn split_root_grows_height() {
    let tmp = tempdir().unwrap();
    let mut table = HeapTable::new(tmp.path(), "foo", int_int_schema());
    table.create().unwrap();
    let mut index = BTreeIndex::new(
        tmp.path(),
        "foo",
        &int_int_schema(),
        "fooindex",
        vec!["a".to_string()],
        true,
    )
    .unwrap();
    index.create(&mut table).unwrap();
    assert_eq!(index.height().unwrap(), 1);

    let mut heights = Vec::new();
    for i in 0..300 {
        let handle = table.insert(&row(i, i)).unwrap();
        index.insert(&mut table, handle).unwrap();
        heights.push(index.height().unwrap());
    }
    assert_eq!(*heights.last().unwrap(), 2);
    // height never decreases
    assert!(heights.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn duplicate_key_is_rejected() {
    let tmp = tempdir().unwrap();
    let mut table = HeapTable::new(tmp.path(), "dup", int_int_schema());
    table.create().unwrap();
    let h1 = table.insert(&row(5, 1)).unwrap();
    let h2 = table.insert(&row(5, 2)).unwrap();

    let mut index = BTreeIndex::new(
        tmp.path(),
        "dup",
        &int_int_schema(),
        "dupindex",
        vec!["a".to_string()],
        true,
    )
    .unwrap();
    index.create(&mut table).unwrap_err();
    drop((h1, h2));

    // a non-unique btree index cannot even be constructed
    assert!(matches!(
        BTreeIndex::new(
            tmp.path(),
            "dup",
            &int_int_schema(),
            "loose",
            vec!["a".to_string()],
            false,
        ),
        Err(DbError::BadValue(_))
    ));
}

#[test]
fn random_insert_order_scans_sorted() {
    let tmp = tempdir().unwrap();
    let mut table = HeapTable::new(tmp.path(), "rnd", int_int_schema());
    table.create().unwrap();
    let mut index = BTreeIndex::new(
        tmp.path(),
        "rnd",
        &int_int_schema(),
        "rndindex",
        vec!["a".to_string()],
        true,
    )
    .unwrap();
    index.create(&mut table).unwrap();

    let mut values: Vec<i32> = (0..500).collect();
    values.shuffle(&mut StdRng::seed_from_u64(42));
    for a in &values {
        let handle = table.insert(&row(*a, -a)).unwrap();
        index.insert(&mut table, handle).unwrap();
    }

    let handles: Vec<_> = index
        .range(None, None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(handles.len(), 500);
    for (expected, handle) in handles.iter().enumerate() {
        let r = table.project(handle, None).unwrap();
        assert_eq!(r.get("a"), Some(&Value::Int(expected as i32)));
    }
}

#[test]
fn index_survives_reopen() {
    let tmp = tempdir().unwrap();
    let (mut table, mut index) = build_indexed_table(tmp.path());
    index.close().unwrap();
    table.close().unwrap();

    index.open().unwrap();
    assert_eq!(lookup_rows(&mut table, &mut index, 500), vec![row(500, -400)]);
}

fn pk_schema() -> TableSchema {
    let mut columns = BTreeMap::new();
    columns.insert(
        "id".to_string(),
        ColumnAttribute::new(ColumnType::Int).with_primary_key_seq(1),
    );
    columns.insert("data".to_string(), ColumnAttribute::new(ColumnType::Text));
    TableSchema::new(vec!["id".into(), "data".into()], columns)
}

fn pk_row(id: i32, data: &str) -> Row {
    Row::from([
        ("id".to_string(), Value::Int(id)),
        ("data".to_string(), Value::Text(data.to_string())),
    ])
}

#[test]
fn btree_table_stores_rows_in_key_order() {
    let tmp = tempdir().unwrap();
    let mut table = BTreeTable::new(tmp.path(), "bt", pk_schema()).unwrap();
    table.create().unwrap();

    table.insert(&pk_row(2, "Two")).unwrap();
    table.insert(&pk_row(1, "one")).unwrap();
    table.insert(&pk_row(3, "three")).unwrap();

    let handles = table.select(None, None).unwrap();
    let rows: Vec<Row> = handles
        .iter()
        .map(|h| table.project(h, None).unwrap())
        .collect();
    assert_eq!(
        rows,
        vec![pk_row(1, "one"), pk_row(2, "Two"), pk_row(3, "three")]
    );

    // delete where id = 2
    let filter = Row::from([("id".to_string(), Value::Int(2))]);
    let doomed = table.select(Some(&filter), None).unwrap();
    assert_eq!(doomed.len(), 1);
    table.delete(&doomed[0]).unwrap();

    let left: Vec<Row> = table
        .select(None, None)
        .unwrap()
        .iter()
        .map(|h| table.project(h, Some(&["id".to_string()])).unwrap())
        .collect();
    assert_eq!(
        left,
        vec![
            Row::from([("id".to_string(), Value::Int(1))]),
            Row::from([("id".to_string(), Value::Int(3))]),
        ]
    );
    assert!(table.select(Some(&filter), None).unwrap().is_empty());
}

#[test]
fn btree_table_rejects_duplicate_primary_key() {
    let tmp = tempdir().unwrap();
    let mut table = BTreeTable::new(tmp.path(), "btdup", pk_schema()).unwrap();
    table.create().unwrap();
    table.insert(&pk_row(1, "one")).unwrap();
    assert!(matches!(
        table.insert(&pk_row(1, "again")),
        Err(DbError::DuplicateKey(_))
    ));
}

#[test]
fn btree_table_update_can_rekey() {
    let tmp = tempdir().unwrap();
    let mut table = BTreeTable::new(tmp.path(), "btup", pk_schema()).unwrap();
    table.create().unwrap();
    let handle = table.insert(&pk_row(1, "one")).unwrap();
    table.insert(&pk_row(2, "two")).unwrap();

    // plain value update keeps the handle
    let patch = Row::from([("data".to_string(), Value::Text("uno".to_string()))]);
    let same = table.update(&handle, &patch).unwrap();
    assert_eq!(same, handle);
    assert_eq!(table.project(&handle, None).unwrap(), pk_row(1, "uno"));

    // re-keying moves the row and invalidates the old handle
    let rekey = Row::from([("id".to_string(), Value::Int(9))]);
    let moved = table.update(&handle, &rekey).unwrap();
    assert_ne!(moved, handle);
    assert_eq!(table.project(&moved, None).unwrap(), pk_row(9, "uno"));
    assert!(matches!(
        table.project(&handle, None),
        Err(DbError::NotFound(_))
    ));

    // re-keying onto an existing row is refused and changes nothing
    let clash = Row::from([("id".to_string(), Value::Int(2))]);
    assert!(matches!(
        table.update(&moved, &clash),
        Err(DbError::DuplicateKey(_))
    ));
    assert_eq!(table.project(&moved, None).unwrap(), pk_row(9, "uno"));
}

#[test]
fn btree_table_survives_reopen() {
    let tmp = tempdir().unwrap();
    {
        let mut table = BTreeTable::new(tmp.path(), "btper", pk_schema()).unwrap();
        table.create().unwrap();
        for i in 0..400 {
            table.insert(&pk_row(i, &format!("row {i}"))).unwrap();
        }
        table.close().unwrap();
    }
    let mut table = BTreeTable::new(tmp.path(), "btper", pk_schema()).unwrap();
    table.open().unwrap();
    assert_eq!(table.select(None, None).unwrap().len(), 400);
    assert_eq!(
        table
            .project(&vec![Value::Int(123)], None)
            .unwrap(),
        pk_row(123, "row 123")
    );
}
