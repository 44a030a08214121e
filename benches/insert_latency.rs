use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use minirel::{BTreeTable, ColumnAttribute, ColumnType, Row, TableSchema, Value};

/// Database sizes to test (number of pre-existing rows)
const DB_SIZES: &[usize] = &[0, 1_000, 10_000];

fn bench_data_dir() -> PathBuf {
    PathBuf::from("target/bench-data-latency")
}

fn cleanup() {
    let _ = fs::remove_dir_all(bench_data_dir());
}

fn schema() -> TableSchema {
    let mut columns = BTreeMap::new();
    columns.insert(
        "id".to_string(),
        ColumnAttribute::new(ColumnType::Int).with_primary_key_seq(1),
    );
    columns.insert("data".to_string(), ColumnAttribute::new(ColumnType::Text));
    TableSchema::new(vec!["id".into(), "data".into()], columns)
}

fn row(id: i32) -> Row {
    Row::from([
        ("id".to_string(), Value::Int(id)),
        (
            "data".to_string(),
            Value::Text("x".repeat(100)),
        ),
    ])
}

fn create_table(name: &str) -> BTreeTable {
    let dir = bench_data_dir();
    fs::create_dir_all(&dir).expect("bench data dir");
    let mut table = BTreeTable::new(&dir, name, schema()).expect("table");
    table.create().expect("create");
    table
}

fn pre_populate(table: &mut BTreeTable, count: usize) {
    table.begin_write();
    for i in 0..count {
        table.insert(&row(i as i32)).expect("insert");
    }
    table.end_write().expect("flush");
}

fn insert_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_latency");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(20));

    cleanup();

    for db_size in DB_SIZES {
        let db_name = format!("bench_{db_size}_rows");
        let mut table = create_table(&db_name);
        pre_populate(&mut table, *db_size);

        // fresh ids well above the pre-populated range so repeated
        // measurement runs never collide
        let mut next_id = 1_000_000i32;
        group.bench_with_input(BenchmarkId::from_parameter(db_size), db_size, move |b, _| {
            b.iter(|| {
                table.insert(&row(next_id)).expect("insert");
                next_id += 1;
            });
        });
    }

    group.finish();
    cleanup();
}

criterion_group!(benches, insert_latency);
criterion_main!(benches);
