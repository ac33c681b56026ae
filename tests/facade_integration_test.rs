// End-to-end Facade tests: table/index DDL, multi-index inserts, deletes,
// and durability across a fresh process opening the same data directory.

use minidb::catalog::Column;
use minidb::format::{ColumnFormat, Value};
use minidb::facade::FacadePredicate;
use minidb::record::Comparator;
use minidb::storage::BufferPoolConfig;
use minidb::{DbError, Facade};

fn people_columns() -> Vec<Column> {
    vec![
        Column { name: "id".into(), format: ColumnFormat::Int },
        Column { name: "name".into(), format: ColumnFormat::Str(16) },
        Column { name: "age".into(), format: ColumnFormat::Int },
    ]
}

#[test]
fn full_crud_cycle_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
        facade.create_table("people", people_columns(), "id").unwrap();
        facade
            .insert("people", vec![Value::Int(1), Value::Str("ada".into()), Value::Int(30)])
            .unwrap();
        facade
            .insert("people", vec![Value::Int(2), Value::Str("grace".into()), Value::Int(40)])
            .unwrap();
        facade.create_index("people", "people_age_idx", "age").unwrap();
        facade.quit().unwrap();
    }

    let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
    let rows = facade.select_all("people").unwrap();
    assert_eq!(rows.len(), 2);

    let by_age = facade
        .select_where(
            "people",
            &FacadePredicate::and(vec![("age".into(), Comparator::Eq, Value::Int(40))]),
        )
        .unwrap();
    assert_eq!(by_age.len(), 1);
    assert_eq!(by_age[0][0], Value::Int(2));
}

#[test]
fn duplicate_primary_key_leaves_no_partial_state() {
    let dir = tempfile::tempdir().unwrap();
    let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
    facade.create_table("people", people_columns(), "id").unwrap();
    facade.create_index("people", "people_name_idx", "name").unwrap();

    facade
        .insert("people", vec![Value::Int(1), Value::Str("ada".into()), Value::Int(30)])
        .unwrap();

    let err = facade
        .insert("people", vec![Value::Int(1), Value::Str("eve".into()), Value::Int(25)])
        .unwrap_err();
    assert!(matches!(err, DbError::Duplicate));

    assert_eq!(facade.select_all("people").unwrap().len(), 1);
    let by_name = facade
        .select_where(
            "people",
            &FacadePredicate::and(vec![("name".into(), Comparator::Eq, Value::Str("eve".into()))]),
        )
        .unwrap();
    assert!(by_name.is_empty());
}

#[test]
fn drop_table_removes_indexes_from_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
    facade.create_table("people", people_columns(), "id").unwrap();
    facade.create_index("people", "people_age_idx", "age").unwrap();

    facade.drop_table("people").unwrap();
    assert!(facade.catalog().table("people").is_err());
    assert!(facade.select_all("people").is_err());
}

#[test]
fn or_predicate_unions_conditions() {
    let dir = tempfile::tempdir().unwrap();
    let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
    facade.create_table("people", people_columns(), "id").unwrap();
    facade
        .insert("people", vec![Value::Int(1), Value::Str("ada".into()), Value::Int(30)])
        .unwrap();
    facade
        .insert("people", vec![Value::Int(2), Value::Str("grace".into()), Value::Int(40)])
        .unwrap();
    facade
        .insert("people", vec![Value::Int(3), Value::Str("alan".into()), Value::Int(41)])
        .unwrap();

    let rows = facade
        .select_where(
            "people",
            &FacadePredicate::or(vec![
                ("age".into(), Comparator::Eq, Value::Int(30)),
                ("age".into(), Comparator::Eq, Value::Int(41)),
            ]),
        )
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn range_predicate_on_indexed_column_resolves_through_index() {
    let dir = tempfile::tempdir().unwrap();
    let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
    facade.create_table("people", people_columns(), "id").unwrap();
    facade.create_index("people", "people_age_idx", "age").unwrap();

    facade
        .insert("people", vec![Value::Int(1), Value::Str("ada".into()), Value::Int(30)])
        .unwrap();
    facade
        .insert("people", vec![Value::Int(2), Value::Str("grace".into()), Value::Int(40)])
        .unwrap();
    facade
        .insert("people", vec![Value::Int(3), Value::Str("alan".into()), Value::Int(41)])
        .unwrap();

    let younger = facade
        .select_where(
            "people",
            &FacadePredicate::and(vec![("age".into(), Comparator::Lt, Value::Int(40))]),
        )
        .unwrap();
    assert_eq!(younger.len(), 1);
    assert_eq!(younger[0][0], Value::Int(1));

    let older = facade
        .select_where(
            "people",
            &FacadePredicate::and(vec![("age".into(), Comparator::Gt, Value::Int(30))]),
        )
        .unwrap();
    assert_eq!(older.len(), 2);
    let mut ids: Vec<i32> = older
        .iter()
        .map(|row| match row[0] {
            Value::Int(n) => n,
            _ => unreachable!(),
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec![2, 3]);
}
