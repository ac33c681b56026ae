//! The single entry point a caller programs against: table/index DDL plus
//! insert/delete/select, each call resolving a table name through the
//! [`crate::catalog::Catalog`] into concrete [`crate::record::RecordStore`]
//! and [`crate::index::IndexTree`] operations against a shared
//! [`crate::storage::BufferPool`].
//!
//! Every mutating call opens the index trees it touches, applies its
//! change, and closes them again before returning, so a tree's header is
//! always durable on disk the moment the call returns rather than only at
//! shutdown.

use std::path::PathBuf;

use crate::catalog::{Catalog, Column, IndexEntry};
use crate::error::{DbError, Result};
use crate::format::Value;
use crate::index::IndexTree;
use crate::record::{Comparator, Predicate, RecordStore};
use crate::storage::{BufferPool, BufferPoolConfig};

/// How a [`FacadePredicate`]'s conditions combine.
#[derive(Debug, Clone, Copy)]
pub enum Connective {
    And,
    Or,
}

/// A caller-facing predicate: a flat list of `(column, comparator, bound)`
/// triples joined by a single connective. `And` maps directly onto
/// [`crate::record::Predicate`]'s per-column conjunction; `Or` is resolved
/// as the union of independent single-condition scans.
#[derive(Debug, Clone)]
pub struct FacadePredicate {
    pub connective: Connective,
    pub conditions: Vec<(String, Comparator, Value)>,
}

impl FacadePredicate {
    pub fn and(conditions: Vec<(String, Comparator, Value)>) -> Self {
        Self { connective: Connective::And, conditions }
    }

    pub fn or(conditions: Vec<(String, Comparator, Value)>) -> Self {
        Self { connective: Connective::Or, conditions }
    }
}

/// Top-level handle a caller opens once per data directory.
pub struct Facade {
    pool: BufferPool,
    catalog: Catalog,
    data_dir: PathBuf,
}

impl Facade {
    pub fn open(data_dir: impl Into<PathBuf>, pool_config: BufferPoolConfig) -> Result<Self> {
        let data_dir = data_dir.into();
        let catalog = Catalog::open(&data_dir)?;
        Ok(Self {
            pool: BufferPool::open(pool_config),
            catalog,
            data_dir,
        })
    }

    fn table_file(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{table}.tbl"))
    }

    fn index_file(&self, index_name: &str) -> PathBuf {
        self.data_dir.join(format!("{index_name}.idx"))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Creates a table and a primary-key index over it.
    pub fn create_table(&self, name: &str, columns: Vec<Column>, primary_key: &str) -> Result<()> {
        self.catalog.create_table(name, columns.clone(), primary_key)?;

        let layout = crate::record::RecordLayout::new(
            columns.iter().map(|c| (c.name.clone(), c.format)).collect(),
        );
        let store = RecordStore::new(&self.pool, self.table_file(name), layout);
        store.init()?;

        let pk_format = columns
            .iter()
            .find(|c| c.name == primary_key)
            .map(|c| c.format)
            .ok_or_else(|| DbError::SchemaError(format!("unknown primary key column '{primary_key}'")))?;
        let pk_index_name = format!("{name}__{primary_key}_pk");
        self.catalog
            .create_index(name, &pk_index_name, primary_key, self.index_file(&pk_index_name))?;
        IndexTree::open(&self.pool, self.index_file(&pk_index_name), vec![pk_format])?.close()?;
        Ok(())
    }

    /// Drops a table, its backing file, and every index over it.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let schema = self.catalog.table(name)?;
        for idx in &schema.indexes {
            self.pool.detach(&idx.file)?;
            let _ = std::fs::remove_file(&idx.file);
        }
        let table_path = self.table_file(name);
        self.pool.detach(&table_path)?;
        let _ = std::fs::remove_file(&table_path);
        self.catalog.drop_table(name)?;
        Ok(())
    }

    /// Builds a secondary index by backfilling it from every live row
    /// currently in the table.
    pub fn create_index(&self, table: &str, index_name: &str, column: &str) -> Result<()> {
        let schema = self.catalog.table(table)?;
        let col_idx = schema
            .column_index(column)
            .ok_or_else(|| DbError::SchemaError(format!("unknown column '{column}' on table '{table}'")))?;
        let col_format = schema.columns[col_idx].format;

        let file = self.index_file(index_name);
        self.catalog.create_index(table, index_name, column, file.clone())?;

        let mut tree = IndexTree::open(&self.pool, &file, vec![col_format])?;
        let store = RecordStore::new(&self.pool, self.table_file(table), schema.record_layout());
        for (offset, row) in store.scan(&Predicate::new())? {
            tree.insert(vec![row[col_idx].clone()], offset)?;
        }
        tree.close()
    }

    pub fn drop_index(&self, index_name: &str) -> Result<()> {
        let entry = self.catalog.drop_index(index_name)?;
        self.pool.detach(&entry.file)?;
        let _ = std::fs::remove_file(&entry.file);
        Ok(())
    }

    /// Inserts a row and every index entry it participates in. If any
    /// index rejects the row as a duplicate, the indexes already applied
    /// for this row and the row itself are rolled back, so a failed
    /// insert never leaves partial state behind.
    pub fn insert(&self, table: &str, values: Vec<Value>) -> Result<u32> {
        let schema = self.catalog.table(table)?;
        let store = RecordStore::new(&self.pool, self.table_file(table), schema.record_layout());
        let offset = store.insert(&values)?;

        let mut applied: Vec<&IndexEntry> = Vec::new();
        for idx in &schema.indexes {
            let col_idx = schema.column_index(&idx.column).unwrap();
            let col_format = schema.columns[col_idx].format;
            let mut tree = IndexTree::open(&self.pool, &idx.file, vec![col_format])?;
            let key = vec![values[col_idx].clone()];
            match tree.insert(key.clone(), offset) {
                Ok(()) => {
                    tree.close()?;
                    applied.push(idx);
                }
                Err(DbError::Duplicate) => {
                    tree.close()?;
                    self.rollback_indexes(&schema, &applied, &values)?;
                    store.delete(offset)?;
                    return Err(DbError::Duplicate);
                }
                Err(e) => {
                    tree.close()?;
                    self.rollback_indexes(&schema, &applied, &values)?;
                    store.delete(offset)?;
                    return Err(e);
                }
            }
        }
        Ok(offset)
    }

    fn rollback_indexes(
        &self,
        schema: &crate::catalog::TableSchema,
        applied: &[&IndexEntry],
        values: &[Value],
    ) -> Result<()> {
        for done in applied {
            let col_idx = schema.column_index(&done.column).unwrap();
            let col_format = schema.columns[col_idx].format;
            let mut tree = IndexTree::open(&self.pool, &done.file, vec![col_format])?;
            let _ = tree.delete(&[values[col_idx].clone()]);
            tree.close()?;
        }
        Ok(())
    }

    fn resolve_single(&self, schema: &crate::catalog::TableSchema, column: &str) -> Result<usize> {
        schema
            .column_index(column)
            .ok_or_else(|| DbError::SchemaError(format!("unknown column '{column}'")))
    }

    /// Resolves one condition against an index already known to cover its
    /// column: `Eq` is a single [`IndexTree::find`], `Lt`/`Gt` is an
    /// [`IndexTree::range`] against the column's extreme value with the
    /// bound itself filtered back out.
    fn indexed_lookup(
        &self,
        store: &RecordStore,
        tree: &IndexTree,
        col_format: crate::format::ColumnFormat,
        cmp: Comparator,
        bound: &Value,
    ) -> Result<Vec<(u32, Vec<Value>)>> {
        match cmp {
            Comparator::Eq => match tree.find(&[bound.clone()])? {
                Some(offset) => Ok(vec![(offset, store.read(offset)?)]),
                None => Ok(Vec::new()),
            },
            Comparator::Lt => {
                let lower = vec![extreme_value(col_format, true)];
                let upper = vec![bound.clone()];
                let hits = tree.range(&lower, &upper)?;
                hits.into_iter()
                    .filter(|(key, _)| key != &upper)
                    .map(|(_, offset)| Ok((offset, store.read(offset)?)))
                    .collect()
            }
            Comparator::Gt => {
                let lower = vec![bound.clone()];
                let upper = vec![extreme_value(col_format, false)];
                let hits = tree.range(&lower, &upper)?;
                hits.into_iter()
                    .filter(|(key, _)| key != &lower)
                    .map(|(_, offset)| Ok((offset, store.read(offset)?)))
                    .collect()
            }
        }
    }

    /// Rows matching `predicate`, paired with their record offset. A lone
    /// condition on an indexed column is resolved through that index
    /// instead of a full table scan: `Eq` via [`IndexTree::find`], `Lt`/
    /// `Gt` via [`IndexTree::range`] bounded by the column's extreme
    /// value and filtered to exclude the bound itself.
    pub fn matching_rows(&self, table: &str, predicate: &FacadePredicate) -> Result<Vec<(u32, Vec<Value>)>> {
        let schema = self.catalog.table(table)?;
        let store = RecordStore::new(&self.pool, self.table_file(table), schema.record_layout());

        match predicate.connective {
            Connective::And => {
                if let [(column, cmp, bound)] = predicate.conditions.as_slice() {
                    if let Some(entry) = schema.indexes.iter().find(|e| &e.column == column) {
                        let col_idx = self.resolve_single(&schema, column)?;
                        let col_format = schema.columns[col_idx].format;
                        let tree = IndexTree::open(&self.pool, &entry.file, vec![col_format])?;
                        return self.indexed_lookup(&store, &tree, col_format, *cmp, bound);
                    }
                }
                let mut rp = Predicate::new();
                for (column, cmp, bound) in &predicate.conditions {
                    let col_idx = self.resolve_single(&schema, column)?;
                    rp = rp.with(col_idx, *cmp, bound.clone());
                }
                store.scan(&rp)
            }
            Connective::Or => {
                let mut seen = std::collections::HashSet::new();
                let mut out = Vec::new();
                for (column, cmp, bound) in &predicate.conditions {
                    let col_idx = self.resolve_single(&schema, column)?;
                    let rp = Predicate::new().with(col_idx, *cmp, bound.clone());
                    for (offset, row) in store.scan(&rp)? {
                        if seen.insert(offset) {
                            out.push((offset, row));
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    pub fn select_all(&self, table: &str) -> Result<Vec<Vec<Value>>> {
        let schema = self.catalog.table(table)?;
        let store = RecordStore::new(&self.pool, self.table_file(table), schema.record_layout());
        Ok(store
            .scan(&Predicate::new())?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    pub fn select_where(&self, table: &str, predicate: &FacadePredicate) -> Result<Vec<Vec<Value>>> {
        Ok(self
            .matching_rows(table, predicate)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    /// Deletes every row matching `predicate`, keeping every index on the
    /// table in sync.
    pub fn delete_where(&self, table: &str, predicate: &FacadePredicate) -> Result<usize> {
        let schema = self.catalog.table(table)?;
        let rows = self.matching_rows(table, predicate)?;
        self.remove_rows(&schema, &rows)
    }

    pub fn delete_all(&self, table: &str) -> Result<usize> {
        let schema = self.catalog.table(table)?;
        let store = RecordStore::new(&self.pool, self.table_file(table), schema.record_layout());
        let rows = store.scan(&Predicate::new())?;
        self.remove_rows(&schema, &rows)
    }

    fn remove_rows(&self, schema: &crate::catalog::TableSchema, rows: &[(u32, Vec<Value>)]) -> Result<usize> {
        for (_, row) in rows {
            for idx in &schema.indexes {
                let col_idx = schema.column_index(&idx.column).unwrap();
                let col_format = schema.columns[col_idx].format;
                let mut tree = IndexTree::open(&self.pool, &idx.file, vec![col_format])?;
                let _ = tree.delete(&[row[col_idx].clone()]);
                tree.close()?;
            }
        }
        let store = RecordStore::new(&self.pool, self.table_file(&schema.name), schema.record_layout());
        for (offset, _) in rows {
            store.delete(*offset)?;
        }
        Ok(rows.len())
    }

    /// Flushes every dirty block still resident in the buffer pool. Index
    /// trees dump their own header the moment each call that opened them
    /// returns, so this is the safety net for record-store blocks rather
    /// than the only durability point.
    pub fn quit(&self) -> Result<()> {
        self.pool.flush_all()
    }
}

/// The lowest (`want_min`) or highest representable value of a column
/// format, used as the open end of a one-sided range scan.
fn extreme_value(format: crate::format::ColumnFormat, want_min: bool) -> Value {
    use crate::format::ColumnFormat;
    match format {
        ColumnFormat::Int => Value::Int(if want_min { i32::MIN } else { i32::MAX }),
        ColumnFormat::Double => Value::Double(if want_min {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }),
        ColumnFormat::Str(width) => Value::Str(if want_min {
            String::new()
        } else {
            "\u{7f}".repeat(width)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ColumnFormat;

    fn columns() -> Vec<Column> {
        vec![
            Column { name: "id".into(), format: ColumnFormat::Int },
            Column { name: "name".into(), format: ColumnFormat::Str(8) },
        ]
    }

    #[test]
    fn insert_and_select_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
        facade.create_table("people", columns(), "id").unwrap();
        facade
            .insert("people", vec![Value::Int(1), Value::Str("ada".into())])
            .unwrap();
        facade
            .insert("people", vec![Value::Int(2), Value::Str("bob".into())])
            .unwrap();

        let rows = facade.select_all("people").unwrap();
        assert_eq!(rows.len(), 2);

        let found = facade
            .select_where(
                "people",
                &FacadePredicate::and(vec![("id".into(), Comparator::Eq, Value::Int(2))]),
            )
            .unwrap();
        assert_eq!(found, vec![vec![Value::Int(2), Value::Str("bob".into())]]);
    }

    #[test]
    fn duplicate_primary_key_rolls_back_insert() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
        facade.create_table("people", columns(), "id").unwrap();
        facade
            .insert("people", vec![Value::Int(1), Value::Str("ada".into())])
            .unwrap();

        let err = facade
            .insert("people", vec![Value::Int(1), Value::Str("eve".into())])
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate));
        assert_eq!(facade.select_all("people").unwrap().len(), 1);
    }

    #[test]
    fn delete_where_keeps_index_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
        facade.create_table("people", columns(), "id").unwrap();
        facade
            .insert("people", vec![Value::Int(1), Value::Str("ada".into())])
            .unwrap();
        facade
            .insert("people", vec![Value::Int(2), Value::Str("bob".into())])
            .unwrap();

        let removed = facade
            .delete_where(
                "people",
                &FacadePredicate::and(vec![("id".into(), Comparator::Eq, Value::Int(1))]),
            )
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(facade.select_all("people").unwrap().len(), 1);

        facade
            .insert("people", vec![Value::Int(1), Value::Str("carl".into())])
            .unwrap();
        let found = facade
            .select_where(
                "people",
                &FacadePredicate::and(vec![("id".into(), Comparator::Eq, Value::Int(1))]),
            )
            .unwrap();
        assert_eq!(found, vec![vec![Value::Int(1), Value::Str("carl".into())]]);
    }

    #[test]
    fn secondary_index_backfills_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let facade = Facade::open(dir.path(), BufferPoolConfig::default()).unwrap();
        facade.create_table("people", columns(), "id").unwrap();
        facade
            .insert("people", vec![Value::Int(1), Value::Str("ada".into())])
            .unwrap();
        facade.create_index("people", "people_name_idx", "name").unwrap();

        let found = facade
            .select_where(
                "people",
                &FacadePredicate::and(vec![("name".into(), Comparator::Eq, Value::Str("ada".into()))]),
            )
            .unwrap();
        assert_eq!(found, vec![vec![Value::Int(1), Value::Str("ada".into())]]);
    }
}
