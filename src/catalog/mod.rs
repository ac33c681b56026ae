//! Durable table/index metadata: schemas, record layouts, and the
//! index-to-column bindings a [`crate::facade::Facade`] needs to resolve
//! a caller's table name into concrete [`crate::record::RecordStore`] and
//! [`crate::index::IndexTree`] calls.
//!
//! Persisted as a single JSON snapshot, rewritten wholesale on every
//! mutating call, mirroring the original system's "dump on every metadata
//! write" discipline.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};
use crate::format::ColumnFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub format: ColumnFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub column: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: String,
    pub indexes: Vec<IndexEntry>,
}

impl TableSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn formats(&self) -> Vec<ColumnFormat> {
        self.columns.iter().map(|c| c.format).collect()
    }

    pub fn record_layout(&self) -> crate::record::RecordLayout {
        crate::record::RecordLayout::new(
            self.columns.iter().map(|c| (c.name.clone(), c.format)).collect(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogSnapshot {
    tables: BTreeMap<String, TableSchema>,
}

/// The table-name -> schema/index-list mapping the Facade consults to
/// resolve caller requests.
pub struct Catalog {
    data_dir: PathBuf,
    state: RwLock<CatalogSnapshot>,
}

impl Catalog {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let path = data_dir.join("catalog.json");
        let state = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            CatalogSnapshot::default()
        };
        Ok(Self {
            data_dir,
            state: RwLock::new(state),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }

    fn dump(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&*self.state.read())?;
        std::fs::write(self.snapshot_path(), bytes)?;
        Ok(())
    }

    pub fn create_table(&self, name: &str, columns: Vec<Column>, primary_key: &str) -> Result<()> {
        let mut state = self.state.write();
        if state.tables.contains_key(name) {
            return Err(DbError::SchemaError(format!("table '{name}' already exists")));
        }
        if !columns.iter().any(|c| c.name == primary_key) {
            return Err(DbError::SchemaError(format!(
                "primary key column '{primary_key}' is not a column of '{name}'"
            )));
        }
        state.tables.insert(
            name.to_string(),
            TableSchema {
                name: name.to_string(),
                columns,
                primary_key: primary_key.to_string(),
                indexes: Vec::new(),
            },
        );
        drop(state);
        self.dump()
    }

    pub fn drop_table(&self, name: &str) -> Result<TableSchema> {
        let mut state = self.state.write();
        let schema = state
            .tables
            .remove(name)
            .ok_or_else(|| DbError::SchemaError(format!("unknown table '{name}'")))?;
        drop(state);
        self.dump()?;
        Ok(schema)
    }

    pub fn table(&self, name: &str) -> Result<TableSchema> {
        self.state
            .read()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::SchemaError(format!("unknown table '{name}'")))
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.state.read().tables.keys().cloned().collect()
    }

    pub fn create_index(&self, table: &str, index_name: &str, column: &str, file: PathBuf) -> Result<()> {
        let mut state = self.state.write();
        let schema = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::SchemaError(format!("unknown table '{table}'")))?;
        if schema.column_index(column).is_none() {
            return Err(DbError::SchemaError(format!(
                "unknown column '{column}' on table '{table}'"
            )));
        }
        if schema.indexes.iter().any(|i| i.name == index_name) {
            return Err(DbError::SchemaError(format!(
                "index '{index_name}' already exists"
            )));
        }
        schema.indexes.push(IndexEntry {
            name: index_name.to_string(),
            column: column.to_string(),
            file,
        });
        drop(state);
        self.dump()
    }

    pub fn drop_index(&self, index_name: &str) -> Result<IndexEntry> {
        let mut state = self.state.write();
        let mut found = None;
        for (table_name, schema) in state.tables.iter() {
            if let Some(pos) = schema.indexes.iter().position(|i| i.name == index_name) {
                found = Some((table_name.clone(), pos));
                break;
            }
        }
        let (table_name, pos) =
            found.ok_or_else(|| DbError::SchemaError(format!("unknown index '{index_name}'")))?;
        let entry = state.tables.get_mut(&table_name).unwrap().indexes.remove(pos);
        drop(state);
        self.dump()?;
        Ok(entry)
    }

    pub fn indexes_on(&self, table: &str) -> Result<Vec<IndexEntry>> {
        Ok(self.table(table)?.indexes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column { name: "id".into(), format: ColumnFormat::Int },
            Column { name: "name".into(), format: ColumnFormat::Str(8) },
        ]
    }

    #[test]
    fn create_and_fetch_table() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        catalog.create_table("t", columns(), "id").unwrap();
        let schema = catalog.table("t").unwrap();
        assert_eq!(schema.column_index("name"), Some(1));
    }

    #[test]
    fn duplicate_table_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path()).unwrap();
        catalog.create_table("t", columns(), "id").unwrap();
        assert!(catalog.create_table("t", columns(), "id").is_err());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path()).unwrap();
            catalog.create_table("t", columns(), "id").unwrap();
            catalog
                .create_index("t", "t_id_idx", "id", dir.path().join("t_id.idx"))
                .unwrap();
        }
        let catalog = Catalog::open(dir.path()).unwrap();
        let schema = catalog.table("t").unwrap();
        assert_eq!(schema.indexes.len(), 1);
        assert_eq!(schema.indexes[0].name, "t_id_idx");
    }
}
