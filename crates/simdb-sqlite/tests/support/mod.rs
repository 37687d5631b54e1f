//! Shared test helpers.
#![allow(dead_code)]

use simdb_common::{ColumnDataType, DatabaseId, NamedValue, Result, WhereClause};
use simdb_core::schema::Schema;
use simdb_core::{DatabaseBackend, QuerySpec, RowCursor};
use simdb_sqlite::SqliteBackend;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Pass-through back-end that counts physical transaction brackets.
pub struct CountingBackend {
    pub inner: SqliteBackend,
    pub begins: Arc<AtomicUsize>,
    pub commits: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new(begins: &Arc<AtomicUsize>, commits: &Arc<AtomicUsize>) -> Self {
        CountingBackend {
            inner: SqliteBackend::new(),
            begins: Arc::clone(begins),
            commits: Arc::clone(commits),
        }
    }
}

impl DatabaseBackend for CountingBackend {
    fn file_extension(&self) -> &'static str {
        self.inner.file_extension()
    }

    fn validate_schema(&self, schema: &Schema) -> Result<()> {
        self.inner.validate_schema(schema)
    }

    fn realize_schema(&mut self, schema: &Schema) -> Result<()> {
        self.inner.realize_schema(schema)
    }

    fn open_file(&mut self, db_dir: &Path, filename: &str, create: bool) -> Result<PathBuf> {
        self.inner.open_file(db_dir, filename, create)
    }

    fn open_existing_file(&mut self, path: &Path) -> Result<bool> {
        self.inner.open_existing_file(path)
    }

    fn full_filename(&self) -> Option<PathBuf> {
        self.inner.full_filename()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn supports_atomic_transactions(&self) -> bool {
        true
    }

    fn begin_atomic_transaction(&mut self) -> Result<()> {
        self.begins.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.begin_atomic_transaction()
    }

    fn commit_atomic_transaction(&mut self) -> Result<()> {
        self.commits
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.commit_atomic_transaction()
    }

    fn rollback_atomic_transaction(&mut self) -> Result<()> {
        self.inner.rollback_atomic_transaction()
    }

    fn table_names(&self) -> Result<HashSet<String>> {
        self.inner.table_names()
    }

    fn perform_delete(&mut self, table: &str, where_clauses: &[WhereClause]) -> Result<()> {
        self.inner.perform_delete(table, where_clauses)
    }

    fn perform_update(
        &mut self,
        table: &str,
        values: &[NamedValue],
        where_clauses: &[WhereClause],
    ) -> Result<usize> {
        self.inner.perform_update(table, values, where_clauses)
    }

    fn create_object(&mut self, table: &str, values: &[NamedValue]) -> Result<DatabaseId> {
        self.inner.create_object(table, values)
    }

    fn create_fixed_size_object(&mut self, table: &str, raw_bytes: &[u8]) -> Result<DatabaseId> {
        self.inner.create_fixed_size_object(table, raw_bytes)
    }

    fn supports_object_query(&self) -> bool {
        self.inner.supports_object_query()
    }

    fn prepare_query(&mut self, spec: &QuerySpec) -> Result<Box<dyn RowCursor>> {
        self.inner.prepare_query(spec)
    }

    fn column_data_type(&self, table: &str, column: &str) -> Result<ColumnDataType> {
        self.inner.column_data_type(table, column)
    }
}

/// A one-column `Numbers` table.
pub fn numbers_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_table("Numbers")
        .add_column("Value", ColumnDataType::Int64);
    schema
}
