//! Storage back-end contract.
//!
//! A [`DatabaseBackend`] turns a [`Schema`](crate::schema::Schema) into a
//! physical database and executes record operations against it. The core
//! never hands a back-end query text; constrained reads cross this
//! boundary as a typed [`QuerySpec`] and come back as an opaque
//! [`RowCursor`].
//!
//! The contract is a capability set rather than a class hierarchy: the
//! required operations are plain trait methods, and the optional ones
//! (`read_raw_bytes`, the fixed-size factory, object-query support) have
//! defaults that fail with [`DbError::NotImplemented`]. All methods are
//! called on the thread holding the owning manager's transaction mutex.

use crate::schema::Schema;
use simdb_common::{ColumnDataType, DatabaseId, DbError, NamedValue, Result, WhereClause};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// ORDER BY direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOrdering {
    Ascending,
    Descending,
}

/// A fully-specified constrained read, produced by the query builder.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Qualified table name.
    pub table: String,
    /// Projected column names, in result order. `Id` is a valid
    /// projection even though it is never declared as a schema column.
    pub columns: Vec<String>,
    /// WHERE clauses, ANDed together. Equality against a floating-point
    /// value is satisfied within machine epsilon of the target.
    pub where_clauses: Vec<WhereClause>,
    /// Optional ordering. Ties are broken by insertion order (ascending
    /// implicit `Id`).
    pub order_by: Option<(String, ColumnOrdering)>,
    /// Optional row limit. `None` means unlimited.
    pub limit: Option<u32>,
}

/// Cursor over the rows matching a [`QuerySpec`]. Each row holds one
/// typed value per projected column, in projection order.
pub trait RowCursor: Send {
    fn next_row(&mut self) -> Result<Option<Vec<simdb_common::ColumnValue>>>;
}

/// Pluggable storage driver.
pub trait DatabaseBackend: Send {
    /// Canonical file suffix (with the dot) used when the manager invents
    /// a filename, e.g. `".db"`.
    fn file_extension(&self) -> &'static str;

    /// Reject any schema feature this back-end cannot express, e.g.
    /// matrix columns for a scalar-only engine.
    fn validate_schema(&self, schema: &Schema) -> Result<()>;

    /// Create the physical structure for `schema`'s tables. On the append
    /// path this is called again with only the new tables.
    fn realize_schema(&mut self, schema: &Schema) -> Result<()>;

    /// First-time file open. Returns the full path of the opened file.
    fn open_file(&mut self, db_dir: &Path, filename: &str, create: bool) -> Result<PathBuf>;

    /// Try to open an existing file. Returns `Ok(false)` when the on-disk
    /// signature does not belong to this back-end.
    fn open_existing_file(&mut self, path: &Path) -> Result<bool>;

    /// Full filename of the open database, or `None` if not connected.
    fn full_filename(&self) -> Option<PathBuf>;

    /// Liveness probe.
    fn is_valid(&self) -> bool;

    /// Whether the manager should bracket writes with
    /// `begin_atomic_transaction` / `commit_atomic_transaction`.
    fn supports_atomic_transactions(&self) -> bool;

    fn begin_atomic_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit_atomic_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard the writes made since `begin_atomic_transaction`. Called
    /// when the bracketed work fails, so that a failed transaction leaves
    /// no partial state behind.
    fn rollback_atomic_transaction(&mut self) -> Result<()> {
        Ok(())
    }

    /// Table names present in the physical database. An empty set tells
    /// the manager to fall back on the schema it realized.
    fn table_names(&self) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }

    /// Delete every record matching the constraint list exactly.
    fn perform_delete(&mut self, table: &str, where_clauses: &[WhereClause]) -> Result<()>;

    /// Update every record matching the constraint list. Returns the
    /// number of updated records.
    fn perform_update(
        &mut self,
        table: &str,
        values: &[NamedValue],
        where_clauses: &[WhereClause],
    ) -> Result<usize>;

    /// Optimized raw read for fixed-width tables: copy up to `dest.len()`
    /// bytes of the named column of record `id` into `dest`, returning
    /// the number of bytes copied.
    fn read_raw_bytes(
        &mut self,
        _table: &str,
        _column: &str,
        _id: DatabaseId,
        _dest: &mut [u8],
    ) -> Result<usize> {
        Err(DbError::NotImplemented("read_raw_bytes"))
    }

    /// Create one record from a column-value bundle, applying schema
    /// defaults for unlisted columns. Returns the new record's `Id`.
    fn create_object(&mut self, table: &str, values: &[NamedValue]) -> Result<DatabaseId>;

    /// Fixed-size record creation from a packed little-endian byte image
    /// of every column in declaration order.
    fn create_fixed_size_object(&mut self, _table: &str, _raw_bytes: &[u8]) -> Result<DatabaseId> {
        Err(DbError::NotImplemented("create_fixed_size_object"))
    }

    /// Whether [`DatabaseBackend::prepare_query`] is available. Engines
    /// without arbitrary predicate support answer `false`, and callers
    /// fall back on [`DatabaseBackend::has_object`] lookups.
    fn supports_object_query(&self) -> bool {
        false
    }

    /// Compile `spec` into this engine's native retrieval mechanism.
    fn prepare_query(&mut self, _spec: &QuerySpec) -> Result<Box<dyn RowCursor>> {
        Err(DbError::NotImplemented("prepare_query"))
    }

    /// Record-existence probe for engines without object-query support.
    fn has_object(&mut self, _table: &str, _id: DatabaseId) -> Result<bool> {
        Err(DbError::NotImplemented("has_object"))
    }

    /// Data type of a projected column, used when decoding untyped
    /// storage. The implicit `Id` column is `Int64`.
    fn column_data_type(&self, table: &str, column: &str) -> Result<ColumnDataType>;
}
