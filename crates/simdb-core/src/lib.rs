//! SimDB core: an embedded, schema-driven simulation database.
//!
//! This crate provides:
//! - A builder-style [`schema`] model with namespace qualification
//! - The pluggable [`backend`] storage contract
//! - [`ObjectManager`]: one owner per back-end connection, with safe
//!   (retried, atomic, reentrant) transactions
//! - [`TableRef`]/[`ObjectRef`] record factories and proxies
//! - [`ObjectQuery`]: a typed constraint builder with row-by-row
//!   extraction into caller-owned destinations
//! - [`tasks`]: asynchronous write batching on background threads, with
//!   optional shared-thread multiplexing across databases
//! - [`DatabaseRoot`]: the process-wide registration surface vending
//!   namespace-scoped database views
//!
//! Concrete storage engines live in their own crates (`simdb-sqlite`,
//! `simdb-dense`) and plug in through
//! [`DatabaseRoot::register_backend_factory`].

pub mod backend;
pub mod object_database;
pub mod object_manager;
pub mod object_ref;
pub mod query;
pub mod root;
pub mod schema;
pub mod table_ref;
pub mod tasks;

pub use backend::{ColumnOrdering, DatabaseBackend, QuerySpec, RowCursor};
pub use object_database::ObjectDatabase;
pub use object_manager::{ObjectManager, OBJ_MGRS_TABLE};
pub use object_ref::ObjectRef;
pub use query::{decode_doubles, DestColumn, ObjectQuery, ResultIter, RowIter};
pub use root::{BackendFactory, DatabaseNamespace, DatabaseRoot, SchemaBuildFn, TableProxy};
pub use schema::{Schema, Table, NS_DELIM};
pub use table_ref::{ReturnObject, TableRef};
pub use tasks::{
    task_from_fn, AsyncTaskQueue, PreFlushListener, TaskController, WorkerInterrupt, WorkerTask,
};

pub use simdb_common::{
    ColumnDataType, ColumnValue, Constraint, ConstraintValue, DatabaseId, DbError, LowercaseName,
    NamedValue, Result, WhereClause, NO_OBJECT,
};
