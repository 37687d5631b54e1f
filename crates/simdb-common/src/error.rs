//! Error types for SimDB.
//!
//! All SimDB operations return [`Result`]. The error kinds map directly to
//! failure modes of the storage layer:
//! - transient access conflicts, which the transaction machinery retries
//! - schema validation and composition failures
//! - misuse of connection/queue/builder lifecycles
//!
//! Errors carry the offending table or column name where one exists. There
//! is deliberately no backtrace capture and no partial-state payload.

use thiserror::Error;

/// Result type alias for SimDB operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// Unified error type for SimDB.
#[derive(Error, Debug)]
pub enum DbError {
    /// Generic database failure that fits no more specific kind, e.g.
    /// lifecycle misuse like opening a second connection on one manager.
    #[error("{0}")]
    General(String),

    /// The database file or one of its tables is temporarily locked by
    /// another connection. Transient; `safe_transaction` retries these.
    #[error("database access conflict: {0}")]
    AccessConflict(String),

    /// Table/column name conflict, unknown data type, or a back-end
    /// rejecting a schema feature it cannot express.
    #[error("schema error: {0}")]
    Schema(String),

    /// Operation issued before a database was created or connected.
    #[error("no open database connection")]
    NotConnected,

    /// The chosen back-end does not support the requested capability.
    #[error("not implemented by this back-end: {0}")]
    NotImplemented(&'static str),

    /// A result iterator or query range walked past the available records.
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// Internal signal used by the worker interrupt task to unwind the
    /// consumer loop. Never surfaced to user code.
    #[error("worker consumer loop interrupted")]
    Interrupted,

    /// Creating another worker thread would exceed the process-wide cap.
    #[error("too many worker threads created (the current limit is {limit})")]
    ThreadQuotaExceeded { limit: usize },

    /// A data method was called on a placeholder that has not been paired
    /// with its row iterator or value accessor yet.
    #[error("placeholder object has not been realized")]
    PlaceholderNotRealized,

    /// `TableRef::update_row_values` was not immediately followed by the
    /// terminating `for_records_where` call.
    #[error("broken update chain: {0}")]
    BrokenUpdateChain(String),

    /// A task was submitted to a queue whose consumer thread has already
    /// been joined.
    #[error("task queue has already been joined")]
    TaskQueueJoined,

    /// A query destination's type does not match the column's data type.
    #[error("cannot convert column '{column}' into the requested type")]
    TypeMismatch { column: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// Transient errors are recovered locally by retrying; everything else
    /// surfaces to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::AccessConflict(_))
    }

    /// Shorthand for schema failures that name the offending table.
    pub fn schema(table: impl AsRef<str>, msg: impl AsRef<str>) -> Self {
        DbError::Schema(format!("table '{}': {}", table.as_ref(), msg.as_ref()))
    }
}
