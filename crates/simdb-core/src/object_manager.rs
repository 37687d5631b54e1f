//! Database object manager.
//!
//! An [`ObjectManager`] exclusively owns one back-end connection. It
//! realizes schemas, vends [`TableRef`](crate::table_ref::TableRef)s and
//! record lookups, and brackets all reads and writes in safe transactions
//! with automatic retry on transient access conflicts.

use crate::backend::{ColumnOrdering, DatabaseBackend, QuerySpec};
use crate::root;
use crate::schema::{split_qualified_name, Schema, Table, NS_DELIM};
use crate::table_ref::TableRef;
use crate::tasks::{AsyncTaskQueue, TaskController};
use parking_lot::{Mutex, ReentrantMutex};
use simdb_common::{
    random_database_stem, Constraint, ConstraintValue, DatabaseId, DbError, LowercaseName,
    NamedValue, Result, WhereClause,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

/// Backoff between retries of a transaction that hit a transient access
/// conflict.
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Reserved table recording every manager that has ever connected to a
/// database file.
pub const OBJ_MGRS_TABLE: &str = "ObjectManagersInDatabase";

/// All managers in the process serialize their transactions on this one
/// mutex. It is reentrant because `safe_transaction` composes: nested
/// calls on the same thread reuse the outer bracket.
static OBJ_MGR_TRANSACTION_MUTEX: LazyLock<ReentrantMutex<()>> =
    LazyLock::new(|| ReentrantMutex::new(()));

/// In-memory warning sink, flushed to a `database.warn` file next to the
/// database when the manager goes away. Warnings never go to stdout.
pub(crate) struct WarningLog {
    path: PathBuf,
    buf: Mutex<String>,
    enabled: AtomicBool,
}

impl WarningLog {
    fn new(db_dir: &Path) -> Self {
        WarningLog {
            path: db_dir.join("database.warn"),
            buf: Mutex::new(String::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub(crate) fn warn(&self, msg: impl AsRef<str>) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let msg = msg.as_ref();
        tracing::warn!(target: "simdb", "{}", msg);
        let mut buf = self.buf.lock();
        buf.push_str(&chrono::Utc::now().to_rfc3339());
        buf.push_str("  ");
        buf.push_str(msg);
        buf.push('\n');
    }
}

impl Drop for WarningLog {
    fn drop(&mut self) {
        let buf = self.buf.get_mut();
        if !buf.is_empty() {
            let _ = std::fs::write(&self.path, buf.as_bytes());
        }
    }
}

struct State {
    backend: Option<Box<dyn DatabaseBackend>>,
    full_filename: Option<PathBuf>,
    schema: Schema,
    /// Physical table names, fetched lazily from the back-end.
    table_names: HashSet<String>,
    /// Names from the realized schema, used when the back-end does not
    /// report its own.
    default_table_names: HashSet<String>,
    fixed_size_tables: HashSet<String>,
    /// (unqualified name, namespace hint) -> qualified name lookups.
    qualified_cache: HashMap<(String, String), Option<String>>,
}

/// Owner of one back-end connection.
///
/// Constructed with a directory path only; no connection exists until
/// [`ObjectManager::create_database_from_schema`] or
/// [`ObjectManager::connect_to_existing_database`] opens one. Dropping
/// the manager drains its task queue and closes the back-end.
pub struct ObjectManager {
    db_dir: PathBuf,
    state: Mutex<State>,
    uuid: AtomicI32,
    /// Guarded by the process-wide transaction mutex; only the thread
    /// holding that mutex flips this.
    in_transaction: AtomicBool,
    task_queue: Arc<AsyncTaskQueue>,
    task_controller: Mutex<Option<Arc<TaskController>>>,
    warning_log: WarningLog,
}

impl ObjectManager {
    /// Create a manager whose database file(s) will live in `db_dir`.
    pub fn new(db_dir: impl Into<PathBuf>) -> Arc<ObjectManager> {
        let db_dir = db_dir.into();
        Arc::new_cyclic(|weak: &Weak<ObjectManager>| {
            let task_queue = AsyncTaskQueue::new();
            task_queue.set_owner(weak.clone());
            ObjectManager {
                warning_log: WarningLog::new(&db_dir),
                db_dir,
                state: Mutex::new(State {
                    backend: None,
                    full_filename: None,
                    schema: Schema::new(),
                    table_names: HashSet::new(),
                    default_table_names: HashSet::new(),
                    fixed_size_tables: HashSet::new(),
                    qualified_cache: HashMap::new(),
                }),
                uuid: AtomicI32::new(0),
                in_transaction: AtomicBool::new(false),
                task_queue,
                task_controller: Mutex::new(None),
            }
        })
    }

    /// Finalize and validate `schema`, open a fresh database file in the
    /// configured directory (UUID-based filename stem), and realize the
    /// schema through `backend`. On success the manager assigns itself a
    /// connection UUID by writing a row into the reserved
    /// `ObjectManagersInDatabase` table, if the schema has one.
    pub fn create_database_from_schema(
        &self,
        mut schema: Schema,
        mut backend: Box<dyn DatabaseBackend>,
    ) -> Result<()> {
        schema.finalize()?;
        backend.validate_schema(&schema)?;

        {
            let mut state = self.state.lock();
            self.assert_no_connection_open(&state)?;

            let filename = format!("{}{}", random_database_stem(), backend.file_extension());
            let full_filename = backend.open_file(&self.db_dir, &filename, true)?;
            backend.realize_schema(&schema)?;

            state.default_table_names = schema.tables().map(|t| t.name().to_string()).collect();
            state.fixed_size_tables = schema
                .tables()
                .filter(|t| t.is_fixed_size())
                .map(|t| t.name().to_string())
                .collect();
            state.schema = schema;
            state.full_filename = Some(full_filename);
            state.backend = Some(backend);
        }

        self.fetch_and_store_database_id()?;
        Ok(())
    }

    /// Add tables to an already-open database. Tables identical to
    /// existing ones are ignored; conflicting ones fail. Only the new
    /// tables are realized.
    pub fn append_schema(&self, mut schema: Schema) -> Result<()> {
        schema.finalize()?;

        let mut state = self.state.lock();
        let connected = state.backend.as_ref().map_or(false, |b| b.is_valid());
        if !connected {
            return Err(DbError::NotConnected);
        }

        state.backend.as_ref().unwrap().validate_schema(&schema)?;

        // Prune tables the connection already has.
        let mut pruned = Schema::new();
        let mut existing = state.schema.clone();
        for table in schema.tables() {
            match existing.table_named(table.name()) {
                Some(t) if *t == *table => continue,
                Some(_) => {
                    return Err(DbError::schema(
                        table.name(),
                        "conflicts with an already-realized table",
                    ))
                }
                None => {
                    let dst = pruned.add_table(table.name());
                    *dst = table.clone();
                }
            }
        }
        if !pruned.has_tables() {
            return Ok(());
        }

        for table in pruned.tables() {
            let name = table.name().to_string();
            if !state.table_names.is_empty() {
                state.table_names.insert(name.clone());
            }
            state.default_table_names.insert(name.clone());
            if table.is_fixed_size() {
                state.fixed_size_tables.insert(name);
            }
        }

        state.backend.as_mut().unwrap().realize_schema(&pruned)?;
        existing.merge(pruned)?;
        state.schema = existing;
        Ok(())
    }

    /// Open an existing database file by probing the registered back-end
    /// factories: first the one whose file extension matches, then the
    /// rest by content. Returns `false` when no back-end accepts the
    /// file.
    pub fn connect_to_existing_database(&self, db_file: impl AsRef<Path>) -> Result<bool> {
        let db_file = db_file.as_ref();
        let mut state = self.state.lock();
        self.assert_no_connection_open(&state)?;

        let extension = db_file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()));

        let mut factories = root::registered_backend_factories();
        // Extension matches probe first.
        if let Some(ext) = &extension {
            factories.sort_by_key(|factory| {
                let probe = factory.as_ref()();
                probe.file_extension() != ext.as_str()
            });
        }

        for factory in factories {
            let mut backend = factory.as_ref()();
            if backend.open_existing_file(db_file)? {
                state.full_filename = backend.full_filename();
                state.backend = Some(backend);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Full filename of the open database, or the configured directory
    /// when nothing is open yet.
    pub fn database_file(&self) -> PathBuf {
        let state = self.state.lock();
        state
            .full_filename
            .clone()
            .unwrap_or_else(|| self.db_dir.clone())
    }

    pub fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.backend.as_ref().map_or(false, |b| b.is_valid())
    }

    /// This connection's task queue. Work given to it runs on a
    /// background thread inside safe transactions.
    pub fn task_queue(&self) -> &Arc<AsyncTaskQueue> {
        &self.task_queue
    }

    /// Share a worker thread with other managers: all submissions to this
    /// manager's task queue get rerouted into `controller`'s work queue.
    pub fn add_to_task_controller(
        self: &Arc<Self>,
        controller: &Arc<TaskController>,
    ) -> Result<()> {
        {
            let current = self.task_controller.lock();
            if let Some(current) = current.as_ref() {
                if Arc::ptr_eq(current, controller) {
                    return Ok(());
                }
            }
        }
        self.task_queue.set_simulation_database(self);
        self.task_queue.add_to_task_controller(controller)?;
        *self.task_controller.lock() = Some(Arc::clone(controller));
        Ok(())
    }

    /// Unique identifier of this connection within its database file.
    /// Returns 0 when no connection is open or the schema has no
    /// `ObjectManagersInDatabase` table.
    pub fn id(&self) -> i32 {
        self.uuid.load(Ordering::SeqCst)
    }

    pub fn disable_warning_messages(&self) {
        self.warning_log.enabled.store(false, Ordering::SeqCst);
    }

    pub fn enable_warning_messages(&self) {
        self.warning_log.enabled.store(true, Ordering::SeqCst);
    }

    /// Run `f` inside one atomic transaction bracket.
    ///
    /// Concurrent callers serialize on a process-wide recursive mutex;
    /// nested calls reuse the outer bracket, so there is exactly one
    /// physical begin/commit pair per outermost call. When `f` fails with
    /// a transient access conflict the bracket is rolled back and `f` is
    /// retried after a 25 ms backoff, indefinitely — callers needing a
    /// wall-clock bound must wrap externally. Any other error rolls back
    /// and propagates.
    pub fn safe_transaction<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
        loop {
            let guard = OBJ_MGR_TRANSACTION_MUTEX.lock();
            match self.run_transaction_once(&mut f) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    self.warning_log.warn(err.to_string());
                    drop(guard);
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn run_transaction_once<T>(&self, f: &mut dyn FnMut() -> Result<T>) -> Result<T> {
        let supports = {
            let state = self.state.lock();
            state
                .backend
                .as_ref()
                .map_or(false, |b| b.supports_atomic_transactions())
        };

        if self.in_transaction.load(Ordering::SeqCst) || !supports {
            return f();
        }

        self.in_transaction.store(true, Ordering::SeqCst);
        if let Err(err) = self.with_backend(|b| b.begin_atomic_transaction()) {
            self.in_transaction.store(false, Ordering::SeqCst);
            return Err(err);
        }

        let result = f();
        let finish = match &result {
            Ok(_) => self.with_backend(|b| b.commit_atomic_transaction()),
            Err(_) => self.with_backend(|b| b.rollback_atomic_transaction()),
        };
        self.in_transaction.store(false, Ordering::SeqCst);

        match (result, finish) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), _) => Err(err),
        }
    }

    /// Run `f` against the open back-end.
    pub(crate) fn with_backend<R>(
        &self,
        f: impl FnOnce(&mut dyn DatabaseBackend) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        match state.backend.as_mut() {
            Some(backend) => f(backend.as_mut()),
            None => Err(DbError::NotConnected),
        }
    }

    /// All physical table names, fetched lazily from the back-end on
    /// first call and cached.
    pub fn table_names(&self) -> Result<HashSet<String>> {
        let mut state = self.state.lock();
        if state.table_names.is_empty() {
            let from_backend = match state.backend.as_ref() {
                Some(backend) => backend.table_names()?,
                None => return Err(DbError::NotConnected),
            };
            state.table_names = if from_backend.is_empty() {
                std::mem::take(&mut state.default_table_names)
            } else {
                from_backend
            };
        }
        Ok(state.table_names.clone())
    }

    /// Resolve a possibly-ambiguous unqualified table name. With a
    /// namespace hint, returns `Some` iff `<hint>$<name>` exists. With an
    /// empty hint, returns the single qualified match, or `None` when the
    /// name is missing or matches more than one namespace.
    pub fn get_qualified_table_name(&self, table_name: &str, namespace_hint: &str) -> Option<String> {
        let hint = LowercaseName::new(namespace_hint);

        {
            let state = self.state.lock();
            let key = (table_name.to_string(), hint.as_str().to_string());
            if let Some(cached) = state.qualified_cache.get(&key) {
                return cached.clone();
            }
        }

        let table_names = self.table_names().ok()?;
        let resolved = resolve_qualified_name(&table_names, table_name, &hint);

        let mut state = self.state.lock();
        state.qualified_cache.insert(
            (table_name.to_string(), hint.as_str().to_string()),
            resolved.clone(),
        );
        resolved
    }

    /// Get a handle for the given table. The name is resolved as-is,
    /// then against a unique namespace, then against the legacy `stats`
    /// namespace. Returns `None` when no table resolves.
    pub fn get_table(self: &Arc<Self>, table_name: &str) -> Result<Option<TableRef>> {
        let mut qualified = self.get_qualified_table_name(table_name, "");
        if qualified.is_none() {
            qualified = self.get_qualified_table_name(table_name, "stats");
        }
        match qualified {
            Some(name) => self.get_table_qualified(&name),
            None => Ok(None),
        }
    }

    /// Get a handle for a fully qualified table name.
    pub(crate) fn get_table_qualified(
        self: &Arc<Self>,
        qualified_name: &str,
    ) -> Result<Option<TableRef>> {
        if qualified_name.is_empty() {
            return Ok(None);
        }
        let table_names = self.table_names()?;
        if !table_names.contains(qualified_name) {
            return Ok(None);
        }

        let state = self.state.lock();
        let fixed_size = state.fixed_size_tables.contains(qualified_name);
        let summaries = state.schema.summaries();
        let (summary_columns, summary_fns) = if summaries.should_summarize(qualified_name) {
            let columns = state
                .schema
                .table_named(qualified_name)
                .map(summarizable_columns)
                .unwrap_or_default();
            (columns, summaries.functions())
        } else {
            (Vec::new(), Default::default())
        };
        drop(state);

        Ok(Some(TableRef::new(
            Arc::clone(self),
            qualified_name.to_string(),
            fixed_size,
            summary_columns,
            summary_fns,
        )))
    }

    /// Find a record by its table and ID. Uses the query path when the
    /// back-end supports it, the existence probe otherwise.
    pub fn find_object(
        self: &Arc<Self>,
        table_name: &str,
        db_id: DatabaseId,
    ) -> Result<Option<crate::object_ref::ObjectRef>> {
        let supports_query = self.with_backend(|b| Ok(b.supports_object_query()))?;

        let found = if supports_query {
            let spec = QuerySpec {
                table: table_name.to_string(),
                columns: vec!["Id".to_string()],
                where_clauses: vec![WhereClause::new(
                    "Id",
                    Constraint::Equal,
                    ConstraintValue::Scalar(db_id.into()),
                )],
                order_by: None,
                limit: None,
            };
            self.safe_transaction(|| {
                let mut count = 0usize;
                self.with_backend(|b| {
                    let mut cursor = b.prepare_query(&spec)?;
                    while cursor.next_row()?.is_some() {
                        count += 1;
                    }
                    Ok(())
                })?;
                Ok(count == 1)
            })?
        } else {
            self.with_backend(|b| b.has_object(table_name, db_id))?
        };

        Ok(found.then(|| crate::object_ref::ObjectRef::new(Arc::clone(self), table_name, db_id)))
    }

    /// Batched lookup. The output has the same length as `db_ids`, with
    /// `None` for missing records. An empty `db_ids` returns every record
    /// in the table.
    pub fn find_objects(
        self: &Arc<Self>,
        table_name: &str,
        db_ids: &[DatabaseId],
    ) -> Result<Vec<Option<crate::object_ref::ObjectRef>>> {
        let mut spec = QuerySpec {
            table: table_name.to_string(),
            columns: vec!["Id".to_string()],
            where_clauses: Vec::new(),
            order_by: Some(("Id".to_string(), ColumnOrdering::Ascending)),
            limit: None,
        };
        if !db_ids.is_empty() {
            spec.where_clauses.push(WhereClause::new(
                "Id",
                Constraint::InSet,
                ConstraintValue::set(db_ids.iter().copied()),
            ));
        }

        let found: HashSet<DatabaseId> = self.safe_transaction(|| {
            let mut ids = HashSet::new();
            self.with_backend(|b| {
                let mut cursor = b.prepare_query(&spec)?;
                while let Some(row) = cursor.next_row()? {
                    if let Some(id) = row.first().and_then(|v| v.as_i64()) {
                        ids.insert(id);
                    }
                }
                Ok(())
            })?;
            Ok(ids)
        })?;

        if db_ids.is_empty() {
            let mut all: Vec<DatabaseId> = found.into_iter().collect();
            all.sort_unstable();
            return Ok(all
                .into_iter()
                .map(|id| {
                    Some(crate::object_ref::ObjectRef::new(
                        Arc::clone(self),
                        table_name,
                        id,
                    ))
                })
                .collect());
        }

        Ok(db_ids
            .iter()
            .map(|id| {
                found.contains(id).then(|| {
                    crate::object_ref::ObjectRef::new(Arc::clone(self), table_name, *id)
                })
            })
            .collect())
    }

    /// Capture a summary snapshot for every summary-marked table, all
    /// inside one safe transaction.
    pub fn capture_table_summaries(self: &Arc<Self>) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        let sources: Vec<String> = {
            let state = self.state.lock();
            state.schema.summaries().source_tables().to_vec()
        };
        self.safe_transaction(|| {
            for source in &sources {
                if let Some(mut table) = self.get_table(source)? {
                    table.capture_summary()?;
                }
            }
            Ok(())
        })
    }

    fn assert_no_connection_open(&self, state: &State) -> Result<()> {
        if state.backend.as_ref().map_or(false, |b| b.is_valid()) {
            return Err(DbError::General(
                "a database connection has already been made for this ObjectManager".into(),
            ));
        }
        Ok(())
    }

    /// Look up the largest recorded connection UUID, take max+1 as ours,
    /// and add a row for it. Custom schemas without the reserved table
    /// just warn and keep ID 0.
    fn fetch_and_store_database_id(&self) -> Result<()> {
        if self.uuid.load(Ordering::SeqCst) > 0 {
            return Ok(());
        }
        let supports_query = self.with_backend(|b| Ok(b.supports_object_query()))?;
        let Some(table) = self.get_qualified_table_name(OBJ_MGRS_TABLE, "stats").or_else(|| {
            self.get_qualified_table_name(OBJ_MGRS_TABLE, "")
        }) else {
            self.warning_log.warn(
                "custom schema without an ObjectManagersInDatabase table; \
                 this connection's id() will stay 0",
            );
            return Ok(());
        };

        self.safe_transaction(|| {
            let mut max_id: i32 = 0;
            if supports_query {
                let spec = QuerySpec {
                    table: table.clone(),
                    columns: vec!["ObjMgrID".to_string()],
                    where_clauses: Vec::new(),
                    order_by: Some(("ObjMgrID".to_string(), ColumnOrdering::Descending)),
                    limit: Some(1),
                };
                self.with_backend(|b| {
                    let mut cursor = b.prepare_query(&spec)?;
                    if let Some(row) = cursor.next_row()? {
                        max_id = row.first().and_then(|v| v.as_i64()).unwrap_or(0) as i32;
                    }
                    Ok(())
                })?;
            }

            let uuid = max_id + 1;
            self.with_backend(|b| {
                b.create_object(&table, &[NamedValue::new("ObjMgrID", uuid)])
            })?;
            self.uuid.store(uuid, Ordering::SeqCst);
            Ok(())
        })
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        // Drain pending background work before the back-end closes. A
        // shared controller outlives any one manager; stopping it here
        // would strand the other managers it serves.
        if self.task_controller.lock().is_none() {
            self.task_queue.stop_thread();
        }
    }
}

fn summarizable_columns(table: &Table) -> Vec<(String, simdb_common::ColumnDataType)> {
    table
        .columns()
        .iter()
        .filter(|c| c.data_type().is_fixed_width() && c.is_scalar())
        .map(|c| (c.name().to_string(), c.data_type()))
        .collect()
}

fn resolve_qualified_name(
    table_names: &HashSet<String>,
    table_name: &str,
    hint: &LowercaseName,
) -> Option<String> {
    if table_names.contains(table_name) {
        return Some(table_name.to_string());
    }

    if hint.is_empty() {
        let mut namespaces = table_names
            .iter()
            .filter_map(|full| split_qualified_name(full))
            .filter(|(_, unqualified)| *unqualified == table_name)
            .map(|(ns, _)| ns);
        let first = namespaces.next()?;
        if namespaces.next().is_some() {
            // Ambiguous without a hint.
            return None;
        }
        return Some(format!("{}{}{}", first, NS_DELIM, table_name));
    }

    let candidate = format!("{}{}{}", hint, NS_DELIM, table_name);
    table_names.contains(&candidate).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_resolution() {
        let names: HashSet<String> = ["gold$CustomerInfo", "platinum$CustomerInfo", "gold$Rewards"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Unique match without a hint.
        assert_eq!(
            resolve_qualified_name(&names, "Rewards", &LowercaseName::new("")),
            Some("gold$Rewards".to_string())
        );
        // Ambiguous without a hint.
        assert_eq!(
            resolve_qualified_name(&names, "CustomerInfo", &LowercaseName::new("")),
            None
        );
        // Hinted.
        assert_eq!(
            resolve_qualified_name(&names, "CustomerInfo", &LowercaseName::new("gold")),
            Some("gold$CustomerInfo".to_string())
        );
        // Wrong hint does not fall back to another namespace.
        assert_eq!(
            resolve_qualified_name(&names, "Rewards", &LowercaseName::new("platinum")),
            None
        );
    }
}
