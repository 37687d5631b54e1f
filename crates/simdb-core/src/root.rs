//! Process-wide registration surface and the namespace hierarchy.
//!
//! Database files are organized as:
//!
//! ```text
//!     root                  (DatabaseRoot)
//!       -> namespace1       (DatabaseNamespace)
//!         --> table
//!         --> table
//!       -> namespace2       (DatabaseNamespace)
//!         --> table
//! ```
//!
//! Three process-global registries drive the wiring: namespace → storage
//! type, storage type → back-end factory, and namespace → schema-builder
//! callbacks. All name arguments are case-insensitive. A root
//! instantiates exactly one [`ObjectManager`] per storage type in use;
//! namespaces bound to the same storage type share one database file,
//! each under its own `ns$Table` prefix.

use crate::backend::DatabaseBackend;
use crate::object_database::ObjectDatabase;
use crate::object_manager::ObjectManager;
use crate::schema::Schema;
use crate::table_ref::TableRef;
use crate::tasks::TaskController;
use parking_lot::Mutex;
use simdb_common::{DbError, LowercaseName, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Weak};

/// User-defined schema creation callback.
pub type SchemaBuildFn = Arc<dyn Fn(&mut Schema) + Send + Sync>;

/// Factory producing a fresh back-end instance.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn DatabaseBackend> + Send + Sync>;

#[derive(Default)]
struct Registry {
    storage_types_by_namespace: HashMap<LowercaseName, LowercaseName>,
    backend_factories: HashMap<LowercaseName, BackendFactory>,
    schema_builders: HashMap<LowercaseName, Vec<SchemaBuildFn>>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::default()));

/// Every registered back-end factory, extension-probe order unspecified.
pub(crate) fn registered_backend_factories() -> Vec<BackendFactory> {
    REGISTRY.lock().backend_factories.values().cloned().collect()
}

/// Collection of SimDB namespaces over one database directory.
pub struct DatabaseRoot {
    db_dir: PathBuf,
    task_controller: Arc<TaskController>,
    namespaces: Mutex<HashMap<LowercaseName, Arc<DatabaseNamespace>>>,
    obj_mgrs_by_storage_type: Mutex<HashMap<LowercaseName, Arc<ObjectManager>>>,
}

impl DatabaseRoot {
    /// All managers created underneath this root put their database
    /// files in `db_dir`.
    pub fn new(db_dir: impl Into<PathBuf>) -> Arc<DatabaseRoot> {
        Arc::new(DatabaseRoot {
            db_dir: db_dir.into(),
            task_controller: TaskController::new(),
            namespaces: Mutex::new(HashMap::new()),
            obj_mgrs_by_storage_type: Mutex::new(HashMap::new()),
        })
    }

    /// Declare the storage type backing a namespace. Duplicate
    /// registration with a matching type is a no-op; a conflicting type
    /// fails.
    pub fn register_database_namespace(
        db_namespace: impl Into<LowercaseName>,
        storage_type: impl Into<LowercaseName>,
    ) -> Result<()> {
        let db_namespace = db_namespace.into();
        let storage_type = storage_type.into();
        let mut registry = REGISTRY.lock();
        if let Some(existing) = registry.storage_types_by_namespace.get(&db_namespace) {
            if *existing != storage_type {
                return Err(DbError::General(format!(
                    "namespace '{}' is registered for storage type '{}', which \
                     conflicts with the new type '{}'",
                    db_namespace, existing, storage_type
                )));
            }
            return Ok(());
        }
        registry
            .storage_types_by_namespace
            .insert(db_namespace, storage_type);
        Ok(())
    }

    /// Declare the back-end factory for a storage type. Re-registration
    /// overwrites the previous factory with a warning.
    pub fn register_backend_factory(
        storage_type: impl Into<LowercaseName>,
        factory: impl Fn() -> Box<dyn DatabaseBackend> + Send + Sync + 'static,
    ) {
        let storage_type = storage_type.into();
        let mut registry = REGISTRY.lock();
        if registry.backend_factories.contains_key(&storage_type) {
            tracing::warn!(
                storage_type = %storage_type,
                "storage type already has a back-end factory registered; overwriting"
            );
        }
        registry
            .backend_factories
            .insert(storage_type, Arc::new(factory));
    }

    /// Add a schema-builder callback for a namespace. May be called any
    /// number of times; builders run in registration order and compose.
    pub fn register_schema_builder(
        db_namespace: impl Into<LowercaseName>,
        builder: impl Fn(&mut Schema) + Send + Sync + 'static,
    ) {
        let mut registry = REGISTRY.lock();
        registry
            .schema_builders
            .entry(db_namespace.into())
            .or_default()
            .push(Arc::new(builder));
    }

    /// Access a namespace by name, materializing it on first use. Any
    /// registered schema builders for the namespace run at that point.
    /// Fails for namespaces never registered with
    /// [`register_database_namespace`](DatabaseRoot::register_database_namespace).
    pub fn get_namespace(
        self: &Arc<Self>,
        db_namespace: impl Into<LowercaseName>,
    ) -> Result<Arc<DatabaseNamespace>> {
        let db_namespace = db_namespace.into();
        if let Some(ns) = self.namespaces.lock().get(&db_namespace) {
            return Ok(Arc::clone(ns));
        }

        let builders = {
            let registry = REGISTRY.lock();
            if !registry
                .storage_types_by_namespace
                .contains_key(&db_namespace)
            {
                return Err(DbError::General(format!(
                    "namespace '{}' was not registered with SimDB",
                    db_namespace
                )));
            }
            registry
                .schema_builders
                .get(&db_namespace)
                .cloned()
                .unwrap_or_default()
        };

        let ns = DatabaseNamespace::new(
            db_namespace.clone(),
            Arc::downgrade(self),
            Arc::clone(&self.task_controller),
        );
        for builder in builders {
            ns.add_to_schema(|schema| builder.as_ref()(schema))?;
        }

        self.namespaces
            .lock()
            .insert(db_namespace, Arc::clone(&ns));
        Ok(ns)
    }

    pub fn task_controller(&self) -> &Arc<TaskController> {
        &self.task_controller
    }

    fn storage_type_for_namespace(db_namespace: &LowercaseName) -> Result<LowercaseName> {
        REGISTRY
            .lock()
            .storage_types_by_namespace
            .get(db_namespace)
            .cloned()
            .ok_or_else(|| {
                DbError::General(format!(
                    "no registered storage type found for namespace '{}'",
                    db_namespace
                ))
            })
    }

    fn backend_factory_for_namespace(db_namespace: &LowercaseName) -> Result<BackendFactory> {
        let storage_type = Self::storage_type_for_namespace(db_namespace)?;
        REGISTRY
            .lock()
            .backend_factories
            .get(&storage_type)
            .cloned()
            .ok_or_else(|| {
                DbError::General(format!(
                    "no registered back-end factory found for namespace '{}'",
                    db_namespace
                ))
            })
    }

    pub(crate) fn manager_for_namespace_if_open(
        &self,
        db_namespace: &LowercaseName,
    ) -> Option<Arc<ObjectManager>> {
        let storage_type = Self::storage_type_for_namespace(db_namespace).ok()?;
        self.obj_mgrs_by_storage_type
            .lock()
            .get(&storage_type)
            .cloned()
    }

    /// Manager for this namespace's storage type. Created, connected,
    /// and schema-realized on first call; later calls append any tables
    /// the live connection does not have yet.
    pub(crate) fn object_manager_for_namespace(
        &self,
        db_namespace: &LowercaseName,
        ns_schema: &Schema,
    ) -> Result<Arc<ObjectManager>> {
        let storage_type = Self::storage_type_for_namespace(db_namespace)?;

        if let Some(obj_mgr) = self.obj_mgrs_by_storage_type.lock().get(&storage_type) {
            // Another namespace already opened this storage type's file;
            // append whatever tables this namespace adds.
            obj_mgr.append_schema(ns_schema.clone())?;
            return Ok(Arc::clone(obj_mgr));
        }

        let factory = Self::backend_factory_for_namespace(db_namespace)?;
        let obj_mgr = ObjectManager::new(&self.db_dir);
        obj_mgr.create_database_from_schema(ns_schema.clone(), factory.as_ref()())?;
        self.obj_mgrs_by_storage_type
            .lock()
            .insert(storage_type, Arc::clone(&obj_mgr));
        Ok(obj_mgr)
    }
}

/// Container wrapping one namespace node in the database hierarchy.
pub struct DatabaseNamespace {
    db_namespace: LowercaseName,
    /// Namespace schema; table names are stored fully qualified.
    schema: Mutex<Schema>,
    root: Weak<DatabaseRoot>,
    task_controller: Arc<TaskController>,
    cached_db: Mutex<Option<Arc<ObjectDatabase>>>,
    access_granted: AtomicBool,
    self_weak: Weak<DatabaseNamespace>,
}

impl DatabaseNamespace {
    fn new(
        db_namespace: LowercaseName,
        root: Weak<DatabaseRoot>,
        task_controller: Arc<TaskController>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| DatabaseNamespace {
            db_namespace,
            schema: Mutex::new(Schema::new()),
            root,
            task_controller,
            cached_db: Mutex::new(None),
            access_granted: AtomicBool::new(true),
            self_weak: weak.clone(),
        })
    }

    pub fn name(&self) -> &LowercaseName {
        &self.db_namespace
    }

    /// Compose more tables into this namespace's schema. If the
    /// namespace is already connected, the new tables are appended to
    /// the live connection immediately. Conflicting redefinitions fail;
    /// identical ones are ignored.
    pub fn add_to_schema(&self, schema_builder: impl Fn(&mut Schema)) -> Result<()> {
        let mut addition = Schema::new();
        schema_builder(&mut addition);
        addition.set_namespace(self.db_namespace.as_str())?;

        self.schema.lock().merge(addition.clone())?;

        if let Some(root) = self.root.upgrade() {
            if let Some(obj_mgr) = root.manager_for_namespace_if_open(&self.db_namespace) {
                obj_mgr.append_schema(addition)?;
            }
        }
        Ok(())
    }

    /// Whether a table by this (unqualified) name exists in this
    /// namespace's schema.
    pub fn has_table_named(&self, table_name: &str) -> bool {
        let qualified = format!(
            "{}{}{}",
            self.db_namespace,
            crate::schema::NS_DELIM,
            table_name
        );
        self.schema.lock().table_named(&qualified).is_some()
    }

    pub fn has_schema(&self) -> bool {
        self.schema.lock().has_tables()
    }

    /// Whether this namespace's storage type has an open connection.
    pub fn connection_established(&self) -> bool {
        self.root
            .upgrade()
            .and_then(|root| root.manager_for_namespace_if_open(&self.db_namespace))
            .is_some()
    }

    /// The namespace-scoped database view. On first access the root
    /// instantiates (or reuses) the storage type's manager and realizes
    /// this namespace's schema.
    pub fn database(self: &Arc<Self>) -> Result<Arc<ObjectDatabase>> {
        {
            let cached = self.cached_db.lock();
            if let Some(db) = cached.as_ref() {
                self.apply_access(db);
                return Ok(Arc::clone(db));
            }
        }

        let root = self
            .root
            .upgrade()
            .ok_or_else(|| DbError::General("DatabaseRoot is gone".into()))?;
        let schema = self.schema.lock().clone();
        let obj_mgr = root.object_manager_for_namespace(&self.db_namespace, &schema)?;
        obj_mgr.add_to_task_controller(&self.task_controller)?;

        let db = ObjectDatabase::with_namespace_obj(
            obj_mgr,
            self.db_namespace.as_str(),
            self.self_weak.clone(),
        );
        self.apply_access(&db);
        *self.cached_db.lock() = Some(Arc::clone(&db));
        Ok(db)
    }

    /// Make this namespace's tables writable through vended proxies.
    pub fn grant_access(&self) {
        self.access_granted.store(true, Ordering::SeqCst);
        if let Some(db) = self.cached_db.lock().as_ref() {
            db.grant_access();
        }
    }

    /// Make this namespace's tables inaccessible through vended proxies.
    pub fn revoke_access(&self) {
        self.access_granted.store(false, Ordering::SeqCst);
        if let Some(db) = self.cached_db.lock().as_ref() {
            db.revoke_access();
        }
    }

    fn apply_access(&self, db: &Arc<ObjectDatabase>) {
        if self.access_granted.load(Ordering::SeqCst) {
            db.grant_access();
        } else {
            db.revoke_access();
        }
    }
}

/// Nullable-access wrapper for a table whose namespace may not be
/// writable right now. Never null itself; check
/// [`is_writable`](TableProxy::is_writable) or take the inner
/// [`TableRef`] through [`table`](TableProxy::table).
pub struct TableProxy {
    table_name: String,
    obj_mgr: Arc<ObjectManager>,
    namespace_obj: Weak<DatabaseNamespace>,
    accessible: AtomicBool,
}

impl TableProxy {
    pub(crate) fn new(
        table_name: String,
        obj_mgr: Arc<ObjectManager>,
        namespace_obj: Weak<DatabaseNamespace>,
        accessible: bool,
    ) -> Arc<Self> {
        Arc::new(TableProxy {
            table_name,
            obj_mgr,
            namespace_obj,
            accessible: AtomicBool::new(accessible),
        })
    }

    pub fn is_writable(&self) -> bool {
        self.refresh_access();
        self.accessible.load(Ordering::SeqCst)
    }

    /// The underlying table handle, or `None` while the table is
    /// inaccessible. No warnings, no errors.
    pub fn table(&self) -> Option<TableRef> {
        self.refresh_access();
        if !self.accessible.load(Ordering::SeqCst) {
            return None;
        }
        self.obj_mgr
            .get_table_qualified(&self.table_name)
            .ok()
            .flatten()
    }

    pub(crate) fn grant_access(&self) {
        self.accessible.store(true, Ordering::SeqCst);
    }

    pub(crate) fn revoke_access(&self) {
        self.accessible.store(false, Ordering::SeqCst);
    }

    /// Nudge the owning namespace so a schema realized since the last
    /// call is picked up.
    fn refresh_access(&self) {
        if let Some(ns) = self.namespace_obj.upgrade() {
            let _ = ns.database();
        }
    }
}
