//! Namespace-scoped view over an [`ObjectManager`].
//!
//! An [`ObjectDatabase`] resolves unqualified table names against its
//! namespace prefix, so two namespaces sharing one database file (and
//! one manager) each see only their own `ns$Table` slice.

use crate::object_manager::ObjectManager;
use crate::object_ref::ObjectRef;
use crate::query::ObjectQuery;
use crate::root::{DatabaseNamespace, TableProxy};
use crate::schema::NS_DELIM;
use crate::table_ref::TableRef;
use crate::tasks::AsyncTaskQueue;
use parking_lot::Mutex;
use simdb_common::{DatabaseId, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Namespace-scoped database view. Shares its manager non-owningly with
/// every other namespace bound to the same storage type.
pub struct ObjectDatabase {
    obj_mgr: Arc<ObjectManager>,
    db_namespace: String,
    namespace_obj: Weak<DatabaseNamespace>,
    table_proxies: Mutex<HashMap<String, Arc<TableProxy>>>,
    access_granted: AtomicBool,
}

impl ObjectDatabase {
    pub fn new(obj_mgr: Arc<ObjectManager>, db_namespace: impl Into<String>) -> Arc<Self> {
        Self::with_namespace_obj(obj_mgr, db_namespace, Weak::new())
    }

    pub(crate) fn with_namespace_obj(
        obj_mgr: Arc<ObjectManager>,
        db_namespace: impl Into<String>,
        namespace_obj: Weak<DatabaseNamespace>,
    ) -> Arc<Self> {
        Arc::new(ObjectDatabase {
            obj_mgr,
            db_namespace: db_namespace.into(),
            namespace_obj,
            table_proxies: Mutex::new(HashMap::new()),
            access_granted: AtomicBool::new(true),
        })
    }

    fn qualify(&self, table_name: &str) -> String {
        if self.db_namespace.is_empty() {
            table_name.to_string()
        } else {
            format!("{}{}{}", self.db_namespace, NS_DELIM, table_name)
        }
    }

    /// Get a handle to a table in this namespace. Returns `None` when the
    /// name is not in this namespace's slice of the schema.
    pub fn get_table(&self, table_name: &str) -> Result<Option<TableRef>> {
        self.obj_mgr.get_table_qualified(&self.qualify(table_name))
    }

    /// Conditional-access variant of [`get_table`](ObjectDatabase::get_table):
    /// never returns `None`, and the returned proxy reflects the table's
    /// current accessibility instead.
    pub fn get_conditional_table(&self, table_name: &str) -> Arc<TableProxy> {
        let qualified = self.qualify(table_name);
        let mut proxies = self.table_proxies.lock();
        if let Some(proxy) = proxies.get(&qualified) {
            return Arc::clone(proxy);
        }
        let proxy = TableProxy::new(
            qualified.clone(),
            Arc::clone(&self.obj_mgr),
            self.namespace_obj.clone(),
            self.access_granted.load(Ordering::SeqCst),
        );
        proxies.insert(qualified, Arc::clone(&proxy));
        proxy
    }

    /// Unqualified names of the tables in this namespace.
    pub fn table_names(&self) -> Result<HashSet<String>> {
        let all = self.obj_mgr.table_names()?;
        if self.db_namespace.is_empty() {
            return Ok(all);
        }
        let prefix = format!("{}{}", self.db_namespace, NS_DELIM);
        Ok(all
            .into_iter()
            .filter_map(|name| name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Find a record in this namespace by table name and ID.
    pub fn find_object(&self, table_name: &str, db_id: DatabaseId) -> Result<Option<ObjectRef>> {
        self.obj_mgr.find_object(&self.qualify(table_name), db_id)
    }

    /// Batched lookup; see [`ObjectManager::find_objects`].
    pub fn find_objects(
        &self,
        table_name: &str,
        db_ids: &[DatabaseId],
    ) -> Result<Vec<Option<ObjectRef>>> {
        self.obj_mgr.find_objects(&self.qualify(table_name), db_ids)
    }

    /// Build a constrained query against a table in this namespace.
    /// Returns `None` when the table does not resolve here.
    pub fn object_query(&self, table_name: &str) -> Option<ObjectQuery> {
        let qualified = self
            .obj_mgr
            .get_qualified_table_name(table_name, &self.db_namespace)?;
        Some(ObjectQuery::new(&self.obj_mgr, qualified))
    }

    /// Full path of the underlying data file.
    pub fn database_file(&self) -> PathBuf {
        self.obj_mgr.database_file()
    }

    /// Task queue of the underlying manager.
    pub fn task_queue(&self) -> Arc<AsyncTaskQueue> {
        Arc::clone(self.obj_mgr.task_queue())
    }

    /// The shared manager. Not unique to this namespace.
    pub fn object_manager(&self) -> &Arc<ObjectManager> {
        &self.obj_mgr
    }

    /// Called when this namespace becomes available for reads and
    /// writes; broadcast to every vended proxy.
    pub fn grant_access(&self) {
        self.access_granted.store(true, Ordering::SeqCst);
        for proxy in self.table_proxies.lock().values() {
            proxy.grant_access();
        }
    }

    /// Called when this namespace becomes unavailable; broadcast to
    /// every vended proxy.
    pub fn revoke_access(&self) {
        self.access_granted.store(false, Ordering::SeqCst);
        for proxy in self.table_proxies.lock().values() {
            proxy.revoke_access();
        }
    }
}
