//! Per-table record factory and update/delete builders.

use crate::object_manager::ObjectManager;
use crate::object_ref::ObjectRef;
use crate::query::ObjectQuery;
use crate::schema::NamedSummaryFns;
use simdb_common::{
    ColumnDataType, ColumnValue, DatabaseId, DbError, NamedValue, Result, WhereClause,
};
use std::sync::Arc;

/// Whether record-creation calls allocate and return an [`ObjectRef`].
///
/// The default returns one, except on the fixed-size bulk-insert path
/// where the handle is usually dead weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnObject {
    #[default]
    Default,
    AlwaysReturn,
    NeverReturn,
}

/// Cheap handle for inserts, updates, and deletes against one table.
pub struct TableRef {
    obj_mgr: Arc<ObjectManager>,
    table_name: String,
    is_fixed_size: bool,
    summary_columns: Vec<(String, ColumnDataType)>,
    summary_fns: NamedSummaryFns,
    return_object: ReturnObject,
    /// SET values of a two-phase update awaiting its terminal
    /// `for_records_where` call.
    pending_update: Option<Vec<NamedValue>>,
}

impl TableRef {
    pub(crate) fn new(
        obj_mgr: Arc<ObjectManager>,
        table_name: String,
        is_fixed_size: bool,
        summary_columns: Vec<(String, ColumnDataType)>,
        summary_fns: NamedSummaryFns,
    ) -> Self {
        TableRef {
            obj_mgr,
            table_name,
            is_fixed_size,
            summary_columns,
            summary_fns,
            return_object: ReturnObject::Default,
            pending_update: None,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn is_fixed_size(&self) -> bool {
        self.is_fixed_size
    }

    pub fn set_return_object_policy(&mut self, policy: ReturnObject) {
        self.return_object = policy;
    }

    /// Create a record with every column at its schema default.
    pub fn create_object(&mut self) -> Result<Option<ObjectRef>> {
        self.abort_on_broken_chain()?;
        let db_id = self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.create_object(&self.table_name, &[]))
        })?;
        self.wrap_new_record(db_id, false)
    }

    /// Create a record from (column, value) pairs; unlisted columns take
    /// their schema defaults.
    pub fn create_object_with_args(&mut self, values: &[NamedValue]) -> Result<Option<ObjectRef>> {
        self.abort_on_broken_chain()?;
        if values.is_empty() {
            return self.create_object();
        }
        let db_id = self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.create_object(&self.table_name, values))
        })?;
        if db_id <= 0 {
            return Err(DbError::General(format!(
                "invalid database ID from record creation in table '{}'",
                self.table_name
            )));
        }
        self.wrap_new_record(db_id, false)
    }

    /// Bulk-insert path for fixed-size tables: `raw_bytes` is the packed
    /// little-endian image of every column in declaration order.
    pub fn create_object_from_bytes(&mut self, raw_bytes: &[u8]) -> Result<Option<ObjectRef>> {
        self.abort_on_broken_chain()?;
        if !self.is_fixed_size {
            return Err(DbError::schema(
                &self.table_name,
                "raw-byte record creation requires a fixed-size table",
            ));
        }
        let db_id = self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.create_fixed_size_object(&self.table_name, raw_bytes))
        })?;
        self.wrap_new_record(db_id, true)
    }

    /// Phase one of a deferred update: stage the SET values. The very
    /// next call on this handle must be the terminal
    /// [`for_records_where`](TableRef::for_records_where).
    pub fn update_row_values(&mut self, values: &[NamedValue]) -> &mut Self {
        self.pending_update = Some(values.to_vec());
        self
    }

    /// Phase two: run the staged update against all records matching the
    /// constraints, inside one safe transaction. Returns the number of
    /// updated records.
    pub fn for_records_where(&mut self, where_clauses: &[WhereClause]) -> Result<usize> {
        let Some(values) = self.pending_update.take() else {
            return Err(DbError::BrokenUpdateChain(format!(
                "for_records_where on table '{}' without a preceding update_row_values",
                self.table_name
            )));
        };
        if values.is_empty() {
            return Ok(0);
        }
        self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.perform_update(&self.table_name, &values, where_clauses))
        })
    }

    /// Delete all records matching the constraints, inside one safe
    /// transaction.
    pub fn delete_records_where(&mut self, where_clauses: &[WhereClause]) -> Result<()> {
        self.abort_on_broken_chain()?;
        self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.perform_delete(&self.table_name, where_clauses))
        })
    }

    /// Scan every summarizable column, evaluate all registered summary
    /// functions, and write one row into this table's `<Table>_Summary`
    /// sibling. The scan and the insert share one safe transaction.
    /// Returns `false` when there is nothing to capture.
    pub fn capture_summary(&mut self) -> Result<bool> {
        self.abort_on_broken_chain()?;
        if self.summary_columns.is_empty() {
            return Ok(false);
        }
        let summary_table_name = format!("{}_Summary", self.table_name);
        let Some(mut summary_table) = self.obj_mgr.get_table_qualified(&summary_table_name)? else {
            return Ok(false);
        };

        let obj_mgr = Arc::clone(&self.obj_mgr);
        self.obj_mgr.safe_transaction(|| {
            let mut summary_record: Option<ObjectRef> = None;
            for (column, _dtype) in &self.summary_columns {
                let mut query = ObjectQuery::new(&obj_mgr, self.table_name.as_str());
                let Some(mut rows) = query.execute_rows(&[column.as_str()])? else {
                    // No query support on this back-end; nothing captured.
                    return Ok(false);
                };
                let mut values = Vec::new();
                while let Some(row) = rows.next_row()? {
                    if let Some(v) = row.first().and_then(ColumnValue::as_f64) {
                        values.push(v);
                    }
                }
                if values.is_empty() {
                    continue;
                }
                if summary_record.is_none() {
                    summary_record = summary_table.create_object()?;
                }
                let record = summary_record.as_ref().expect("created above");
                for (fcn_name, fcn) in &self.summary_fns {
                    record.set_f64(&format!("{}_{}", column, fcn_name), fcn.as_ref()(&values))?;
                }
            }
            Ok(summary_record.is_some())
        })
    }

    fn wrap_new_record(&self, db_id: DatabaseId, bulk_insert: bool) -> Result<Option<ObjectRef>> {
        let return_object = match self.return_object {
            ReturnObject::AlwaysReturn => true,
            ReturnObject::NeverReturn => false,
            ReturnObject::Default => !bulk_insert,
        };
        if !return_object || db_id <= 0 {
            return Ok(None);
        }
        Ok(Some(ObjectRef::new(
            Arc::clone(&self.obj_mgr),
            self.table_name.clone(),
            db_id,
        )))
    }

    /// A staged update must be terminated by `for_records_where` before
    /// any other call on this handle.
    fn abort_on_broken_chain(&mut self) -> Result<()> {
        if self.pending_update.take().is_some() {
            return Err(DbError::BrokenUpdateChain(format!(
                "update_row_values on table '{}' was not immediately followed by \
                 for_records_where",
                self.table_name
            )));
        }
        Ok(())
    }
}

impl Clone for TableRef {
    fn clone(&self) -> Self {
        TableRef {
            obj_mgr: Arc::clone(&self.obj_mgr),
            table_name: self.table_name.clone(),
            is_fixed_size: self.is_fixed_size,
            summary_columns: self.summary_columns.clone(),
            summary_fns: self.summary_fns.clone(),
            return_object: self.return_object,
            // A staged update never survives into a clone.
            pending_update: None,
        }
    }
}
