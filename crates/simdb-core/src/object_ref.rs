//! Handle to a single database record.

use crate::backend::QuerySpec;
use crate::object_manager::ObjectManager;
use simdb_common::{
    ColumnValue, Constraint, ConstraintValue, DatabaseId, DbError, NamedValue, Result, WhereClause,
};
use std::sync::Arc;

/// A `{table, id}` record handle.
///
/// Equal IDs in the same table denote the same record; ID 0 is reserved
/// "no object" and never appears on a live handle. The handle stays
/// valid while its manager is alive and the record has not been deleted.
pub struct ObjectRef {
    obj_mgr: Arc<ObjectManager>,
    table_name: String,
    db_id: DatabaseId,
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRef")
            .field("table_name", &self.table_name)
            .field("db_id", &self.db_id)
            .finish()
    }
}

impl ObjectRef {
    pub(crate) fn new(
        obj_mgr: Arc<ObjectManager>,
        table_name: impl Into<String>,
        db_id: DatabaseId,
    ) -> Self {
        ObjectRef {
            obj_mgr,
            table_name: table_name.into(),
            db_id,
        }
    }

    pub fn id(&self) -> DatabaseId {
        self.db_id
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Read one column of this record. Routes through the query path
    /// when the back-end supports it, and through the raw-byte fast path
    /// for fixed-width columns otherwise.
    pub fn get_value(&self, column: &str) -> Result<ColumnValue> {
        let supports_query = self
            .obj_mgr
            .with_backend(|b| Ok(b.supports_object_query()))?;

        if supports_query {
            let spec = QuerySpec {
                table: self.table_name.clone(),
                columns: vec![column.to_string()],
                where_clauses: vec![WhereClause::new(
                    "Id",
                    Constraint::Equal,
                    ConstraintValue::Scalar(self.db_id.into()),
                )],
                order_by: None,
                limit: Some(1),
            };
            return self.obj_mgr.safe_transaction(|| {
                self.obj_mgr.with_backend(|backend| {
                    let mut cursor = backend.prepare_query(&spec)?;
                    let row = cursor.next_row()?.ok_or_else(|| {
                        DbError::IndexOutOfRange(format!(
                            "no record with Id {} in table '{}'",
                            self.db_id, self.table_name
                        ))
                    })?;
                    row.into_iter().next().ok_or(DbError::TypeMismatch {
                        column: column.to_string(),
                    })
                })
            });
        }

        // Raw-byte path for engines without query support.
        let dtype = self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.column_data_type(&self.table_name, column))
        })?;
        let width = dtype.fixed_width().ok_or(DbError::TypeMismatch {
            column: column.to_string(),
        })?;
        let mut buf = vec![0u8; width];
        self.obj_mgr.safe_transaction(|| {
            self.obj_mgr.with_backend(|b| {
                b.read_raw_bytes(&self.table_name, column, self.db_id, &mut buf)
            })
        })?;
        ColumnValue::unpack_fixed(dtype, &buf).ok_or(DbError::TypeMismatch {
            column: column.to_string(),
        })
    }

    /// Write one column of this record.
    pub fn set_value(&self, column: &str, value: impl Into<ColumnValue>) -> Result<()> {
        let values = [NamedValue::new(column, value.into())];
        let clauses = [WhereClause::new(
            "Id",
            Constraint::Equal,
            ConstraintValue::Scalar(self.db_id.into()),
        )];
        self.obj_mgr.safe_transaction(|| {
            self.obj_mgr
                .with_backend(|b| b.perform_update(&self.table_name, &values, &clauses))
        })?;
        Ok(())
    }

    pub fn get_i32(&self, column: &str) -> Result<i32> {
        self.get_integer(column).map(|v| v as i32)
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get_integer(column)
    }

    pub fn get_u32(&self, column: &str) -> Result<u32> {
        self.get_integer(column).map(|v| v as u32)
    }

    pub fn get_u64(&self, column: &str) -> Result<u64> {
        self.get_integer(column).map(|v| v as u64)
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        let value = self.get_value(column)?;
        value.as_f64().ok_or(DbError::TypeMismatch {
            column: column.to_string(),
        })
    }

    pub fn get_string(&self, column: &str) -> Result<String> {
        match self.get_value(column)? {
            ColumnValue::String(s) => Ok(s),
            _ => Err(DbError::TypeMismatch {
                column: column.to_string(),
            }),
        }
    }

    pub fn get_blob(&self, column: &str) -> Result<Vec<u8>> {
        match self.get_value(column)? {
            ColumnValue::Blob(bytes) => Ok(bytes),
            _ => Err(DbError::TypeMismatch {
                column: column.to_string(),
            }),
        }
    }

    fn get_integer(&self, column: &str) -> Result<i64> {
        let value = self.get_value(column)?;
        value.as_i64().ok_or(DbError::TypeMismatch {
            column: column.to_string(),
        })
    }

    pub fn set_i32(&self, column: &str, value: i32) -> Result<()> {
        self.set_value(column, value)
    }

    pub fn set_i64(&self, column: &str, value: i64) -> Result<()> {
        self.set_value(column, value)
    }

    pub fn set_u64(&self, column: &str, value: u64) -> Result<()> {
        self.set_value(column, value)
    }

    pub fn set_f64(&self, column: &str, value: f64) -> Result<()> {
        self.set_value(column, value)
    }

    pub fn set_string(&self, column: &str, value: impl Into<String>) -> Result<()> {
        self.set_value(column, value.into())
    }

    pub fn set_blob(&self, column: &str, value: Vec<u8>) -> Result<()> {
        self.set_value(column, value)
    }

    /// The manager this record handle borrows from.
    pub fn object_manager_handle(&self) -> &Arc<ObjectManager> {
        &self.obj_mgr
    }
}
