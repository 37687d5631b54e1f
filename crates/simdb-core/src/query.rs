//! Constrained record queries without query text.
//!
//! [`ObjectQuery`] accumulates typed WHERE clauses, projected columns,
//! and optional ORDER BY / LIMIT clauses, then compiles the lot into
//! the back-end's native retrieval mechanism. A [`ResultIter`] steps
//! the match set row by row, copying each row's column values directly
//! into caller-owned destinations handed to every
//! [`get_next`](ResultIter::get_next) call.

use crate::backend::{ColumnOrdering, QuerySpec, RowCursor};
use crate::object_manager::ObjectManager;
use simdb_common::{ColumnValue, Constraint, ConstraintValue, DbError, Result, WhereClause};
use std::sync::Arc;

/// A caller-owned destination for one projected column.
///
/// Integer destinations accept any integer column, narrowed or widened
/// to the destination width. `String` destinations take ownership of
/// the column's text. `Blob` destinations are resized to the blob's
/// length. `DoubleVec` decodes a packed little-endian double blob.
pub enum DestColumn<'a> {
    Char(&'a mut i8),
    Int8(&'a mut i8),
    Int16(&'a mut i16),
    Int32(&'a mut i32),
    Int64(&'a mut i64),
    Uint8(&'a mut u8),
    Uint16(&'a mut u16),
    Uint32(&'a mut u32),
    Uint64(&'a mut u64),
    Float(&'a mut f32),
    Double(&'a mut f64),
    String(&'a mut String),
    Blob(&'a mut Vec<u8>),
    DoubleVec(&'a mut Vec<f64>),
}

impl DestColumn<'_> {
    fn write(&mut self, column: &str, value: ColumnValue) -> Result<()> {
        let mismatch = || DbError::TypeMismatch {
            column: column.to_string(),
        };
        match self {
            DestColumn::Char(dest) | DestColumn::Int8(dest) => {
                **dest = value.as_i64().ok_or_else(mismatch)? as i8;
            }
            DestColumn::Int16(dest) => **dest = value.as_i64().ok_or_else(mismatch)? as i16,
            DestColumn::Int32(dest) => **dest = value.as_i64().ok_or_else(mismatch)? as i32,
            DestColumn::Int64(dest) => **dest = value.as_i64().ok_or_else(mismatch)?,
            DestColumn::Uint8(dest) => **dest = value.as_i64().ok_or_else(mismatch)? as u8,
            DestColumn::Uint16(dest) => **dest = value.as_i64().ok_or_else(mismatch)? as u16,
            DestColumn::Uint32(dest) => **dest = value.as_i64().ok_or_else(mismatch)? as u32,
            DestColumn::Uint64(dest) => **dest = value.as_i64().ok_or_else(mismatch)? as u64,
            DestColumn::Float(dest) => **dest = value.as_f64().ok_or_else(mismatch)? as f32,
            DestColumn::Double(dest) => **dest = value.as_f64().ok_or_else(mismatch)?,
            DestColumn::String(dest) => match value {
                ColumnValue::String(s) => **dest = s,
                _ => return Err(mismatch()),
            },
            DestColumn::Blob(dest) => match value {
                ColumnValue::Blob(bytes) => **dest = bytes,
                _ => return Err(mismatch()),
            },
            DestColumn::DoubleVec(dest) => match value {
                ColumnValue::Blob(bytes) => **dest = decode_doubles(&bytes, column)?,
                _ => return Err(mismatch()),
            },
        }
        Ok(())
    }
}

/// Decode a packed little-endian double blob.
pub fn decode_doubles(bytes: &[u8], column: &str) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(DbError::TypeMismatch {
            column: column.to_string(),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().expect("8-byte chunk")))
        .collect())
}

/// Typed constraint builder over one table.
pub struct ObjectQuery {
    obj_mgr: Arc<ObjectManager>,
    table_name: String,
    where_clauses: Vec<WhereClause>,
    columns: Vec<String>,
    order_by: Option<(String, ColumnOrdering)>,
    limit: Option<u32>,
}

impl ObjectQuery {
    pub fn new(obj_mgr: &Arc<ObjectManager>, table_name: impl Into<String>) -> Self {
        ObjectQuery {
            obj_mgr: Arc::clone(obj_mgr),
            table_name: table_name.into(),
            where_clauses: Vec::new(),
            columns: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// AND another constraint onto the query. Express OR through
    /// [`Constraint::InSet`] with a [`ConstraintValue::Set`]. Equality
    /// against a floating-point target matches within machine epsilon.
    pub fn add_constraint(
        &mut self,
        column: impl Into<String>,
        constraint: Constraint,
        value: impl Into<ConstraintValue>,
    ) -> &mut Self {
        self.where_clauses
            .push(WhereClause::new(column.into(), constraint, value));
        self
    }

    /// Project the named column. Every row the iterator yields carries
    /// the projected columns in selection order; the implicit `Id`
    /// column is a valid projection.
    pub fn select(&mut self, column: impl Into<String>) -> &mut Self {
        self.columns.push(column.into());
        self
    }

    /// Apply an ORDER BY clause. Ties between equal keys fall back to
    /// insertion order (ascending implicit `Id`).
    pub fn order_by(&mut self, column: impl Into<String>, ordering: ColumnOrdering) -> &mut Self {
        self.order_by = Some((column.into(), ordering));
        self
    }

    /// Apply a LIMIT clause. A limit of 0 is ignored with a warning.
    pub fn set_limit(&mut self, limit: u32) -> &mut Self {
        if limit == 0 {
            tracing::warn!("ObjectQuery::set_limit(0) ignored; treated as no limit");
            return self;
        }
        self.limit = Some(limit);
        self
    }

    /// Number of records matching the current constraints. Leaves all
    /// pending constraints, projections, and clauses in place.
    pub fn count_matches(&mut self) -> Result<usize> {
        let spec = self.build_spec(vec!["Id".to_string()])?;
        self.obj_mgr.safe_transaction(|| {
            self.obj_mgr.with_backend(|backend| {
                if !backend.supports_object_query() {
                    return Ok(0);
                }
                let mut cursor = backend.prepare_query(&spec)?;
                let mut count = 0usize;
                while cursor.next_row()?.is_some() {
                    count += 1;
                }
                Ok(count)
            })
        })
    }

    /// Compile and run the query. Returns `None` when no columns were
    /// selected or the back-end has no query support. Resets the
    /// builder's state.
    pub fn execute(&mut self) -> Result<Option<ResultIter>> {
        if self.columns.is_empty() {
            tracing::warn!(
                table = %self.table_name,
                "ObjectQuery executed without any selected columns"
            );
            return Ok(None);
        }
        let columns = self.columns.clone();
        let Some(cursor) = self.prepare(columns.clone())? else {
            return Ok(None);
        };
        self.reset();
        Ok(Some(ResultIter { cursor, columns }))
    }

    /// Compile and run the query, yielding owned decoded rows instead
    /// of filling destinations. `columns` is the projection, in result
    /// order. Resets the builder's state.
    pub fn execute_rows(&mut self, columns: &[&str]) -> Result<Option<RowIter>> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let Some(cursor) = self.prepare(columns.clone())? else {
            return Ok(None);
        };
        self.reset();
        Ok(Some(RowIter { cursor, columns }))
    }

    fn prepare(&mut self, columns: Vec<String>) -> Result<Option<Box<dyn RowCursor>>> {
        let supports = self
            .obj_mgr
            .with_backend(|b| Ok(b.supports_object_query()))?;
        if !supports {
            return Ok(None);
        }
        let spec = self.build_spec(columns)?;
        let cursor = self
            .obj_mgr
            .safe_transaction(|| self.obj_mgr.with_backend(|b| b.prepare_query(&spec)))?;
        Ok(Some(cursor))
    }

    fn build_spec(&self, columns: Vec<String>) -> Result<QuerySpec> {
        let table = self
            .obj_mgr
            .get_qualified_table_name(&self.table_name, "")
            .or_else(|| {
                self.obj_mgr
                    .get_qualified_table_name(&self.table_name, "stats")
            })
            .ok_or_else(|| {
                DbError::General(format!(
                    "no table named '{}' in this database",
                    self.table_name
                ))
            })?;
        Ok(QuerySpec {
            table,
            columns,
            where_clauses: self.where_clauses.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
        })
    }

    fn reset(&mut self) {
        self.where_clauses.clear();
        self.columns.clear();
        self.order_by = None;
        self.limit = None;
    }
}

/// Row-by-row extractor that fills caller-owned destinations.
pub struct ResultIter {
    cursor: Box<dyn RowCursor>,
    columns: Vec<String>,
}

impl ResultIter {
    /// Advance to the next matching record, copying its column values
    /// into `dests` (one destination per projected column, in selection
    /// order). Returns `false` when the match set is exhausted, leaving
    /// the destinations untouched.
    pub fn get_next(&mut self, dests: &mut [DestColumn<'_>]) -> Result<bool> {
        if dests.len() != self.columns.len() {
            return Err(DbError::IndexOutOfRange(format!(
                "{} columns selected, {} destinations supplied",
                self.columns.len(),
                dests.len()
            )));
        }
        let Some(row) = self.cursor.next_row()? else {
            return Ok(false);
        };
        for ((value, column), dest) in row
            .into_iter()
            .zip(self.columns.iter())
            .zip(dests.iter_mut())
        {
            dest.write(column, value)?;
        }
        Ok(true)
    }
}

/// Row-by-row extractor yielding owned values, for cursors that must
/// own their buffers across iterations.
pub struct RowIter {
    cursor: Box<dyn RowCursor>,
    columns: Vec<String>,
}

impl RowIter {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>> {
        self.cursor.next_row()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_narrowing_and_ownership() {
        let mut small: i16 = 0;
        DestColumn::Int16(&mut small)
            .write("A", ColumnValue::Int64(-7))
            .unwrap();
        assert_eq!(small, -7);

        let mut text = String::new();
        DestColumn::String(&mut text)
            .write("B", ColumnValue::String("hello".into()))
            .unwrap();
        assert_eq!(text, "hello");

        let mut wide: u64 = 0;
        assert!(DestColumn::Uint64(&mut wide)
            .write("C", ColumnValue::String("not a number".into()))
            .is_err());
    }

    #[test]
    fn double_vec_decodes_packed_blob() {
        let payload: ColumnValue = [1.5f64, -2.5].as_slice().into();
        let mut values = Vec::new();
        DestColumn::DoubleVec(&mut values)
            .write("V", payload)
            .unwrap();
        assert_eq!(values, vec![1.5, -2.5]);

        let mut bad = Vec::new();
        assert!(DestColumn::DoubleVec(&mut bad)
            .write("V", ColumnValue::Blob(vec![0u8; 7]))
            .is_err());
    }
}
