//! Row-at-a-time access to single-update statistics values.
//!
//! A [`StatInstRowIterator`] walks the `SingleUpdateStatInstValues` rows
//! of one report root, decoding each packed blob into a shared row that
//! [`StatInstValueLookup`](crate::value_lookup::StatInstValueLookup)
//! objects read individual SI values out of.
//!
//! Both this type and the value lookup support a "placeholder" form for
//! late binding: construct the placeholder with what you have on hand,
//! and call `realize_placeholder` when the rest arrives. Every data
//! method on an unrealized placeholder fails with
//! [`DbError::PlaceholderNotRealized`].

use simdb_common::{Constraint, DatabaseId, DbError, Result, NO_OBJECT};
use simdb_core::{decode_doubles, ColumnValue, ObjectManager, ObjectQuery, RowIter};
use std::sync::{Arc, RwLock};

/// Read-only view of the row iterator's current SI values.
///
/// Handed to every SI in a report; deliberately exposes no way to
/// advance the iterator, since advancing is irreversible for all
/// lookups sharing the row.
pub struct RowAccessor {
    row: RwLock<Vec<f64>>,
}

impl RowAccessor {
    fn new() -> Arc<Self> {
        Arc::new(RowAccessor {
            row: RwLock::new(Vec::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.row.read().expect("row lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The SI value at `index` in the current row, or `None` when the
    /// index is out of range.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.row.read().expect("row lock poisoned").get(index).copied()
    }

    /// A copy of the current row.
    pub fn current_row(&self) -> Vec<f64> {
        self.row.read().expect("row lock poisoned").clone()
    }

    fn set_row(&self, values: Vec<f64>) {
        *self.row.write().expect("row lock poisoned") = values;
    }
}

enum IteratorState {
    /// Constructed with a non-root hierarchy node; the walk up to the
    /// root is deferred until realization.
    Placeholder {
        report_hier_node_id: DatabaseId,
        obj_mgr: Arc<ObjectManager>,
    },
    Realized {
        rows: Option<RowIter>,
        accessor: Arc<RowAccessor>,
    },
}

/// Cursor over one report root's SI value rows.
pub struct StatInstRowIterator {
    state: IteratorState,
}

impl StatInstRowIterator {
    /// Construct a realized iterator for a root-level report node (one
    /// whose `ParentNodeID` is 0 in `ReportNodeHierarchy`).
    pub fn new(root_report_node_id: DatabaseId, obj_mgr: &Arc<ObjectManager>) -> Result<Self> {
        let mut query = ObjectQuery::new(obj_mgr, "SingleUpdateStatInstValues");
        query.add_constraint(
            "RootReportNodeID",
            Constraint::Equal,
            root_report_node_id as i32,
        );
        let rows = query.execute_rows(&["RawBytes", "NumPts", "WasCompressed"])?;
        if rows.is_none() {
            return Err(DbError::General(
                "StatInstRowIterator requires a back-end with object-query support".into(),
            ));
        }
        Ok(StatInstRowIterator {
            state: IteratorState::Realized {
                rows,
                accessor: RowAccessor::new(),
            },
        })
    }

    /// Construct a placeholder from any hierarchy node ID. Finding the
    /// node's root costs a database walk, which is deferred until
    /// [`realize_placeholder`](Self::realize_placeholder).
    pub fn placeholder(report_hier_node_id: DatabaseId, obj_mgr: &Arc<ObjectManager>) -> Self {
        StatInstRowIterator {
            state: IteratorState::Placeholder {
                report_hier_node_id,
                obj_mgr: Arc::clone(obj_mgr),
            },
        }
    }

    /// Resolve a placeholder into a fully functional iterator. A no-op
    /// on an already-realized iterator.
    pub fn realize_placeholder(&mut self) -> Result<()> {
        let (node_id, obj_mgr) = match &self.state {
            IteratorState::Placeholder {
                report_hier_node_id,
                obj_mgr,
            } => (*report_hier_node_id, Arc::clone(obj_mgr)),
            IteratorState::Realized { .. } => return Ok(()),
        };

        let root_id = find_root_report_node(&obj_mgr, node_id)?;
        *self = StatInstRowIterator::new(root_id, &obj_mgr)?;
        Ok(())
    }

    /// The shared accessor for this iterator's current row.
    pub fn row_accessor(&self) -> Result<Arc<RowAccessor>> {
        match &self.state {
            IteratorState::Placeholder { .. } => Err(DbError::PlaceholderNotRealized),
            IteratorState::Realized { accessor, .. } => Ok(Arc::clone(accessor)),
        }
    }

    /// Advance to the next SI row. Returns `false` at the end of the
    /// data set, after which the accessor's contents are unspecified.
    pub fn get_next(&mut self) -> Result<bool> {
        match &mut self.state {
            IteratorState::Placeholder { .. } => Err(DbError::PlaceholderNotRealized),
            IteratorState::Realized { rows, accessor } => {
                let Some(rows) = rows.as_mut() else {
                    return Ok(false);
                };
                let Some(row) = rows.next_row()? else {
                    return Ok(false);
                };

                let mut values = row.into_iter();
                let raw = match values.next() {
                    Some(ColumnValue::Blob(bytes)) => bytes,
                    _ => {
                        return Err(DbError::TypeMismatch {
                            column: "RawBytes".into(),
                        })
                    }
                };
                let was_compressed =
                    values.nth(1).and_then(|v| v.as_i64()).unwrap_or(0) != 0;
                if was_compressed {
                    return Err(DbError::General(
                        "compressed SI row; decompress caller-side before iteration".into(),
                    ));
                }
                accessor.set_row(decode_doubles(&raw, "RawBytes")?);
                Ok(true)
            }
        }
    }
}

/// Walk `ReportNodeHierarchy` upward from `node_id` until a record with
/// `ParentNodeID == 0` is found.
fn find_root_report_node(
    obj_mgr: &Arc<ObjectManager>,
    node_id: DatabaseId,
) -> Result<DatabaseId> {
    let mut current = node_id;
    loop {
        let record = obj_mgr
            .find_object("ReportNodeHierarchy", current)?
            .ok_or_else(|| {
                DbError::IndexOutOfRange(format!("no report hierarchy node with Id {}", current))
            })?;
        let parent = record.get_i32("ParentNodeID")? as DatabaseId;
        if parent == NO_OBJECT {
            return Ok(current);
        }
        current = parent;
    }
}
