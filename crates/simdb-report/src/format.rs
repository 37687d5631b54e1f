//! Report regeneration from database records.
//!
//! The verifier rebuilds report files from the database and diffs them
//! against the baselines the simulation wrote. Only CSV output is
//! needed for that; richer formatters live outside the database layer.

use crate::timeseries::ReportTimeseries;
use simdb_common::{Constraint, DatabaseId, DbError, Result, NO_OBJECT};
use simdb_core::{
    decode_doubles, ColumnOrdering, ColumnValue, ObjectManager, ObjectQuery,
};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Target file format for regenerated reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Csv,
}

/// Stream every chunk of a timeseries to `dest` as CSV, one line per
/// chunk, samples formatted the way the simulation's own CSV writer
/// formats doubles.
pub fn write_timeseries_csv(timeseries: &ReportTimeseries, dest: &Path) -> Result<()> {
    let mut out = String::new();
    writeln!(out, "# report: {}", timeseries.header().report_name()?)
        .expect("string write cannot fail");

    let mut iter = timeseries.range_iterator();
    iter.position_range_around_simulated_picoseconds(0, u64::MAX)?;
    while iter.get_next()? {
        if iter.current_slice_was_compressed() {
            return Err(DbError::General(
                "compressed chunk; decompress caller-side before CSV export".into(),
            ));
        }
        out.push_str(&csv_line(iter.current_slice_data_values()));
        out.push('\n');
    }

    std::fs::write(dest, out)?;
    Ok(())
}

/// Regenerate a non-timeseries report: walk the node hierarchy from
/// `root_node_id` for the header line, then emit one CSV line per
/// single-update SI row of that root.
pub fn write_hierarchy_csv(
    obj_mgr: &Arc<ObjectManager>,
    root_node_id: DatabaseId,
    dest: &Path,
) -> Result<()> {
    let mut out = String::new();

    let leaves = collect_leaf_names(obj_mgr, root_node_id)?;
    writeln!(out, "# {}", leaves.join(",")).expect("string write cannot fail");

    let mut query = ObjectQuery::new(obj_mgr, "SingleUpdateStatInstValues");
    query
        .add_constraint("RootReportNodeID", Constraint::Equal, root_node_id as i32)
        .order_by("Id", ColumnOrdering::Ascending);
    let Some(mut rows) = query.execute_rows(&["RawBytes", "WasCompressed"])? else {
        return Err(DbError::NotImplemented("object queries on this back-end"));
    };
    while let Some(row) = rows.next_row()? {
        let mut values = row.into_iter();
        let raw = match values.next() {
            Some(ColumnValue::Blob(bytes)) => bytes,
            _ => {
                return Err(DbError::TypeMismatch {
                    column: "RawBytes".into(),
                })
            }
        };
        if values.next().and_then(|v| v.as_i64()).unwrap_or(0) != 0 {
            return Err(DbError::General(
                "compressed SI row; decompress caller-side before CSV export".into(),
            ));
        }
        out.push_str(&csv_line(&decode_doubles(&raw, "RawBytes")?));
        out.push('\n');
    }

    std::fs::write(dest, out)?;
    Ok(())
}

/// Depth-first leaf names under `root_node_id`, children ordered by
/// their `Ordinal`.
fn collect_leaf_names(obj_mgr: &Arc<ObjectManager>, root_node_id: DatabaseId) -> Result<Vec<String>> {
    let mut leaves = Vec::new();
    let mut stack = vec![root_node_id];
    while let Some(node_id) = stack.pop() {
        let children = child_nodes(obj_mgr, node_id)?;
        if children.is_empty() && node_id != root_node_id {
            if let Some(record) = obj_mgr.find_object("ReportNodeHierarchy", node_id)? {
                leaves.push(record.get_string("Name")?);
            }
            continue;
        }
        // Reverse so the lowest ordinal pops first.
        for (child_id, _) in children.into_iter().rev() {
            stack.push(child_id);
        }
    }
    Ok(leaves)
}

fn child_nodes(
    obj_mgr: &Arc<ObjectManager>,
    parent_id: DatabaseId,
) -> Result<Vec<(DatabaseId, i32)>> {
    let mut query = ObjectQuery::new(obj_mgr, "ReportNodeHierarchy");
    query
        .add_constraint("ParentNodeID", Constraint::Equal, parent_id as i32)
        .order_by("Ordinal", ColumnOrdering::Ascending);
    let Some(mut rows) = query.execute_rows(&["Id", "Ordinal"])? else {
        return Err(DbError::NotImplemented("object queries on this back-end"));
    };

    let mut children = Vec::new();
    while let Some(row) = rows.next_row()? {
        let id = row.first().and_then(|v| v.as_i64()).unwrap_or(NO_OBJECT);
        let ordinal = row.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        if id != NO_OBJECT {
            children.push((id, ordinal));
        }
    }
    Ok(children)
}

fn csv_line(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format_double(*v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Integral doubles print without a decimal point, everything else with
/// the shortest roundtrip representation.
fn format_double(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_lines_format_like_the_simulator() {
        assert_eq!(csv_line(&[1.0, 2.5, 3.0]), "1,2.5,3");
        assert_eq!(csv_line(&[]), "");
    }
}
