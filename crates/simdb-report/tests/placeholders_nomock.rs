//! Late-binding placeholder semantics for SI row iteration.

use simdb_common::{ColumnValue, DatabaseId, DbError, NamedValue};
use simdb_core::schema::Schema;
use simdb_core::{ObjectManager, NO_OBJECT};
use simdb_report::{build_stats_schema, StatInstRowIterator, StatInstValueLookup};
use simdb_sqlite::SqliteBackend;
use std::path::Path;
use std::sync::Arc;

fn stats_manager(dir: &Path) -> Arc<ObjectManager> {
    let mut schema = Schema::new();
    build_stats_schema(&mut schema);
    let obj_mgr = ObjectManager::new(dir);
    obj_mgr
        .create_database_from_schema(schema, Box::new(SqliteBackend::new()))
        .unwrap();
    obj_mgr
}

/// A five-deep chain of hierarchy nodes rooted at the returned ID, with
/// two SI value rows attached to the root. Returns (root id, leaf id).
fn seed_hierarchy(obj_mgr: &Arc<ObjectManager>) -> (DatabaseId, DatabaseId) {
    let mut nodes = obj_mgr.get_table("ReportNodeHierarchy").unwrap().unwrap();
    let mut parent = NO_OBJECT;
    let mut ids = Vec::new();
    for (i, name) in ["top", "core0", "lsu", "dcache", "hit_rate"].iter().enumerate() {
        let record = nodes
            .create_object_with_args(&[
                NamedValue::new("ParentNodeID", ColumnValue::fkey(parent)),
                NamedValue::new("Name", *name),
                NamedValue::new("Ordinal", i as i32),
            ])
            .unwrap()
            .unwrap();
        parent = record.id();
        ids.push(record.id());
    }
    let root = ids[0];

    let mut si_values = obj_mgr
        .get_table("SingleUpdateStatInstValues")
        .unwrap()
        .unwrap();
    for row in [&[1.0f64, 2.0, 3.0][..], &[4.0, 5.0, 6.0][..]] {
        let blob: ColumnValue = row.into();
        si_values
            .create_object_with_args(&[
                NamedValue::new("RootReportNodeID", ColumnValue::fkey(root)),
                NamedValue::new("NumPts", row.len() as i32),
                NamedValue::new("WasCompressed", 0i32),
                NamedValue::new("RawBytes", blob),
            ])
            .unwrap();
    }

    (root, *ids.last().unwrap())
}

#[test]
fn placeholder_row_iterator_fails_until_realized() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let (_root, leaf) = seed_hierarchy(&obj_mgr);

    let mut iter = StatInstRowIterator::placeholder(leaf, &obj_mgr);
    assert!(matches!(
        iter.get_next(),
        Err(DbError::PlaceholderNotRealized)
    ));
    assert!(matches!(
        iter.row_accessor(),
        Err(DbError::PlaceholderNotRealized)
    ));

    // Realization walks the hierarchy up to the root and the same call
    // then advances normally.
    iter.realize_placeholder().unwrap();
    assert!(iter.get_next().unwrap());

    let accessor = iter.row_accessor().unwrap();
    assert_eq!(accessor.current_row(), vec![1.0, 2.0, 3.0]);

    assert!(iter.get_next().unwrap());
    assert_eq!(accessor.current_row(), vec![4.0, 5.0, 6.0]);
    assert!(!iter.get_next().unwrap());
}

#[test]
fn realized_iterator_from_root_id_needs_no_walk() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let (root, _leaf) = seed_hierarchy(&obj_mgr);

    let mut iter = StatInstRowIterator::new(root, &obj_mgr).unwrap();
    assert!(iter.get_next().unwrap());
    assert_eq!(iter.row_accessor().unwrap().current_row(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn value_lookup_placeholder_pairs_with_an_accessor() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let (root, _leaf) = seed_hierarchy(&obj_mgr);

    let mut lookup = StatInstValueLookup::placeholder(1);
    assert!(matches!(
        lookup.current_value(),
        Err(DbError::PlaceholderNotRealized)
    ));

    let mut iter = StatInstRowIterator::new(root, &obj_mgr).unwrap();
    let accessor = iter.row_accessor().unwrap();
    lookup.realize_placeholder(&accessor);

    assert!(iter.get_next().unwrap());
    assert!(lookup.is_index_valid_for_current_row().unwrap());
    assert_eq!(lookup.current_value().unwrap(), 2.0);

    assert!(iter.get_next().unwrap());
    assert_eq!(lookup.current_value().unwrap(), 5.0);

    // An index past the row is caught by the validity probe.
    let wild = StatInstValueLookup::new(&accessor, 17);
    assert!(!wild.is_index_valid_for_current_row().unwrap());
    assert!(wild.current_value().is_err());
}
