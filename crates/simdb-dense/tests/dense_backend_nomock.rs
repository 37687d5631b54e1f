//! The dense back-end driven through the full ObjectManager stack.

use simdb_common::{ColumnDataType, DbError, NamedValue};
use simdb_core::schema::Schema;
use simdb_core::{ObjectManager, ObjectQuery};
use simdb_dense::DenseBackend;
use std::path::Path;
use std::sync::Arc;

fn samples_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_table("Samples")
        .add_column("Tick", ColumnDataType::Uint64)
        .add_column("Value", ColumnDataType::Double);
    schema
}

fn dense_manager(dir: &Path) -> Arc<ObjectManager> {
    let obj_mgr = ObjectManager::new(dir);
    obj_mgr
        .create_database_from_schema(samples_schema(), Box::new(DenseBackend::new()))
        .unwrap();
    obj_mgr
}

#[test]
fn fixed_size_records_round_trip_through_raw_reads() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = dense_manager(dir.path());
    let mut table = obj_mgr.get_table("Samples").unwrap().unwrap();
    assert!(table.is_fixed_size());

    // Column-value path.
    let record = table
        .create_object_with_args(&[
            NamedValue::new("Tick", 42u64),
            NamedValue::new("Value", 2.5f64),
        ])
        .unwrap()
        .unwrap();
    assert_eq!(record.get_u64("Tick").unwrap(), 42);
    assert!((record.get_f64("Value").unwrap() - 2.5).abs() <= f64::EPSILON);

    // Packed bulk-insert path; the handle is skipped by default.
    let mut packed = Vec::new();
    packed.extend_from_slice(&7u64.to_le_bytes());
    packed.extend_from_slice(&1.5f64.to_le_bytes());
    assert!(table.create_object_from_bytes(&packed).unwrap().is_none());

    let second = obj_mgr.find_object("Samples", 2).unwrap().unwrap();
    assert_eq!(second.get_u64("Tick").unwrap(), 7);

    // Existence probes work without query support.
    assert!(obj_mgr.find_object("Samples", 3).unwrap().is_none());
}

#[test]
fn unsupported_capabilities_fail_typed() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = dense_manager(dir.path());
    let mut table = obj_mgr.get_table("Samples").unwrap().unwrap();
    table
        .create_object_with_args(&[NamedValue::new("Tick", 1u64)])
        .unwrap();

    // No predicate engine: queries yield no iterator, deletes and
    // updates are not implemented.
    let mut query = ObjectQuery::new(&obj_mgr, "Samples");
    query.select("Tick");
    assert!(query.execute().unwrap().is_none());

    let err = table.delete_records_where(&[]).unwrap_err();
    assert!(matches!(err, DbError::NotImplemented(_)));
}

#[test]
fn container_reopens_through_backend_probing() {
    simdb_dense::register();
    let dir = tempfile::tempdir().unwrap();
    let db_file;
    {
        let obj_mgr = dense_manager(dir.path());
        let mut table = obj_mgr.get_table("Samples").unwrap().unwrap();
        for i in 0..5u64 {
            table
                .create_object_with_args(&[
                    NamedValue::new("Tick", i),
                    NamedValue::new("Value", i as f64 / 2.0),
                ])
                .unwrap();
        }
        db_file = obj_mgr.database_file();
        // Drop persists the container.
    }

    let obj_mgr = ObjectManager::new(dir.path());
    assert!(obj_mgr.connect_to_existing_database(&db_file).unwrap());

    let reopened = obj_mgr.find_object("Samples", 5).unwrap().unwrap();
    assert_eq!(reopened.get_u64("Tick").unwrap(), 4);
    assert!((reopened.get_f64("Value").unwrap() - 2.0).abs() <= f64::EPSILON);
    assert!(obj_mgr.find_object("Samples", 6).unwrap().is_none());
}
