//! ObjectManager behavior against the real SQLite back-end: value
//! round-trips, ID monotonicity, transaction atomicity and reentrancy,
//! and the update/delete builders.

mod support;

use simdb_common::{
    ColumnDataType, ColumnValue, Constraint, ConstraintValue, DatabaseId, DbError, NamedValue,
    WhereClause,
};
use simdb_core::schema::Schema;
use simdb_core::{DestColumn, ObjectManager, ObjectQuery};
use simdb_sqlite::SqliteBackend;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn employees_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_table("Employees")
        .add_column("EmployeeID", ColumnDataType::Int32)
        .add_column("Age", ColumnDataType::Int32)
        .add_column_with_default("Last", ColumnDataType::String, "unset")
        .add_column("Salary", ColumnDataType::Double)
        .add_column("Badge", ColumnDataType::Blob);
    schema
}

fn new_manager(dir: &Path) -> Arc<ObjectManager> {
    let obj_mgr = ObjectManager::new(dir);
    obj_mgr
        .create_database_from_schema(employees_schema(), Box::new(SqliteBackend::new()))
        .unwrap();
    obj_mgr
}

#[test]
fn written_values_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    let badge = vec![0xde, 0xad, 0xbe, 0xef];
    let record = table
        .create_object_with_args(&[
            NamedValue::new("EmployeeID", 104),
            NamedValue::new("Age", 41),
            NamedValue::new("Last", "Smith"),
            NamedValue::new("Salary", 1234.5f64),
            NamedValue::new("Badge", badge.clone()),
        ])
        .unwrap()
        .unwrap();

    let found = obj_mgr
        .find_object("Employees", record.id())
        .unwrap()
        .expect("record should exist");
    assert_eq!(found.get_i32("EmployeeID").unwrap(), 104);
    assert_eq!(found.get_i32("Age").unwrap(), 41);
    assert_eq!(found.get_string("Last").unwrap(), "Smith");
    assert!((found.get_f64("Salary").unwrap() - 1234.5).abs() <= f64::EPSILON);
    assert_eq!(found.get_blob("Badge").unwrap(), badge);

    // Unset columns take their schema defaults.
    let bare = table.create_object().unwrap().unwrap();
    assert_eq!(bare.get_string("Last").unwrap(), "unset");

    assert!(obj_mgr.find_object("Employees", 9999).unwrap().is_none());
}

#[test]
fn ids_increase_monotonically() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    let mut last_id = 0;
    for _ in 0..50 {
        let record = table.create_object().unwrap().unwrap();
        assert!(record.id() > last_id);
        last_id = record.id();
    }
}

#[test]
fn failed_transactions_leave_no_partial_state() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    let result: Result<(), DbError> = obj_mgr.safe_transaction(|| {
        table.create_object_with_args(&[NamedValue::new("EmployeeID", 1)])?;
        table.create_object_with_args(&[NamedValue::new("EmployeeID", 2)])?;
        Err(DbError::General("forced mid-transaction failure".into()))
    });
    assert!(result.is_err());

    let mut query = ObjectQuery::new(&obj_mgr, "Employees");
    assert_eq!(query.count_matches().unwrap(), 0);
}

#[test]
fn update_and_delete_builders() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    for (id, age) in [(104, 41), (398, 22), (500, 50)] {
        table
            .create_object_with_args(&[
                NamedValue::new("EmployeeID", id),
                NamedValue::new("Age", age),
            ])
            .unwrap();
    }

    let updated = table
        .update_row_values(&[NamedValue::new("Last", "Senior")])
        .for_records_where(&[WhereClause::new("Age", Constraint::Greater, 30)])
        .unwrap();
    assert_eq!(updated, 2);

    table
        .delete_records_where(&[WhereClause::new("Age", Constraint::Less, 30)])
        .unwrap();
    let mut query = ObjectQuery::new(&obj_mgr, "Employees");
    assert_eq!(query.count_matches().unwrap(), 2);
}

#[test]
fn interleaved_calls_break_the_update_chain() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    table.update_row_values(&[NamedValue::new("Age", 30)]);
    // A foreign call before the terminal for_records_where poisons the
    // staged update.
    let err = table.create_object().unwrap_err();
    assert!(matches!(err, DbError::BrokenUpdateChain(_)));

    let err = table
        .for_records_where(&[WhereClause::new("Age", Constraint::Greater, 0)])
        .unwrap_err();
    assert!(matches!(err, DbError::BrokenUpdateChain(_)));
}

#[test]
fn batched_lookup_preserves_input_shape() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(table.create_object().unwrap().unwrap().id());
    }

    let probe: Vec<DatabaseId> = vec![ids[0], 4444, ids[2]];
    let found = obj_mgr.find_objects("Employees", &probe).unwrap();
    assert_eq!(found.len(), 3);
    assert!(found[0].is_some());
    assert!(found[1].is_none());
    assert!(found[2].is_some());

    // Empty input means "all records".
    let all = obj_mgr.find_objects("Employees", &[]).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(Option::is_some));
}

#[test]
fn summary_capture_scans_and_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let mut schema = Schema::new();
    schema
        .add_table("Latencies")
        .add_column("Cycles", ColumnDataType::Uint32)
        .add_column("Tag", ColumnDataType::String);
    schema.summarize_table("Latencies");
    schema.add_summary_fn(
        "sum",
        Arc::new(|values: &[f64]| values.iter().sum()),
    );

    let obj_mgr = ObjectManager::new(dir.path());
    obj_mgr
        .create_database_from_schema(schema, Box::new(SqliteBackend::new()))
        .unwrap();

    let mut table = obj_mgr.get_table("Latencies").unwrap().unwrap();
    for cycles in [2u32, 8, 5] {
        table
            .create_object_with_args(&[NamedValue::new("Cycles", cycles)])
            .unwrap();
    }

    obj_mgr.capture_table_summaries().unwrap();

    let rows = obj_mgr.find_objects("Latencies_Summary", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    let summary = rows[0].as_ref().unwrap();
    assert_eq!(summary.get_f64("Cycles_min").unwrap(), 2.0);
    assert_eq!(summary.get_f64("Cycles_max").unwrap(), 8.0);
    assert_eq!(summary.get_f64("Cycles_avg").unwrap(), 5.0);
    assert_eq!(summary.get_f64("Cycles_sum").unwrap(), 15.0);
}

#[test]
fn nested_safe_transactions_share_one_bracket() {
    let dir = tempfile::tempdir().unwrap();
    let begins = Arc::new(AtomicUsize::new(0));
    let commits = Arc::new(AtomicUsize::new(0));

    let obj_mgr = ObjectManager::new(dir.path());
    obj_mgr
        .create_database_from_schema(
            employees_schema(),
            Box::new(support::CountingBackend::new(&begins, &commits)),
        )
        .unwrap();
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();

    let begins_before = begins.load(Ordering::SeqCst);
    let commits_before = commits.load(Ordering::SeqCst);

    obj_mgr
        .safe_transaction(|| {
            table.create_object()?;
            obj_mgr.safe_transaction(|| {
                table.create_object()?;
                obj_mgr.safe_transaction(|| {
                    table.create_object()?;
                    Ok(())
                })
            })
        })
        .unwrap();

    assert_eq!(begins.load(Ordering::SeqCst), begins_before + 1);
    assert_eq!(commits.load(Ordering::SeqCst), commits_before + 1);

    let mut query = ObjectQuery::new(&obj_mgr, "Employees");
    assert_eq!(query.count_matches().unwrap(), 3);
}

#[test]
fn float_equality_matches_within_epsilon_via_query() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = new_manager(dir.path());
    let mut table = obj_mgr.get_table("Employees").unwrap().unwrap();
    table
        .create_object_with_args(&[NamedValue::new("Salary", 0.1f64 + 0.2f64)])
        .unwrap();

    let mut query = ObjectQuery::new(&obj_mgr, "Employees");
    query
        .add_constraint(
            "Salary",
            Constraint::Equal,
            ConstraintValue::Scalar(ColumnValue::Double(0.3)),
        )
        .select("Id");
    let mut iter = query.execute().unwrap().expect("query support");
    let mut id: i64 = 0;
    assert!(iter.get_next(&mut [DestColumn::Int64(&mut id)]).unwrap());
    assert_eq!(id, 1);
}
