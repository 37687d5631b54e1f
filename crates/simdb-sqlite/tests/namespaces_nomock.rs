//! Two namespaces sharing one database file.
//!
//! The `random` and `incrementing` namespaces both map to the sqlite
//! storage type, so they share one manager and one file, each under its
//! own `ns$Table` prefix. Writes flow through separate task queues
//! multiplexed onto the root's shared controller, and everything must
//! still be there after closing and reopening the file.

use rand::Rng;
use simdb_common::{ColumnDataType, NamedValue};
use simdb_core::tasks::set_max_task_threads;
use simdb_core::{task_from_fn, DatabaseRoot, DestColumn, ObjectManager, ObjectQuery};
use std::path::PathBuf;
use std::sync::Arc;

fn collect_values(obj_mgr: &Arc<ObjectManager>, table: &str) -> Vec<i64> {
    let mut query = ObjectQuery::new(obj_mgr, table);
    query.select("Value");
    let mut iter = query.execute().unwrap().expect("query support");

    let mut value: i64 = 0;
    let mut values = Vec::new();
    while iter
        .get_next(&mut [DestColumn::Int64(&mut value)])
        .unwrap()
    {
        values.push(value);
    }
    values
}

#[test]
fn two_namespaces_into_one_file() {
    set_max_task_threads(8);
    simdb_sqlite::register();
    DatabaseRoot::register_database_namespace("random", "SQLite").unwrap();
    DatabaseRoot::register_database_namespace("Incrementing", "sqlite").unwrap();
    for ns in ["random", "incrementing"] {
        DatabaseRoot::register_schema_builder(ns, |schema| {
            schema
                .add_table("Numbers")
                .add_column("Value", ColumnDataType::Int64);
        });
    }

    let dir = tempfile::tempdir().unwrap();
    let mut random_inputs: Vec<i64> = Vec::new();
    let db_file: PathBuf;

    {
        let root = DatabaseRoot::new(dir.path());
        let random_ns = root.get_namespace("Random").unwrap();
        let incr_ns = root.get_namespace("incrementing").unwrap();

        let random_db = random_ns.database().unwrap();
        let incr_db = incr_ns.database().unwrap();

        // Same storage type, same manager, same file.
        assert!(std::sync::Arc::ptr_eq(
            random_db.object_manager(),
            incr_db.object_manager()
        ));
        db_file = random_db.database_file();

        let mut rng = rand::rng();
        for i in 0..100i64 {
            let value: i64 = rng.random_range(0..1_000_000);
            random_inputs.push(value);

            let mut random_table = random_db.get_table("Numbers").unwrap().unwrap();
            random_db
                .task_queue()
                .add_worker_task(task_from_fn(move || {
                    random_table.create_object_with_args(&[NamedValue::new("Value", value)])?;
                    Ok(())
                }))
                .unwrap();

            let mut incr_table = incr_db.get_table("Numbers").unwrap().unwrap();
            incr_db
                .task_queue()
                .add_worker_task(task_from_fn(move || {
                    incr_table.create_object_with_args(&[NamedValue::new("Value", i)])?;
                    Ok(())
                }))
                .unwrap();
        }

        // Join the shared worker thread so every queued write has
        // committed before the counts below.
        root.task_controller().stop_thread();

        let mut query = random_db.object_query("Numbers").unwrap();
        assert_eq!(query.count_matches().unwrap(), 100);
        let mut query = incr_db.object_query("Numbers").unwrap();
        assert_eq!(query.count_matches().unwrap(), 100);

        // Unhinted resolution is ambiguous with two candidates.
        let obj_mgr = random_db.object_manager();
        assert_eq!(obj_mgr.get_qualified_table_name("Numbers", ""), None);
        assert_eq!(
            obj_mgr.get_qualified_table_name("Numbers", "random"),
            Some("random$Numbers".to_string())
        );
    }

    // Reopen the single file cold and check both namespaces' rows.
    let obj_mgr = ObjectManager::new(dir.path());
    assert!(obj_mgr.connect_to_existing_database(&db_file).unwrap());

    let mut reread = collect_values(&obj_mgr, "random$Numbers");
    reread.sort_unstable();
    let mut expected = random_inputs.clone();
    expected.sort_unstable();
    assert_eq!(reread, expected);

    let mut reread = collect_values(&obj_mgr, "incrementing$Numbers");
    reread.sort_unstable();
    assert_eq!(reread, (0..100).collect::<Vec<i64>>());
}
