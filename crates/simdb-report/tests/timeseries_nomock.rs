//! Chunked time-series write/read behavior over the SQLite back-end.

use simdb_core::schema::Schema;
use simdb_core::ObjectManager;
use simdb_report::{build_stats_schema, MajorOrdering, ReportTimeseries};
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

fn three_chunk_timeseries(obj_mgr: &Arc<ObjectManager>) -> ReportTimeseries {
    let timeseries = ReportTimeseries::new(obj_mgr).unwrap();
    for (pico, cycle, base) in [(130u64, 13u64, 1.0), (920, 92, 2.0), (1835, 183, 3.0)] {
        timeseries
            .write_statistic_inst_values_at_time_t(
                pico,
                cycle,
                &[base, base + 0.5],
                MajorOrdering::RowMajor,
            )
            .unwrap();
    }
    timeseries
}

#[test]
fn range_queries_return_intersecting_chunks_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let timeseries = three_chunk_timeseries(&obj_mgr);

    // The full range returns all three chunks, ascending by start time.
    let chunks = timeseries
        .statistic_inst_values_between_picoseconds(130, 1835)
        .unwrap();
    assert_eq!(
        chunks,
        vec![vec![1.0, 1.5], vec![2.0, 2.5], vec![3.0, 3.5]]
    );

    // A degenerate range hits exactly the chunk at that point.
    let chunks = timeseries
        .statistic_inst_values_between_picoseconds(920, 920)
        .unwrap();
    assert_eq!(chunks, vec![vec![2.0, 2.5]]);

    // The cycle index answers the same questions.
    let chunks = timeseries
        .statistic_inst_values_between_cycles(92, 183)
        .unwrap();
    assert_eq!(chunks, vec![vec![2.0, 2.5], vec![3.0, 3.5]]);
}

#[test]
fn out_of_range_queries_return_empty() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let timeseries = three_chunk_timeseries(&obj_mgr);

    let chunks = timeseries
        .statistic_inst_values_between_picoseconds(1835 + 5000, 1835 + 10_000)
        .unwrap();
    assert!(chunks.is_empty());

    // The extreme end of the index space must not fail either.
    let chunks = timeseries
        .statistic_inst_values_between_picoseconds(u64::MAX, u64::MAX)
        .unwrap();
    assert!(chunks.is_empty());
}

#[test]
fn interval_chunks_intersect_on_either_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let timeseries = ReportTimeseries::new(&obj_mgr).unwrap();
    timeseries
        .write_statistic_inst_values_in_time_range(
            100,
            200,
            10,
            20,
            &[7.0],
            MajorOrdering::RowMajor,
        )
        .unwrap();

    for (start, end) in [(0u64, 100u64), (150, 160), (200, 999)] {
        let chunks = timeseries
            .statistic_inst_values_between_picoseconds(start, end)
            .unwrap();
        assert_eq!(chunks.len(), 1, "range [{}, {}]", start, end);
    }
    assert!(timeseries
        .statistic_inst_values_between_picoseconds(201, 999)
        .unwrap()
        .is_empty());
}

#[test]
fn compressed_chunks_transport_bytes_faithfully() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let timeseries = ReportTimeseries::new(&obj_mgr).unwrap();

    let opaque = vec![9u8, 8, 7, 6, 5];
    timeseries
        .write_compressed_statistic_inst_values_at_time_t(
            500,
            50,
            &opaque,
            MajorOrdering::ColumnMajor,
            123,
        )
        .unwrap();

    let mut iter = timeseries.range_iterator();
    iter.position_range_around_simulated_picoseconds(0, 1000)
        .unwrap();
    assert!(iter.get_next().unwrap());
    assert!(iter.current_slice_was_compressed());
    assert_eq!(iter.current_slice_raw_bytes(), opaque.as_slice());
    assert_eq!(iter.current_slice_num_data_values(), 123);
    assert!(!iter.get_next().unwrap());

    // The decoded-vector API refuses compressed chunks.
    assert!(timeseries
        .statistic_inst_values_between_picoseconds(0, 1000)
        .is_err());
}

#[test]
fn reopening_by_id_recovers_the_header() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());

    let timeseries = ReportTimeseries::new(&obj_mgr).unwrap();
    timeseries.header().set_report_name("top50").unwrap();
    timeseries.header().set_report_start_time(1000).unwrap();
    timeseries.header().set_report_end_time(2000).unwrap();
    let id = timeseries.id();

    let reopened = ReportTimeseries::open(&obj_mgr, id).unwrap();
    assert_eq!(reopened.header().report_name().unwrap(), "top50");
    assert_eq!(reopened.header().report_start_time().unwrap(), 1000);
    assert_eq!(reopened.header().report_end_time().unwrap(), 2000);
}

#[test]
fn hidden_header_metadata_is_served_separately() {
    let dir = tempfile::tempdir().unwrap();
    let obj_mgr = stats_manager(dir.path());
    let timeseries = ReportTimeseries::new(&obj_mgr).unwrap();
    let header = timeseries.header();

    header.set_string_metadata("Author", "sim").unwrap();
    header.set_string_metadata("__Internal", "secret").unwrap();

    let visible = header.string_metadata().unwrap();
    assert_eq!(visible.get("Author").map(String::as_str), Some("sim"));
    assert!(!visible.contains_key("__Internal"));

    let hidden = header.hidden_string_metadata().unwrap();
    assert_eq!(hidden.get("Internal").map(String::as_str), Some("secret"));
}
