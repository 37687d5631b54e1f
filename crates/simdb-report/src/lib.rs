//! SimDB statistics time-series layer.
//!
//! Builds on the record primitives in `simdb-core` to store and read
//! back simulator report data:
//! - the `stats` namespace [`schema`]
//! - [`ReportHeader`] and [`ReportTimeseries`] with chunked,
//!   range-indexed sample storage
//! - [`StatInstRowIterator`] / [`StatInstValueLookup`] row cursors with
//!   the late-binding placeholder pattern
//! - [`SimInfo`] and [`ClockHierarchyWriter`] run-metadata serializers
//! - the post-simulation [`ReportVerifier`]

pub mod clock;
pub mod format;
pub mod header;
pub mod row_iterator;
pub mod schema;
pub mod siminfo;
pub mod timeseries;
pub mod value_lookup;
pub mod verifier;

pub use clock::ClockHierarchyWriter;
pub use format::{write_hierarchy_csv, write_timeseries_csv, ReportFormat};
pub use header::ReportHeader;
pub use row_iterator::{RowAccessor, StatInstRowIterator};
pub use schema::{build_stats_schema, register_stats_schema_builder, MajorOrdering, STATS_NAMESPACE};
pub use siminfo::SimInfo;
pub use timeseries::{RangeIterator, ReportTimeseries};
pub use value_lookup::StatInstValueLookup;
pub use verifier::{files_match, ReportToVerify, ReportVerifier, VerificationSummary};
