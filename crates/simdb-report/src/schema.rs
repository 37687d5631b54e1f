//! Statistics namespace schema.
//!
//! Every table the report layer reads or writes lives in the `stats`
//! namespace. Register [`build_stats_schema`] as that namespace's schema
//! builder, or apply it directly when driving an `ObjectManager` by
//! hand.

use simdb_core::schema::Schema;
use simdb_core::{ColumnDataType, DatabaseRoot};

/// Namespace the statistics tables live in.
pub const STATS_NAMESPACE: &str = "stats";

/// Row/column ordering of a packed statistics-instance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorOrdering {
    RowMajor,
    ColumnMajor,
}

impl MajorOrdering {
    pub fn as_i32(self) -> i32 {
        match self {
            MajorOrdering::RowMajor => 0,
            MajorOrdering::ColumnMajor => 1,
        }
    }

    pub fn from_i32(value: i32) -> MajorOrdering {
        if value == 1 {
            MajorOrdering::ColumnMajor
        } else {
            MajorOrdering::RowMajor
        }
    }
}

/// Register the statistics schema builder for the `stats` namespace.
pub fn register_stats_schema_builder() {
    DatabaseRoot::register_schema_builder(STATS_NAMESPACE, build_stats_schema);
}

/// Populate `schema` with the statistics tables.
pub fn build_stats_schema(schema: &mut Schema) {
    use ColumnDataType::*;

    schema
        .add_table("ObjectManagersInDatabase")
        .add_column("ObjMgrID", Int32);

    schema
        .add_table("SimInfo")
        .add_fkey_column("ObjMgrID", "ObjectManagersInDatabase")
        .add_column_with_default("Name", String, "unset")
        .add_column_with_default("Cmdline", String, "unset")
        .add_column_with_default("WorkingDir", String, "unset")
        .add_column_with_default("Exe", String, "unset")
        .add_column_with_default("SimulatorVersion", String, "unset")
        .add_column_with_default("SpartaVersion", String, "unset")
        .add_column_with_default("Repro", String, "unset")
        .add_column_with_default("Start", String, "unset")
        .add_column_with_default("Other", String, "unset");

    schema
        .add_table("Timeseries")
        .add_forward_fkey_column("HeaderID", "ReportHeader");

    schema
        .add_table("ReportHeader")
        .add_fkey_column("TimeseriesID", "Timeseries")
        .add_column("ReportName", String)
        .add_column("StartPico", Uint64)
        .add_column("EndPico", Uint64)
        .add_column("DestFile", String)
        .add_column("NumStatInsts", Int32)
        .add_column("CommaSeparatedSILocations", String);

    schema
        .add_table("ReportHeaderStringMetadata")
        .add_fkey_column("HeaderID", "ReportHeader")
        .add_column("Name", String)
        .add_column("Value", String);

    schema
        .add_table("TimeseriesChunk")
        .add_indexed_fkey_column("TimeseriesID", "Timeseries")
        .add_indexed_column("StartPico", Uint64)
        .add_indexed_column("EndPico", Uint64)
        .add_indexed_column("StartCycle", Uint64)
        .add_indexed_column("EndCycle", Uint64)
        .add_column("NumPts", Int32)
        .add_column("WasCompressed", Int32)
        .add_column("MajorOrdering", Int32)
        .add_column("RawBytes", Blob);

    schema
        .add_table("ReportNodeHierarchy")
        .add_indexed_fkey_column("ParentNodeID", "ReportNodeHierarchy")
        .add_column("Name", String)
        .add_column("Ordinal", Int32);

    schema
        .add_table("SingleUpdateStatInstValues")
        .add_indexed_fkey_column("RootReportNodeID", "ReportNodeHierarchy")
        .add_column("NumPts", Int32)
        .add_column("WasCompressed", Int32)
        .add_column("RawBytes", Blob);

    schema
        .add_table("RootReportNodeMetadata")
        .add_fkey_column("ReportNodeID", "ReportNodeHierarchy")
        .add_column("Name", String)
        .add_column("Value", String);

    schema
        .add_table("ReportVerificationResults")
        .add_column("DestFile", String)
        .add_fkey_column("SimInfoID", "SimInfo")
        .add_column("Passed", Int32)
        .add_column("IsTimeseries", Int32);

    schema
        .add_table("ReportVerificationFailureSummaries")
        .add_fkey_column("ReportVerificationResultID", "ReportVerificationResults")
        .add_column("FailureSummary", String);

    schema
        .add_table("ReportVerificationDeepCopyFiles")
        .add_column("DestFile", String)
        .add_column("Expected", Blob)
        .add_column("Actual", Blob);

    schema
        .add_table("ClockHierarchy")
        .add_fkey_column("ParentClockID", "ClockHierarchy")
        .add_column("Name", String)
        .add_column("Period", Double)
        .add_column("RatioToParent", Double)
        .add_column("FreqMHz", Double);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_schema_finalizes() {
        let mut schema = Schema::new();
        build_stats_schema(&mut schema);
        schema.finalize().unwrap();
        assert!(schema.table_named("TimeseriesChunk").is_some());
        assert!(schema.table_named("ReportVerificationResults").is_some());
    }

    #[test]
    fn major_ordering_roundtrip() {
        assert_eq!(
            MajorOrdering::from_i32(MajorOrdering::ColumnMajor.as_i32()),
            MajorOrdering::ColumnMajor
        );
        assert_eq!(MajorOrdering::from_i32(0), MajorOrdering::RowMajor);
    }
}
