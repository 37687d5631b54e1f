//! Chunked statistics time-series records.
//!
//! A `Timeseries` row anchors a header plus a chain of `TimeseriesChunk`
//! rows. Each chunk holds a packed blob of double-precision samples and
//! is indexed by both its simulated-picosecond range and its root-cycle
//! range, so either index can answer range queries.

use crate::header::ReportHeader;
use crate::schema::MajorOrdering;
use simdb_common::{ColumnValue, Constraint, DatabaseId, DbError, NamedValue, Result};
use simdb_core::{decode_doubles, ColumnOrdering, ObjectManager, ObjectQuery, RowIter};
use std::sync::Arc;

/// Which of a chunk's two index pairs a range query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeIndex {
    SimulatedPicoseconds,
    RootClockCycles,
}

/// Wrapper around one `Timeseries` record and its header.
pub struct ReportTimeseries {
    obj_mgr: Arc<ObjectManager>,
    timeseries_id: DatabaseId,
    header: ReportHeader,
}

impl ReportTimeseries {
    /// Create a new timeseries with a fresh header.
    pub fn new(obj_mgr: &Arc<ObjectManager>) -> Result<Self> {
        let mut table = obj_mgr
            .get_table("Timeseries")?
            .ok_or_else(|| DbError::General("no Timeseries table in this database".into()))?;
        let record = table
            .create_object()?
            .ok_or_else(|| DbError::General("Timeseries row creation returned nothing".into()))?;

        let header = ReportHeader::new(obj_mgr)?;
        header.set_timeseries_id(record.id())?;
        record.set_i32("HeaderID", header.id() as i32)?;

        Ok(ReportTimeseries {
            obj_mgr: Arc::clone(obj_mgr),
            timeseries_id: record.id(),
            header,
        })
    }

    /// Open an existing timeseries by its database ID.
    pub fn open(obj_mgr: &Arc<ObjectManager>, timeseries_id: DatabaseId) -> Result<Self> {
        let record = obj_mgr
            .find_object("Timeseries", timeseries_id)?
            .ok_or_else(|| {
                DbError::IndexOutOfRange(format!("no timeseries with Id {}", timeseries_id))
            })?;

        let header_id = record.get_i32("HeaderID")? as DatabaseId;
        let header_record = obj_mgr
            .find_object("ReportHeader", header_id)?
            .ok_or_else(|| {
                DbError::IndexOutOfRange(format!("no report header with Id {}", header_id))
            })?;

        Ok(ReportTimeseries {
            obj_mgr: Arc::clone(obj_mgr),
            timeseries_id,
            header: ReportHeader::from_record(header_record),
        })
    }

    pub fn id(&self) -> DatabaseId {
        self.timeseries_id
    }

    pub fn header(&self) -> &ReportHeader {
        &self.header
    }

    /// Write SI values at one time point; the chunk's start and end
    /// indexes both equal the given values.
    pub fn write_statistic_inst_values_at_time_t(
        &self,
        current_pico: u64,
        current_cycle: u64,
        si_values: &[f64],
        major_ordering: MajorOrdering,
    ) -> Result<()> {
        self.insert_chunk(
            current_pico,
            current_pico,
            current_cycle,
            current_cycle,
            si_values.into(),
            si_values.len() as u32,
            false,
            major_ordering,
        )
    }

    /// Compressed single-point variant. The blob is stored untouched;
    /// decompressing it on read is the caller's responsibility.
    pub fn write_compressed_statistic_inst_values_at_time_t(
        &self,
        current_pico: u64,
        current_cycle: u64,
        compressed_si_values: &[u8],
        major_ordering: MajorOrdering,
        original_num_si_values: u32,
    ) -> Result<()> {
        self.insert_chunk(
            current_pico,
            current_pico,
            current_cycle,
            current_cycle,
            ColumnValue::Blob(compressed_si_values.to_vec()),
            original_num_si_values,
            true,
            major_ordering,
        )
    }

    /// Write SI values covering a time interval.
    #[allow(clippy::too_many_arguments)]
    pub fn write_statistic_inst_values_in_time_range(
        &self,
        start_pico: u64,
        end_pico: u64,
        start_cycle: u64,
        end_cycle: u64,
        si_values: &[f64],
        major_ordering: MajorOrdering,
    ) -> Result<()> {
        self.insert_chunk(
            start_pico,
            end_pico,
            start_cycle,
            end_cycle,
            si_values.into(),
            si_values.len() as u32,
            false,
            major_ordering,
        )
    }

    /// Compressed interval variant; see the single-point form for the
    /// compression contract.
    #[allow(clippy::too_many_arguments)]
    pub fn write_compressed_statistic_inst_values_in_time_range(
        &self,
        start_pico: u64,
        end_pico: u64,
        start_cycle: u64,
        end_cycle: u64,
        compressed_si_values: &[u8],
        major_ordering: MajorOrdering,
        original_num_si_values: u32,
    ) -> Result<()> {
        self.insert_chunk(
            start_pico,
            end_pico,
            start_cycle,
            end_cycle,
            ColumnValue::Blob(compressed_si_values.to_vec()),
            original_num_si_values,
            true,
            major_ordering,
        )
    }

    /// All uncompressed chunks whose picosecond range intersects
    /// `[start, end]`, decoded, in ascending start order. Compressed
    /// chunks fail here; stream them through [`RangeIterator`] and
    /// decompress caller-side instead.
    pub fn statistic_inst_values_between_picoseconds(
        &self,
        start_pico: u64,
        end_pico: u64,
    ) -> Result<Vec<Vec<f64>>> {
        self.collect_decoded(RangeIndex::SimulatedPicoseconds, start_pico, end_pico)
    }

    /// Cycle-indexed variant of
    /// [`statistic_inst_values_between_picoseconds`](Self::statistic_inst_values_between_picoseconds).
    pub fn statistic_inst_values_between_cycles(
        &self,
        start_cycle: u64,
        end_cycle: u64,
    ) -> Result<Vec<Vec<f64>>> {
        self.collect_decoded(RangeIndex::RootClockCycles, start_cycle, end_cycle)
    }

    /// Chunk-at-a-time reader for streaming export.
    pub fn range_iterator(&self) -> RangeIterator {
        RangeIterator {
            obj_mgr: Arc::clone(&self.obj_mgr),
            timeseries_id: self.timeseries_id,
            rows: None,
            current_values: Vec::new(),
            current_was_compressed: false,
            current_raw: Vec::new(),
            current_num_pts: 0,
        }
    }

    fn collect_decoded(&self, index: RangeIndex, start: u64, end: u64) -> Result<Vec<Vec<f64>>> {
        let mut iter = self.range_iterator();
        iter.position(index, start, end)?;
        let mut chunks = Vec::new();
        while iter.get_next()? {
            if iter.current_slice_was_compressed() {
                return Err(DbError::General(
                    "compressed chunk in range; use RangeIterator and decompress caller-side"
                        .into(),
                ));
            }
            chunks.push(iter.current_slice_data_values().to_vec());
        }
        Ok(chunks)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_chunk(
        &self,
        start_pico: u64,
        end_pico: u64,
        start_cycle: u64,
        end_cycle: u64,
        raw_bytes: ColumnValue,
        num_pts: u32,
        was_compressed: bool,
        major_ordering: MajorOrdering,
    ) -> Result<()> {
        debug_assert!(start_pico <= end_pico);
        debug_assert!(start_cycle <= end_cycle);

        let mut table = self
            .obj_mgr
            .get_table("TimeseriesChunk")?
            .ok_or_else(|| DbError::General("no TimeseriesChunk table in this database".into()))?;

        self.obj_mgr.safe_transaction(|| {
            table.create_object_with_args(&[
                NamedValue::new(
                    "TimeseriesID",
                    ColumnValue::fkey(self.timeseries_id),
                ),
                NamedValue::new("StartPico", start_pico),
                NamedValue::new("EndPico", end_pico),
                NamedValue::new("StartCycle", start_cycle),
                NamedValue::new("EndCycle", end_cycle),
                NamedValue::new("NumPts", num_pts as i32),
                NamedValue::new("WasCompressed", if was_compressed { 1i32 } else { 0 }),
                NamedValue::new("MajorOrdering", major_ordering.as_i32()),
                NamedValue::new("RawBytes", raw_bytes.clone()),
            ])?;
            Ok(())
        })
    }
}

/// Streaming chunk reader over one timeseries.
///
/// Position it with one of the `position_range_*` methods, then call
/// [`get_next`](RangeIterator::get_next) until it reports no more data.
pub struct RangeIterator {
    obj_mgr: Arc<ObjectManager>,
    timeseries_id: DatabaseId,
    rows: Option<RowIter>,
    current_values: Vec<f64>,
    current_was_compressed: bool,
    current_raw: Vec<u8>,
    current_num_pts: u32,
}

impl RangeIterator {
    /// Queue up all chunks intersecting the simulated-picosecond range.
    pub fn position_range_around_simulated_picoseconds(
        &mut self,
        start_pico: u64,
        end_pico: u64,
    ) -> Result<()> {
        self.position(RangeIndex::SimulatedPicoseconds, start_pico, end_pico)
    }

    /// Queue up all chunks intersecting the root-clock-cycle range.
    pub fn position_range_around_root_clock_cycles(
        &mut self,
        start_cycle: u64,
        end_cycle: u64,
    ) -> Result<()> {
        self.position(RangeIndex::RootClockCycles, start_cycle, end_cycle)
    }

    fn position(&mut self, index: RangeIndex, start: u64, end: u64) -> Result<()> {
        let (start_col, end_col) = match index {
            RangeIndex::SimulatedPicoseconds => ("StartPico", "EndPico"),
            RangeIndex::RootClockCycles => ("StartCycle", "EndCycle"),
        };

        let mut query = ObjectQuery::new(&self.obj_mgr, "TimeseriesChunk");
        query
            .add_constraint(
                "TimeseriesID",
                Constraint::Equal,
                self.timeseries_id as i32,
            )
            // A chunk intersects [start, end] iff it starts at or before
            // the range's end and ends at or after the range's start.
            .add_constraint(start_col, Constraint::LessOrEqual, end)
            .add_constraint(end_col, Constraint::GreaterOrEqual, start)
            .order_by(start_col, ColumnOrdering::Ascending);

        self.rows = query.execute_rows(&["RawBytes", "NumPts", "WasCompressed"])?;
        if self.rows.is_none() {
            return Err(DbError::NotImplemented("object queries on this back-end"));
        }
        Ok(())
    }

    /// Advance to the next chunk in range. Returns `false` when the
    /// range is exhausted (or the iterator was never positioned).
    pub fn get_next(&mut self) -> Result<bool> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(false);
        };
        let Some(row) = rows.next_row()? else {
            return Ok(false);
        };

        let mut iter = row.into_iter();
        let raw = match iter.next() {
            Some(ColumnValue::Blob(bytes)) => bytes,
            _ => {
                return Err(DbError::TypeMismatch {
                    column: "RawBytes".into(),
                })
            }
        };
        self.current_num_pts = iter
            .next()
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as u32;
        self.current_was_compressed = iter
            .next()
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            != 0;

        if self.current_was_compressed {
            self.current_values.clear();
            self.current_raw = raw;
        } else {
            self.current_values = decode_doubles(&raw, "RawBytes")?;
            self.current_raw.clear();
        }
        Ok(true)
    }

    /// The current chunk's decoded samples. Empty for compressed chunks;
    /// take [`current_slice_raw_bytes`](Self::current_slice_raw_bytes)
    /// instead and decompress caller-side.
    pub fn current_slice_data_values(&self) -> &[f64] {
        &self.current_values
    }

    /// Number of data points in the current chunk, as recorded at write
    /// time (the pre-compression count for compressed chunks).
    pub fn current_slice_num_data_values(&self) -> usize {
        self.current_num_pts as usize
    }

    pub fn current_slice_was_compressed(&self) -> bool {
        self.current_was_compressed
    }

    /// The current chunk's stored bytes, untouched, for compressed
    /// chunks.
    pub fn current_slice_raw_bytes(&self) -> &[u8] {
        &self.current_raw
    }
}
