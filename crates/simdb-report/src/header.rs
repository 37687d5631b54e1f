//! Report header records.

use simdb_common::{Constraint, DatabaseId, DbError, NamedValue, Result};
use simdb_core::{DestColumn, ObjectManager, ObjectQuery, ObjectRef};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Metadata names starting with this prefix are hidden from the normal
/// metadata getter and served by
/// [`ReportHeader::hidden_string_metadata`].
const HIDDEN_PREFIX: &str = "__";

/// Wrapper around one `ReportHeader` record.
pub struct ReportHeader {
    obj_ref: ObjectRef,
}

impl ReportHeader {
    /// Create a fresh header row.
    pub fn new(obj_mgr: &Arc<ObjectManager>) -> Result<Self> {
        let mut table = obj_mgr
            .get_table("ReportHeader")?
            .ok_or_else(|| DbError::General("no ReportHeader table in this database".into()))?;
        let obj_ref = table
            .create_object()?
            .ok_or_else(|| DbError::General("ReportHeader row creation returned nothing".into()))?;
        Ok(ReportHeader { obj_ref })
    }

    /// Wrap an existing header row.
    pub fn from_record(obj_ref: ObjectRef) -> Self {
        ReportHeader { obj_ref }
    }

    pub fn id(&self) -> DatabaseId {
        self.obj_ref.id()
    }

    pub fn set_report_name(&self, name: &str) -> Result<()> {
        self.obj_ref.set_string("ReportName", name)
    }

    pub fn report_name(&self) -> Result<String> {
        self.obj_ref.get_string("ReportName")
    }

    pub fn set_timeseries_id(&self, timeseries_id: DatabaseId) -> Result<()> {
        self.obj_ref
            .set_i32("TimeseriesID", timeseries_id as i32)
    }

    pub fn set_report_start_time(&self, start_pico: u64) -> Result<()> {
        self.obj_ref.set_u64("StartPico", start_pico)
    }

    pub fn report_start_time(&self) -> Result<u64> {
        self.obj_ref.get_u64("StartPico")
    }

    pub fn set_report_end_time(&self, end_pico: u64) -> Result<()> {
        self.obj_ref.set_u64("EndPico", end_pico)
    }

    pub fn report_end_time(&self) -> Result<u64> {
        self.obj_ref.get_u64("EndPico")
    }

    pub fn set_dest_file(&self, dest_file: &str) -> Result<()> {
        self.obj_ref.set_string("DestFile", dest_file)
    }

    pub fn dest_file(&self) -> Result<String> {
        self.obj_ref.get_string("DestFile")
    }

    pub fn set_num_stat_insts(&self, num: i32) -> Result<()> {
        self.obj_ref.set_i32("NumStatInsts", num)
    }

    pub fn num_stat_insts(&self) -> Result<i32> {
        self.obj_ref.get_i32("NumStatInsts")
    }

    pub fn set_si_locations(&self, comma_separated: &str) -> Result<()> {
        self.obj_ref
            .set_string("CommaSeparatedSILocations", comma_separated)
    }

    pub fn si_locations(&self) -> Result<String> {
        self.obj_ref.get_string("CommaSeparatedSILocations")
    }

    /// Attach one string metadata name/value pair to this header.
    pub fn set_string_metadata(&self, name: &str, value: &str) -> Result<()> {
        let obj_mgr = self.obj_ref_manager();
        let mut table = obj_mgr
            .get_table("ReportHeaderStringMetadata")?
            .ok_or_else(|| {
                DbError::General("no ReportHeaderStringMetadata table in this database".into())
            })?;
        table.create_object_with_args(&[
            NamedValue::new("HeaderID", simdb_common::ColumnValue::fkey(self.id())),
            NamedValue::new("Name", name),
            NamedValue::new("Value", value),
        ])?;
        Ok(())
    }

    /// All visible metadata pairs (names not starting with `__`).
    pub fn string_metadata(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .all_string_metadata()?
            .into_iter()
            .filter(|(name, _)| !name.starts_with(HIDDEN_PREFIX))
            .collect())
    }

    /// Hidden metadata pairs, keyed without the `__` prefix.
    pub fn hidden_string_metadata(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .all_string_metadata()?
            .into_iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(HIDDEN_PREFIX)
                    .map(|stripped| (stripped.to_string(), value))
            })
            .collect())
    }

    fn all_string_metadata(&self) -> Result<BTreeMap<String, String>> {
        let obj_mgr = self.obj_ref_manager();
        let mut query = ObjectQuery::new(&obj_mgr, "ReportHeaderStringMetadata");
        query
            .add_constraint("HeaderID", Constraint::Equal, self.id() as i32)
            .select("Name")
            .select("Value");

        let mut metadata = BTreeMap::new();
        let Some(mut iter) = query.execute()? else {
            return Ok(metadata);
        };
        let mut name = String::new();
        let mut value = String::new();
        while iter.get_next(&mut [
            DestColumn::String(&mut name),
            DestColumn::String(&mut value),
        ])? {
            metadata.insert(name.clone(), value.clone());
        }
        Ok(metadata)
    }

    fn obj_ref_manager(&self) -> Arc<ObjectManager> {
        Arc::clone(self.obj_ref_manager_ref())
    }

    fn obj_ref_manager_ref(&self) -> &Arc<ObjectManager> {
        // ObjectRef keeps its manager alive for exactly this purpose.
        self.obj_ref.object_manager_handle()
    }
}
