//! Clock hierarchy records.

use simdb_common::{ColumnValue, DatabaseId, DbError, NamedValue, Result, NO_OBJECT};
use simdb_core::ObjectManager;
use std::sync::Arc;

/// Serializer for the simulator's clock tree. Clocks are written
/// parent-first; a root clock's parent ID is 0.
pub struct ClockHierarchyWriter {
    obj_mgr: Arc<ObjectManager>,
}

impl ClockHierarchyWriter {
    pub fn new(obj_mgr: &Arc<ObjectManager>) -> Self {
        ClockHierarchyWriter {
            obj_mgr: Arc::clone(obj_mgr),
        }
    }

    /// Add one clock. Pass [`NO_OBJECT`] as the parent for root clocks.
    /// Returns the new clock record's ID for use as children's parent.
    pub fn add_clock(
        &self,
        parent_clock_id: DatabaseId,
        name: &str,
        period: f64,
        ratio_to_parent: f64,
        freq_mhz: f64,
    ) -> Result<DatabaseId> {
        let mut table = self
            .obj_mgr
            .get_table("ClockHierarchy")?
            .ok_or_else(|| DbError::General("no ClockHierarchy table in this database".into()))?;
        let record = table
            .create_object_with_args(&[
                NamedValue::new("ParentClockID", ColumnValue::fkey(parent_clock_id)),
                NamedValue::new("Name", name),
                NamedValue::new("Period", period),
                NamedValue::new("RatioToParent", ratio_to_parent),
                NamedValue::new("FreqMHz", freq_mhz),
            ])?
            .ok_or_else(|| {
                DbError::General("ClockHierarchy row creation returned nothing".into())
            })?;
        Ok(record.id())
    }

    /// Convenience for root clocks.
    pub fn add_root_clock(&self, name: &str, period: f64, freq_mhz: f64) -> Result<DatabaseId> {
        self.add_clock(NO_OBJECT, name, period, 1.0, freq_mhz)
    }
}
