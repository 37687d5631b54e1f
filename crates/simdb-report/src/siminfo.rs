//! Simulation run metadata.

use simdb_common::{ColumnValue, Constraint, DatabaseId, DbError, NamedValue, Result};
use simdb_core::{ColumnOrdering, DestColumn, ObjectManager, ObjectQuery};
use std::sync::Arc;

/// One simulation run's identifying metadata. Unset fields persist as
/// the literal string `"unset"` through the schema defaults.
#[derive(Debug, Clone, Default)]
pub struct SimInfo {
    pub name: String,
    pub cmdline: String,
    pub working_dir: String,
    pub exe: String,
    pub simulator_version: String,
    pub framework_version: String,
    pub repro: String,
    pub start: String,
    pub other: String,
}

impl SimInfo {
    /// Stamp `start` with the current wall-clock time.
    pub fn started_now(mut self) -> Self {
        self.start = chrono::Utc::now().to_rfc3339();
        self
    }

    /// Write one `SimInfo` row linked to this connection's
    /// `ObjectManagersInDatabase` record. Empty fields are left to the
    /// schema defaults.
    pub fn serialize(&self, obj_mgr: &Arc<ObjectManager>) -> Result<DatabaseId> {
        let mut table = obj_mgr
            .get_table("SimInfo")?
            .ok_or_else(|| DbError::General("no SimInfo table in this database".into()))?;

        let mut values = vec![NamedValue::new(
            "ObjMgrID",
            ColumnValue::FKey(obj_mgr.id()),
        )];
        let fields = [
            ("Name", &self.name),
            ("Cmdline", &self.cmdline),
            ("WorkingDir", &self.working_dir),
            ("Exe", &self.exe),
            ("SimulatorVersion", &self.simulator_version),
            ("SpartaVersion", &self.framework_version),
            ("Repro", &self.repro),
            ("Start", &self.start),
            ("Other", &self.other),
        ];
        for (column, value) in fields {
            if !value.is_empty() {
                values.push(NamedValue::new(column, value.as_str()));
            }
        }

        let record = table
            .create_object_with_args(&values)?
            .ok_or_else(|| DbError::General("SimInfo row creation returned nothing".into()))?;
        Ok(record.id())
    }

    /// Most recent `SimInfo` row ID written by this connection, or 0.
    pub fn latest_record_id(obj_mgr: &Arc<ObjectManager>) -> Result<DatabaseId> {
        let mut query = ObjectQuery::new(obj_mgr, "SimInfo");
        query
            .add_constraint("ObjMgrID", Constraint::Equal, obj_mgr.id())
            .order_by("Id", ColumnOrdering::Descending)
            .set_limit(1)
            .select("Id");
        let Some(mut iter) = query.execute()? else {
            return Ok(0);
        };
        let mut id: i64 = 0;
        iter.get_next(&mut [DestColumn::Int64(&mut id)])?;
        Ok(id)
    }
}
