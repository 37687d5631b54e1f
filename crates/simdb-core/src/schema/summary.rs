//! Per-table summary directives.
//!
//! Columns of summary-marked tables get their values aggregated into a
//! sibling `<Table>_Summary` table on demand. The min/max/avg built-ins
//! are always present; callers may register additional named functions.

use std::collections::BTreeMap;
use std::sync::Arc;

/// A summary aggregation over one column's values.
pub type SummaryFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Named summary functions, ordered by name so that generated summary
/// column layouts are deterministic.
pub type NamedSummaryFns = BTreeMap<String, SummaryFn>;

/// The set of tables marked for summary capture, plus the functions to
/// evaluate over their columns.
#[derive(Clone, Default)]
pub struct TableSummaries {
    source_tables: Vec<String>,
    fns: NamedSummaryFns,
}

impl TableSummaries {
    pub(crate) fn add_source_table(&mut self, table: String) {
        if !self.source_tables.contains(&table) {
            self.source_tables.push(table);
        }
    }

    pub(crate) fn add_fn(&mut self, name: String, fcn: SummaryFn) {
        self.fns.insert(name, fcn);
    }

    pub(crate) fn source_tables_mut(&mut self) -> &mut Vec<String> {
        &mut self.source_tables
    }

    pub(crate) fn merge(&mut self, other: TableSummaries) {
        for table in other.source_tables {
            self.add_source_table(table);
        }
        for (name, fcn) in other.fns {
            self.fns.entry(name).or_insert(fcn);
        }
    }

    pub fn source_tables(&self) -> &[String] {
        &self.source_tables
    }

    pub fn should_summarize(&self, table: &str) -> bool {
        self.source_tables.iter().any(|t| t == table)
    }

    /// All summary functions, built-ins included.
    pub fn functions(&self) -> NamedSummaryFns {
        let mut all = builtin_fns();
        for (name, fcn) in &self.fns {
            all.insert(name.clone(), fcn.clone());
        }
        all
    }

    /// Ordered names of all summary functions.
    pub fn fn_names(&self) -> Vec<String> {
        self.functions().keys().cloned().collect()
    }
}

impl std::fmt::Debug for TableSummaries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableSummaries")
            .field("source_tables", &self.source_tables)
            .field("fns", &self.fns.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn builtin_fns() -> NamedSummaryFns {
    let mut fns: NamedSummaryFns = BTreeMap::new();
    fns.insert(
        "min".into(),
        Arc::new(|vals| vals.iter().copied().fold(f64::INFINITY, f64::min)),
    );
    fns.insert(
        "max".into(),
        Arc::new(|vals| vals.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    );
    fns.insert(
        "avg".into(),
        Arc::new(|vals| {
            if vals.is_empty() {
                0.0
            } else {
                vals.iter().sum::<f64>() / vals.len() as f64
            }
        }),
    );
    fns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_compute_over_a_column() {
        let fns = TableSummaries::default().functions();
        let vals = [2.0, 8.0, 5.0];
        assert_eq!(fns["min"].as_ref()(&vals), 2.0);
        assert_eq!(fns["max"].as_ref()(&vals), 8.0);
        assert_eq!(fns["avg"].as_ref()(&vals), 5.0);
    }

    #[test]
    fn custom_fns_are_kept_alongside_builtins() {
        let mut summaries = TableSummaries::default();
        summaries.add_fn("sum".into(), Arc::new(|vals| vals.iter().sum()));
        let names = summaries.fn_names();
        assert_eq!(names, vec!["avg", "max", "min", "sum"]);
    }
}
