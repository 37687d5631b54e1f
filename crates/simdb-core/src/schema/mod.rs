//! Declarative database schema.
//!
//! A [`Schema`] is an ordered set of [`Table`]s, each an ordered list of
//! [`Column`]s. Schemas are built in memory with the builder methods here,
//! validated by [`Schema::finalize`], and then handed to an
//! `ObjectManager` which realizes them through a back-end. Once realized,
//! a schema may only be appended to, never mutated in place.
//!
//! Table names can be namespace-qualified: a table `Numbers` added under
//! namespace `random` is stored and retrieved as `random$Numbers`.

pub mod summary;

use simdb_common::{ColumnDataType, ColumnValue, DbError, Result};
use std::collections::HashSet;

pub use summary::{NamedSummaryFns, SummaryFn};

/// Delimiter between a namespace prefix and an unqualified table name.
pub const NS_DELIM: char = '$';

/// Split a qualified table name into its namespace and unqualified parts.
/// Returns `None` when the name carries no namespace.
pub fn split_qualified_name(name: &str) -> Option<(&str, &str)> {
    let idx = name.find(NS_DELIM)?;
    if idx + 1 >= name.len() {
        return None;
    }
    Some((&name[..idx], &name[idx + 1..]))
}

/// One column in a table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    dtype: ColumnDataType,
    default_value: Option<ColumnValue>,
    indexed: bool,
    /// Dimensions for matrix-typed columns; empty means scalar. Back-ends
    /// may reject non-scalar columns in `validate_schema`.
    dims: Vec<usize>,
    /// Target table for `FKey` columns.
    fkey_target: Option<String>,
    /// Explicitly declared forward reference; skips finalize-time target
    /// resolution.
    fkey_forward: bool,
}

impl Column {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> ColumnDataType {
        self.dtype
    }

    pub fn default_value(&self) -> Option<&ColumnValue> {
        self.default_value.as_ref()
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn fkey_target(&self) -> Option<&str> {
        self.fkey_target.as_deref()
    }
}

/// One table in a schema.
///
/// Every table carries an implicit auto-assigned primary key `Id`
/// (64-bit signed, monotonic per table); it is never listed as a column.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
}

impl Table {
    fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_named(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// True iff every column is a fixed-width primitive. Back-ends may
    /// route I/O for such tables through a byte-packed factory.
    pub fn is_fixed_size(&self) -> bool {
        !self.columns.is_empty() && self.columns.iter().all(|c| c.dtype.is_fixed_width())
    }

    /// Total packed record width for fixed-size tables.
    pub fn fixed_record_width(&self) -> Option<usize> {
        self.columns.iter().map(|c| c.width()).sum()
    }

    /// Append a scalar column. Order-preserving; duplicate names are
    /// rejected at [`Schema::finalize`].
    pub fn add_column(&mut self, name: impl Into<String>, dtype: ColumnDataType) -> &mut Table {
        self.push_column(name, dtype, None, false, Vec::new(), None, false)
    }

    /// Append a scalar column with an index on it.
    pub fn add_indexed_column(
        &mut self,
        name: impl Into<String>,
        dtype: ColumnDataType,
    ) -> &mut Table {
        self.push_column(name, dtype, None, true, Vec::new(), None, false)
    }

    /// Append a scalar column with a default value.
    pub fn add_column_with_default(
        &mut self,
        name: impl Into<String>,
        dtype: ColumnDataType,
        default_value: impl Into<ColumnValue>,
    ) -> &mut Table {
        self.push_column(
            name,
            dtype,
            Some(default_value.into()),
            false,
            Vec::new(),
            None,
            false,
        )
    }

    /// Append a matrix-typed column with the given dimensions.
    pub fn add_matrix_column(
        &mut self,
        name: impl Into<String>,
        dtype: ColumnDataType,
        dims: &[usize],
    ) -> &mut Table {
        self.push_column(name, dtype, None, false, dims.to_vec(), None, false)
    }

    /// Append a foreign-key column referencing `target_table`'s implicit
    /// `Id` column. The target must exist in the same schema by finalize
    /// time.
    pub fn add_fkey_column(
        &mut self,
        name: impl Into<String>,
        target_table: impl Into<String>,
    ) -> &mut Table {
        self.push_column(
            name,
            ColumnDataType::FKey,
            None,
            false,
            Vec::new(),
            Some(target_table.into()),
            false,
        )
    }

    /// Append an indexed foreign-key column.
    pub fn add_indexed_fkey_column(
        &mut self,
        name: impl Into<String>,
        target_table: impl Into<String>,
    ) -> &mut Table {
        self.push_column(
            name,
            ColumnDataType::FKey,
            None,
            true,
            Vec::new(),
            Some(target_table.into()),
            false,
        )
    }

    /// Append a foreign-key column whose target is declared as a forward
    /// reference and not resolved at finalize time.
    pub fn add_forward_fkey_column(
        &mut self,
        name: impl Into<String>,
        target_table: impl Into<String>,
    ) -> &mut Table {
        self.push_column(
            name,
            ColumnDataType::FKey,
            None,
            false,
            Vec::new(),
            Some(target_table.into()),
            true,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn push_column(
        &mut self,
        name: impl Into<String>,
        dtype: ColumnDataType,
        default_value: Option<ColumnValue>,
        indexed: bool,
        dims: Vec<usize>,
        fkey_target: Option<String>,
        fkey_forward: bool,
    ) -> &mut Table {
        self.columns.push(Column {
            name: name.into(),
            dtype,
            default_value,
            indexed,
            dims,
            fkey_target,
            fkey_forward,
        });
        self
    }
}

impl Column {
    fn width(&self) -> Option<usize> {
        let scalar = self.dtype.fixed_width()?;
        let count: usize = if self.dims.is_empty() {
            1
        } else {
            self.dims.iter().product()
        };
        Some(scalar * count)
    }
}

impl PartialEq for Table {
    /// Tables are equal when they have the same name and identical ordered
    /// column lists.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.columns == other.columns
    }
}

/// An ordered set of tables, optionally under a namespace prefix.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    tables: Vec<Table>,
    summaries: summary::TableSummaries,
    finalized: bool,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    /// Start a new table definition and return it for column chaining.
    pub fn add_table(&mut self, name: impl Into<String>) -> &mut Table {
        self.finalized = false;
        self.tables.push(Table::new(name));
        self.tables.last_mut().expect("just pushed")
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn has_tables(&self) -> bool {
        !self.tables.is_empty()
    }

    pub fn table_named(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Mark a table for summary capture. A sibling `<Table>_Summary` table
    /// is generated at finalize time with one `Double` column per
    /// `<column>_<function>` pair.
    pub fn summarize_table(&mut self, table_name: impl Into<String>) {
        self.finalized = false;
        self.summaries.add_source_table(table_name.into());
    }

    /// Register a named summary function in addition to the min/max/avg
    /// built-ins.
    pub fn add_summary_fn(&mut self, name: impl Into<String>, fcn: SummaryFn) {
        self.finalized = false;
        self.summaries.add_fn(name.into(), fcn);
    }

    pub fn summaries(&self) -> &summary::TableSummaries {
        &self.summaries
    }

    /// Prefix every table name with `<ns>$`. The prefix must not contain
    /// the delimiter itself. Called by the namespace machinery right
    /// before realization and undone right after.
    pub(crate) fn set_namespace(&mut self, ns: &str) -> Result<()> {
        if ns.contains(NS_DELIM) {
            return Err(DbError::Schema(format!(
                "namespace '{}' contains the reserved delimiter '{}'",
                ns, NS_DELIM
            )));
        }
        for table in &mut self.tables {
            if !table.name.contains(NS_DELIM) {
                table.name = format!("{}{}{}", ns, NS_DELIM, table.name);
            }
        }
        for source in self.summaries.source_tables_mut() {
            if !source.contains(NS_DELIM) {
                *source = format!("{}{}{}", ns, NS_DELIM, source);
            }
        }
        Ok(())
    }

    /// Strip the namespace prefix applied by [`Schema::set_namespace`].
    pub(crate) fn clear_namespace(&mut self) {
        for table in &mut self.tables {
            if let Some((_, unqualified)) = split_qualified_name(&table.name) {
                table.name = unqualified.to_string();
            }
        }
        for source in self.summaries.source_tables_mut() {
            if let Some((_, unqualified)) = split_qualified_name(source) {
                *source = unqualified.to_string();
            }
        }
    }

    /// Append `other`'s tables into this schema. A table identical to an
    /// existing one (same name, same columns) is ignored; a table with the
    /// same name and a different column list is a conflict. Composition is
    /// commutative and idempotent.
    pub fn merge(&mut self, other: Schema) -> Result<()> {
        for table in other.tables {
            match self.table_named(&table.name) {
                Some(existing) if *existing == table => continue,
                Some(_) => {
                    return Err(DbError::schema(
                        &table.name,
                        "same name as an existing schema table but a different \
                         column configuration",
                    ));
                }
                None => {
                    self.finalized = false;
                    self.tables.push(table);
                }
            }
        }
        self.summaries.merge(other.summaries);
        Ok(())
    }

    /// Structural validation. Checks every table has a non-empty name and
    /// at least one column, rejects duplicate table names (after namespace
    /// qualification) and duplicate column names, resolves foreign-key
    /// targets, and generates pending summary tables. Idempotent.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }

        self.generate_summary_tables()?;

        let mut seen_tables = HashSet::new();
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(DbError::Schema("table with an empty name".into()));
            }
            if table.columns.is_empty() {
                return Err(DbError::schema(&table.name, "table has no columns"));
            }
            if !seen_tables.insert(table.name.clone()) {
                return Err(DbError::schema(&table.name, "duplicate table name"));
            }

            let mut seen_columns = HashSet::new();
            for col in &table.columns {
                if col.name.is_empty() {
                    return Err(DbError::schema(&table.name, "column with an empty name"));
                }
                if col.name == "Id" {
                    return Err(DbError::schema(
                        &table.name,
                        "'Id' is reserved for the implicit primary key",
                    ));
                }
                if !seen_columns.insert(col.name.as_str()) {
                    return Err(DbError::schema(
                        &table.name,
                        format!("duplicate column '{}'", col.name),
                    ));
                }
            }
        }

        // Foreign keys resolve against qualified names first, then against
        // the same namespace as the referencing table.
        for table in &self.tables {
            let ns = split_qualified_name(&table.name).map(|(ns, _)| ns);
            for col in &table.columns {
                let Some(target) = col.fkey_target.as_deref() else {
                    continue;
                };
                if col.fkey_forward {
                    continue;
                }
                let resolved = seen_tables.contains(target)
                    || ns
                        .map(|ns| seen_tables.contains(&format!("{}{}{}", ns, NS_DELIM, target)))
                        .unwrap_or(false);
                if !resolved {
                    return Err(DbError::schema(
                        &table.name,
                        format!(
                            "foreign key column '{}' references unknown table '{}'",
                            col.name, target
                        ),
                    ));
                }
            }
        }

        self.finalized = true;
        Ok(())
    }

    /// Create the `<Table>_Summary` sibling for every summary source table
    /// that does not have one yet.
    fn generate_summary_tables(&mut self) -> Result<()> {
        let fn_names = self.summaries.fn_names();
        for source in self.summaries.source_tables().to_vec() {
            let summary_name = format!("{}_Summary", source);
            if self.table_named(&summary_name).is_some() {
                continue;
            }
            let Some(table) = self.table_named(&source) else {
                return Err(DbError::schema(
                    &source,
                    "summary requested for a table not in this schema",
                ));
            };
            let numeric_cols: Vec<String> = table
                .columns
                .iter()
                .filter(|c| c.dtype.is_fixed_width() && c.is_scalar())
                .map(|c| c.name.clone())
                .collect();
            if numeric_cols.is_empty() {
                continue;
            }
            let summary = self.add_table(summary_name);
            for col in &numeric_cols {
                for fcn in &fn_names {
                    summary.add_column(format!("{}_{}", col, fcn), ColumnDataType::Double);
                }
            }
        }
        Ok(())
    }
}

impl PartialEq for Schema {
    /// Structural equality: the same tables in any order, each with an
    /// identical ordered column list.
    fn eq(&self, other: &Self) -> bool {
        if self.tables.len() != other.tables.len() {
            return false;
        }
        self.tables
            .iter()
            .all(|t| other.table_named(&t.name).map_or(false, |o| *o == *t))
    }
}
