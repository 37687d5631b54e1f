//! SQLite storage back-end for SimDB.
//!
//! Realizes a SimDB schema as SQLite tables (one `INTEGER PRIMARY KEY
//! AUTOINCREMENT` `Id` per table, one index per indexed column),
//! compiles [`QuerySpec`]s into parameterized SELECT statements, and
//! brackets writes in `BEGIN`/`COMMIT` transactions. Floating-point
//! equality constraints go through a registered `within_tol` scalar
//! function so exact-match queries tolerate machine epsilon.
//!
//! Column declaration types are SimDB's own width-exact names (`INT8`,
//! `UINT32`, `DOUBLE`, ...) so a reopened database recovers each
//! column's width from `PRAGMA table_info`.

mod ddl;

use rusqlite::types::Value as SqlValue;
use rusqlite::{functions::FunctionFlags, Connection};
use simdb_common::{
    ColumnDataType, ColumnValue, Constraint, ConstraintValue, DatabaseId, DbError, NamedValue,
    Result, WhereClause,
};
use simdb_core::schema::Schema;
use simdb_core::{ColumnOrdering, DatabaseBackend, QuerySpec, RowCursor};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use ddl::{dtype_from_sql_decl, quote_ident};

/// First 16 bytes of every SQLite 3 database file.
const SQLITE_SIGNATURE: &[u8; 16] = b"SQLite format 3\0";

/// Storage-type name to use with the SimDB registration surface.
pub const STORAGE_TYPE: &str = "sqlite";

/// Register this back-end's factory under the `"sqlite"` storage type.
pub fn register() {
    simdb_core::DatabaseRoot::register_backend_factory(STORAGE_TYPE, || {
        Box::new(SqliteBackend::new())
    });
}

/// SQLite-backed [`DatabaseBackend`].
#[derive(Default)]
pub struct SqliteBackend {
    conn: Option<Connection>,
    filename: Option<PathBuf>,
    /// Ordered (column, type) lists per table, for decode and for the
    /// fixed-size record factory.
    tables: HashMap<String, Vec<(String, ColumnDataType)>>,
}

impl SqliteBackend {
    pub fn new() -> Self {
        SqliteBackend::default()
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(DbError::NotConnected)
    }

    fn exec_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql).map_err(map_sqlite_err)
    }

    fn install_connection(&mut self, conn: Connection, path: PathBuf) -> Result<()> {
        register_within_tol(&conn)?;
        self.conn = Some(conn);
        self.filename = Some(path);
        Ok(())
    }

    /// Rebuild the per-table column map from `sqlite_master` and
    /// `PRAGMA table_info`. Used on the reopen path, where no Schema
    /// object exists.
    fn load_table_layouts(&mut self) -> Result<()> {
        let conn = self.conn()?;
        let mut names = Vec::new();
        {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
                .map_err(map_sqlite_err)?;
            let mut rows = stmt.query([]).map_err(map_sqlite_err)?;
            while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                names.push(row.get::<_, String>(0).map_err(map_sqlite_err)?);
            }
        }

        let mut tables = HashMap::new();
        for name in names {
            let mut columns = Vec::new();
            let sql = format!("PRAGMA table_info({})", quote_ident(&name));
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
            let mut rows = stmt.query([]).map_err(map_sqlite_err)?;
            while let Some(row) = rows.next().map_err(map_sqlite_err)? {
                let col_name: String = row.get(1).map_err(map_sqlite_err)?;
                let decl: String = row.get(2).map_err(map_sqlite_err)?;
                if col_name == "Id" {
                    continue;
                }
                let Some(dtype) = dtype_from_sql_decl(&decl) else {
                    return Err(DbError::Schema(format!(
                        "table '{}' column '{}' has unknown declared type '{}'",
                        name, col_name, decl
                    )));
                };
                columns.push((col_name, dtype));
            }
            tables.insert(name, columns);
        }
        self.tables = tables;
        Ok(())
    }

    fn table_layout(&self, table: &str) -> Result<&Vec<(String, ColumnDataType)>> {
        self.tables.get(table).ok_or_else(|| {
            DbError::Schema(format!("no table named '{}' in this database", table))
        })
    }
}

impl DatabaseBackend for SqliteBackend {
    fn file_extension(&self) -> &'static str {
        ".db"
    }

    fn validate_schema(&self, schema: &Schema) -> Result<()> {
        for table in schema.tables() {
            for column in table.columns() {
                if !column.is_scalar() {
                    return Err(DbError::schema(
                        table.name(),
                        format!(
                            "column '{}' is matrix-typed; the SQLite back-end \
                             only supports scalar columns",
                            column.name()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn realize_schema(&mut self, schema: &Schema) -> Result<()> {
        let ddl = ddl::schema_to_ddl(schema);
        tracing::debug!(tables = schema.tables().count(), "realizing schema");
        self.exec_batch(&ddl)?;
        for table in schema.tables() {
            self.tables.insert(
                table.name().to_string(),
                table
                    .columns()
                    .iter()
                    .map(|c| (c.name().to_string(), c.data_type()))
                    .collect(),
            );
        }
        Ok(())
    }

    fn open_file(&mut self, db_dir: &Path, filename: &str, create: bool) -> Result<PathBuf> {
        if create {
            std::fs::create_dir_all(db_dir)?;
        }
        let path = db_dir.join(filename);
        let conn = Connection::open(&path).map_err(map_sqlite_err)?;
        self.install_connection(conn, path.clone())?;
        Ok(path)
    }

    fn open_existing_file(&mut self, path: &Path) -> Result<bool> {
        // Refuse files that do not carry the SQLite signature.
        use std::io::Read;
        let mut header = [0u8; 16];
        let Ok(mut file) = std::fs::File::open(path) else {
            return Ok(false);
        };
        if file.read_exact(&mut header).is_err() || &header != SQLITE_SIGNATURE {
            return Ok(false);
        }
        drop(file);

        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        self.install_connection(conn, path.to_path_buf())?;
        self.load_table_layouts()?;
        Ok(true)
    }

    fn full_filename(&self) -> Option<PathBuf> {
        self.filename.clone()
    }

    fn is_valid(&self) -> bool {
        self.conn.is_some()
    }

    fn supports_atomic_transactions(&self) -> bool {
        true
    }

    fn begin_atomic_transaction(&mut self) -> Result<()> {
        self.exec_batch("BEGIN TRANSACTION")
    }

    fn commit_atomic_transaction(&mut self) -> Result<()> {
        self.exec_batch("COMMIT TRANSACTION")
    }

    fn rollback_atomic_transaction(&mut self) -> Result<()> {
        self.exec_batch("ROLLBACK TRANSACTION")
    }

    fn table_names(&self) -> Result<HashSet<String>> {
        if self.conn.is_none() {
            return Ok(HashSet::new());
        }
        Ok(self.tables.keys().cloned().collect())
    }

    fn perform_delete(&mut self, table: &str, where_clauses: &[WhereClause]) -> Result<()> {
        let layout = self.table_layout(table)?.clone();
        let (where_sql, params) = build_where(&layout, where_clauses)?;
        let sql = format!("DELETE FROM {}{}", quote_ident(table), where_sql);
        self.conn()?
            .execute(&sql, rusqlite::params_from_iter(params))
            .map_err(map_sqlite_err)?;
        Ok(())
    }

    fn perform_update(
        &mut self,
        table: &str,
        values: &[NamedValue],
        where_clauses: &[WhereClause],
    ) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let layout = self.table_layout(table)?.clone();
        let mut params: Vec<SqlValue> = Vec::new();
        let set_sql: Vec<String> = values
            .iter()
            .map(|nv| {
                params.push(to_sql_value(&nv.value));
                format!("{} = ?", quote_ident(&nv.column))
            })
            .collect();
        let (where_sql, where_params) = build_where(&layout, where_clauses)?;
        params.extend(where_params);

        let sql = format!(
            "UPDATE {} SET {}{}",
            quote_ident(table),
            set_sql.join(", "),
            where_sql
        );
        self.conn()?
            .execute(&sql, rusqlite::params_from_iter(params))
            .map_err(map_sqlite_err)
    }

    fn create_object(&mut self, table: &str, values: &[NamedValue]) -> Result<DatabaseId> {
        let conn = self.conn()?;
        if values.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
            conn.execute(&sql, []).map_err(map_sqlite_err)?;
            return Ok(conn.last_insert_rowid());
        }

        let columns: Vec<String> = values.iter().map(|nv| quote_ident(&nv.column)).collect();
        let placeholders: Vec<&str> = values.iter().map(|_| "?").collect();
        let params: Vec<SqlValue> = values.iter().map(|nv| to_sql_value(&nv.value)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        conn.execute(&sql, rusqlite::params_from_iter(params))
            .map_err(map_sqlite_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn create_fixed_size_object(&mut self, table: &str, raw_bytes: &[u8]) -> Result<DatabaseId> {
        let layout = self.table_layout(table)?.clone();
        let mut offset = 0usize;
        let mut values = Vec::with_capacity(layout.len());
        for (name, dtype) in &layout {
            let width = dtype.fixed_width().ok_or_else(|| {
                DbError::schema(table, "variable-width column in fixed-size record")
            })?;
            let value = ColumnValue::unpack_fixed(*dtype, &raw_bytes[offset..])
                .ok_or_else(|| DbError::schema(table, "packed record too short"))?;
            values.push(NamedValue::new(name.clone(), value));
            offset += width;
        }
        self.create_object(table, &values)
    }

    fn supports_object_query(&self) -> bool {
        true
    }

    fn prepare_query(&mut self, spec: &QuerySpec) -> Result<Box<dyn RowCursor>> {
        let layout = self.table_layout(&spec.table)?.clone();
        let (where_sql, params) = build_where(&layout, &spec.where_clauses)?;

        let select: Vec<String> = spec.columns.iter().map(|c| quote_ident(c)).collect();
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            select.join(", "),
            quote_ident(&spec.table),
            where_sql
        );
        if let Some((column, ordering)) = &spec.order_by {
            let dir = match ordering {
                ColumnOrdering::Ascending => "ASC",
                ColumnOrdering::Descending => "DESC",
            };
            // Ties between equal keys fall back to insertion order.
            sql.push_str(&format!(
                " ORDER BY {} {}, Id ASC",
                quote_ident(column),
                dir
            ));
        }
        if let Some(limit) = spec.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let dtypes: Vec<ColumnDataType> = spec
            .columns
            .iter()
            .map(|c| column_dtype(&layout, c))
            .collect::<Result<_>>()?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(map_sqlite_err)?;

        let mut materialized = VecDeque::new();
        while let Some(row) = rows.next().map_err(map_sqlite_err)? {
            let mut decoded = Vec::with_capacity(dtypes.len());
            for (idx, dtype) in dtypes.iter().enumerate() {
                let raw: SqlValue = row.get(idx).map_err(map_sqlite_err)?;
                decoded.push(decode_sql_value(raw, *dtype, &spec.columns[idx])?);
            }
            materialized.push_back(decoded);
        }
        Ok(Box::new(MaterializedCursor { rows: materialized }))
    }

    fn column_data_type(&self, table: &str, column: &str) -> Result<ColumnDataType> {
        column_dtype(self.table_layout(table)?, column)
    }
}

struct MaterializedCursor {
    rows: VecDeque<Vec<ColumnValue>>,
}

impl RowCursor for MaterializedCursor {
    fn next_row(&mut self) -> Result<Option<Vec<ColumnValue>>> {
        Ok(self.rows.pop_front())
    }
}

fn column_dtype(layout: &[(String, ColumnDataType)], column: &str) -> Result<ColumnDataType> {
    if column == "Id" {
        return Ok(ColumnDataType::Int64);
    }
    layout
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, dtype)| *dtype)
        .ok_or_else(|| DbError::TypeMismatch {
            column: column.to_string(),
        })
}

/// SQLITE_BUSY / SQLITE_LOCKED are transient concurrency conditions,
/// surfaced as access conflicts so the transaction machinery retries
/// them. Everything else is a hard failure.
fn map_sqlite_err(err: rusqlite::Error) -> DbError {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
        if matches!(
            ffi_err.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ) {
            return DbError::AccessConflict(err.to_string());
        }
    }
    DbError::General(err.to_string())
}

fn to_sql_value(value: &ColumnValue) -> SqlValue {
    match value {
        ColumnValue::Char(v) | ColumnValue::Int8(v) => SqlValue::Integer(*v as i64),
        ColumnValue::Int16(v) => SqlValue::Integer(*v as i64),
        ColumnValue::Int32(v) => SqlValue::Integer(*v as i64),
        ColumnValue::Int64(v) => SqlValue::Integer(*v),
        ColumnValue::Uint8(v) => SqlValue::Integer(*v as i64),
        ColumnValue::Uint16(v) => SqlValue::Integer(*v as i64),
        ColumnValue::Uint32(v) => SqlValue::Integer(*v as i64),
        // SQLite integers are 64-bit signed; clamp rather than wrap so
        // range constraints above i64::MAX still behave sanely.
        ColumnValue::Uint64(v) => SqlValue::Integer((*v).min(i64::MAX as u64) as i64),
        ColumnValue::Float(v) => SqlValue::Real(*v as f64),
        ColumnValue::Double(v) => SqlValue::Real(*v),
        ColumnValue::String(v) => SqlValue::Text(v.clone()),
        ColumnValue::Blob(v) => SqlValue::Blob(v.clone()),
        ColumnValue::FKey(v) => SqlValue::Integer(*v as i64),
    }
}

/// NULL decodes to the type's zero value, matching what a C API's
/// column accessors would have produced.
fn decode_sql_value(raw: SqlValue, dtype: ColumnDataType, column: &str) -> Result<ColumnValue> {
    use ColumnDataType as DT;
    let mismatch = || DbError::TypeMismatch {
        column: column.to_string(),
    };

    let int = |raw: &SqlValue| -> Result<i64> {
        match raw {
            SqlValue::Integer(v) => Ok(*v),
            SqlValue::Null => Ok(0),
            _ => Err(mismatch()),
        }
    };
    let real = |raw: &SqlValue| -> Result<f64> {
        match raw {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            SqlValue::Null => Ok(0.0),
            _ => Err(mismatch()),
        }
    };

    Ok(match dtype {
        DT::Char => ColumnValue::Char(int(&raw)? as i8),
        DT::Int8 => ColumnValue::Int8(int(&raw)? as i8),
        DT::Int16 => ColumnValue::Int16(int(&raw)? as i16),
        DT::Int32 => ColumnValue::Int32(int(&raw)? as i32),
        DT::Int64 => ColumnValue::Int64(int(&raw)?),
        DT::Uint8 => ColumnValue::Uint8(int(&raw)? as u8),
        DT::Uint16 => ColumnValue::Uint16(int(&raw)? as u16),
        DT::Uint32 => ColumnValue::Uint32(int(&raw)? as u32),
        DT::Uint64 => ColumnValue::Uint64(int(&raw)? as u64),
        DT::Float => ColumnValue::Float(real(&raw)? as f32),
        DT::Double => ColumnValue::Double(real(&raw)?),
        DT::FKey => ColumnValue::FKey(int(&raw)? as i32),
        DT::String => match raw {
            SqlValue::Text(s) => ColumnValue::String(s),
            SqlValue::Null => ColumnValue::String(String::new()),
            _ => return Err(mismatch()),
        },
        DT::Blob => match raw {
            SqlValue::Blob(b) => ColumnValue::Blob(b),
            SqlValue::Null => ColumnValue::Blob(Vec::new()),
            _ => return Err(mismatch()),
        },
    })
}

/// Build a `WHERE` fragment (with a leading space) plus its parameters.
/// Equality against a floating-point target compiles to the registered
/// `within_tol` function instead of `=`.
fn build_where(
    layout: &[(String, ColumnDataType)],
    clauses: &[WhereClause],
) -> Result<(String, Vec<SqlValue>)> {
    if clauses.is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut fragments = Vec::with_capacity(clauses.len());
    let mut params = Vec::new();

    for clause in clauses {
        // Unknown constraint columns surface as a typed error here, not
        // as an engine parse failure downstream.
        let _ = column_dtype(layout, &clause.column)?;
        match (&clause.value, clause.constraint) {
            (ConstraintValue::Set(set), Constraint::InSet) => {
                let placeholders: Vec<&str> = set.iter().map(|_| "?").collect();
                fragments.push(format!(
                    "{} IN ({})",
                    quote_ident(&clause.column),
                    placeholders.join(", ")
                ));
                params.extend(set.iter().map(to_sql_value));
            }
            (ConstraintValue::Set(_), _) => {
                return Err(DbError::General(format!(
                    "set constraint on column '{}' requires the in-set operator",
                    clause.column
                )));
            }
            (ConstraintValue::Scalar(value), Constraint::Equal) if is_float(value) => {
                fragments.push(format!("within_tol({}, ?, ?)", quote_ident(&clause.column)));
                params.push(to_sql_value(value));
                params.push(SqlValue::Real(epsilon_for(value)));
            }
            (ConstraintValue::Scalar(value), constraint) => {
                fragments.push(format!(
                    "{} {} ?",
                    quote_ident(&clause.column),
                    constraint_op(constraint)
                ));
                params.push(to_sql_value(value));
            }
        }
    }

    Ok((format!(" WHERE {}", fragments.join(" AND ")), params))
}

fn is_float(value: &ColumnValue) -> bool {
    matches!(value, ColumnValue::Float(_) | ColumnValue::Double(_))
}

fn epsilon_for(value: &ColumnValue) -> f64 {
    match value {
        ColumnValue::Float(_) => f32::EPSILON as f64,
        _ => f64::EPSILON,
    }
}

fn constraint_op(constraint: Constraint) -> &'static str {
    match constraint {
        Constraint::Equal => "=",
        Constraint::NotEqual => "!=",
        Constraint::Less => "<",
        Constraint::LessOrEqual => "<=",
        Constraint::Greater => ">",
        Constraint::GreaterOrEqual => ">=",
        Constraint::InSet => "IN",
    }
}

/// `within_tol(value, target, tolerance)` -> 1 when `|value - target|`
/// is within the tolerance.
fn register_within_tol(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "within_tol",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: f64 = ctx.get(0)?;
            let target: f64 = ctx.get(1)?;
            let tolerance: f64 = ctx.get(2)?;
            Ok((value - target).abs() <= tolerance)
        },
    )
    .map_err(map_sqlite_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simdb_core::schema::Schema;

    fn open_backend() -> (SqliteBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = SqliteBackend::new();
        backend.open_file(dir.path(), "test.db", true).unwrap();
        (backend, dir)
    }

    fn employees_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_table("Employees")
            .add_column("EmployeeID", ColumnDataType::Int32)
            .add_column("Age", ColumnDataType::Int32)
            .add_column_with_default("Last", ColumnDataType::String, "unset");
        schema.finalize().unwrap();
        schema
    }

    #[test]
    fn signature_probe_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.db");
        std::fs::write(&bogus, b"not a database at all").unwrap();
        let mut backend = SqliteBackend::new();
        assert!(!backend.open_existing_file(&bogus).unwrap());
        assert!(!backend.is_valid());
    }

    #[test]
    fn insert_defaults_apply() {
        let (mut backend, _dir) = open_backend();
        backend.realize_schema(&employees_schema()).unwrap();
        let id = backend.create_object("Employees", &[]).unwrap();
        assert_eq!(id, 1);

        let spec = QuerySpec {
            table: "Employees".into(),
            columns: vec!["Last".into()],
            where_clauses: vec![],
            order_by: None,
            limit: None,
        };
        let mut cursor = backend.prepare_query(&spec).unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row[0], ColumnValue::String("unset".into()));
    }

    #[test]
    fn constraints_compose_with_and() {
        let (mut backend, _dir) = open_backend();
        backend.realize_schema(&employees_schema()).unwrap();
        for (id, age) in [(104, 41), (398, 22), (500, 50)] {
            backend
                .create_object(
                    "Employees",
                    &[
                        NamedValue::new("EmployeeID", id),
                        NamedValue::new("Age", age),
                    ],
                )
                .unwrap();
        }

        let spec = QuerySpec {
            table: "Employees".into(),
            columns: vec!["EmployeeID".into()],
            where_clauses: vec![
                WhereClause::new(
                    "EmployeeID",
                    Constraint::InSet,
                    ConstraintValue::set([104, 398]),
                ),
                WhereClause::new("Age", Constraint::Greater, 30),
            ],
            order_by: None,
            limit: None,
        };
        let mut cursor = backend.prepare_query(&spec).unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row[0], ColumnValue::Int32(104));
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn rollback_discards_writes() {
        let (mut backend, _dir) = open_backend();
        backend.realize_schema(&employees_schema()).unwrap();

        backend.begin_atomic_transaction().unwrap();
        backend
            .create_object("Employees", &[NamedValue::new("EmployeeID", 1)])
            .unwrap();
        backend.rollback_atomic_transaction().unwrap();

        let spec = QuerySpec {
            table: "Employees".into(),
            columns: vec!["Id".into()],
            where_clauses: vec![],
            order_by: None,
            limit: None,
        };
        let mut cursor = backend.prepare_query(&spec).unwrap();
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn float_equality_tolerates_epsilon() {
        let (mut backend, _dir) = open_backend();
        let mut schema = Schema::new();
        schema
            .add_table("Samples")
            .add_column("Value", ColumnDataType::Double);
        schema.finalize().unwrap();
        backend.realize_schema(&schema).unwrap();

        backend
            .create_object("Samples", &[NamedValue::new("Value", 0.1f64 + 0.2f64)])
            .unwrap();

        let spec = QuerySpec {
            table: "Samples".into(),
            columns: vec!["Id".into()],
            where_clauses: vec![WhereClause::new("Value", Constraint::Equal, 0.3f64)],
            order_by: None,
            limit: None,
        };
        let mut cursor = backend.prepare_query(&spec).unwrap();
        assert!(cursor.next_row().unwrap().is_some());
    }
}
