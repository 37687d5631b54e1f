//! Schema-to-DDL translation.

use simdb_common::{ColumnDataType, ColumnValue};
use simdb_core::schema::Schema;

/// Quote an identifier. Table names may contain the namespace delimiter,
/// so every identifier is double-quoted.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Width-exact declaration names, recovered verbatim by
/// `PRAGMA table_info` on reopen.
pub fn dtype_to_sql_decl(dtype: ColumnDataType) -> &'static str {
    use ColumnDataType::*;
    match dtype {
        Char => "CHAR_T",
        Int8 => "INT8",
        Int16 => "INT16",
        Int32 => "INT32",
        Int64 => "INT64",
        Uint8 => "UINT8",
        Uint16 => "UINT16",
        Uint32 => "UINT32",
        Uint64 => "UINT64",
        Float => "FLOAT",
        Double => "DOUBLE",
        String => "TEXT",
        Blob => "BLOB",
        FKey => "FKEY",
    }
}

pub fn dtype_from_sql_decl(decl: &str) -> Option<ColumnDataType> {
    use ColumnDataType::*;
    Some(match decl.to_ascii_uppercase().as_str() {
        "CHAR_T" => Char,
        "INT8" => Int8,
        "INT16" => Int16,
        "INT32" => Int32,
        "INT64" => Int64,
        "UINT8" => Uint8,
        "UINT16" => Uint16,
        "UINT32" => Uint32,
        "UINT64" => Uint64,
        "FLOAT" => Float,
        "DOUBLE" => Double,
        "TEXT" => String,
        "BLOB" => Blob,
        "FKEY" => FKey,
        _ => return None,
    })
}

fn default_literal(value: &ColumnValue) -> Option<std::string::String> {
    match value {
        ColumnValue::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        ColumnValue::Blob(_) => None,
        other => other.as_f64().map(|v| {
            if v.fract() == 0.0 && !other.data_type().is_floating_point() {
                format!("{}", v as i64)
            } else {
                format!("{}", v)
            }
        }),
    }
}

/// One `CREATE TABLE IF NOT EXISTS` per table plus one
/// `CREATE INDEX IF NOT EXISTS` per indexed column, as a single batch.
pub fn schema_to_ddl(schema: &Schema) -> std::string::String {
    let mut ddl = std::string::String::new();

    for table in schema.tables() {
        let mut column_defs = vec!["Id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
        for column in table.columns() {
            let mut def = format!(
                "{} {}",
                quote_ident(column.name()),
                dtype_to_sql_decl(column.data_type())
            );
            if let Some(literal) = column.default_value().and_then(default_literal) {
                def.push_str(&format!(" DEFAULT {}", literal));
            }
            column_defs.push(def);
        }
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({});\n",
            quote_ident(table.name()),
            column_defs.join(", ")
        ));

        for column in table.columns().iter().filter(|c| c.is_indexed()) {
            let index_name = format!("idx_{}_{}", table.name(), column.name()).replace('$', "_");
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({});\n",
                quote_ident(&index_name),
                quote_ident(table.name()),
                quote_ident(column.name())
            ));
        }
    }

    ddl
}
