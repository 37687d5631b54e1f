//! Dense fixed-width numeric storage back-end for SimDB.
//!
//! Every table is a contiguous array of packed little-endian records;
//! a record's `Id` is its 1-based position in the array. Reads go
//! through byte offsets ("give me column `y` of element #14" is "seek to
//! element 13, then 2 bytes further"), which makes this engine a good
//! fit for bulk numeric telemetry and a poor fit for anything needing
//! predicates: there is no object-query support, and updates/deletes
//! are not implemented.
//!
//! On disk the store is a `.sdb` ZIP container holding `manifest.json`
//! (table layouts, record counts, SHA-256 payload digests) plus one
//! `tables/<name>.bin` segment per table. Data lives in memory while
//! the connection is open and is persisted when the connection closes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use simdb_common::{ColumnDataType, ColumnValue, DatabaseId, DbError, NamedValue, Result};
use simdb_core::schema::Schema;
use simdb_core::DatabaseBackend;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Storage-type name to use with the SimDB registration surface.
pub const STORAGE_TYPE: &str = "dense";

/// Manifest format tag; doubles as the container signature.
const FORMAT_TAG: &str = "simdb-dense";

const MANIFEST_NAME: &str = "manifest.json";

/// Register this back-end's factory under the `"dense"` storage type.
pub fn register() {
    simdb_core::DatabaseRoot::register_backend_factory(STORAGE_TYPE, || {
        Box::new(DenseBackend::new())
    });
}

#[derive(Serialize, Deserialize)]
struct ColumnEntry {
    name: String,
    dtype: ColumnDataType,
    /// Packed width in bytes; `dtype` width times the element count for
    /// matrix columns.
    width: usize,
}

#[derive(Serialize, Deserialize)]
struct TableEntry {
    name: String,
    columns: Vec<ColumnEntry>,
    record_size: usize,
    num_records: u64,
    sha256: String,
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    format: String,
    version: u32,
    tables: Vec<TableEntry>,
}

struct TableStore {
    columns: Vec<ColumnEntry>,
    record_size: usize,
    num_records: u64,
    /// Zeroed record image with schema defaults applied; new records
    /// start from a copy of this.
    template: Vec<u8>,
    data: Vec<u8>,
}

impl TableStore {
    fn column(&self, name: &str) -> Option<(usize, &ColumnEntry)> {
        let mut offset = 0usize;
        for entry in &self.columns {
            if entry.name == name {
                return Some((offset, entry));
            }
            offset += entry.width;
        }
        None
    }
}

/// Fixed-width numeric [`DatabaseBackend`].
#[derive(Default)]
pub struct DenseBackend {
    path: Option<PathBuf>,
    tables: HashMap<String, TableStore>,
    table_order: Vec<String>,
}

impl DenseBackend {
    pub fn new() -> Self {
        DenseBackend::default()
    }

    fn table(&self, name: &str) -> Result<&TableStore> {
        self.tables.get(name).ok_or_else(|| {
            DbError::Schema(format!("no table named '{}' in this database", name))
        })
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableStore> {
        self.tables.get_mut(name).ok_or_else(|| {
            DbError::Schema(format!("no table named '{}' in this database", name))
        })
    }

    /// Write the whole container out, temp-file-then-rename so an
    /// interrupted write never clobbers the previous good state.
    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(DbError::NotConnected);
        };
        let tmp_path = path.with_extension("sdb.tmp");
        let file = std::fs::File::create(&tmp_path)?;
        let mut archive = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let manifest = Manifest {
            format: FORMAT_TAG.to_string(),
            version: 1,
            tables: self
                .table_order
                .iter()
                .map(|name| {
                    let store = &self.tables[name];
                    TableEntry {
                        name: name.clone(),
                        columns: store
                            .columns
                            .iter()
                            .map(|c| ColumnEntry {
                                name: c.name.clone(),
                                dtype: c.dtype,
                                width: c.width,
                            })
                            .collect(),
                        record_size: store.record_size,
                        num_records: store.num_records,
                        sha256: hex::encode(Sha256::digest(&store.data)),
                    }
                })
                .collect(),
        };

        archive
            .start_file(MANIFEST_NAME, options)
            .map_err(map_zip_err)?;
        let manifest_json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| DbError::General(e.to_string()))?;
        archive.write_all(&manifest_json)?;

        for name in &self.table_order {
            archive
                .start_file(format!("tables/{}.bin", name), options)
                .map_err(map_zip_err)?;
            archive.write_all(&self.tables[name].data)?;
        }
        archive.finish().map_err(map_zip_err)?;

        std::fs::rename(&tmp_path, path)?;
        tracing::debug!(path = %path.display(), "dense store persisted");
        Ok(())
    }
}

impl DatabaseBackend for DenseBackend {
    fn file_extension(&self) -> &'static str {
        ".sdb"
    }

    /// This engine packs every record into a fixed byte image, so all
    /// columns must be fixed-width. Matrix columns are fine.
    fn validate_schema(&self, schema: &Schema) -> Result<()> {
        for table in schema.tables() {
            for column in table.columns() {
                if !column.data_type().is_fixed_width() {
                    return Err(DbError::schema(
                        table.name(),
                        format!(
                            "column '{}' is variable-width; the dense back-end \
                             only supports fixed-width columns",
                            column.name()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn realize_schema(&mut self, schema: &Schema) -> Result<()> {
        for table in schema.tables() {
            if self.tables.contains_key(table.name()) {
                continue;
            }
            let mut columns = Vec::new();
            let mut record_size = 0usize;
            for column in table.columns() {
                let scalar_width = column.data_type().fixed_width().expect("validated");
                let count: usize = if column.dims().is_empty() {
                    1
                } else {
                    column.dims().iter().product()
                };
                let width = scalar_width * count;
                columns.push(ColumnEntry {
                    name: column.name().to_string(),
                    dtype: column.data_type(),
                    width,
                });
                record_size += width;
            }

            let mut template = vec![0u8; record_size];
            let mut offset = 0usize;
            for (column, entry) in table.columns().iter().zip(&columns) {
                if let Some(default) = column.default_value() {
                    let mut bytes = Vec::new();
                    if default.pack_fixed(&mut bytes) && bytes.len() <= entry.width {
                        template[offset..offset + bytes.len()].copy_from_slice(&bytes);
                    }
                }
                offset += entry.width;
            }

            self.table_order.push(table.name().to_string());
            self.tables.insert(
                table.name().to_string(),
                TableStore {
                    columns,
                    record_size,
                    num_records: 0,
                    template,
                    data: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn open_file(&mut self, db_dir: &Path, filename: &str, create: bool) -> Result<PathBuf> {
        if create {
            std::fs::create_dir_all(db_dir)?;
        }
        let path = db_dir.join(filename);
        self.path = Some(path.clone());
        // Materialize the container right away so the file exists even
        // before the first flush.
        self.persist()?;
        Ok(path)
    }

    fn open_existing_file(&mut self, path: &Path) -> Result<bool> {
        let Ok(file) = std::fs::File::open(path) else {
            return Ok(false);
        };
        let Ok(mut container) = zip::ZipArchive::new(file) else {
            return Ok(false);
        };

        let manifest: Manifest = {
            let Ok(mut entry) = container.by_name(MANIFEST_NAME) else {
                return Ok(false);
            };
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            match serde_json::from_str(&json) {
                Ok(manifest) => manifest,
                Err(_) => return Ok(false),
            }
        };
        if manifest.format != FORMAT_TAG {
            return Ok(false);
        }

        let mut tables = HashMap::new();
        let mut table_order = Vec::new();
        for entry in manifest.tables {
            let mut data = Vec::new();
            container
                .by_name(&format!("tables/{}.bin", entry.name))
                .map_err(map_zip_err)?
                .read_to_end(&mut data)?;
            if hex::encode(Sha256::digest(&data)) != entry.sha256 {
                return Err(DbError::General(format!(
                    "dense store table '{}' failed its integrity check",
                    entry.name
                )));
            }
            table_order.push(entry.name.clone());
            tables.insert(
                entry.name,
                TableStore {
                    record_size: entry.record_size,
                    num_records: entry.num_records,
                    template: vec![0u8; entry.record_size],
                    columns: entry.columns,
                    data,
                },
            );
        }

        self.tables = tables;
        self.table_order = table_order;
        self.path = Some(path.to_path_buf());
        Ok(true)
    }

    fn full_filename(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    fn is_valid(&self) -> bool {
        self.path.is_some()
    }

    /// Writes land in a memory segment and hit disk on close; there is
    /// nothing for a transaction bracket to do.
    fn supports_atomic_transactions(&self) -> bool {
        false
    }

    fn table_names(&self) -> Result<HashSet<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    fn perform_delete(
        &mut self,
        _table: &str,
        _where_clauses: &[simdb_common::WhereClause],
    ) -> Result<()> {
        Err(DbError::NotImplemented("perform_delete"))
    }

    fn perform_update(
        &mut self,
        _table: &str,
        _values: &[NamedValue],
        _where_clauses: &[simdb_common::WhereClause],
    ) -> Result<usize> {
        Err(DbError::NotImplemented("perform_update"))
    }

    fn read_raw_bytes(
        &mut self,
        table: &str,
        column: &str,
        id: DatabaseId,
        dest: &mut [u8],
    ) -> Result<usize> {
        let store = self.table(table)?;
        if id < 1 || id as u64 > store.num_records {
            return Err(DbError::IndexOutOfRange(format!(
                "no record with Id {} in table '{}'",
                id, table
            )));
        }
        let (offset, entry) = store.column(column).ok_or_else(|| DbError::TypeMismatch {
            column: column.to_string(),
        })?;
        let start = (id as usize - 1) * store.record_size + offset;
        let n = dest.len().min(entry.width);
        dest[..n].copy_from_slice(&store.data[start..start + n]);
        Ok(n)
    }

    fn create_object(&mut self, table: &str, values: &[NamedValue]) -> Result<DatabaseId> {
        let store = self.table_mut(table)?;
        let mut record = store.template.clone();

        for nv in values {
            let Some((offset, entry)) = store.column(&nv.column) else {
                return Err(DbError::schema(
                    table,
                    format!("unknown column '{}'", nv.column),
                ));
            };
            let mut bytes = Vec::new();
            match &nv.value {
                // Matrix columns take their packed image as a blob.
                ColumnValue::Blob(blob) => bytes.extend_from_slice(blob),
                scalar => {
                    if !scalar.pack_fixed(&mut bytes) {
                        return Err(DbError::TypeMismatch {
                            column: nv.column.clone(),
                        });
                    }
                }
            }
            if bytes.len() != entry.width {
                return Err(DbError::TypeMismatch {
                    column: nv.column.clone(),
                });
            }
            record[offset..offset + entry.width].copy_from_slice(&bytes);
        }

        store.data.extend_from_slice(&record);
        store.num_records += 1;
        Ok(store.num_records as DatabaseId)
    }

    fn create_fixed_size_object(&mut self, table: &str, raw_bytes: &[u8]) -> Result<DatabaseId> {
        let store = self.table_mut(table)?;
        if raw_bytes.len() != store.record_size {
            return Err(DbError::schema(
                table,
                format!(
                    "packed record is {} bytes, table records are {}",
                    raw_bytes.len(),
                    store.record_size
                ),
            ));
        }
        store.data.extend_from_slice(raw_bytes);
        store.num_records += 1;
        Ok(store.num_records as DatabaseId)
    }

    fn has_object(&mut self, table: &str, id: DatabaseId) -> Result<bool> {
        let store = self.table(table)?;
        Ok(id >= 1 && id as u64 <= store.num_records)
    }

    fn column_data_type(&self, table: &str, column: &str) -> Result<ColumnDataType> {
        if column == "Id" {
            return Ok(ColumnDataType::Int64);
        }
        self.table(table)?
            .column(column)
            .map(|(_, entry)| entry.dtype)
            .ok_or_else(|| DbError::TypeMismatch {
                column: column.to_string(),
            })
    }
}

impl Drop for DenseBackend {
    fn drop(&mut self) {
        if self.path.is_some() {
            if let Err(err) = self.persist() {
                tracing::warn!(error = %err, "failed to persist dense store on close");
            }
        }
    }
}

fn map_zip_err(err: zip::result::ZipError) -> DbError {
    DbError::General(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters_schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_table("Counters")
            .add_column("X", ColumnDataType::Uint16)
            .add_column("Y", ColumnDataType::Uint16);
        schema.finalize().unwrap();
        schema
    }

    #[test]
    fn variable_width_schemas_are_rejected() {
        let mut schema = Schema::new();
        schema
            .add_table("Bad")
            .add_column("Name", ColumnDataType::String);
        schema.finalize().unwrap();
        assert!(DenseBackend::new().validate_schema(&schema).is_err());
    }

    #[test]
    fn raw_byte_reads_use_column_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new();
        backend.open_file(dir.path(), "t.sdb", true).unwrap();
        backend.realize_schema(&counters_schema()).unwrap();

        for i in 0..14u16 {
            backend
                .create_object(
                    "Counters",
                    &[NamedValue::new("X", i), NamedValue::new("Y", i * 10)],
                )
                .unwrap();
        }

        // Column Y of element #14 lives 2 bytes past element offset 13.
        let mut buf = [0u8; 2];
        let n = backend.read_raw_bytes("Counters", "Y", 14, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(u16::from_le_bytes(buf), 130);
    }

    #[test]
    fn persists_and_reopens_with_integrity_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut backend = DenseBackend::new();
            let path = backend.open_file(dir.path(), "t.sdb", true).unwrap();
            backend.realize_schema(&counters_schema()).unwrap();
            backend
                .create_object("Counters", &[NamedValue::new("X", 7u16)])
                .unwrap();
            path
            // Drop persists.
        };

        let mut reopened = DenseBackend::new();
        assert!(reopened.open_existing_file(&path).unwrap());
        assert!(reopened.has_object("Counters", 1).unwrap());
        assert!(!reopened.has_object("Counters", 2).unwrap());

        let mut buf = [0u8; 2];
        reopened.read_raw_bytes("Counters", "X", 1, &mut buf).unwrap();
        assert_eq!(u16::from_le_bytes(buf), 7);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.sdb");
        std::fs::write(&bogus, b"definitely not a container").unwrap();
        let mut backend = DenseBackend::new();
        assert!(!backend.open_existing_file(&bogus).unwrap());
    }

    #[test]
    fn fixed_size_factory_appends_packed_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = DenseBackend::new();
        backend.open_file(dir.path(), "t.sdb", true).unwrap();
        backend.realize_schema(&counters_schema()).unwrap();

        let record = [1u8, 0, 2, 0];
        let id = backend
            .create_fixed_size_object("Counters", &record)
            .unwrap();
        assert_eq!(id, 1);
        assert!(backend
            .create_fixed_size_object("Counters", &[0u8; 3])
            .is_err());
    }
}
