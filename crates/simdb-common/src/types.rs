//! Database record IDs and the closed set of column data types.

use serde::{Deserialize, Serialize};

/// Unique ID of a record within one table. Assigned by the back-end,
/// strictly increasing per table, always positive for live records.
pub type DatabaseId = i64;

/// Reserved "no object" ID. Foreign keys holding this value are unlinked.
pub const NO_OBJECT: DatabaseId = 0;

/// Closed enumeration of column data types.
///
/// The first ten are fixed-width primitives; `String` and `Blob` are
/// variable-width. `FKey` aliases a 32-bit integer but marks the column
/// as a reference to another table's implicit `Id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDataType {
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Blob,
    FKey,
}

impl ColumnDataType {
    /// On-disk width in bytes for fixed-width types, `None` for
    /// variable-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        use ColumnDataType::*;
        match self {
            Char | Int8 | Uint8 => Some(1),
            Int16 | Uint16 => Some(2),
            Int32 | Uint32 | Float | FKey => Some(4),
            Int64 | Uint64 | Double => Some(8),
            String | Blob => None,
        }
    }

    /// True for every type with a known on-disk width.
    pub fn is_fixed_width(&self) -> bool {
        self.fixed_width().is_some()
    }

    /// True for the two floating-point types.
    pub fn is_floating_point(&self) -> bool {
        matches!(self, ColumnDataType::Float | ColumnDataType::Double)
    }
}

impl std::fmt::Display for ColumnDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ColumnDataType::*;
        let name = match self {
            Char => "char",
            Int8 => "int8",
            Int16 => "int16",
            Int32 => "int32",
            Int64 => "int64",
            Uint8 => "uint8",
            Uint16 => "uint16",
            Uint32 => "uint32",
            Uint64 => "uint64",
            Float => "float",
            Double => "double",
            String => "string",
            Blob => "blob",
            FKey => "fkey",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_widths_match_on_disk_layout() {
        assert_eq!(ColumnDataType::Char.fixed_width(), Some(1));
        assert_eq!(ColumnDataType::Uint16.fixed_width(), Some(2));
        assert_eq!(ColumnDataType::FKey.fixed_width(), Some(4));
        assert_eq!(ColumnDataType::Double.fixed_width(), Some(8));
        assert_eq!(ColumnDataType::String.fixed_width(), None);
        assert_eq!(ColumnDataType::Blob.fixed_width(), None);
    }
}
