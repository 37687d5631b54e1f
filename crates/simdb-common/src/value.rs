//! Typed column values.
//!
//! A [`ColumnValue`] is the unit of data crossing the back-end boundary:
//! insert bundles, update assignments, and query results are all built
//! from these.

use crate::types::{ColumnDataType, DatabaseId};

/// One typed value for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Char(i8),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    /// Foreign-key reference to another table's `Id` column. Stored as a
    /// 32-bit integer; `0` means unlinked.
    FKey(i32),
}

impl ColumnValue {
    /// The data type this value carries.
    pub fn data_type(&self) -> ColumnDataType {
        use ColumnValue::*;
        match self {
            Char(_) => ColumnDataType::Char,
            Int8(_) => ColumnDataType::Int8,
            Int16(_) => ColumnDataType::Int16,
            Int32(_) => ColumnDataType::Int32,
            Int64(_) => ColumnDataType::Int64,
            Uint8(_) => ColumnDataType::Uint8,
            Uint16(_) => ColumnDataType::Uint16,
            Uint32(_) => ColumnDataType::Uint32,
            Uint64(_) => ColumnDataType::Uint64,
            Float(_) => ColumnDataType::Float,
            Double(_) => ColumnDataType::Double,
            String(_) => ColumnDataType::String,
            Blob(_) => ColumnDataType::Blob,
            FKey(_) => ColumnDataType::FKey,
        }
    }

    /// Cast any numeric value to a double. Summary capture funnels every
    /// summarizable column through this before aggregation. Returns `None`
    /// for strings and blobs.
    pub fn as_f64(&self) -> Option<f64> {
        use ColumnValue::*;
        match self {
            Char(v) | Int8(v) => Some(*v as f64),
            Int16(v) => Some(*v as f64),
            Int32(v) => Some(*v as f64),
            Int64(v) => Some(*v as f64),
            Uint8(v) => Some(*v as f64),
            Uint16(v) => Some(*v as f64),
            Uint32(v) => Some(*v as f64),
            Uint64(v) => Some(*v as f64),
            Float(v) => Some(*v as f64),
            Double(v) => Some(*v),
            FKey(v) => Some(*v as f64),
            String(_) | Blob(_) => None,
        }
    }

    /// Signed-integer view, used when narrowing back-end integers into
    /// caller destinations. Returns `None` for non-integer values.
    pub fn as_i64(&self) -> Option<i64> {
        use ColumnValue::*;
        match self {
            Char(v) | Int8(v) => Some(*v as i64),
            Int16(v) => Some(*v as i64),
            Int32(v) => Some(*v as i64),
            Int64(v) => Some(*v),
            Uint8(v) => Some(*v as i64),
            Uint16(v) => Some(*v as i64),
            Uint32(v) => Some(*v as i64),
            Uint64(v) => Some(*v as i64),
            FKey(v) => Some(*v as i64),
            Float(_) | Double(_) | String(_) | Blob(_) => None,
        }
    }

    /// Append this value's little-endian byte image to `out`. Only legal
    /// for fixed-width values; the fixed-size record factories pack whole
    /// rows this way.
    pub fn pack_fixed(&self, out: &mut Vec<u8>) -> bool {
        use ColumnValue::*;
        match self {
            Char(v) | Int8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Uint8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Uint16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Uint32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Uint64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Double(v) => out.extend_from_slice(&v.to_le_bytes()),
            FKey(v) => out.extend_from_slice(&v.to_le_bytes()),
            String(_) | Blob(_) => return false,
        }
        true
    }

    /// Decode a fixed-width value of the given type from a little-endian
    /// byte image. Returns `None` if the type is variable-width or the
    /// slice is too short.
    pub fn unpack_fixed(dtype: ColumnDataType, bytes: &[u8]) -> Option<ColumnValue> {
        let width = dtype.fixed_width()?;
        if bytes.len() < width {
            return None;
        }
        let b = &bytes[..width];
        use ColumnDataType as DT;
        Some(match dtype {
            DT::Char => ColumnValue::Char(i8::from_le_bytes([b[0]])),
            DT::Int8 => ColumnValue::Int8(i8::from_le_bytes([b[0]])),
            DT::Int16 => ColumnValue::Int16(i16::from_le_bytes([b[0], b[1]])),
            DT::Int32 => ColumnValue::Int32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            DT::Int64 => ColumnValue::Int64(i64::from_le_bytes(b.try_into().ok()?)),
            DT::Uint8 => ColumnValue::Uint8(b[0]),
            DT::Uint16 => ColumnValue::Uint16(u16::from_le_bytes([b[0], b[1]])),
            DT::Uint32 => ColumnValue::Uint32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            DT::Uint64 => ColumnValue::Uint64(u64::from_le_bytes(b.try_into().ok()?)),
            DT::Float => ColumnValue::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            DT::Double => ColumnValue::Double(f64::from_le_bytes(b.try_into().ok()?)),
            DT::FKey => ColumnValue::FKey(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            DT::String | DT::Blob => return None,
        })
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for ColumnValue {
            fn from(v: $ty) -> Self {
                ColumnValue::$variant(v)
            }
        })*
    };
}

impl_from! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float,
    f64 => Double,
    String => String,
    Vec<u8> => Blob,
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::String(v.to_string())
    }
}

impl From<&[u8]> for ColumnValue {
    fn from(v: &[u8]) -> Self {
        ColumnValue::Blob(v.to_vec())
    }
}

/// Packed doubles are a common blob payload for statistics values.
impl From<&[f64]> for ColumnValue {
    fn from(values: &[f64]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        ColumnValue::Blob(bytes)
    }
}

impl ColumnValue {
    /// Build a foreign-key value pointing at `id`. Truncates to the 32-bit
    /// on-disk representation.
    pub fn fkey(id: DatabaseId) -> ColumnValue {
        ColumnValue::FKey(id as i32)
    }
}

/// One (column name, value) pair in an insert or update bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub column: String,
    pub value: ColumnValue,
}

impl NamedValue {
    pub fn new(column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        NamedValue {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_pack_unpack_roundtrip() {
        let values = [
            ColumnValue::Int16(-42),
            ColumnValue::Uint64(u64::MAX),
            ColumnValue::Double(3.25),
            ColumnValue::FKey(7),
        ];
        for v in values {
            let mut bytes = Vec::new();
            assert!(v.pack_fixed(&mut bytes));
            assert_eq!(ColumnValue::unpack_fixed(v.data_type(), &bytes), Some(v));
        }
    }

    #[test]
    fn variable_width_values_refuse_packing() {
        let mut bytes = Vec::new();
        assert!(!ColumnValue::String("abc".into()).pack_fixed(&mut bytes));
        assert!(bytes.is_empty());
    }

    #[test]
    fn packed_double_blob_layout() {
        let vals = [1.0f64, 2.0, 3.0];
        let blob: ColumnValue = vals.as_slice().into();
        match blob {
            ColumnValue::Blob(bytes) => {
                assert_eq!(bytes.len(), 24);
                assert_eq!(f64::from_le_bytes(bytes[8..16].try_into().unwrap()), 2.0);
            }
            other => panic!("expected blob, got {:?}", other),
        }
    }

    #[test]
    fn numeric_cast_to_double() {
        assert_eq!(ColumnValue::Uint8(200).as_f64(), Some(200.0));
        assert_eq!(ColumnValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(ColumnValue::String("x".into()).as_f64(), None);
    }
}
