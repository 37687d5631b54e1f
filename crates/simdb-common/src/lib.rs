//! SimDB shared types.
//!
//! This crate provides:
//! - The `DbError` taxonomy and `Result` alias used across all SimDB crates
//! - Database record IDs and column data types
//! - Typed column values and query constraints
//! - Case-insensitive name handling for namespaces and storage types

pub mod constraint;
pub mod error;
pub mod name;
pub mod types;
pub mod value;

pub use constraint::{Constraint, ConstraintValue, WhereClause};
pub use error::{DbError, Result};
pub use name::LowercaseName;
pub use types::{ColumnDataType, DatabaseId, NO_OBJECT};
pub use value::{ColumnValue, NamedValue};

/// Generate a random filename stem for a new database file.
///
/// Callers control the directory a database lives in, not the file name;
/// the stem is a v4 UUID (36 hex chars plus hyphens) so that parallel
/// simulations never collide in a shared output directory.
pub fn random_database_stem() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_stems_are_uuid_shaped_and_unique() {
        let a = random_database_stem();
        let b = random_database_stem();
        assert_eq!(a.len(), 36);
        assert_eq!(a.chars().filter(|c| *c == '-').count(), 4);
        assert_ne!(a, b);
    }
}
