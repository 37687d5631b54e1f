//! Case-insensitive name handling.
//!
//! Namespace and storage-type names are case-insensitive throughout the
//! registration surface. Lowercasing once at the boundary keeps every map
//! lookup downstream a plain string comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A name that has been folded to lowercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LowercaseName(String);

impl LowercaseName {
    pub fn new(name: impl AsRef<str>) -> Self {
        LowercaseName(name.as_ref().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LowercaseName {
    fn from(s: &str) -> Self {
        LowercaseName::new(s)
    }
}

impl From<String> for LowercaseName {
    fn from(s: String) -> Self {
        LowercaseName::new(s)
    }
}

impl fmt::Display for LowercaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
