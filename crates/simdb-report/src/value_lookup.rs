//! Direct SI value lookups over a shared row.

use crate::row_iterator::RowAccessor;
use simdb_common::{DbError, Result};
use std::sync::Arc;

enum LookupState {
    /// Only the leaf SI index is known yet.
    Placeholder { si_index: usize },
    Realized {
        accessor: Arc<RowAccessor>,
        si_index: usize,
    },
}

/// Reads one SI's current value out of a shared
/// [`RowAccessor`](crate::row_iterator::RowAccessor).
///
/// The placeholder form holds only the leaf SI index and is realized
/// later by pairing it with an accessor. Data methods on an unrealized
/// placeholder fail with [`DbError::PlaceholderNotRealized`].
pub struct StatInstValueLookup {
    state: LookupState,
}

impl StatInstValueLookup {
    /// Construct a realized lookup from an accessor and the SI's index
    /// in the accessor's row.
    pub fn new(accessor: &Arc<RowAccessor>, si_index: usize) -> Self {
        StatInstValueLookup {
            state: LookupState::Realized {
                accessor: Arc::clone(accessor),
                si_index,
            },
        }
    }

    /// Construct a placeholder holding only the leaf SI index.
    pub fn placeholder(si_index: usize) -> Self {
        StatInstValueLookup {
            state: LookupState::Placeholder { si_index },
        }
    }

    /// Pair a placeholder with its accessor. A no-op on an
    /// already-realized lookup.
    pub fn realize_placeholder(&mut self, accessor: &Arc<RowAccessor>) {
        if let LookupState::Placeholder { si_index } = self.state {
            self.state = LookupState::Realized {
                accessor: Arc::clone(accessor),
                si_index,
            };
        }
    }

    /// Whether this lookup's index is within the accessor's current
    /// row. Call after each row advance, or never, at your own risk —
    /// the same trade as checked vs unchecked indexing.
    pub fn is_index_valid_for_current_row(&self) -> Result<bool> {
        match &self.state {
            LookupState::Placeholder { .. } => Err(DbError::PlaceholderNotRealized),
            LookupState::Realized { accessor, si_index } => Ok(*si_index < accessor.len()),
        }
    }

    /// This SI's value in the row the accessor currently points at.
    pub fn current_value(&self) -> Result<f64> {
        match &self.state {
            LookupState::Placeholder { .. } => Err(DbError::PlaceholderNotRealized),
            LookupState::Realized { accessor, si_index } => {
                accessor.value_at(*si_index).ok_or_else(|| {
                    DbError::IndexOutOfRange(format!(
                        "SI index {} exceeds the current row of {} values",
                        si_index,
                        accessor.len()
                    ))
                })
            }
        }
    }
}
