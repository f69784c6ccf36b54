//! The sort request a proxy remembers and re-applies to its sources.

use super::traits::SortOrder;

/// A column and direction to sort by.
///
/// Proxies keep the last request they received so that models mounted
/// later can be brought into the same order before they are exposed.
/// A `column` of `None` means no sort is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColumnSort {
    column: Option<usize>,
    order: SortOrder,
}

impl ColumnSort {
    /// Creates a sort request.
    pub const fn new(column: Option<usize>, order: SortOrder) -> Self {
        Self { column, order }
    }

    /// The "no sort" value.
    pub const fn none() -> Self {
        Self::new(None, SortOrder::Ascending)
    }

    /// Returns true if a column is set.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.column.is_some()
    }

    /// The proxy column to sort by.
    #[inline]
    pub fn column(&self) -> Option<usize> {
        self.column
    }

    /// The sort direction.
    #[inline]
    pub fn order(&self) -> SortOrder {
        self.order
    }
}
