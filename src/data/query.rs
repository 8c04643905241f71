//! Query
//!
//! The contract between a data communicator and a DataProvider: which
//! parent, which window, which order, which filter.

use super::GridItem;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// In-memory comparator used by in-memory providers
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// In-memory filter predicate
pub type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// The opposite direction
    pub fn reversed(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    /// Apply the direction to an ascending ordering
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Back-end sort order forwarded to providers that sort themselves
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct QuerySortOrder {
    pub property: String,
    pub direction: SortDirection,
}

impl QuerySortOrder {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// A fetch or count request against a DataProvider
pub struct Query<T: GridItem> {
    /// First item index, relative to the parent's children
    pub offset: usize,
    /// Maximum number of items to return
    pub limit: usize,
    /// Back-end sort orders, in priority order
    pub sort_orders: Vec<QuerySortOrder>,
    /// In-memory comparator, for providers that sort in memory
    pub comparator: Option<Comparator<T>>,
    /// Filter predicate
    pub filter: Option<Filter<T>>,
    /// Parent whose children are requested; `None` means the root level
    pub parent: Option<T>,
}

impl<T: GridItem> Query<T> {
    /// Query for a window of root items
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            sort_orders: Vec::new(),
            comparator: None,
            filter: None,
            parent: None,
        }
    }

    /// Query for every root item
    pub fn all() -> Self {
        Self::new(0, usize::MAX)
    }

    pub fn with_parent(mut self, parent: Option<T>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_filter(mut self, filter: Option<Filter<T>>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sorting(
        mut self,
        sort_orders: Vec<QuerySortOrder>,
        comparator: Option<Comparator<T>>,
    ) -> Self {
        self.sort_orders = sort_orders;
        self.comparator = comparator;
        self
    }

    /// Same query for a different window
    pub fn window(&self, offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..self.clone()
        }
    }

    /// Whether an item passes the filter
    pub fn accepts(&self, item: &T) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(item))
    }

    /// Filter, stably sort and window an in-memory sequence
    pub fn apply_in_memory(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        let mut matching: Vec<T> = items.into_iter().filter(|item| self.accepts(item)).collect();
        if let Some(comparator) = &self.comparator {
            // sort_by is stable, equal items keep their backing order
            matching.sort_by(|a, b| comparator(a, b));
        }
        matching
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

impl<T: GridItem> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            limit: self.limit,
            sort_orders: self.sort_orders.clone(),
            comparator: self.comparator.clone(),
            filter: self.filter.clone(),
            parent: self.parent.clone(),
        }
    }
}

impl<T: GridItem> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("sort_orders", &self.sort_orders)
            .field("comparator", &self.comparator.is_some())
            .field("filter", &self.filter.is_some())
            .field("parent", &self.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_in_memory_windows_and_filters() {
        let query = Query::<u32>::new(1, 2).with_filter(Some(Arc::new(|n: &u32| n % 2 == 0)));
        let result = query.apply_in_memory(0..10u32);
        assert_eq!(result, vec![2, 4]);
    }

    #[test]
    fn test_apply_in_memory_sort_is_stable() {
        let items = vec!["b1", "a1", "b2", "a2"];
        let by_letter: Comparator<&'static str> = Arc::new(|a, b| a[..1].cmp(&b[..1]));
        let query = Query::all().with_sorting(Vec::new(), Some(by_letter));
        assert_eq!(query.apply_in_memory(items), vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn test_sort_direction_apply() {
        assert_eq!(SortDirection::Descending.apply(Ordering::Less), Ordering::Greater);
        assert_eq!(SortDirection::Ascending.reversed(), SortDirection::Descending);
    }
}
