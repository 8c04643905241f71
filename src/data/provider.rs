//! DataProvider Trait
//!
//! Abstraction for data sources to support both in-memory and lazy-loaded
//! data, flat or hierarchical.

use super::{GridItem, Query};
use crate::error::{Error, Result};
use std::sync::{Arc, RwLock};

/// Source of items for a grid
///
/// Calls are blocking and bounded. A provider must return items for exactly
/// the queried parent and window, in the queried order.
pub trait DataProvider<T: GridItem>: Send {
    /// Fetch the items of `query.parent` in the window `offset..offset + limit`
    fn fetch(&self, query: &Query<T>) -> Result<Vec<T>>;

    /// Count the children of `query.parent`; `None` when the provider cannot count
    fn size(&self, query: &Query<T>) -> Result<Option<usize>>;

    /// Whether all data lives in memory (enables in-memory sorting and select-all)
    fn is_in_memory(&self) -> bool {
        false
    }

    /// Whether items can have children
    fn is_hierarchical(&self) -> bool {
        false
    }

    /// Whether an item has children
    fn has_children(&self, _item: &T) -> bool {
        false
    }

    /// Whether an item is part of the dataset; `None` when the provider cannot tell
    fn contains(&self, _item: &T) -> Option<bool> {
        None
    }
}

/// In-memory flat list provider
///
/// Clones share the same backing list, so the host keeps one clone to mutate
/// the data and signals the change to the grid afterwards.
pub struct ListDataProvider<T> {
    items: Arc<RwLock<Vec<T>>>,
}

impl<T: GridItem> ListDataProvider<T> {
    /// Create a new provider over a list
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    /// Snapshot of the backing list
    pub fn items(&self) -> Result<Vec<T>> {
        self.read(|items| items.clone())
    }

    /// Mutate the backing list
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Result<R> {
        let mut guard = self
            .items
            .write()
            .map_err(|_| Error::fetch("list data lock poisoned"))?;
        Ok(f(&mut guard))
    }

    fn read<R>(&self, f: impl FnOnce(&Vec<T>) -> R) -> Result<R> {
        let guard = self
            .items
            .read()
            .map_err(|_| Error::fetch("list data lock poisoned"))?;
        Ok(f(&guard))
    }
}

impl<T> Clone for ListDataProvider<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: GridItem + Sync> DataProvider<T> for ListDataProvider<T> {
    fn fetch(&self, query: &Query<T>) -> Result<Vec<T>> {
        if query.parent.is_some() {
            return Ok(Vec::new());
        }
        self.read(|items| query.apply_in_memory(items.iter().cloned()))
    }

    fn size(&self, query: &Query<T>) -> Result<Option<usize>> {
        if query.parent.is_some() {
            return Ok(Some(0));
        }
        self.read(|items| Some(items.iter().filter(|item| query.accepts(item)).count()))
    }

    fn is_in_memory(&self) -> bool {
        true
    }

    fn contains(&self, item: &T) -> Option<bool> {
        let id = item.id();
        self.read(|items| items.iter().any(|candidate| candidate.id() == id))
            .ok()
    }
}

type FetchFn<T> = Box<dyn Fn(&Query<T>) -> Result<Vec<T>> + Send + Sync>;
type CountFn<T> = Box<dyn Fn(&Query<T>) -> Result<usize> + Send + Sync>;
type HasChildrenFn<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Back-end style provider built from callbacks
///
/// Sorting is expected to happen in the fetch callback using
/// `query.sort_orders`. Without a count callback the size is unknown and the
/// grid estimates it.
pub struct CallbackDataProvider<T: GridItem> {
    fetch: FetchFn<T>,
    count: Option<CountFn<T>>,
    has_children: Option<HasChildrenFn<T>>,
}

impl<T: GridItem> CallbackDataProvider<T> {
    /// Provider with exact counts
    pub fn new(
        fetch: impl Fn(&Query<T>) -> Result<Vec<T>> + Send + Sync + 'static,
        count: impl Fn(&Query<T>) -> Result<usize> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            count: Some(Box::new(count)),
            has_children: None,
        }
    }

    /// Provider that cannot count
    pub fn fetch_only(fetch: impl Fn(&Query<T>) -> Result<Vec<T>> + Send + Sync + 'static) -> Self {
        Self {
            fetch: Box::new(fetch),
            count: None,
            has_children: None,
        }
    }

    /// Make the provider hierarchical
    pub fn with_children(mut self, has_children: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.has_children = Some(Box::new(has_children));
        self
    }
}

impl<T: GridItem> DataProvider<T> for CallbackDataProvider<T> {
    fn fetch(&self, query: &Query<T>) -> Result<Vec<T>> {
        (self.fetch)(query)
    }

    fn size(&self, query: &Query<T>) -> Result<Option<usize>> {
        match &self.count {
            Some(count) => count(query).map(Some),
            None => Ok(None),
        }
    }

    fn is_hierarchical(&self) -> bool {
        self.has_children.is_some()
    }

    fn has_children(&self, item: &T) -> bool {
        self.has_children.as_ref().is_some_and(|f| f(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_provider_fetch_and_size() {
        let provider = ListDataProvider::new((0..10u32).collect());
        let page = provider.fetch(&Query::new(3, 4)).expect("fetch");
        assert_eq!(page, vec![3, 4, 5, 6]);
        assert_eq!(provider.size(&Query::all()).expect("size"), Some(10));
        assert!(provider.is_in_memory());
        assert!(!provider.is_hierarchical());
    }

    #[test]
    fn test_list_provider_has_no_children() {
        let provider = ListDataProvider::new(vec![1u32, 2]);
        let query = Query::all().with_parent(Some(1));
        assert!(provider.fetch(&query).expect("fetch").is_empty());
        assert_eq!(provider.size(&query).expect("size"), Some(0));
    }

    #[test]
    fn test_list_provider_clones_share_data() {
        let provider = ListDataProvider::new(vec![1u32, 2, 3]);
        let handle = provider.clone();
        handle.update(|items| items.retain(|n| *n != 2)).expect("update");
        assert_eq!(provider.items().expect("items"), vec![1, 3]);
        assert_eq!(provider.contains(&2), Some(false));
        assert_eq!(provider.contains(&3), Some(true));
    }

    #[test]
    fn test_callback_provider_without_count() {
        let provider = CallbackDataProvider::<u32>::fetch_only(|q| {
            Ok((q.offset as u32..).take(q.limit.min(5)).collect())
        });
        assert_eq!(provider.size(&Query::all()).expect("size"), None);
        assert_eq!(provider.fetch(&Query::new(2, 3)).expect("fetch"), vec![2, 3, 4]);
        assert!(!provider.is_in_memory());
    }
}
