//! DataSource
//!
//! A provider bound to the current sort/filter state and page size. The
//! hierarchy mapper only talks to the provider through this.

use crate::data::{DataProvider, GridItem, Query};
use crate::error::Result;

/// Provider view used during one communicator operation
pub struct DataSource<'a, T: GridItem> {
    provider: &'a dyn DataProvider<T>,
    base: &'a Query<T>,
    page_size: usize,
}

impl<'a, T: GridItem> DataSource<'a, T> {
    /// `base` carries sorting and filtering; its window is ignored
    pub fn new(provider: &'a dyn DataProvider<T>, base: &'a Query<T>, page_size: usize) -> Self {
        Self {
            provider,
            base,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_hierarchical(&self) -> bool {
        self.provider.is_hierarchical()
    }

    pub fn has_children(&self, item: &T) -> bool {
        self.provider.is_hierarchical() && self.provider.has_children(item)
    }

    fn query(&self, parent: Option<&T>, offset: usize, limit: usize) -> Query<T> {
        self.base.window(offset, limit).with_parent(parent.cloned())
    }

    /// Children of `parent` in `offset..offset + limit`
    pub fn fetch(&self, parent: Option<&T>, offset: usize, limit: usize) -> Result<Vec<T>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut items = self.provider.fetch(&self.query(parent, offset, limit))?;
        items.truncate(limit);
        Ok(items)
    }

    /// Child count as reported by the provider
    pub fn count(&self, parent: Option<&T>) -> Result<Option<usize>> {
        self.provider.size(&self.query(parent, 0, usize::MAX))
    }

    /// Child count, paging through the children when the provider cannot count
    pub fn count_exact(&self, parent: Option<&T>) -> Result<usize> {
        if let Some(size) = self.count(parent)? {
            return Ok(size);
        }
        let mut total = 0;
        loop {
            let page = self.fetch(parent, total, self.page_size)?.len();
            total += page;
            if page < self.page_size {
                return Ok(total);
            }
        }
    }

    /// Every child of `parent`, in query order
    pub fn fetch_all(&self, parent: Option<&T>) -> Result<Vec<T>> {
        if let Some(size) = self.count(parent)? {
            return self.fetch(parent, 0, size);
        }
        let mut items = Vec::new();
        loop {
            let page = self.fetch(parent, items.len(), self.page_size)?;
            let done = page.len() < self.page_size;
            items.extend(page);
            if done {
                return Ok(items);
            }
        }
    }

    /// Every item of the data set in depth-first order
    pub fn fetch_all_recursive(&self) -> Result<Vec<T>> {
        let mut result = Vec::new();
        let mut stack: Vec<T> = self.fetch_all(None)?.into_iter().rev().collect();
        while let Some(item) = stack.pop() {
            if self.has_children(&item) {
                stack.extend(self.fetch_all(Some(&item))?.into_iter().rev());
            }
            result.push(item);
        }
        Ok(result)
    }
}
