//! TreeData - In-memory Hierarchy
//!
//! A forest of items addressed by id, and the in-memory hierarchical
//! provider built on it.

use super::{DataProvider, GridItem, Query};
use crate::error::{Error, Result};
use ahash::AHashMap;
use std::sync::{Arc, RwLock};

struct TreeNode<T: GridItem> {
    item: T,
    parent: Option<T::Id>,
    children: Vec<T::Id>,
}

/// In-memory forest of items
pub struct TreeData<T: GridItem> {
    roots: Vec<T::Id>,
    nodes: AHashMap<T::Id, TreeNode<T>>,
}

impl<T: GridItem> TreeData<T> {
    /// Create an empty forest
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            nodes: AHashMap::new(),
        }
    }

    // ==================== Mutation ====================

    /// Append an item under `parent` (root level when `None`)
    pub fn add_item(&mut self, parent: Option<&T>, item: T) -> Result<()> {
        let id = item.id();
        if self.nodes.contains_key(&id) {
            return Err(Error::invalid_state(format!("Item {id:?} is already in the tree")));
        }
        let parent_id = match parent {
            Some(parent) => {
                let parent_id = parent.id();
                let Some(node) = self.nodes.get_mut(&parent_id) else {
                    return Err(Error::unknown_item(parent));
                };
                node.children.push(id.clone());
                Some(parent_id)
            }
            None => {
                self.roots.push(id.clone());
                None
            }
        };
        self.nodes.insert(
            id,
            TreeNode {
                item,
                parent: parent_id,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Append several items under the same parent
    pub fn add_items(&mut self, parent: Option<&T>, items: impl IntoIterator<Item = T>) -> Result<()> {
        for item in items {
            self.add_item(parent, item)?;
        }
        Ok(())
    }

    /// Replace the stored copy of an item, keeping its position
    pub fn update_item(&mut self, item: T) -> Result<()> {
        match self.nodes.get_mut(&item.id()) {
            Some(node) => {
                node.item = item;
                Ok(())
            }
            None => Err(Error::unknown_item(&item)),
        }
    }

    /// Remove an item and its whole subtree, returning the removed items
    pub fn remove_item(&mut self, item: &T) -> Result<Vec<T>> {
        let id = item.id();
        let Some(node) = self.nodes.get(&id) else {
            return Err(Error::unknown_item(item));
        };
        match node.parent.clone() {
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|child| child != &id);
                }
            }
            None => self.roots.retain(|root| root != &id),
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children.iter().cloned());
                removed.push(node.item);
            }
        }
        Ok(removed)
    }

    /// Move an item with its subtree to the end of `parent`'s children
    pub fn move_item(&mut self, item: &T, parent: Option<&T>) -> Result<()> {
        let id = item.id();
        let Some(old_parent) = self.nodes.get(&id).map(|node| node.parent.clone()) else {
            return Err(Error::unknown_item(item));
        };
        let new_parent = match parent {
            Some(parent) => {
                let parent_id = parent.id();
                if !self.nodes.contains_key(&parent_id) {
                    return Err(Error::unknown_item(parent));
                }
                // walk up from the new parent; hitting the item means a cycle
                let mut cursor = Some(parent_id.clone());
                while let Some(current) = cursor {
                    if current == id {
                        return Err(Error::invalid_state(format!(
                            "Cannot move {id:?} under its own subtree"
                        )));
                    }
                    cursor = self.nodes.get(&current).and_then(|node| node.parent.clone());
                }
                Some(parent_id)
            }
            None => None,
        };

        match &old_parent {
            Some(parent_id) => {
                if let Some(node) = self.nodes.get_mut(parent_id) {
                    node.children.retain(|child| child != &id);
                }
            }
            None => self.roots.retain(|root| root != &id),
        }
        match &new_parent {
            Some(parent_id) => {
                if let Some(node) = self.nodes.get_mut(parent_id) {
                    node.children.push(id.clone());
                }
            }
            None => self.roots.push(id.clone()),
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = new_parent;
        }
        Ok(())
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.roots.clear();
        self.nodes.clear();
    }

    // ==================== Queries ====================

    pub fn contains(&self, item: &T) -> bool {
        self.nodes.contains_key(&item.id())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct children of `parent`, in insertion order
    pub fn children(&self, parent: Option<&T>) -> Vec<T> {
        self.child_ids(parent)
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|node| node.item.clone()))
            .collect()
    }

    /// Number of direct children of `parent`
    pub fn child_count(&self, parent: Option<&T>) -> usize {
        self.child_ids(parent).len()
    }

    /// Parent of an item, `None` for roots and unknown items
    pub fn parent(&self, item: &T) -> Option<T> {
        let parent_id = self.nodes.get(&item.id())?.parent.as_ref()?;
        self.nodes.get(parent_id).map(|node| node.item.clone())
    }

    /// Root-level items
    pub fn root_items(&self) -> Vec<T> {
        self.children(None)
    }

    /// Every item in depth-first, pre-order
    pub fn depth_first(&self) -> Vec<T> {
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&T::Id> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                result.push(node.item.clone());
                stack.extend(node.children.iter().rev());
            }
        }
        result
    }

    fn child_ids(&self, parent: Option<&T>) -> &[T::Id] {
        match parent {
            Some(parent) => self
                .nodes
                .get(&parent.id())
                .map(|node| node.children.as_slice())
                .unwrap_or(&[]),
            None => &self.roots,
        }
    }

    /// Whether the item or any of its descendants passes the filter
    fn subtree_matches(&self, id: &T::Id, query: &Query<T>) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        query.accepts(&node.item)
            || node
                .children
                .iter()
                .any(|child| self.subtree_matches(child, query))
    }

    fn visible_children(&self, query: &Query<T>) -> Vec<T> {
        let ids = self.child_ids(query.parent.as_ref());
        if query.filter.is_none() {
            return ids
                .iter()
                .filter_map(|id| self.nodes.get(id).map(|node| node.item.clone()))
                .collect();
        }
        ids.iter()
            .filter(|id| self.subtree_matches(id, query))
            .filter_map(|id| self.nodes.get(id).map(|node| node.item.clone()))
            .collect()
    }
}

impl<T: GridItem> Default for TreeData<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory hierarchical provider over a shared [`TreeData`]
///
/// A filtered query keeps an item when it or any descendant matches, so
/// matching rows stay reachable through their ancestors.
pub struct TreeDataProvider<T: GridItem> {
    data: Arc<RwLock<TreeData<T>>>,
}

impl<T: GridItem> TreeDataProvider<T> {
    pub fn new(data: TreeData<T>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Read the tree
    pub fn read<R>(&self, f: impl FnOnce(&TreeData<T>) -> R) -> Result<R> {
        let guard = self
            .data
            .read()
            .map_err(|_| Error::fetch("tree data lock poisoned"))?;
        Ok(f(&guard))
    }

    /// Mutate the tree; signal the change to the grid afterwards
    pub fn update<R>(&self, f: impl FnOnce(&mut TreeData<T>) -> R) -> Result<R> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| Error::fetch("tree data lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl<T: GridItem> Clone for TreeDataProvider<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<T: GridItem + Sync> DataProvider<T> for TreeDataProvider<T>
where
    T::Id: Sync,
{
    fn fetch(&self, query: &Query<T>) -> Result<Vec<T>> {
        self.read(|data| query.apply_in_memory(data.visible_children(query)))
    }

    fn size(&self, query: &Query<T>) -> Result<Option<usize>> {
        self.read(|data| Some(data.visible_children(query).len()))
    }

    fn is_in_memory(&self) -> bool {
        true
    }

    fn is_hierarchical(&self) -> bool {
        true
    }

    fn has_children(&self, item: &T) -> bool {
        self.read(|data| data.child_count(Some(item)) > 0)
            .unwrap_or(false)
    }

    fn contains(&self, item: &T) -> Option<bool> {
        self.read(|data| data.contains(item)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeData<String> {
        let mut data = TreeData::new();
        for root in ["a", "b"] {
            data.add_item(None, root.to_string()).expect("add root");
            for child in 0..2 {
                data.add_item(Some(&root.to_string()), format!("{root}{child}"))
                    .expect("add child");
            }
        }
        data
    }

    #[test]
    fn test_children_and_parent() {
        let data = sample();
        assert_eq!(data.root_items(), vec!["a", "b"]);
        assert_eq!(data.children(Some(&"a".to_string())), vec!["a0", "a1"]);
        assert_eq!(data.parent(&"b1".to_string()), Some("b".to_string()));
        assert_eq!(data.parent(&"a".to_string()), None);
    }

    #[test]
    fn test_depth_first_order() {
        let data = sample();
        assert_eq!(data.depth_first(), vec!["a", "a0", "a1", "b", "b0", "b1"]);
    }

    #[test]
    fn test_remove_subtree() {
        let mut data = sample();
        let removed = data.remove_item(&"a".to_string()).expect("remove");
        assert_eq!(removed.len(), 3);
        assert_eq!(data.len(), 3);
        assert_eq!(data.root_items(), vec!["b"]);
        assert!(data.remove_item(&"a0".to_string()).is_err());
    }

    #[test]
    fn test_move_subtree() {
        let mut data = sample();
        data.move_item(&"a".to_string(), Some(&"b0".to_string()))
            .expect("move");
        assert_eq!(data.root_items(), vec!["b"]);
        assert_eq!(data.children(Some(&"b0".to_string())), vec!["a"]);
        assert_eq!(data.parent(&"a1".to_string()), Some("a".to_string()));
        assert_eq!(data.depth_first(), vec!["b", "b0", "a", "a0", "a1", "b1"]);

        data.move_item(&"a".to_string(), None).expect("move to root");
        assert_eq!(data.root_items(), vec!["b", "a"]);
    }

    #[test]
    fn test_move_into_own_subtree_rejected() {
        let mut data = sample();
        let result = data.move_item(&"a".to_string(), Some(&"a1".to_string()));
        assert!(matches!(result, Err(Error::InvalidState { .. })));
        assert!(data.move_item(&"zzz".to_string(), None).is_err());
        assert_eq!(data.children(Some(&"a".to_string())), vec!["a0", "a1"]);
    }

    #[test]
    fn test_duplicate_and_orphan_rejected() {
        let mut data = sample();
        assert!(data.add_item(None, "a".to_string()).is_err());
        assert!(data.add_item(Some(&"zzz".to_string()), "x".to_string()).is_err());
    }

    #[test]
    fn test_provider_filter_keeps_ancestors() {
        let provider = TreeDataProvider::new(sample());
        let filter: crate::data::Filter<String> = Arc::new(|s: &String| s == "b1");
        let roots = provider
            .fetch(&Query::all().with_filter(Some(filter.clone())))
            .expect("fetch");
        assert_eq!(roots, vec!["b"]);
        let children = provider
            .fetch(&Query::all().with_filter(Some(filter)).with_parent(Some("b".to_string())))
            .expect("fetch");
        assert_eq!(children, vec!["b1"]);
    }

    #[test]
    fn test_provider_counts_and_children_flag() {
        let provider = TreeDataProvider::new(sample());
        let query = Query::all().with_parent(Some("a".to_string()));
        assert_eq!(provider.size(&query).expect("size"), Some(2));
        assert!(provider.has_children(&"a".to_string()));
        assert!(!provider.has_children(&"a0".to_string()));
    }
}
