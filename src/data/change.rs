//! Data change signals
//!
//! Providers do not push changes on their own; the host mutates the data and
//! then hands one of these to the grid.

use super::GridItem;

/// A change in a provider's data
#[derive(Debug, Clone)]
pub enum DataChange<T: GridItem> {
    /// Anything may have changed: counts, order, membership
    RefreshAll,
    /// An item's own data changed; with `with_children` its children may have changed too
    Refresh { item: T, with_children: bool },
    /// An item and its subtree were removed from the data; `descendants`
    /// lists whatever part of the subtree the host knows about
    Removed { item: T, descendants: Vec<T> },
}

impl<T: GridItem> DataChange<T> {
    pub fn refresh(item: T) -> Self {
        DataChange::Refresh {
            item,
            with_children: false,
        }
    }

    pub fn refresh_with_children(item: T) -> Self {
        DataChange::Refresh {
            item,
            with_children: true,
        }
    }

    pub fn removed(item: T) -> Self {
        DataChange::Removed {
            item,
            descendants: Vec::new(),
        }
    }

    /// Build from [`TreeData::remove_item`](super::TreeData::remove_item)'s
    /// result: the removed item first, then its descendants
    pub fn removed_subtree(mut removed: Vec<T>) -> Option<Self> {
        if removed.is_empty() {
            return None;
        }
        let item = removed.remove(0);
        Some(DataChange::Removed {
            item,
            descendants: removed,
        })
    }
}
