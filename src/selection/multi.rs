//! Multi selection
//!
//! Insertion-ordered selected set with a "select all" indicator. The
//! indicator is set only by [`MultiSelection::select_all`] and cleared by any
//! deselection.

use super::SelectionEvent;
use crate::data::GridItem;
use hashlink::LinkedHashMap;

#[derive(Debug)]
pub struct MultiSelection<T: GridItem> {
    selected: LinkedHashMap<T::Id, T>,
    all_selected: bool,
}

impl<T: GridItem> MultiSelection<T> {
    pub fn new() -> Self {
        Self {
            selected: LinkedHashMap::new(),
            all_selected: false,
        }
    }

    // ==================== Getters ====================

    pub fn is_selected(&self, item: &T) -> bool {
        self.selected.contains_key(&item.id())
    }

    pub fn selected_items(&self) -> Vec<T> {
        self.selected.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_all_selected(&self) -> bool {
        self.all_selected
    }

    // ==================== Changes ====================

    pub fn select(&mut self, item: T, from_client: bool) -> Option<SelectionEvent<T>> {
        self.update_selection(vec![item], Vec::new(), from_client)
    }

    pub fn deselect(&mut self, item: &T, from_client: bool) -> Option<SelectionEvent<T>> {
        self.update_selection(Vec::new(), vec![item.clone()], from_client)
    }

    /// Apply additions and removals as one change
    ///
    /// An item in both lists ends up selected.
    pub fn update_selection(
        &mut self,
        add: Vec<T>,
        remove: Vec<T>,
        from_client: bool,
    ) -> Option<SelectionEvent<T>> {
        let add_ids: Vec<T::Id> = add.iter().map(GridItem::id).collect();
        let mut removed = Vec::new();
        for item in remove {
            let id = item.id();
            if add_ids.contains(&id) {
                continue;
            }
            if let Some(previous) = self.selected.remove(&id) {
                removed.push(previous);
            }
        }
        let mut added = Vec::new();
        for item in add {
            let id = item.id();
            if !self.selected.contains_key(&id) {
                self.selected.insert(id, item.clone());
                added.push(item);
            }
        }
        if added.is_empty() && removed.is_empty() {
            return None;
        }
        if !removed.is_empty() {
            self.all_selected = false;
        }
        Some(SelectionEvent::new(added, removed, from_client).with_all_selected(self.all_selected))
    }

    /// Select exactly `items`; sets the "select all" indicator
    pub fn select_all(&mut self, items: Vec<T>, from_client: bool) -> Option<SelectionEvent<T>> {
        let mut next: LinkedHashMap<T::Id, T> = LinkedHashMap::new();
        for item in items {
            next.insert(item.id(), item);
        }
        let removed: Vec<T> = self
            .selected
            .iter()
            .filter(|(id, _)| !next.contains_key(*id))
            .map(|(_, item)| item.clone())
            .collect();
        let added: Vec<T> = next
            .iter()
            .filter(|(id, _)| !self.selected.contains_key(*id))
            .map(|(_, item)| item.clone())
            .collect();
        self.selected = next;
        let was_all = std::mem::replace(&mut self.all_selected, true);
        if added.is_empty() && removed.is_empty() && was_all {
            return None;
        }
        Some(SelectionEvent::new(added, removed, from_client).with_all_selected(true))
    }

    pub fn deselect_all(&mut self, from_client: bool) -> Option<SelectionEvent<T>> {
        let was_all = std::mem::replace(&mut self.all_selected, false);
        if self.selected.is_empty() && !was_all {
            return None;
        }
        let removed: Vec<T> = std::mem::take(&mut self.selected).into_iter().map(|(_, item)| item).collect();
        Some(SelectionEvent::new(Vec::new(), removed, from_client))
    }

    pub fn refresh_item(&mut self, item: &T) {
        if let Some(existing) = self.selected.get_mut(&item.id()) {
            *existing = item.clone();
        }
    }
}

impl<T: GridItem> Default for MultiSelection<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_keeps_insertion_order() {
        let mut model = MultiSelection::new();
        model.select(3u32, false);
        model.select(1, false);
        model.select(2, false);
        model.select(1, false);
        assert_eq!(model.selected_items(), vec![3, 1, 2]);
    }

    #[test]
    fn test_select_all_then_toggle_one() {
        let mut model = MultiSelection::new();
        let event = model.select_all((0u32..10).collect(), true).expect("event");
        assert_eq!(event.added.len(), 10);
        assert!(model.is_all_selected());
        assert_eq!(model.len(), 10);

        let event = model.deselect(&4, true).expect("event");
        assert_eq!(event.removed, vec![4]);
        assert!(event.added.is_empty());
        assert!(!event.all_selected);
        assert!(!model.is_all_selected());
        assert_eq!(model.len(), 9);
        assert!(model.is_selected(&3));
    }

    #[test]
    fn test_select_all_drops_items_outside_the_set() {
        let mut model = MultiSelection::new();
        model.select(99u32, false);
        let event = model.select_all(vec![1, 2], false).expect("event");
        assert_eq!(event.removed, vec![99]);
        assert_eq!(model.selected_items(), vec![1, 2]);
    }

    #[test]
    fn test_update_selection_single_event() {
        let mut model = MultiSelection::new();
        model.update_selection(vec![1u32, 2, 3], Vec::new(), false);
        let event = model
            .update_selection(vec![4, 2], vec![1, 2], true)
            .expect("event");
        assert_eq!(event.added, vec![4]);
        assert_eq!(event.removed, vec![1]);
        assert_eq!(model.selected_items(), vec![2, 3, 4]);
    }

    #[test]
    fn test_deselect_all_clears_indicator() {
        let mut model = MultiSelection::new();
        assert!(model.deselect_all(false).is_none());
        model.select_all(vec![1u32, 2], false);
        let event = model.deselect_all(true).expect("event");
        assert_eq!(event.removed, vec![1, 2]);
        assert!(!model.is_all_selected());
        assert!(model.is_empty());
    }

    #[test]
    fn test_deselect_unselected_is_noop() {
        let mut model = MultiSelection::new();
        model.select(1u32, false);
        assert!(model.deselect(&2, true).is_none());
    }
}
